// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

use std::path::PathBuf;
use structopt::StructOpt;
use cacheprof::{ClassificationResult, Classifier, ClassifierConfig};

#[derive(StructOpt)]
#[structopt(about = "re-runs classification over previously collected raw data")]
struct Args {
    /// saved results file (.json or .bin)
    load: PathBuf,
    /// write the reprocessed results here (.json or .bin)
    #[structopt(long)]
    save: Option<PathBuf>,
    #[structopt(flatten)]
    classifier: ClassifierConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::from_args();

    let saved = ClassificationResult::load(&args.load)?;
    log::info!(
        "loaded {} mappings, {} events, {} samples",
        saved.data.mappings.len(),
        saved.data.event_labels.len(),
        saved.data.sample_count,
    );

    let result = Classifier::new(args.classifier).classify(&saved.data);
    println!("{}", result);

    if let Some(path) = &args.save {
        result.save(path)?;
        log::info!("results written to {:?}", path);
    }

    Ok(())
}
