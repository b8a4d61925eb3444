// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

use std::{
    io::{self, BufRead},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};
use structopt::StructOpt;
use cacheprof::{Classifier, ClassifierConfig, Error, Event, EventSet, Sampler, SamplerConfig};

#[derive(StructOpt)]
#[structopt(about = "profiles which page offsets of shared files are touched by each event")]
struct Args {
    /// pid of the target process
    pid: u32,
    /// sampling rounds per event
    #[structopt(short, long, default_value = "100")]
    samples: u32,
    /// operator-triggered event, repeatable; the idle event is appended
    /// automatically
    #[structopt(short, long = "event", number_of_values = 1)]
    events: Vec<String>,
    /// fixed delays instead of waiting for operator confirmation
    #[structopt(long)]
    no_input: bool,
    /// seconds the idle event waits, long enough to catch infrequent
    /// periodic accesses
    #[structopt(long, default_value = "30")]
    idle_wait: u64,
    /// write raw matrices and classification here (.json or .bin)
    #[structopt(long)]
    save: Option<PathBuf>,
    #[structopt(flatten)]
    classifier: ClassifierConfig,
}

fn operator_event(label: &str, no_input: bool) -> Event {
    let name = label.to_string();
    if no_input {
        Event::new(label, move || {
            println!("trigger event: {}", name);
            thread::sleep(Duration::from_secs(3));
            println!("stop");
            thread::sleep(Duration::from_secs(1));
        })
    } else {
        Event::new(label, move || {
            println!("trigger event: {}, press enter when done...", name);
            let stdin = io::stdin();
            let mut line = String::new();
            let _ = stdin.lock().read_line(&mut line);
        })
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::from_args();
    if args.events.is_empty() {
        return Err("at least one --event is required".into());
    }

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || running.store(false, Ordering::Relaxed))?;
    }

    let events = args
        .events
        .iter()
        .map(|label| operator_event(label, args.no_input))
        .collect::<Vec<Event>>();
    let idle_wait = Duration::from_secs(args.idle_wait);
    let idle = Event::new("idle", move || thread::sleep(idle_wait));
    let mut events = EventSet::with_trailing_idle(events, idle);

    log::info!("starting in 5s, bring the target into focus");
    thread::sleep(Duration::from_secs(5));

    let sampler = Sampler::new(args.pid, SamplerConfig::default(), running);
    let data = match sampler.collect(&mut events, args.samples) {
        Ok(data) => data,
        Err(Error::Interrupted) => {
            log::warn!("collection interrupted, partial samples discarded");
            return Ok(());
        },
        Err(error) => return Err(error.into()),
    };

    let result = Classifier::new(args.classifier).classify(&data);
    println!("{}", result);

    if let Some(path) = &args.save {
        result.save(path)?;
        log::info!("results written to {:?}", path);
    }

    Ok(())
}
