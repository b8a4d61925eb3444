use std::{
    fs::File,
    path::{Path, PathBuf},
};
use serde::{Deserialize, Serialize};
use super::error::Error;

/// Dense per-mapping hit-count table, `counts[page][event]`. Written by the
/// sampler only, read-only afterwards. Every cell stays within
/// `0..=sample_count`.
#[derive(Clone, Serialize, Deserialize)]
pub struct SampleMatrix {
    events: usize,
    counts: Vec<Vec<u32>>,
}

impl SampleMatrix {
    pub fn new(pages: usize, events: usize) -> Self {
        SampleMatrix {
            events,
            counts: vec![vec![0; events]; pages],
        }
    }

    pub fn pages(&self) -> usize {
        self.counts.len()
    }

    pub fn events(&self) -> usize {
        self.events
    }

    pub fn count(&self, page: usize, event: usize) -> u32 {
        self.counts[page][event]
    }

    pub fn record(&mut self, page: usize, event: usize) {
        self.counts[page][event] += 1;
    }

    /// Hit-ratio rows, one per event, each entry `count / sample_count` in
    /// `[0, 1]`. Pure elementwise scaling of the integer matrix.
    pub fn event_ratios(&self, sample_count: u32) -> Vec<Vec<f64>> {
        (0..self.events)
            .map(|event| {
                self.counts
                    .iter()
                    .map(|row| f64::from(row[event]) / f64::from(sample_count))
                    .collect()
            })
            .collect()
    }
}

/// One profiled file-backed mapping: where it lives in the file, the frame
/// snapshot taken under freeze, and the accumulated hit counts.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProfiledMapping {
    pub path: PathBuf,
    pub file_offset: u64,
    pub size: u64,
    pub frames: Vec<Option<u64>>,
    pub counts: SampleMatrix,
}

impl ProfiledMapping {
    pub fn pages(&self) -> usize {
        self.frames.len()
    }
}

/// Everything one collection run produced. Self-contained: classification
/// needs no live target, only this.
#[derive(Clone, Serialize, Deserialize)]
pub struct CollectedData {
    pub sample_count: u32,
    pub event_labels: Vec<String>,
    pub idle_event: usize,
    pub mappings: Vec<ProfiledMapping>,
}

impl CollectedData {
    pub fn save<P>(&self, path: P) -> Result<(), Error>
    where
        P: AsRef<Path>,
    {
        save(self, path.as_ref())
    }

    pub fn load<P>(path: P) -> Result<Self, Error>
    where
        P: AsRef<Path>,
    {
        load(path.as_ref())
    }
}

fn binary_format(path: &Path) -> bool {
    path.extension().map(|e| e == "bin").unwrap_or(false)
}

pub(crate) fn save<T>(value: &T, path: &Path) -> Result<(), Error>
where
    T: Serialize,
{
    let file = File::create(path)?;
    if binary_format(path) {
        bincode::serialize_into(file, value)?;
    } else {
        serde_json::to_writer_pretty(file, value)?;
    }
    Ok(())
}

pub(crate) fn load<T>(path: &Path) -> Result<T, Error>
where
    T: serde::de::DeserializeOwned,
{
    let file = File::open(path)?;
    let value = if binary_format(path) {
        bincode::deserialize_from(file)?
    } else {
        serde_json::from_reader(file)?
    };
    Ok(value)
}
