use std::{collections::BTreeSet, fmt, path::{Path, PathBuf}};
use serde::{Deserialize, Serialize};
use super::super::{
    error::Error,
    samples::{self, CollectedData},
};

/// Ratio observed at a read-ahead window corner of a flagged candidate.
/// Attached so a runtime consumer can watch the corner to tell overlapping
/// fault clusters apart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CornerProbe {
    pub page: usize,
    pub ratio: f64,
}

/// One accepted event(-group) → page assignment. The owning mapping is
/// referenced by index into the collected data, not by an embedded link.
#[derive(Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub mapping: usize,
    pub page: usize,
    pub file: PathBuf,
    /// byte offset of the page within the backing file
    pub offset: u64,
    pub frame: Option<u64>,
    /// unclamped signed score, ratio minus noise
    pub fitness: f64,
    pub ratio: f64,
    pub group: BTreeSet<usize>,
    /// the subset of `group` that was still uncovered when this candidate
    /// was accepted
    pub newly_covered: BTreeSet<usize>,
    /// present iff corner probing could not separate this candidate from a
    /// neighbour within one read-ahead window
    pub corner_probes: Option<Vec<CornerProbe>>,
}

/// Final report of one classification pass: accepted candidates, the events
/// no page could describe, and the raw data they were derived from.
#[derive(Serialize, Deserialize)]
pub struct ClassificationResult {
    pub data: CollectedData,
    pub candidates: Vec<Candidate>,
    pub unclassified: Vec<usize>,
}

impl ClassificationResult {
    pub fn save<P>(&self, path: P) -> Result<(), Error>
    where
        P: AsRef<Path>,
    {
        samples::save(self, path.as_ref())
    }

    pub fn load<P>(path: P) -> Result<Self, Error>
    where
        P: AsRef<Path>,
    {
        samples::load(path.as_ref())
    }

    fn label_set(&self, events: &BTreeSet<usize>) -> String {
        events
            .iter()
            .map(|&e| self.data.event_labels[e].as_str())
            .collect::<Vec<&str>>()
            .join(", ")
    }
}

impl fmt::Display for ClassificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "classified {} of {} events",
            self.data.event_labels.len() - 1 - self.unclassified.len(),
            self.data.event_labels.len() - 1,
        )?;
        for candidate in &self.candidates {
            writeln!(f)?;
            writeln!(f, "event group: {}", self.label_set(&candidate.group))?;
            if candidate.newly_covered != candidate.group {
                writeln!(f, "  newly covered: {}", self.label_set(&candidate.newly_covered))?;
            }
            write!(
                f,
                "  file: {:?} offset: 0x{:x} frame: ",
                candidate.file, candidate.offset,
            )?;
            match candidate.frame {
                Some(frame) => writeln!(f, "0x{:x}", frame)?,
                None => writeln!(f, "not resident")?,
            }
            writeln!(
                f,
                "  fitness: {:.3} ratio: {:.2}",
                candidate.fitness, candidate.ratio,
            )?;
            if let Some(probes) = &candidate.corner_probes {
                let rendered = probes
                    .iter()
                    .map(|p| format!("page {} ratio {:.2}", p.page, p.ratio))
                    .collect::<Vec<String>>()
                    .join(", ");
                writeln!(f, "  corner-assisted: {}", rendered)?;
            }
        }
        if !self.unclassified.is_empty() {
            let labels = self
                .unclassified
                .iter()
                .map(|&e| self.data.event_labels[e].as_str())
                .collect::<Vec<&str>>()
                .join(", ");
            writeln!(f)?;
            writeln!(f, "no suitable page found for: {}", labels)?;
        }
        Ok(())
    }
}
