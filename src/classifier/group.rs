use std::collections::{BTreeMap, BTreeSet, VecDeque};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use super::config::SimilarityMetric;

/// Events judged statistically indistinguishable within one mapping. `row`
/// indexes the merged ratio matrix of that mapping.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventGroup {
    pub row: usize,
    pub members: BTreeSet<usize>,
}

pub type GroupsBySize = BTreeMap<usize, Vec<EventGroup>>;

fn difference(a: &[f64], b: &[f64], metric: SimilarityMetric) -> f64 {
    match metric {
        SimilarityMetric::MaxAbsolute => a
            .iter()
            .zip(b)
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f64::max),
        SimilarityMetric::RootMeanSquare => {
            if a.is_empty() {
                return 0.0;
            }
            let sum = a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f64>();
            (sum / a.len() as f64).sqrt()
        },
    }
}

/// A candidate merge set holds together only if every pair within it stays
/// under the threshold; one event alone is trivially similar to itself.
fn similar(raw: &[Vec<f64>], members: &[usize], metric: SimilarityMetric, threshold: f64) -> bool {
    members
        .iter()
        .tuple_combinations()
        .all(|(&a, &b)| difference(&raw[a], &raw[b], metric) <= threshold)
}

fn mean_row(raw: &[Vec<f64>], members: &[usize]) -> Vec<f64> {
    let pages = raw.first().map(Vec::len).unwrap_or(0);
    (0..pages)
        .map(|page| {
            members.iter().map(|&e| raw[e][page]).sum::<f64>() / members.len() as f64
        })
        .collect()
}

/// Greedy incremental partition of the event indices. Pop an unprocessed
/// event, grow its merge set by testing each remaining event against the
/// whole set, defer the rest to the next pass. Once merged, events are one
/// group: if a later event made the set distinguishable again, it only did
/// so because it does not belong.
///
/// Returns the merged ratio matrix (one mean row per group) and the groups
/// bucketed by size. Every event lands in exactly one group.
pub fn group_events(
    raw: &[Vec<f64>],
    metric: SimilarityMetric,
    threshold: f64,
) -> (Vec<Vec<f64>>, GroupsBySize) {
    let mut queue = (0..raw.len()).collect::<VecDeque<usize>>();
    let mut merged = Vec::new();
    let mut by_size = GroupsBySize::new();

    while let Some(target) = queue.pop_front() {
        let mut group = vec![target];
        let mut deferred = VecDeque::new();

        while let Some(other) = queue.pop_front() {
            let mut candidate = group.clone();
            candidate.push(other);
            if similar(raw, &candidate, metric, threshold) {
                group = candidate;
            } else {
                deferred.push_back(other);
            }
        }

        let row = merged.len();
        merged.push(mean_row(raw, &group));
        by_size
            .entry(group.len())
            .or_insert_with(Vec::new)
            .push(EventGroup {
                row,
                members: group.into_iter().collect(),
            });

        queue = deferred;
    }

    (merged, by_size)
}
