// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

//! Turns the collected hit-count matrices into an event → page mapping.
//! Purely computational, no live target needed: ratios, similarity grouping,
//! fitness-ranked candidate search, read-ahead disambiguation, report.

mod config;
pub use self::config::{ClassifierConfig, NoiseModel, ReadaheadMode, SimilarityMetric};

mod group;
pub use self::group::EventGroup;

mod candidate;
pub use self::candidate::{Candidate, ClassificationResult, CornerProbe};

#[cfg(test)]
mod tests;

use std::collections::BTreeSet;
use self::group::GroupsBySize;
use super::{
    memory_map::PAGE_SIZE,
    samples::CollectedData,
};

/// Below this many rounds the ratio resolution is too coarse for the default
/// thresholds; advisory only, the run proceeds.
const MIN_SAMPLES: u32 = 10;

struct MappingAnalysis {
    /// hit-ratio rows, one per event
    raw: Vec<Vec<f64>>,
    /// one mean row per event group
    merged: Vec<Vec<f64>>,
    groups: GroupsBySize,
}

pub struct Classifier {
    config: ClassifierConfig,
}

impl Classifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Classifier { config }
    }

    pub fn classify(&self, data: &CollectedData) -> ClassificationResult {
        if data.sample_count < MIN_SAMPLES {
            log::warn!(
                "only {} samples per event, hit ratios are coarse",
                data.sample_count,
            );
        }

        let analyses = data
            .mappings
            .iter()
            .map(|mapping| {
                let raw = mapping.counts.event_ratios(data.sample_count);
                let (merged, groups) = group::group_events(
                    &raw,
                    self.config.similarity_metric,
                    self.config.similarity_threshold,
                );
                MappingAnalysis { raw, merged, groups }
            })
            .collect::<Vec<MappingAnalysis>>();

        let event_count = data.event_labels.len();
        let mut to_search = (0..event_count)
            .filter(|&e| e != data.idle_event)
            .collect::<BTreeSet<usize>>();
        let mut covered = BTreeSet::new();
        let mut candidates: Vec<Candidate> = Vec::new();

        // climb the group-size ladder: prefer single-event pages, fall back
        // to ever coarser groups for events nothing smaller describes
        for group_size in 1..event_count.max(1) {
            let mut deferred = BTreeSet::new();
            while let Some(event) = take_first(&mut to_search) {
                match self.best_candidate(event, group_size, &covered, data, &analyses) {
                    Some(candidate) => {
                        covered.extend(candidate.group.iter().cloned());
                        for member in &candidate.group {
                            to_search.remove(member);
                            deferred.remove(member);
                        }
                        candidates.push(candidate);
                    },
                    None => {
                        deferred.insert(event);
                    },
                }
            }
            to_search = deferred;
            if to_search.is_empty() {
                break;
            }
        }

        if let ReadaheadMode::CornerProbe = self.config.readahead {
            self.corner_pass(&mut candidates, data, &analyses);
        }

        if self.config.debug_heatmap {
            for candidate in &candidates {
                self.log_heatmaps(candidate, &analyses);
            }
        }

        ClassificationResult {
            data: data.clone(),
            candidates,
            unclassified: to_search.into_iter().collect(),
        }
    }

    /// Best candidate page over all mappings for `event` at the given group
    /// size. Groups containing the idle event are never acceptable. Across
    /// mappings the candidate covering more still-uncovered events wins,
    /// ties broken by higher fitness.
    fn best_candidate(
        &self,
        event: usize,
        group_size: usize,
        covered: &BTreeSet<usize>,
        data: &CollectedData,
        analyses: &[MappingAnalysis],
    ) -> Option<Candidate> {
        let mut best: Option<Candidate> = None;

        for (mapping_index, analysis) in analyses.iter().enumerate() {
            let groups = match analysis.groups.get(&group_size) {
                Some(groups) => groups,
                None => continue,
            };
            for group in groups {
                if !group.members.contains(&event) || group.members.contains(&data.idle_event) {
                    continue;
                }

                let fitness = self.fitness_row(analysis, group.row);
                let (page, page_fitness) = match argmax(&fitness) {
                    Some(found) => found,
                    None => continue,
                };
                if page_fitness <= self.config.fitness_threshold {
                    continue;
                }

                let newly_covered = group
                    .members
                    .difference(covered)
                    .cloned()
                    .collect::<BTreeSet<usize>>();
                let better = match &best {
                    None => true,
                    Some(best) => {
                        newly_covered.len() > best.newly_covered.len()
                            || (newly_covered.len() == best.newly_covered.len()
                                && page_fitness > best.fitness)
                    },
                };
                if !better {
                    continue;
                }

                let mapping = &data.mappings[mapping_index];
                best = Some(Candidate {
                    mapping: mapping_index,
                    page,
                    file: mapping.path.clone(),
                    offset: mapping.file_offset + page as u64 * PAGE_SIZE,
                    frame: mapping.frames[page],
                    fitness: page_fitness,
                    ratio: analysis.merged[group.row][page],
                    group: group.members.clone(),
                    newly_covered,
                    corner_probes: None,
                });
            }
        }

        best
    }

    /// Per-page fitness of one merged row: own ratio minus the noise of all
    /// other groups at that page.
    fn fitness_row(&self, analysis: &MappingAnalysis, row: usize) -> Vec<f64> {
        let pages = analysis.merged[row].len();
        let mut fitness = Vec::with_capacity(pages);
        for page in 0..pages {
            let own = analysis.merged[row][page];
            let others = analysis
                .merged
                .iter()
                .enumerate()
                .filter(|(r, _)| *r != row)
                .map(|(_, ratios)| ratios[page]);
            let noise = match self.config.noise_model {
                NoiseModel::LinearSum => others.sum::<f64>(),
                NoiseModel::RootSumSquare => others.map(|v| v * v).sum::<f64>().sqrt(),
            };
            fitness.push(own - noise);
        }

        if let ReadaheadMode::Noise = self.config.readahead {
            self.subtract_readahead_noise(analysis, &mut fitness);
        }
        fitness
    }

    /// Pages faulting anywhere inside the read-ahead window around a
    /// candidate pull the candidate in speculatively; treat their summed raw
    /// ratios as additional noise. Within the first window the kernel reads
    /// ahead from the start of the file, so the back reach differs there.
    fn subtract_readahead_noise(&self, analysis: &MappingAnalysis, fitness: &mut [f64]) {
        let window = self.config.readahead_window;
        if window < 2 {
            return;
        }
        let back = window / 2 - 1;
        let front = window / 2;
        let pages = fitness.len();

        let column_sum = (0..pages)
            .map(|page| analysis.raw.iter().map(|row| row[page]).sum::<f64>())
            .collect::<Vec<f64>>();
        let reduce = |lo: usize, hi: usize, page: usize| {
            let span = column_sum[lo..hi.min(pages)]
                .iter()
                .enumerate()
                .filter(|(i, _)| lo + i != page)
                .map(|(_, &v)| v);
            match self.config.noise_model {
                NoiseModel::LinearSum => span.sum::<f64>(),
                NoiseModel::RootSumSquare => span.map(|v| v * v).sum::<f64>().sqrt(),
            }
        };

        for page in 0..pages {
            let lo = if page < window { 0 } else { page - back };
            let hi = page + 1 + front;
            fitness[page] -= reduce(lo, hi, page);
        }
    }

    /// Accepted candidates of one mapping that sit closer than one window
    /// can shadow each other through fault read-ahead. Probe the window
    /// corners of each: if the other candidate's (or the idle row's) ratio
    /// at a corner exceeds the corner threshold, the pair cannot be told
    /// apart statically and both get flagged with their probes attached.
    fn corner_pass(
        &self,
        candidates: &mut [Candidate],
        data: &CollectedData,
        analyses: &[MappingAnalysis],
    ) {
        let window = self.config.readahead_window;
        let mut flagged = vec![false; candidates.len()];

        for i in 0..candidates.len() {
            for j in i + 1..candidates.len() {
                if candidates[i].mapping != candidates[j].mapping {
                    continue;
                }
                let (a, b) = (candidates[i].page, candidates[j].page);
                let distance = if a > b { a - b } else { b - a };
                if distance >= window {
                    continue;
                }

                let cross_i = self.corner_cross_ratio(&candidates[i], &candidates[j], data, analyses);
                let cross_j = self.corner_cross_ratio(&candidates[j], &candidates[i], data, analyses);
                if cross_i > self.config.corner_threshold
                    || cross_j > self.config.corner_threshold
                {
                    flagged[i] = true;
                    flagged[j] = true;
                }
            }
        }

        for (index, candidate) in candidates.iter_mut().enumerate() {
            if flagged[index] {
                let probes = self.corner_probes(candidate, data, analyses);
                candidate.corner_probes = Some(probes);
            }
        }
    }

    /// Highest ratio the other candidate's group (or background noise)
    /// shows at this candidate's corner pages.
    fn corner_cross_ratio(
        &self,
        candidate: &Candidate,
        other: &Candidate,
        data: &CollectedData,
        analyses: &[MappingAnalysis],
    ) -> f64 {
        let analysis = &analyses[candidate.mapping];
        let other_row = match group_row(&analyses[other.mapping].groups, &other.group) {
            Some(row) => &analyses[other.mapping].merged[row],
            None => return 0.0,
        };
        let idle_row = &analysis.raw[data.idle_event];

        self.corner_pages(candidate, analysis)
            .into_iter()
            .map(|page| other_row[page].max(idle_row[page]))
            .fold(0.0, f64::max)
    }

    fn corner_probes(
        &self,
        candidate: &Candidate,
        data: &CollectedData,
        analyses: &[MappingAnalysis],
    ) -> Vec<CornerProbe> {
        let analysis = &analyses[candidate.mapping];
        let idle_row = &analysis.raw[data.idle_event];
        let own_row = match group_row(&analysis.groups, &candidate.group) {
            Some(row) => &analysis.merged[row],
            None => idle_row,
        };

        self.corner_pages(candidate, analysis)
            .into_iter()
            .map(|page| CornerProbe {
                page,
                ratio: own_row[page].max(idle_row[page]),
            })
            .collect()
    }

    /// Corner pages of the fault window around a candidate, clamped to the
    /// mapping. Inside the first window the front corner stretches to a full
    /// window from the file start; a candidate at page 0 has no back corner.
    fn corner_pages(&self, candidate: &Candidate, analysis: &MappingAnalysis) -> Vec<usize> {
        let window = self.config.readahead_window;
        let pages = analysis.raw.first().map(Vec::len).unwrap_or(0);
        if pages == 0 || window < 2 {
            return Vec::new();
        }
        let back = window / 2;
        let front = window / 2 - 1;
        let page = candidate.page;

        let mut corners = Vec::with_capacity(2);
        if page < back {
            if page != 0 {
                corners.push(0);
            }
            corners.push((window - 1).min(pages - 1));
        } else {
            corners.push(page - back);
            corners.push((page + front).min(pages - 1));
        }
        corners
    }

    fn log_heatmaps(&self, candidate: &Candidate, analyses: &[MappingAnalysis]) {
        let analysis = &analyses[candidate.mapping];
        let start = candidate.page.saturating_sub(128);
        let pages = analysis.raw.first().map(Vec::len).unwrap_or(0);
        let len = (pages - start).min(256);

        for &event in &candidate.group {
            log::debug!(
                "hit ratios of event {} around page {} of {:?}:\n{}",
                event,
                candidate.page,
                candidate.file,
                render_heatmap(&analysis.raw[event][start..start + len], start, 16),
            );
        }
    }
}

fn group_row(groups: &GroupsBySize, members: &BTreeSet<usize>) -> Option<usize> {
    groups
        .get(&members.len())?
        .iter()
        .find(|group| &group.members == members)
        .map(|group| group.row)
}

fn take_first(set: &mut BTreeSet<usize>) -> Option<usize> {
    let value = set.iter().next().cloned()?;
    set.remove(&value);
    Some(value)
}

fn argmax(values: &[f64]) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (index, &value) in values.iter().enumerate() {
        match best {
            Some((_, top)) if top >= value => (),
            _ => best = Some((index, value)),
        }
    }
    best
}

/// Terminal rendering of a ratio row, one shade character per page,
/// `per_row` pages per line, rows labelled with their page offset.
pub fn render_heatmap(ratios: &[f64], first_page: usize, per_row: usize) -> String {
    const SHADES: &[u8] = b" .:-=+*#%@";

    let mut out = String::new();
    for (row_index, chunk) in ratios.chunks(per_row).enumerate() {
        out.push_str(&format!("0x{:06x} |", first_page + row_index * per_row));
        for &ratio in chunk {
            let shade = (ratio.max(0.0).min(1.0) * (SHADES.len() - 1) as f64).round() as usize;
            out.push(SHADES[shade] as char);
        }
        out.push_str("|\n");
    }
    out
}
