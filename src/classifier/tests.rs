use std::collections::BTreeSet;
use crate::samples::{CollectedData, ProfiledMapping, SampleMatrix};
use super::{group, Classifier, ClassifierConfig, ReadaheadMode, NoiseModel, SimilarityMetric};

fn mapping(pages: usize, events: usize, hits: &[(usize, usize, u32)]) -> ProfiledMapping {
    let mut counts = SampleMatrix::new(pages, events);
    for &(page, event, n) in hits {
        for _ in 0..n {
            counts.record(page, event);
        }
    }
    ProfiledMapping {
        path: "/usr/lib/libtarget.so".into(),
        file_offset: 0,
        size: pages as u64 * 0x1000,
        frames: (0..pages).map(|p| Some(0x1000 + p as u64)).collect(),
        counts,
    }
}

fn collected(samples: u32, labels: &[&str], mappings: Vec<ProfiledMapping>) -> CollectedData {
    CollectedData {
        sample_count: samples,
        event_labels: labels.iter().map(|s| s.to_string()).collect(),
        idle_event: labels.len() - 1,
        mappings,
    }
}

fn set(members: &[usize]) -> BTreeSet<usize> {
    members.iter().cloned().collect()
}

#[test]
fn distinct_events_map_to_their_pages() {
    let data = collected(
        10,
        &["a", "b", "idle"],
        vec![mapping(3, 3, &[(0, 0, 9), (1, 1, 9)])],
    );
    for m in &data.mappings {
        for page in 0..m.counts.pages() {
            for event in 0..m.counts.events() {
                assert!(m.counts.count(page, event) <= 10);
            }
        }
    }

    let result = Classifier::new(ClassifierConfig::default()).classify(&data);

    assert!(result.unclassified.is_empty());
    assert_eq!(result.candidates.len(), 2);

    let a = result.candidates.iter().find(|c| c.group == set(&[0])).unwrap();
    assert_eq!(a.page, 0);
    assert_eq!(a.offset, 0);
    assert!((a.fitness - 0.9).abs() < 1e-9);
    assert_eq!(a.frame, Some(0x1000));

    let b = result.candidates.iter().find(|c| c.group == set(&[1])).unwrap();
    assert_eq!(b.page, 1);
    assert_eq!(b.offset, 0x1000);
    assert!((b.fitness - 0.9).abs() < 1e-9);
}

#[test]
fn indistinguishable_events_merge_and_are_not_split() {
    let config = ClassifierConfig {
        similarity_threshold: 0.1,
        ..ClassifierConfig::default()
    };
    let data = collected(
        10,
        &["a", "b", "idle"],
        vec![mapping(3, 3, &[(0, 0, 8), (0, 1, 8)])],
    );

    let result = Classifier::new(config).classify(&data);

    assert_eq!(result.candidates.len(), 1);
    let candidate = &result.candidates[0];
    assert_eq!(candidate.page, 0);
    assert_eq!(candidate.group, set(&[0, 1]));
    // neither event alone got a single-event candidate
    assert!(!result.candidates.iter().any(|c| c.group.len() == 1));
    assert!(result.unclassified.is_empty());
}

#[test]
fn close_candidates_with_hot_corners_are_flagged() {
    // a at page 10, b at page 15, 5 pages apart with a 32-page window;
    // b also lights page 31, the front corner of a's first-window probe
    let data = collected(
        10,
        &["a", "b", "idle"],
        vec![mapping(40, 3, &[(10, 0, 9), (15, 1, 9), (31, 1, 2)])],
    );

    let result = Classifier::new(ClassifierConfig::default()).classify(&data);

    assert_eq!(result.candidates.len(), 2);
    for candidate in &result.candidates {
        let probes = candidate
            .corner_probes
            .as_ref()
            .expect("pair closer than the window must carry corner probes");
        assert!(!probes.is_empty());
    }
}

#[test]
fn far_candidates_stay_unflagged() {
    let data = collected(
        10,
        &["a", "b", "idle"],
        vec![mapping(100, 3, &[(10, 0, 9), (80, 1, 9)])],
    );

    let result = Classifier::new(ClassifierConfig::default()).classify(&data);

    assert_eq!(result.candidates.len(), 2);
    for candidate in &result.candidates {
        assert!(candidate.corner_probes.is_none());
    }
}

#[test]
fn idle_event_never_joins_an_accepted_group() {
    // the event is statistically identical to idle, the only group holding
    // it contains idle and must never be returned
    let data = collected(
        10,
        &["a", "idle"],
        vec![mapping(1, 2, &[(0, 0, 9), (0, 1, 9)])],
    );

    let result = Classifier::new(ClassifierConfig::default()).classify(&data);

    assert!(result.candidates.is_empty());
    assert_eq!(result.unclassified, vec![0]);
    for candidate in &result.candidates {
        assert!(!candidate.group.contains(&data.idle_event));
    }
}

#[test]
fn unclassifiable_events_are_reported_not_dropped() {
    // b never produces a page hit anywhere
    let data = collected(
        10,
        &["a", "b", "idle"],
        vec![mapping(3, 3, &[(0, 0, 9)])],
    );

    let result = Classifier::new(ClassifierConfig::default()).classify(&data);

    assert_eq!(result.candidates.len(), 1);
    assert_eq!(result.unclassified, vec![1]);
}

#[test]
fn every_event_lands_in_exactly_one_group() {
    let raw = vec![
        vec![0.9, 0.0, 0.1],
        vec![0.85, 0.05, 0.1],
        vec![0.0, 0.9, 0.0],
        vec![0.1, 0.0, 0.0],
        vec![0.0, 0.0, 0.0],
    ];
    let (merged, by_size) = group::group_events(&raw, SimilarityMetric::MaxAbsolute, 0.2);

    let mut seen = BTreeSet::new();
    let mut total = 0;
    for (size, groups) in &by_size {
        for group in groups {
            assert_eq!(group.members.len(), *size);
            assert!(group.row < merged.len());
            for member in &group.members {
                assert!(seen.insert(*member), "event {} grouped twice", member);
            }
            total += size;
        }
    }
    assert_eq!(total, raw.len());
}

#[test]
fn raising_the_similarity_threshold_only_merges() {
    let raw = vec![vec![0.0], vec![0.3], vec![0.6]];

    let mut last = usize::MAX;
    for &threshold in &[0.05, 0.35, 1.0] {
        let (_, by_size) = group::group_events(&raw, SimilarityMetric::MaxAbsolute, threshold);
        let count = by_size.values().map(Vec::len).sum::<usize>();
        assert!(count <= last, "threshold {} split groups", threshold);
        last = count;
    }
}

#[test]
fn noise_model_is_an_explicit_choice() {
    // competing events at the same page: linear sum wipes the candidate out,
    // root-sum-square leaves it above a low bar
    let hits = &[(0, 0, 8), (0, 1, 3), (0, 2, 4)];
    let data = collected(10, &["a", "b", "c", "idle"], vec![mapping(1, 4, hits)]);

    let linear = ClassifierConfig {
        similarity_threshold: 0.05,
        fitness_threshold: 0.25,
        noise_model: NoiseModel::LinearSum,
        ..ClassifierConfig::default()
    };
    let result = Classifier::new(linear).classify(&data);
    assert!(result.candidates.iter().all(|c| !c.group.contains(&0)));

    let rms = ClassifierConfig {
        similarity_threshold: 0.05,
        fitness_threshold: 0.25,
        noise_model: NoiseModel::RootSumSquare,
        ..ClassifierConfig::default()
    };
    let result = Classifier::new(rms).classify(&data);
    let a = result.candidates.iter().find(|c| c.group.contains(&0)).unwrap();
    assert!((a.fitness - 0.3).abs() < 1e-9);
}

#[test]
fn readahead_noise_mode_penalizes_window_neighbours() {
    // a and b sit 3 pages apart, well inside the 32-page window
    let hits = &[(0, 0, 9), (3, 1, 9)];
    let data = collected(10, &["a", "b", "idle"], vec![mapping(40, 3, hits)]);

    let off = ClassifierConfig {
        readahead: ReadaheadMode::Off,
        ..ClassifierConfig::default()
    };
    assert_eq!(Classifier::new(off).classify(&data).candidates.len(), 2);

    let noise = ClassifierConfig {
        readahead: ReadaheadMode::Noise,
        ..ClassifierConfig::default()
    };
    let result = Classifier::new(noise).classify(&data);
    assert!(result.candidates.is_empty());
    assert_eq!(result.unclassified, vec![0, 1]);
}

#[test]
fn ratios_are_idempotent_over_the_collected_matrix() {
    let data = collected(10, &["a", "idle"], vec![mapping(4, 2, &[(2, 0, 5)])]);
    let first = data.mappings[0].counts.event_ratios(10);
    let second = data.mappings[0].counts.event_ratios(10);
    assert_eq!(first, second);
    assert_eq!(first[0][2], 0.5);
}
