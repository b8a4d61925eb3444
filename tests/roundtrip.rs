// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

use std::{env, path::PathBuf};
use cacheprof::{
    ClassificationResult, Classifier, ClassifierConfig, CollectedData, ProfiledMapping,
    SampleMatrix,
};

fn sample_data() -> CollectedData {
    let mut counts = SampleMatrix::new(4, 3);
    for _ in 0..9 {
        counts.record(0, 0);
    }
    for _ in 0..8 {
        counts.record(2, 1);
    }
    counts.record(3, 2);

    CollectedData {
        sample_count: 10,
        event_labels: vec![
            "key-a".to_string(),
            "key-b".to_string(),
            "idle".to_string(),
        ],
        idle_event: 2,
        mappings: vec![ProfiledMapping {
            path: "/usr/lib/libgdk-3.so.0".into(),
            file_offset: 0x3000,
            size: 0x4000,
            frames: vec![Some(0x8123), None, Some(0x8125), Some(0x9000)],
            counts,
        }],
    }
}

fn assert_data_recovered(original: &CollectedData, loaded: &CollectedData) {
    assert_eq!(loaded.sample_count, original.sample_count);
    assert_eq!(loaded.event_labels, original.event_labels);
    assert_eq!(loaded.idle_event, original.idle_event);
    assert_eq!(loaded.mappings.len(), original.mappings.len());
    for (a, b) in original.mappings.iter().zip(&loaded.mappings) {
        assert_eq!(a.path, b.path);
        assert_eq!(a.file_offset, b.file_offset);
        assert_eq!(a.size, b.size);
        assert_eq!(a.frames, b.frames);
        assert_eq!(a.counts.pages(), b.counts.pages());
        assert_eq!(a.counts.events(), b.counts.events());
        for page in 0..a.counts.pages() {
            for event in 0..a.counts.events() {
                assert_eq!(a.counts.count(page, event), b.counts.count(page, event));
            }
        }
    }
}

fn roundtrip(path: PathBuf) {
    let data = sample_data();
    let result = Classifier::new(ClassifierConfig::default()).classify(&data);
    assert_eq!(result.candidates.len(), 2);

    result.save(&path).unwrap();
    let loaded = ClassificationResult::load(&path).unwrap();

    assert_data_recovered(&data, &loaded.data);
    assert_eq!(loaded.candidates.len(), result.candidates.len());
    for (a, b) in result.candidates.iter().zip(&loaded.candidates) {
        assert_eq!(a.mapping, b.mapping);
        assert_eq!(a.page, b.page);
        assert_eq!(a.offset, b.offset);
        assert_eq!(a.frame, b.frame);
        assert_eq!(a.fitness, b.fitness);
        assert_eq!(a.group, b.group);
    }
    assert_eq!(loaded.unclassified, result.unclassified);

    // the saved raw data supports a full offline re-classification
    let again = Classifier::new(ClassifierConfig::default()).classify(&loaded.data);
    assert_eq!(again.candidates.len(), result.candidates.len());
    for (a, b) in result.candidates.iter().zip(&again.candidates) {
        assert_eq!((a.mapping, a.page), (b.mapping, b.page));
        assert_eq!(a.fitness, b.fitness);
    }
}

#[test]
fn json_roundtrip_recovers_the_raw_matrix_exactly() {
    roundtrip(env::temp_dir().join("cacheprof-roundtrip.json"));
}

#[test]
fn binary_roundtrip_recovers_the_raw_matrix_exactly() {
    roundtrip(env::temp_dir().join("cacheprof-roundtrip.bin"));
}
