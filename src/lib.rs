// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

#![forbid(unsafe_code)]

mod error;
pub use self::error::Error;

mod process;
pub use self::process::{Frozen, ProcessControl};

mod memory_map;
pub use self::memory_map::{
    merge_file_overlaps, Backing, BackingFilter, MemoryMapping, ProcessMap, PAGE_SIZE,
};

mod pagemap;
pub use self::pagemap::{KernelPageFlags, PageMapReader, PageTableEntry};

mod idle;
pub use self::idle::PageUsageTracker;

mod samples;
pub use self::samples::{CollectedData, ProfiledMapping, SampleMatrix};

mod sampler;
pub use self::sampler::{Event, EventSet, EventTrigger, Sampler, SamplerConfig};

mod classifier;
pub use self::classifier::{
    render_heatmap, Candidate, ClassificationResult, Classifier, ClassifierConfig, CornerProbe,
    EventGroup, NoiseModel, ReadaheadMode, SimilarityMetric,
};
