// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};
use rand::{rngs::SmallRng, seq::SliceRandom, SeedableRng};
use super::{
    error::Error,
    idle::PageUsageTracker,
    memory_map::{merge_file_overlaps, BackingFilter, MemoryMapping, ProcessMap},
    pagemap::PageMapReader,
    process::ProcessControl,
    samples::{CollectedData, ProfiledMapping, SampleMatrix},
};

/// A side-effecting, possibly blocking action observable through the page
/// cache. Triggers return nothing; the oracle is the only feedback channel.
pub trait EventTrigger {
    fn fire(&mut self);
}

impl<F> EventTrigger for F
where
    F: FnMut(),
{
    fn fire(&mut self) {
        self()
    }
}

pub struct Event {
    label: String,
    trigger: Box<dyn EventTrigger>,
}

impl Event {
    pub fn new<L, T>(label: L, trigger: T) -> Self
    where
        L: Into<String>,
        T: EventTrigger + 'static,
    {
        Event {
            label: label.into(),
            trigger: Box::new(trigger),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// The fixed event set of one run, with a designated idle/control event that
/// represents background noise. The classifier never merges the idle event
/// into an accepted classification.
pub struct EventSet {
    events: Vec<Event>,
    idle: usize,
}

impl EventSet {
    pub fn new(events: Vec<Event>, idle: usize) -> Self {
        assert!(idle < events.len());
        EventSet { events, idle }
    }

    /// The common arrangement: ordinary events first, the idle event last.
    pub fn with_trailing_idle(mut events: Vec<Event>, idle: Event) -> Self {
        events.push(idle);
        let idle = events.len() - 1;
        EventSet { events, idle }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn idle_index(&self) -> usize {
        self.idle
    }

    pub fn labels(&self) -> Vec<String> {
        self.events.iter().map(|e| e.label.clone()).collect()
    }

    fn fire(&mut self, index: usize) {
        self.events[index].trigger.fire()
    }
}

pub struct SamplerConfig {
    /// Fire every trigger once unobserved before the snapshot, settling page
    /// tables and cache state.
    pub warmup: bool,
    pub warmup_settle: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        SamplerConfig {
            warmup: true,
            warmup_settle: Duration::from_secs(2),
        }
    }
}

/// Drives repeated randomized trials against a live target, producing one
/// hit-count matrix per profiled mapping.
pub struct Sampler {
    pid: u32,
    config: SamplerConfig,
    running: Arc<AtomicBool>,
}

impl Sampler {
    pub fn new(pid: u32, config: SamplerConfig, running: Arc<AtomicBool>) -> Self {
        Sampler {
            pid,
            config,
            running,
        }
    }

    /// One full collection run. The target is frozen only for the one-time
    /// mapping/frame snapshot; sampling itself needs it running freely. A
    /// vanished target aborts the run with `TargetLost`, an operator
    /// interrupt with `Interrupted`; partial matrices are discarded either
    /// way.
    pub fn collect(
        &self,
        events: &mut EventSet,
        sample_count: u32,
    ) -> Result<CollectedData, Error> {
        if self.config.warmup {
            log::info!("firing every event once for warm-up");
            for index in 0..events.len() {
                events.fire(index);
            }
            thread::sleep(self.config.warmup_settle);
        }

        let mut mappings = self.snapshot(events.len())?;
        log::info!(
            "profiling {} mappings, {} pages total",
            mappings.len(),
            mappings.iter().map(ProfiledMapping::pages).sum::<usize>(),
        );

        let control = ProcessControl::new(self.pid);
        let mut tracker = PageUsageTracker::new()?;
        let mut rng = SmallRng::from_entropy();
        let mut order = (0..events.len()).collect::<Vec<usize>>();

        for round in 0..sample_count {
            self.check_running()?;
            // the idle bitmap keeps answering for recycled frames after the
            // target dies, so probe the pid itself every round
            control.alive()?;
            // fresh order every round, decorrelating events from the round
            // index and from each other
            order.shuffle(&mut rng);
            for &event_index in &order {
                self.check_running()?;
                for mapping in &mappings {
                    tracker.reset(&mapping.frames)?;
                }

                events.fire(event_index);

                for mapping in &mut mappings {
                    let state = tracker.query(&mapping.frames)?;
                    for (page, &accessed) in state.iter().enumerate() {
                        if accessed {
                            mapping.counts.record(page, event_index);
                        }
                    }
                }
            }
            log::info!("round {}/{} done", round + 1, sample_count);
        }

        Ok(CollectedData {
            sample_count,
            event_labels: events.labels(),
            idle_event: events.idle_index(),
            mappings,
        })
    }

    /// Freeze the target and snapshot its readable, non-writable, file-backed
    /// mappings together with their current frames. The snapshot is taken
    /// once and never refreshed; frames remapped later in the run go stale.
    fn snapshot(&self, event_count: usize) -> Result<Vec<ProfiledMapping>, Error> {
        let control = ProcessControl::new(self.pid);
        let frozen = control.freeze()?;

        let map = ProcessMap::parse(self.pid)?;
        let maps = map
            .by_permissions(true, false, false, BackingFilter::FileOnly)
            .into_iter()
            .filter(|m| !m.write())
            .cloned()
            .collect::<Vec<MemoryMapping>>();
        let maps = merge_file_overlaps(maps);

        let mut reader = PageMapReader::new(self.pid)?;
        let mut mappings = Vec::with_capacity(maps.len());
        for mapping in maps {
            let path = match mapping.path() {
                Some(path) => path.to_path_buf(),
                None => continue,
            };
            let mut frames = Vec::with_capacity(mapping.pages());
            for vpn in mapping.vpn_range() {
                let (entry, flags) = reader.resolve(vpn)?;
                if flags.ksm() {
                    log::debug!("vpn 0x{:x} of {:?} is ksm-merged, frame may be shared", vpn, path);
                }
                frames.push(entry.frame());
            }
            let pages = frames.len();
            mappings.push(ProfiledMapping {
                path,
                file_offset: mapping.file_offset,
                size: mapping.size(),
                frames,
                counts: SampleMatrix::new(pages, event_count),
            });
        }

        drop(frozen);
        Ok(mappings)
    }

    fn check_running(&self) -> Result<(), Error> {
        if self.running.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(Error::Interrupted)
        }
    }
}
