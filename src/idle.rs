// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

//! Per-frame access oracle over `/sys/kernel/mm/page_idle/bitmap`.
//!
//! The bitmap is addressed in 64-bit aligned words, one bit per frame.
//! Writing a set bit marks that frame idle; a frame whose bit reads back
//! clear was accessed since it was marked. Frames sharing one word cannot be
//! reset in a single write pass without the neighbours' observation windows
//! drifting apart by the time between the writes. This imprecision is
//! inherited from the interface and left as is; a debug log points at
//! affected batches.

use std::{
    collections::HashSet,
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
};
use super::error::Error;

const PAGE_IDLE_BITMAP_PATH: &str = "/sys/kernel/mm/page_idle/bitmap";

pub struct PageUsageTracker {
    bitmap: File,
}

impl PageUsageTracker {
    pub fn new() -> Result<Self, Error> {
        let bitmap = OpenOptions::new()
            .read(true)
            .write(true)
            .open(PAGE_IDLE_BITMAP_PATH)
            .map_err(|error| Error::from_io(error, PAGE_IDLE_BITMAP_PATH))?;
        Ok(PageUsageTracker { bitmap })
    }

    /// Back the tracker with an arbitrary file instead of the sysfs bitmap.
    pub fn with_file(bitmap: File) -> Self {
        PageUsageTracker { bitmap }
    }

    /// Mark every resident frame idle. `None` frames are skipped.
    pub fn reset(&mut self, frames: &[Option<u64>]) -> Result<(), Error> {
        if log::log_enabled!(log::Level::Debug) {
            let mut words = HashSet::new();
            for frame in frames.iter().filter_map(|&f| f) {
                if !words.insert(frame / 64) {
                    log::debug!(
                        "frames sharing bitmap word {} reset in separate writes",
                        frame / 64,
                    );
                }
            }
        }

        for frame in frames.iter().filter_map(|&f| f) {
            let word: u64 = 1 << (frame % 64);
            self.bitmap
                .seek(SeekFrom::Start((frame / 64) * 8))
                .and_then(|_| self.bitmap.write_all(&word.to_le_bytes()))
                .map_err(|error| Error::from_io(error, PAGE_IDLE_BITMAP_PATH))?;
        }
        Ok(())
    }

    /// Report which frames were accessed since the last reset. A set bit
    /// means still idle, so accessed is the inverted bit. `None` frames
    /// always report `false` and touch no kernel state.
    pub fn query(&mut self, frames: &[Option<u64>]) -> Result<Vec<bool>, Error> {
        frames
            .iter()
            .map(|&frame| match frame {
                None => Ok(false),
                Some(frame) => {
                    let mut buf = [0; 8];
                    self.bitmap
                        .seek(SeekFrom::Start((frame / 64) * 8))
                        .and_then(|_| self.bitmap.read_exact(&mut buf))
                        .map_err(|error| Error::from_io(error, PAGE_IDLE_BITMAP_PATH))?;
                    let word = u64::from_le_bytes(buf);
                    Ok(word & (1 << (frame % 64)) == 0)
                },
            })
            .collect()
    }
}
