// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

use std::{
    io::{self, BufRead, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use cacheprof::PageUsageTracker;

const BACKOFF_START: Duration = Duration::from_micros(100);
const BACKOFF_CAP: Duration = Duration::from_millis(50);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let watching = Arc::new(AtomicBool::new(false));
    {
        let watching = watching.clone();
        ctrlc::set_handler(move || watching.store(false, Ordering::Relaxed))?;
    }

    let mut tracker = PageUsageTracker::new()?;
    loop {
        print!("frame to track (hex)> ");
        io::stdout().flush()?;
        let stdin = io::stdin();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }
        let frame = match u64::from_str_radix(line.trim().trim_start_matches("0x"), 16) {
            Ok(frame) => frame,
            Err(_) => {
                log::warn!("not a hex frame number: {}", line.trim());
                continue;
            },
        };

        let frames = [Some(frame)];
        tracker.reset(&frames)?;
        watching.store(true, Ordering::Relaxed);

        // poll until ctrl+c drops back to the prompt; back off while quiet
        // instead of spinning on a core
        let mut delay = BACKOFF_START;
        while watching.load(Ordering::Relaxed) {
            if tracker.query(&frames)?[0] {
                let timestamp = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos();
                println!("[{}] access detected", timestamp);
                tracker.reset(&frames)?;
                delay = BACKOFF_START;
            } else {
                thread::sleep(delay);
                delay = (delay * 2).min(BACKOFF_CAP);
            }
        }
    }
}
