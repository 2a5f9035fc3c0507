// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background usage heartbeat.
//!
//! While a task runs, a thread samples the worker process and keeps
//! `usage.<task>.<shard>` current. The file serves two consumers: the
//! manager's liveness check (a stale heartbeat means the task died) and
//! requirement escalation (peak RSS and elapsed time of the last attempt).

use crate::proc;
use parking_lot::{Condvar, Mutex};
use sis_core::{Rqmt, UsageSnapshot};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Peak RSS within this fraction of the requested memory counts as an
/// out-of-memory candidate for escalation.
const OOM_RSS_FRACTION: f64 = 0.95;

/// Relative RSS change that forces a heartbeat write before the period.
const MIN_CHANGE: f64 = 0.1;

struct Shared {
    stop: Mutex<bool>,
    wake: Condvar,
    last: Mutex<Option<UsageSnapshot>>,
}

pub struct Heartbeat {
    shared: Arc<Shared>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Heartbeat {
    /// Start sampling every `poll`, rewriting `path` at least every
    /// `update` (sooner when RSS moves noticeably).
    pub fn start(path: PathBuf, requested: Rqmt, poll: Duration, update: Duration) -> Self {
        let shared = Arc::new(Shared {
            stop: Mutex::new(false),
            wake: Condvar::new(),
            last: Mutex::new(None),
        });
        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::spawn(move || {
            heartbeat_loop(&thread_shared, &path, requested, poll, update);
        });
        Self {
            shared,
            handle: Some(handle),
        }
    }

    /// Stop the thread, write a final snapshot, and return it.
    pub fn stop(mut self) -> Option<UsageSnapshot> {
        {
            let mut stop = self.shared.stop.lock();
            *stop = true;
            self.shared.wake.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.shared.last.lock().clone()
    }
}

fn heartbeat_loop(
    shared: &Shared,
    path: &std::path::Path,
    requested: Rqmt,
    poll: Duration,
    update: Duration,
) {
    let pid = std::process::id();
    let host = proc::hostname();
    let started = Instant::now();
    let mut max_rss = 0.0f64;
    let mut last_cpu: Option<(Instant, f64)> = None;
    let mut last_written_rss = 0.0f64;
    let mut last_write: Option<Instant> = None;

    loop {
        if let Some(sample) = proc::sample(pid) {
            max_rss = max_rss.max(sample.rss_gb);

            let cpu_pct = match last_cpu {
                Some((at, secs)) => {
                    let wall = at.elapsed().as_secs_f64().max(1e-6);
                    ((sample.cpu_secs - secs) / wall * 100.0).max(0.0)
                }
                None => 0.0,
            };
            last_cpu = Some((Instant::now(), sample.cpu_secs));

            let snapshot = UsageSnapshot {
                pid,
                host: host.clone(),
                rss_gb: sample.rss_gb,
                vms_gb: sample.vms_gb,
                cpu_pct,
                max_rss_gb: max_rss,
                elapsed_hours: started.elapsed().as_secs_f64() / 3600.0,
                out_of_memory: max_rss >= requested.mem * OOM_RSS_FRACTION,
                requested: requested.clone(),
                updated_epoch_ms: epoch_ms(),
            };

            let rss_moved = last_written_rss > 0.0
                && ((sample.rss_gb - last_written_rss).abs() / last_written_rss) > MIN_CHANGE;
            let due = last_write.map_or(true, |at| at.elapsed() >= update);
            if due || rss_moved {
                if let Err(e) = snapshot.store(path) {
                    tracing::warn!(error = %e, "failed to write usage heartbeat");
                }
                last_written_rss = sample.rss_gb;
                last_write = Some(Instant::now());
            }
            *shared.last.lock() = Some(snapshot);
        }

        let mut stop = shared.stop.lock();
        if *stop {
            break;
        }
        shared.wake.wait_for(&mut stop, poll);
        if *stop {
            break;
        }
    }

    // Final write so escalation sees the peak of the whole run.
    if let Some(snapshot) = shared.last.lock().as_ref() {
        if let Err(e) = snapshot.store(path) {
            tracing::warn!(error = %e, "failed to write final usage snapshot");
        }
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "heartbeat_tests.rs"]
mod tests;
