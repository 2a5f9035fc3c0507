// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! /proc-based resource sampling.

const PAGE_SIZE: f64 = 4096.0;
const CLOCK_TICKS_PER_SEC: f64 = 100.0;
const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// One point-in-time reading for a process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcSample {
    pub rss_gb: f64,
    pub vms_gb: f64,
    /// Cumulative user+system CPU seconds.
    pub cpu_secs: f64,
}

/// Read memory and CPU counters for a pid. `None` once the process is gone.
pub fn sample(pid: u32) -> Option<ProcSample> {
    let statm = std::fs::read_to_string(format!("/proc/{pid}/statm")).ok()?;
    let mut fields = statm.split_whitespace();
    let vms_pages: f64 = fields.next()?.parse().ok()?;
    let rss_pages: f64 = fields.next()?.parse().ok()?;

    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // Fields after the parenthesized command name; utime/stime are fields
    // 14 and 15 of the full line.
    let rest = stat.rsplit_once(')').map(|(_, r)| r)?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let utime: f64 = fields.get(11)?.parse().ok()?;
    let stime: f64 = fields.get(12)?.parse().ok()?;

    Some(ProcSample {
        rss_gb: rss_pages * PAGE_SIZE / BYTES_PER_GB,
        vms_gb: vms_pages * PAGE_SIZE / BYTES_PER_GB,
        cpu_secs: (utime + stime) / CLOCK_TICKS_PER_SEC,
    })
}

pub fn alive(pid: u32) -> bool {
    std::path::Path::new(&format!("/proc/{pid}")).exists()
}

pub fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
#[path = "proc_tests.rs"]
mod tests;
