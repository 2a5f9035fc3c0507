// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resource-usage heartbeats and the job `info` file.
//!
//! Workers write a [`UsageSnapshot`] to `usage.<task>.<shard>` while a task
//! runs; the manager reads it to tell a live task from a dead one and to
//! decide escalated requirements. The `info` file accumulates parameters
//! and the submission history of all attempts.

use crate::clock::Clock;
use crate::rqmt::Rqmt;
use crate::workdir::{atomic_write, file_age};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// One heartbeat sample, serialized as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub pid: u32,
    pub host: String,
    pub rss_gb: f64,
    pub vms_gb: f64,
    pub cpu_pct: f64,
    pub max_rss_gb: f64,
    pub elapsed_hours: f64,
    pub out_of_memory: bool,
    pub requested: Rqmt,
    pub updated_epoch_ms: u64,
}

impl UsageSnapshot {
    pub fn load(path: &Path) -> Option<Self> {
        let bytes = std::fs::read(path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    pub fn store(&self, path: &Path) -> std::io::Result<()> {
        let mut bytes = serde_json::to_vec_pretty(self).unwrap_or_default();
        bytes.push(b'\n');
        atomic_write(path, &bytes)
    }
}

/// Freshness test for a heartbeat file.
///
/// `None` if the file does not exist; otherwise whether its mtime is within
/// `max_age`. The manager treats a stale heartbeat with no engine record as
/// an interrupted task.
pub fn heartbeat_fresh(path: &Path, max_age: Duration, clock: &dyn Clock) -> Option<bool> {
    file_age(path, clock).map(|age| age < max_age)
}

/// One engine submission of some shards of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub task: String,
    pub shards: Vec<usize>,
    pub rqmt: Rqmt,
    pub engine: String,
    pub engine_info: String,
    pub submitted_epoch_ms: u64,
}

/// Manager-maintained job metadata, stored as JSON in the `info` file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobInfo {
    /// Job kind and input listing, for humans browsing the work dir.
    pub kind: String,
    pub inputs: Vec<String>,
    pub params: BTreeMap<String, String>,
    /// Every submission ever made for this job, in order.
    pub attempts: Vec<AttemptRecord>,
}

impl JobInfo {
    pub fn load_or_default(path: &Path) -> Self {
        std::fs::read(path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default()
    }

    pub fn store(&self, path: &Path) -> std::io::Result<()> {
        let mut bytes = serde_json::to_vec_pretty(self).unwrap_or_default();
        bytes.push(b'\n');
        atomic_write(path, &bytes)
    }

    /// Number of submissions recorded for a shard of a task.
    pub fn submit_count(&self, task: &str, shard: usize) -> u32 {
        self.attempts
            .iter()
            .filter(|a| a.task == task && a.shards.contains(&shard))
            .count() as u32
    }

    /// Requirements of the most recent submission covering a shard.
    pub fn last_rqmt(&self, task: &str, shard: usize) -> Option<&Rqmt> {
        self.attempts
            .iter()
            .rev()
            .find(|a| a.task == task && a.shards.contains(&shard))
            .map(|a| &a.rqmt)
    }
}

#[cfg(test)]
#[path = "usage_tests.rs"]
mod tests;
