// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task declarations.

use crate::rqmt::Rqmt;
use serde::{Deserialize, Serialize};

/// One function a job exposes for execution, dispatched as 1..=shards
/// independent engine submissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Name of the function to execute, and of all marker files.
    pub name: String,
    /// Function used when resuming after an interruption; tasks without one
    /// are not auto-resumed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume: Option<String>,
    pub rqmt: Rqmt,
    pub shards: usize,
    /// Routed to the designated short engine by the selector.
    #[serde(default)]
    pub mini_task: bool,
    /// Never writes a finished marker; complete once the job's outputs exist.
    #[serde(default)]
    pub continuable: bool,
    /// How often an errored shard is retried before the error sticks.
    #[serde(default = "default_tries")]
    pub tries: u32,
}

fn default_tries() -> u32 {
    1
}

impl TaskSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resume: None,
            rqmt: Rqmt::default(),
            shards: 1,
            mini_task: false,
            continuable: false,
            tries: 1,
        }
    }

    crate::setters! {
        set {
            rqmt: Rqmt,
            shards: usize,
            continuable: bool,
            tries: u32,
        }
        option {
            resume: String,
        }
    }

    /// Mark as a mini task; also tags the requirement so the engine
    /// selector routes it to the short queue.
    pub fn mini_task(mut self, mini: bool) -> Self {
        self.mini_task = mini;
        if mini && self.rqmt.engine.is_none() {
            self.rqmt.engine = Some("short".to_string());
        }
        self
    }

    /// Shard indices are 1-based, matching engine array-task numbering.
    pub fn shard_ids(&self) -> impl Iterator<Item = usize> + '_ {
        1..=self.shards
    }

    pub fn resumable(&self) -> bool {
        self.resume.is_some()
    }

    /// Function to run for a resumed shard.
    pub fn resume_function(&self) -> &str {
        self.resume.as_deref().unwrap_or(&self.name)
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
