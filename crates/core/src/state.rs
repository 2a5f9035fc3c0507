// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Derived job and task states.
//!
//! States are never stored; they are computed each tick from the on-disk
//! markers and the engine's cached queue snapshot.

use serde::{Deserialize, Serialize};

/// Observable state of a job or of one task shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Not all inputs available yet.
    Waiting,
    /// All inputs available, nothing submitted.
    Runnable,
    /// Submitted, waiting in the engine queue.
    Queued,
    /// Started and heartbeating.
    Running,
    /// All shards of all tasks finished; outputs valid.
    Finished,
    /// A task wrote an error marker.
    Error,
    /// The engine rejected or lost the submission.
    QueueError,
    /// Resubmitted too many times without finishing.
    RetryError,
    /// Started but disappeared without finishing; retryable.
    Interrupted,
    /// Manual hold marker present; never dispatched.
    Hold,
    /// Markers contradict; requires manual intervention.
    Unknown,
}

crate::simple_display! {
    JobState {
        Waiting => "waiting",
        Runnable => "runnable",
        Queued => "queued",
        Running => "running",
        Finished => "finished",
        Error => "error",
        QueueError => "queue_error",
        RetryError => "retry_error",
        Interrupted => "interrupted",
        Hold => "hold",
        Unknown => "unknown",
    }
}

/// Combination order for multi-shard tasks: the first state present across
/// shards wins, so a single errored shard surfaces over finished siblings.
pub const SHARD_COMBINE_ORDER: [JobState; 9] = [
    JobState::Error,
    JobState::QueueError,
    JobState::Unknown,
    JobState::Interrupted,
    JobState::Runnable,
    JobState::Queued,
    JobState::Running,
    JobState::RetryError,
    JobState::Finished,
];

impl JobState {
    /// Combine per-shard states into one task state.
    pub fn combine_shards(states: &[JobState]) -> JobState {
        for state in SHARD_COMBINE_ORDER {
            if states.contains(&state) {
                return state;
            }
        }
        JobState::Unknown
    }

    /// True if the manager still has (or will have) something to do for a
    /// job in this state.
    pub fn is_actionable(self) -> bool {
        matches!(
            self,
            JobState::Runnable
                | JobState::Queued
                | JobState::Running
                | JobState::Interrupted
                | JobState::Unknown
        )
    }

    /// True if the state should be surfaced as a failure.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            JobState::Error | JobState::QueueError | JobState::RetryError
        )
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
