// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sis-worker: the per-task executor.
//!
//! Invoked as `worker <job_dir> <task> [shard]` on whatever machine the
//! engine dispatched to. All outcome reporting goes through marker files
//! in the job directory; the exit code only distinguishes success, failure
//! and "lock already held".

pub mod heartbeat;
pub mod proc;
pub mod worker;

pub use heartbeat::Heartbeat;
pub use worker::{execute, run, WorkerError, WorkerOutcome};
