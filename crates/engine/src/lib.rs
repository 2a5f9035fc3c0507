// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sis-engine: pluggable dispatch backends.
//!
//! An [`Engine`] takes fully-specified submissions from the manager, runs
//! them somewhere (an in-process pool or a batch scheduler), and answers
//! state queries from one tick-consistent queue snapshot.

pub mod cluster;
pub mod local;
pub mod lsf;
pub mod selector;
pub mod sge;
pub mod slurm;
pub mod subprocess;

use async_trait::async_trait;
use sis_core::{EngineSettings, Rqmt, SisId, WorkLayout};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine unreachable: {0}")]
    Unreachable(String),
    #[error("submission failed: {0}")]
    SubmitFailed(String),
    #[error("engine subprocess: {0}")]
    Subprocess(#[from] subprocess::SubprocessError),
    #[error("engine io: {0}")]
    Io(#[from] std::io::Error),
}

/// Identifies one shard of one task of one job towards an engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskRef {
    pub job: SisId,
    pub task: String,
    pub shard: usize,
    /// Selector routing tag, from the task's requirements.
    pub engine: Option<String>,
}

impl TaskRef {
    /// The name the task is known by in batch queues: the flattened job id
    /// joined with the task name (queue systems dislike `/`).
    pub fn queue_name(&self) -> String {
        queue_name(&self.job, &self.task)
    }
}

/// Batch-queue job name for (job, task).
pub fn queue_name(job: &SisId, task: &str) -> String {
    format!("{}.{}", job.flat(), task)
}

/// A fully-specified submission: which shards of which task, with what
/// requirements, and the exact worker command to run (shard appended or
/// provided via the engine's task-id environment variable).
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub job: SisId,
    pub task: String,
    pub shards: Vec<usize>,
    pub rqmt: Rqmt,
    /// Worker argv without the shard argument.
    pub call: Vec<String>,
    /// Directory for engine-captured stdout/stderr.
    pub log_dir: PathBuf,
}

impl SubmitRequest {
    pub fn queue_name(&self) -> String {
        queue_name(&self.job, &self.task)
    }
}

/// What an engine reports back for a successful submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitReceipt {
    /// Engine name, e.g. `local`, `sge`.
    pub engine: String,
    /// Backend detail: hostname for local, cluster job id for batch queues.
    pub info: String,
}

/// Engine-visible state of a task shard.
///
/// `Unknown` means the engine has no record; the manager combines that with
/// the on-disk markers to derive runnable/interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineTaskState {
    Queued,
    Running,
    QueueError,
    Unknown,
}

sis_core::simple_display! {
    EngineTaskState {
        Queued => "queued",
        Running => "running",
        QueueError => "queue_error",
        Unknown => "unknown",
    }
}

/// The contract every dispatch backend satisfies.
///
/// State queries within one manager tick see a single queue snapshot;
/// `reset_cache` invalidates it between ticks.
#[async_trait]
pub trait Engine: Send + Sync {
    fn name(&self) -> &'static str;

    async fn start(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn stop(&self);

    /// Submit shards; persists nothing — marker bookkeeping is the
    /// caller's job.
    async fn submit(&self, req: &SubmitRequest) -> Result<SubmitReceipt, EngineError>;

    /// State of one shard according to the cached queue snapshot.
    async fn task_state(&self, task: &TaskRef) -> EngineTaskState;

    /// Best-effort cancellation; may race with completion.
    async fn kill(&self, task: &TaskRef) -> Result<(), EngineError>;

    /// Invalidate the cached queue snapshot.
    async fn reset_cache(&self);
}

/// Build an engine from its settings description.
pub fn build(settings: &EngineSettings, layout: &WorkLayout) -> Result<Arc<dyn Engine>, EngineError> {
    Ok(match settings {
        EngineSettings::Local { cpu, gpu, mem } => Arc::new(local::LocalEngine::new(
            local::Resources::detect(*cpu, *gpu, *mem),
            layout.clone(),
        )),
        EngineSettings::Sge {
            default_rqmt,
            gateway,
            pe_name,
        } => Arc::new(sge::SgeEngine::new(
            default_rqmt.clone(),
            gateway.clone(),
            pe_name.clone(),
        )),
        EngineSettings::Slurm {
            default_rqmt,
            gateway,
        } => Arc::new(slurm::SlurmEngine::new(default_rqmt.clone(), gateway.clone())),
        EngineSettings::Lsf {
            default_rqmt,
            gateway,
        } => Arc::new(lsf::LsfEngine::new(default_rqmt.clone(), gateway.clone())),
        EngineSettings::Selector { engines, default } => {
            let mut built = std::collections::BTreeMap::new();
            for (name, sub) in engines {
                built.insert(name.clone(), build(sub, layout)?);
            }
            Arc::new(selector::EngineSelector::new(built, default.clone()))
        }
    })
}
