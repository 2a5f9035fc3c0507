// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The worker protocol: run one task shard, report through marker files.

use crate::heartbeat::Heartbeat;
use fs2::FileExt;
use sis_core::workdir::{
    atomic_write, marker_name, touch_marker, INTERRUPTED_TAG, JOB_SAVE, MARKER_ERROR,
    MARKER_LOCK, MARKER_LOG, MARKER_USAGE, WORK_SUBDIR,
};
use sis_core::{JobRegistry, RegistryError, RunContext, SisId, UsageSnapshot};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variables engines use to hand the shard index to array
/// tasks, in lookup order.
pub const TASK_ID_ENV_VARS: [&str; 4] = [
    "SIS_TASK_ID",
    "SGE_TASK_ID",
    "SLURM_ARRAY_TASK_ID",
    "LSB_JOBINDEX",
];

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("{0} is not a job directory under the work dir")]
    BadJobDir(PathBuf),
    #[error("job has no task named {0:?}")]
    UnknownTask(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("worker io: {0}")]
    Io(#[from] std::io::Error),
}

/// How a worker invocation ended. Exit-code mapping is the CLI's business.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Task function returned; finished marker written (unless continuable).
    Finished,
    /// The (task, shard) lock is held by another worker. Not an error.
    Busy,
    /// Task raised; error marker written.
    Failed,
    /// SIGTERM arrived before completion; retryable error marker written.
    Interrupted,
}

sis_core::simple_display! {
    WorkerOutcome {
        Finished => "finished",
        Busy => "busy",
        Failed => "failed",
        Interrupted => "interrupted",
    }
}

/// Resolve the shard index: explicit argument, engine environment, or 1.
pub fn resolve_shard(arg: Option<usize>) -> usize {
    if let Some(shard) = arg {
        return shard;
    }
    for var in TASK_ID_ENV_VARS {
        if let Ok(value) = std::env::var(var) {
            if let Ok(shard) = value.trim().parse() {
                return shard;
            }
        }
    }
    tracing::warn!("no shard argument or task-id environment; assuming shard 1");
    1
}

/// Execute one task shard to completion. Synchronous; signal handling is
/// layered on top by [`run`].
pub fn execute(
    ctx: &RunContext,
    registry: &JobRegistry,
    job_dir: &Path,
    task_name: &str,
    shard: usize,
) -> Result<WorkerOutcome, WorkerError> {
    let job_dir = job_dir
        .canonicalize()
        .map_err(|_| WorkerError::BadJobDir(job_dir.to_path_buf()))?;
    let id = job_id_of(ctx, &job_dir)?;

    // At-most-one concurrent run per (job, task, shard).
    let lock_path = job_dir.join(marker_name(MARKER_LOCK, task_name, Some(shard)));
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)?;
    if lock_file.try_lock_exclusive().is_err() {
        tracing::info!(job = %id, task = task_name, shard, "lock held; another worker is on it");
        return Ok(WorkerOutcome::Busy);
    }

    let job = registry.load(&job_dir.join(JOB_SAVE))?;
    let Some(spec) = job.task(task_name) else {
        return Err(WorkerError::UnknownTask(task_name.to_string()));
    };

    let error_path = job_dir.join(marker_name(MARKER_ERROR, task_name, Some(shard)));
    if !job.runnable(&ctx.layout) {
        for input in job.inputs() {
            if !input.available(&ctx.layout) {
                tracing::error!(job = %id, input = %input, "input not available");
            }
        }
        write_error(&error_path, "job is not runnable; inputs are missing", None);
        return Ok(WorkerOutcome::Failed);
    }

    // A pre-existing log means this shard ran before: resume.
    let log_path = job_dir.join(marker_name(MARKER_LOG, task_name, Some(shard)));
    let resumed = log_path.is_file();
    append_log_header(&log_path, resumed)?;
    let function = if resumed {
        spec.resume_function().to_string()
    } else {
        spec.name.clone()
    };

    let work_dir = job_dir.join(WORK_SUBDIR);
    std::fs::create_dir_all(&work_dir)?;
    if let Err(e) = std::env::set_current_dir(&work_dir) {
        tracing::warn!(error = %e, "could not enter job work dir");
    }

    let usage_path = job_dir.join(marker_name(MARKER_USAGE, task_name, Some(shard)));
    let heartbeat = Heartbeat::start(
        usage_path,
        spec.rqmt.clone(),
        Duration::from_secs(ctx.settings.usage_poll_interval),
        Duration::from_secs(ctx.settings.usage_update_period),
    );

    tracing::info!(job = %id, task = %function, shard, resumed, "task starting");
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        job.run_task(ctx, &function, shard)
    }));
    let usage = heartbeat.stop();

    match result {
        Ok(Ok(())) => {
            if spec.continuable {
                tracing::info!(job = %id, task = %function, shard, "continuable task done; no finished marker");
            } else {
                let finished = job_dir.join(marker_name(
                    sis_core::workdir::MARKER_FINISHED,
                    task_name,
                    Some(shard),
                ));
                touch_marker(&finished)?;
                tracing::info!(job = %id, task = %function, shard, "task finished");
            }
            Ok(WorkerOutcome::Finished)
        }
        Ok(Err(error)) => {
            tracing::error!(job = %id, task = %function, shard, error = %error, "task failed");
            write_error(&error_path, &format!("task failed: {error:#}"), usage.as_ref());
            Ok(WorkerOutcome::Failed)
        }
        Err(panic) => {
            let message = panic_message(&panic);
            tracing::error!(job = %id, task = %function, shard, panic = %message, "task panicked");
            write_error(&error_path, &format!("task panicked: {message}"), usage.as_ref());
            Ok(WorkerOutcome::Failed)
        }
    }
}

/// Async wrapper adding engine-signal handling: a SIGTERM before the task
/// completes writes a retryable error marker and reports `Interrupted`.
pub async fn run(
    ctx: RunContext,
    registry: std::sync::Arc<JobRegistry>,
    job_dir: PathBuf,
    task_name: String,
    shard_arg: Option<usize>,
) -> Result<WorkerOutcome, WorkerError> {
    let shard = resolve_shard(shard_arg);
    let error_path = job_dir.join(marker_name(MARKER_ERROR, &task_name, Some(shard)));
    let task_label = format!("{task_name}.{shard}");

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let worker_ctx = ctx.clone();
    let worker_task = task_name.clone();
    let handle = tokio::task::spawn_blocking(move || {
        execute(&worker_ctx, &registry, &job_dir, &worker_task, shard)
    });

    tokio::select! {
        outcome = handle => {
            outcome.unwrap_or_else(|join_error| {
                write_error(
                    &error_path,
                    &format!("worker crashed: {join_error}"),
                    None,
                );
                Ok(WorkerOutcome::Failed)
            })
        }
        _ = sigterm.recv() => {
            tracing::warn!(task = %task_label, "SIGTERM from engine; marking interrupted");
            write_error(
                &error_path,
                &format!("{INTERRUPTED_TAG}: SIGTERM while running {task_label}"),
                None,
            );
            Ok(WorkerOutcome::Interrupted)
        }
    }
}

fn job_id_of(ctx: &RunContext, job_dir: &Path) -> Result<SisId, WorkerError> {
    let work_dir = ctx
        .layout
        .work_dir
        .canonicalize()
        .map_err(|_| WorkerError::BadJobDir(job_dir.to_path_buf()))?;
    let rel = job_dir
        .strip_prefix(&work_dir)
        .map_err(|_| WorkerError::BadJobDir(job_dir.to_path_buf()))?;
    let id = rel
        .to_str()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| WorkerError::BadJobDir(job_dir.to_path_buf()))?;
    Ok(SisId::from_string(id))
}

fn append_log_header(log_path: &Path, resumed: bool) -> std::io::Result<()> {
    let mut log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    if resumed {
        writeln!(log, "\n{}\nRETRY OR CONTINUE TASK\n{}\n", "#".repeat(80), "#".repeat(80))?;
    }
    writeln!(
        log,
        "started on {} pid {} at {:?}",
        crate::proc::hostname(),
        std::process::id(),
        std::time::SystemTime::now()
    )?;
    log.sync_all()
}

/// Write an `error.*` marker: tag line, then the usage snapshot for the
/// post-mortem.
fn write_error(path: &Path, message: &str, usage: Option<&UsageSnapshot>) {
    let mut body = String::from(message);
    body.push('\n');
    if let Some(usage) = usage {
        if let Ok(json) = serde_json::to_string_pretty(usage) {
            body.push_str("\nlast usage:\n");
            body.push_str(&json);
            body.push('\n');
        }
    }
    if let Err(e) = atomic_write(path, body.as_bytes()) {
        tracing::error!(path = %path.display(), error = %e, "failed to write error marker");
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
