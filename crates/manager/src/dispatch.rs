// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job directory materialization and task submission.

use crate::resolve::Resolver;
use sis_core::rqmt::escalated;
use sis_core::state::JobState;
use sis_core::workdir::{
    atomic_write, marker_name, ENGINE_LOG_DIR, INPUT_DIR, JOB_INFO, JOB_SAVE, MARKER_ENGINE_CMD,
    MARKER_ERROR, MARKER_LOG, MARKER_USAGE, OUTPUT_DIR, WORK_SUBDIR,
};
use sis_core::{AttemptRecord, Job, JobInfo, Rqmt, RunContext, TaskSpec, UsageSnapshot};
use sis_engine::{Engine, EngineError, SubmitRequest};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Create the job directory with the canonical structure: `work/`,
/// `output/` (plus declared output subdirectories), `input/` symlinks to
/// every predecessor's directory, the serialized job, and the initial
/// `info`. Idempotent; safe to call every tick.
pub fn materialize(ctx: &RunContext, job: &Job) -> std::io::Result<()> {
    let layout = &ctx.layout;
    let dir = layout.job_dir(job.id());

    for sub in [WORK_SUBDIR, OUTPUT_DIR, INPUT_DIR, ENGINE_LOG_DIR] {
        std::fs::create_dir_all(dir.join(sub))?;
    }
    for decl in job.output_decls() {
        if decl.directory {
            std::fs::create_dir_all(dir.join(OUTPUT_DIR).join(&decl.rel))?;
        }
    }

    for pred in job.predecessor_ids() {
        let link = dir.join(INPUT_DIR).join(pred.flat());
        if std::fs::symlink_metadata(&link).is_err() {
            let target = absolute(&layout.job_dir(&pred));
            std::os::unix::fs::symlink(&target, &link)?;
        }
    }

    let save_path = dir.join(JOB_SAVE);
    if !save_path.is_file() {
        let envelope = job
            .save_envelope()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut bytes = serde_json::to_vec_pretty(&envelope)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        bytes.push(b'\n');
        atomic_write(&save_path, &bytes)?;
    }

    let info_path = dir.join(JOB_INFO);
    if !info_path.is_file() {
        let info = JobInfo {
            kind: job.kind().to_string(),
            inputs: job.inputs().iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        };
        info.store(&info_path)?;
    }
    Ok(())
}

/// The worker argv for one task of one job, without the shard argument.
pub fn worker_call(ctx: &RunContext, job: &Job, task: &str) -> Vec<String> {
    let mut call = if ctx.settings.worker_command.is_empty() {
        let exe = std::env::current_exe()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "sis".to_string());
        vec![exe]
    } else {
        ctx.settings.worker_command.clone()
    };
    call.push("worker".to_string());
    call.push(absolute(&ctx.layout.job_dir(job.id())).display().to_string());
    call.push(task.to_string());
    call
}

/// Submit every submittable shard of the job's first unfinished task.
///
/// Shards currently runnable or interrupted are grouped by their escalated
/// requirements and handed to the engine batch-wise; each submission is
/// recorded in `submit_log.<task>.<shard>` and the job `info`. Returns true
/// if anything was submitted.
pub async fn submit_next(resolver: &Resolver, job: &Job) -> Result<bool, EngineError> {
    let ctx = &resolver.ctx;
    let engine: &dyn Engine = resolver.engine.as_ref();
    let layout = &ctx.layout;
    let id = job.id();

    for spec in job.tasks() {
        let mut states = Vec::with_capacity(spec.shards);
        for shard in spec.shard_ids() {
            states.push((shard, resolver.shard_state(job, &spec, shard).await));
        }
        if states.iter().all(|(_, s)| *s == JobState::Finished) {
            continue;
        }

        let mut to_submit = Vec::new();
        for (shard, state) in &states {
            match state {
                JobState::Runnable => to_submit.push(*shard),
                JobState::Interrupted => {
                    let started = layout
                        .marker(id, MARKER_LOG, &spec.name, Some(*shard))
                        .is_file();
                    if started && !spec.resumable() {
                        tracing::debug!(job = %id, task = %spec.name, shard, "interrupted task has no resume function; leaving it");
                        continue;
                    }
                    to_submit.push(*shard);
                }
                _ => {}
            }
        }
        if to_submit.is_empty() {
            // Earliest unfinished task is queued/running/errored; nothing to
            // do for this job this tick.
            return Ok(false);
        }

        let info_path = layout.job_file(id, JOB_INFO);
        let mut info = JobInfo::load_or_default(&info_path);

        // Group shards by their (possibly escalated) requirements.
        let mut groups: BTreeMap<String, (Rqmt, Vec<usize>)> = BTreeMap::new();
        for &shard in &to_submit {
            let rqmt = shard_rqmt(ctx, &info, job, &spec, shard);
            groups
                .entry(rqmt.grouping_key())
                .or_insert_with(|| (rqmt, Vec::new()))
                .1
                .push(shard);
        }

        let call = worker_call(ctx, job, &spec.name);
        let mut submitted = false;
        for (_, (rqmt, shards)) in groups {
            for &shard in &shards {
                // Resubmission of an interrupted shard: retire its marker.
                let error_path = layout.marker(id, MARKER_ERROR, &spec.name, Some(shard));
                if error_path.is_file() {
                    let _ = std::fs::remove_file(&error_path);
                }
                let cmd_path = layout.marker(id, MARKER_ENGINE_CMD, &spec.name, Some(shard));
                let mut line = call.join(" ");
                line.push(' ');
                line.push_str(&shard.to_string());
                line.push('\n');
                if let Err(e) = atomic_write(&cmd_path, line.as_bytes()) {
                    tracing::warn!(job = %id, error = %e, "failed to record engine command");
                }
            }

            tracing::info!(job = %id, task = %spec.name, shards = ?shards, mem = rqmt.mem, time = rqmt.time, "submitting");
            let receipt = engine
                .submit(&SubmitRequest {
                    job: id.clone(),
                    task: spec.name.clone(),
                    shards: shards.clone(),
                    rqmt: rqmt.clone(),
                    call: call.clone(),
                    log_dir: layout.job_file(id, ENGINE_LOG_DIR),
                })
                .await?;

            let attempt = AttemptRecord {
                task: spec.name.clone(),
                shards: shards.clone(),
                rqmt,
                engine: receipt.engine,
                engine_info: receipt.info,
                submitted_epoch_ms: epoch_ms(),
            };
            for &shard in &shards {
                append_submit_log(ctx, job, &spec.name, shard, &attempt);
            }
            info.attempts.push(attempt);
            submitted = true;
        }
        if let Err(e) = info.store(&info_path) {
            tracing::warn!(job = %id, error = %e, "failed to update job info");
        }
        return Ok(submitted);
    }
    Ok(false)
}

/// Requirements for one shard: the declared ones for a first submission,
/// escalated from the last attempt's usage after an interruption.
fn shard_rqmt(ctx: &RunContext, info: &JobInfo, job: &Job, spec: &TaskSpec, shard: usize) -> Rqmt {
    let Some(last) = info.last_rqmt(&spec.name, shard) else {
        return spec.rqmt.clone();
    };
    let usage_path = ctx
        .layout
        .marker(job.id(), MARKER_USAGE, &spec.name, Some(shard));
    let usage = UsageSnapshot::load(&usage_path);
    escalated(
        &spec.rqmt,
        last,
        usage.as_ref(),
        ctx.settings.rqmt_escalation_factor,
        &ctx.settings.engine_limits,
    )
}

fn append_submit_log(ctx: &RunContext, job: &Job, task: &str, shard: usize, attempt: &AttemptRecord) {
    use std::io::Write;

    let path = ctx
        .layout
        .marker(job.id(), sis_core::workdir::MARKER_SUBMIT_LOG, task, Some(shard));
    let line = match serde_json::to_string(attempt) {
        Ok(line) => line,
        Err(e) => {
            tracing::warn!(job = %job.id(), error = %e, "failed to encode submit log line");
            return;
        }
    };
    let result = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut f| writeln!(f, "{line}"));
    if let Err(e) = result {
        tracing::warn!(job = %job.id(), error = %e, "failed to append submit log");
    }
}

/// Consume one retry of an errored shard: rotate the log aside, drop the
/// error marker, and let the next tick resubmit. Returns true if a retry
/// was consumed.
pub fn consume_retry(ctx: &RunContext, job: &Job, spec: &TaskSpec, shard: usize) -> bool {
    if spec.tries <= 1 {
        return false;
    }
    let layout = &ctx.layout;
    let error_path = layout.marker(job.id(), MARKER_ERROR, &spec.name, Some(shard));
    if !error_path.is_file() {
        return false;
    }
    let log_path = layout.marker(job.id(), MARKER_LOG, &spec.name, Some(shard));
    for attempt in 1..spec.tries {
        let rotated = log_path.with_file_name(format!(
            "{}.error.{:02}",
            marker_name(MARKER_LOG, &spec.name, Some(shard)),
            attempt
        ));
        if rotated.exists() {
            continue;
        }
        if log_path.is_file() {
            if let Err(e) = std::fs::rename(&log_path, &rotated) {
                tracing::warn!(job = %job.id(), error = %e, "failed to rotate task log");
                return false;
            }
        }
        if let Err(e) = std::fs::remove_file(&error_path) {
            tracing::warn!(job = %job.id(), error = %e, "failed to clear error marker");
            return false;
        }
        tracing::info!(job = %job.id(), task = %spec.name, shard, attempt, "retrying errored task");
        return true;
    }
    false
}

fn absolute(path: &std::path::Path) -> std::path::PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
