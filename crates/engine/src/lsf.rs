// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! LSF backend (bsub / bjobs / bkill).

use crate::cluster::{backend_command, contiguous_ranges, current_user, QueueSnapshot};
use crate::subprocess::{run_with_timeout, QUERY_COMMAND_TIMEOUT, SUBMIT_COMMAND_TIMEOUT};
use crate::{Engine, EngineError, EngineTaskState, SubmitReceipt, SubmitRequest, TaskRef};
use async_trait::async_trait;
use sis_core::Rqmt;
use tokio::sync::Mutex;

pub const ENGINE_NAME: &str = "lsf";

pub struct LsfEngine {
    default_rqmt: Rqmt,
    gateway: Option<String>,
    cache: Mutex<Option<QueueSnapshot>>,
}

impl LsfEngine {
    pub fn new(default_rqmt: Rqmt, gateway: Option<String>) -> Self {
        Self {
            default_rqmt,
            gateway,
            cache: Mutex::new(None),
        }
    }

    fn options(&self, rqmt: &Rqmt, name: &str, log_dir: &str, range: (usize, usize)) -> Vec<String> {
        let mem = if rqmt.mem > 0.0 { rqmt.mem } else { self.default_rqmt.mem };
        let time = if rqmt.time > 0.0 { rqmt.time } else { self.default_rqmt.time };
        let minutes = (time * 60.0).ceil() as u64;
        let mem_mb = (mem * 1024.0).ceil() as u64;

        let mut out = vec![
            // Array jobs are declared through the job name in LSF.
            "-J".into(),
            format!("{name}[{}-{}]", range.0, range.1),
            "-o".into(),
            format!("{log_dir}/lsf.%J.%I"),
            "-M".into(),
            format!("{mem_mb}"),
            "-W".into(),
            format!("{minutes}"),
            "-n".into(),
            rqmt.cpu.max(1).to_string(),
        ];
        if rqmt.gpu > 0 {
            out.push("-gpu".into());
            out.push(format!("num={}", rqmt.gpu));
        }
        if let Some(extra) = rqmt.extra.get("bsub_args") {
            out.extend(extra.split_whitespace().map(String::from));
        }
        out
    }

    async fn refresh_snapshot(&self) -> Result<QueueSnapshot, EngineError> {
        let argv: Vec<String> = vec![
            "bjobs".into(),
            "-noheader".into(),
            "-u".into(),
            current_user(),
            "-o".into(),
            "job_name stat job_index delimiter='|'".into(),
        ];
        let cmd = backend_command(self.gateway.as_deref(), &argv);
        let output = run_with_timeout(cmd, QUERY_COMMAND_TIMEOUT, "bjobs").await?;
        if !output.status.success() {
            return Err(EngineError::Unreachable(format!(
                "bjobs exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(parse_bjobs(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn map_state(code: &str) -> EngineTaskState {
    match code {
        "PEND" | "PSUSP" | "USUSP" | "SSUSP" | "WAIT" => EngineTaskState::Queued,
        "RUN" => EngineTaskState::Running,
        "ZOMBI" | "UNKWN" => EngineTaskState::QueueError,
        // DONE/EXIT are terminal; the markers decide the real outcome.
        _ => EngineTaskState::Unknown,
    }
}

fn parse_bjobs(stdout: &str) -> QueueSnapshot {
    let mut snapshot = QueueSnapshot::new();
    for line in stdout.lines() {
        let mut fields = line.trim().split('|');
        let (Some(name), Some(state)) = (fields.next(), fields.next()) else {
            continue;
        };
        let state = map_state(state.trim());
        if state == EngineTaskState::Unknown {
            continue;
        }
        // Array jobs report "name[index]" plus a job_index column; plain
        // jobs have index 0.
        let index: usize = fields
            .next()
            .and_then(|f| f.trim().parse().ok())
            .unwrap_or(0);
        let name = name.split('[').next().unwrap_or(name).trim().to_string();
        let shard = if index == 0 { 1 } else { index };
        let entry = snapshot.entry((name, shard)).or_insert(state);
        if *entry == EngineTaskState::Queued && state == EngineTaskState::Running {
            *entry = state;
        }
    }
    snapshot
}

#[async_trait]
impl Engine for LsfEngine {
    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    async fn stop(&self) {}

    async fn submit(&self, req: &SubmitRequest) -> Result<SubmitReceipt, EngineError> {
        std::fs::create_dir_all(&req.log_dir)?;
        let name = req.queue_name();
        let mut ids = Vec::new();

        for range in contiguous_ranges(&req.shards) {
            let mut argv = vec!["bsub".to_string()];
            argv.extend(self.options(&req.rqmt, &name, &req.log_dir.display().to_string(), range));
            // The worker reads its shard from LSB_JOBINDEX.
            argv.extend(req.call.iter().cloned());

            let cmd = backend_command(self.gateway.as_deref(), &argv);
            let output = run_with_timeout(cmd, SUBMIT_COMMAND_TIMEOUT, "bsub").await?;
            if !output.status.success() {
                return Err(EngineError::SubmitFailed(format!(
                    "bsub exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
            let stdout = String::from_utf8_lossy(&output.stdout);
            if let Some(id) = parse_submit_id(&stdout) {
                ids.push(id);
            }
        }

        Ok(SubmitReceipt {
            engine: ENGINE_NAME.to_string(),
            info: ids.join(","),
        })
    }

    async fn task_state(&self, task: &TaskRef) -> EngineTaskState {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            match self.refresh_snapshot().await {
                Ok(snapshot) => *cache = Some(snapshot),
                Err(e) => {
                    tracing::warn!(error = %e, "queue state query failed; treating tasks as unknown");
                    return EngineTaskState::Unknown;
                }
            }
        }
        cache
            .as_ref()
            .and_then(|s| s.get(&(task.queue_name(), task.shard)).copied())
            .unwrap_or(EngineTaskState::Unknown)
    }

    async fn kill(&self, task: &TaskRef) -> Result<(), EngineError> {
        let argv = vec![
            "bkill".to_string(),
            "-J".to_string(),
            format!("{}[{}]", task.queue_name(), task.shard),
        ];
        let cmd = backend_command(self.gateway.as_deref(), &argv);
        let output = run_with_timeout(cmd, SUBMIT_COMMAND_TIMEOUT, "bkill").await?;
        if !output.status.success() {
            tracing::warn!(
                task = %task.queue_name(),
                shard = task.shard,
                "bkill failed; the task may have finished already"
            );
        }
        Ok(())
    }

    async fn reset_cache(&self) {
        *self.cache.lock().await = None;
    }
}

/// "Job <123> is submitted to default queue <normal>."
fn parse_submit_id(stdout: &str) -> Option<String> {
    let start = stdout.find('<')? + 1;
    let end = stdout[start..].find('>')? + start;
    let id = &stdout[start..end];
    id.chars().all(|c| c.is_ascii_digit()).then(|| id.to_string())
}

#[cfg(test)]
#[path = "lsf_tests.rs"]
mod tests;
