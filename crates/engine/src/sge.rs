// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Son of Grid Engine backend (qsub / qstat / qdel).

use crate::cluster::{
    backend_command, contiguous_ranges, current_user, expand_task_ids, xml_elements,
    xml_tag_values, QueueSnapshot,
};
use crate::subprocess::{run_with_timeout, QUERY_COMMAND_TIMEOUT, SUBMIT_COMMAND_TIMEOUT};
use crate::{Engine, EngineError, EngineTaskState, SubmitReceipt, SubmitRequest, TaskRef};
use async_trait::async_trait;
use sis_core::Rqmt;
use tokio::sync::Mutex;

pub const ENGINE_NAME: &str = "sge";

pub struct SgeEngine {
    default_rqmt: Rqmt,
    gateway: Option<String>,
    pe_name: String,
    cache: Mutex<Option<QueueSnapshot>>,
}

impl SgeEngine {
    pub fn new(default_rqmt: Rqmt, gateway: Option<String>, pe_name: String) -> Self {
        Self {
            default_rqmt,
            gateway,
            pe_name,
            cache: Mutex::new(None),
        }
    }

    /// Translate requirements into qsub options.
    fn options(&self, rqmt: &Rqmt, name: &str, log_dir: &str, range: (usize, usize)) -> Vec<String> {
        let mem = if rqmt.mem > 0.0 { rqmt.mem } else { self.default_rqmt.mem };
        let time = if rqmt.time > 0.0 { rqmt.time } else { self.default_rqmt.time };
        let seconds = (time * 3600.0).ceil() as u64;

        let mut out = vec![
            "-cwd".into(),
            "-N".into(),
            name.to_string(),
            "-j".into(),
            "y".into(),
            "-o".into(),
            log_dir.to_string(),
            "-l".into(),
            format!("h_vmem={mem}G"),
            "-l".into(),
            format!("h_rt={seconds}"),
            "-t".into(),
            format!("{}-{}:1", range.0, range.1),
        ];
        if rqmt.gpu > 0 {
            out.push("-l".into());
            out.push(format!("gpu={}", rqmt.gpu));
        }
        if rqmt.cpu > 1 {
            out.push("-pe".into());
            out.push(self.pe_name.clone());
            out.push(rqmt.cpu.to_string());
        }
        if let Some(extra) = rqmt.extra.get("qsub_args") {
            out.extend(extra.split_whitespace().map(String::from));
        }
        out
    }

    async fn refresh_snapshot(&self) -> Result<QueueSnapshot, EngineError> {
        let argv: Vec<String> = vec![
            "qstat".into(),
            "-xml".into(),
            "-u".into(),
            current_user(),
        ];
        let cmd = backend_command(self.gateway.as_deref(), &argv);
        let output = run_with_timeout(cmd, QUERY_COMMAND_TIMEOUT, "qstat").await?;
        if !output.status.success() {
            return Err(EngineError::Unreachable(format!(
                "qstat exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(parse_qstat_xml(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Map one qstat state code to the engine state enum.
///
/// `qw`/`hqw` wait in the queue, `r`/`t`/`s` variants are on a node, and
/// anything carrying `E` (e.g. `Eqw`) is stuck and needs intervention.
fn map_state(code: &str) -> EngineTaskState {
    if code.contains('E') {
        return EngineTaskState::QueueError;
    }
    if code.contains('r') || code.contains('t') || code.contains('s') {
        return EngineTaskState::Running;
    }
    if code.contains('q') || code.contains('w') || code.contains('h') {
        return EngineTaskState::Queued;
    }
    EngineTaskState::Unknown
}

fn parse_qstat_xml(xml: &str) -> QueueSnapshot {
    let mut snapshot = QueueSnapshot::new();
    for element in xml_elements(xml, "job_list") {
        let Some(name) = xml_tag_values(element, "JB_name").first().copied() else {
            continue;
        };
        let Some(code) = xml_tag_values(element, "state").first().copied() else {
            continue;
        };
        let state = map_state(code);
        let tasks = xml_tag_values(element, "tasks")
            .first()
            .map(|expr| expand_task_ids(expr))
            .unwrap_or_default();
        // No tasks element: plain (non-array) job, treated as shard 1.
        let shards = if tasks.is_empty() { vec![1] } else { tasks };
        for shard in shards {
            let key = (name.to_string(), shard);
            // A shard may appear twice (e.g. one running, one queued line);
            // keep the more advanced state.
            let entry = snapshot.entry(key).or_insert(state);
            if *entry == EngineTaskState::Queued && state == EngineTaskState::Running {
                *entry = state;
            }
        }
    }
    snapshot
}

#[async_trait]
impl Engine for SgeEngine {
    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    async fn stop(&self) {}

    async fn submit(&self, req: &SubmitRequest) -> Result<SubmitReceipt, EngineError> {
        std::fs::create_dir_all(&req.log_dir)?;
        let name = req.queue_name();
        let mut ids = Vec::new();

        for range in contiguous_ranges(&req.shards) {
            let mut argv = vec!["qsub".to_string()];
            argv.extend(self.options(&req.rqmt, &name, &req.log_dir.display().to_string(), range));
            // The worker reads its shard from SGE_TASK_ID.
            argv.extend(req.call.iter().cloned());

            let cmd = backend_command(self.gateway.as_deref(), &argv);
            let output = run_with_timeout(cmd, SUBMIT_COMMAND_TIMEOUT, "qsub").await?;
            if !output.status.success() {
                return Err(EngineError::SubmitFailed(format!(
                    "qsub exited with {}: {}",
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
            "qdel".to_string(),
            task.queue_name(),
            "-t".to_string(),
            task.shard.to_string(),
        ];
        let cmd = backend_command(self.gateway.as_deref(), &argv);
        let output = run_with_timeout(cmd, SUBMIT_COMMAND_TIMEOUT, "qdel").await?;
        if !output.status.success() {
            tracing::warn!(
                task = %task.queue_name(),
                shard = task.shard,
                "qdel failed; the task may have finished already"
            );
        }
        Ok(())
    }

    async fn reset_cache(&self) {
        *self.cache.lock().await = None;
    }
}

/// Pull the numeric job id out of qsub's acknowledgement line.
fn parse_submit_id(stdout: &str) -> Option<String> {
    // "Your job-array 123.1-4:1 ("name") has been submitted"
    // "Your job 124 ("name") has been submitted"
    for token in stdout.split_whitespace() {
        let id: String = token
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if !id.is_empty() && token.starts_with(id.as_str()) {
            return Some(id);
        }
    }
    None
}

#[cfg(test)]
#[path = "sge_tests.rs"]
mod tests;
