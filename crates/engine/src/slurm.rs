// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Slurm backend (sbatch / squeue / scancel).

use crate::cluster::{
    backend_command, contiguous_ranges, current_user, expand_task_ids, QueueSnapshot,
};
use crate::subprocess::{
    run_with_stdin, run_with_timeout, QUERY_COMMAND_TIMEOUT, SUBMIT_COMMAND_TIMEOUT,
};
use crate::{Engine, EngineError, EngineTaskState, SubmitReceipt, SubmitRequest, TaskRef};
use async_trait::async_trait;
use sis_core::Rqmt;
use tokio::sync::Mutex;

pub const ENGINE_NAME: &str = "slurm";

pub struct SlurmEngine {
    default_rqmt: Rqmt,
    gateway: Option<String>,
    cache: Mutex<Option<QueueSnapshot>>,
}

impl SlurmEngine {
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
            "-J".into(),
            name.to_string(),
            "-o".into(),
            format!("{log_dir}/slurm.%x.%a"),
            format!("--mem={mem_mb}M"),
            format!("--time={minutes}"),
            format!("--cpus-per-task={}", rqmt.cpu.max(1)),
            "-a".into(),
            format!("{}-{}", range.0, range.1),
        ];
        if rqmt.gpu > 0 {
            out.push(format!("--gres=gpu:{}", rqmt.gpu));
        }
        if let Some(extra) = rqmt.extra.get("sbatch_args") {
            out.extend(extra.split_whitespace().map(String::from));
        }
        out
    }

    async fn refresh_snapshot(&self) -> Result<QueueSnapshot, EngineError> {
        let argv: Vec<String> = vec![
            "squeue".into(),
            "-h".into(),
            "-u".into(),
            current_user(),
            "-o".into(),
            "%j|%T|%K".into(),
        ];
        let cmd = backend_command(self.gateway.as_deref(), &argv);
        let output = run_with_timeout(cmd, QUERY_COMMAND_TIMEOUT, "squeue").await?;
        if !output.status.success() {
            return Err(EngineError::Unreachable(format!(
                "squeue exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(parse_squeue(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn map_state(code: &str) -> EngineTaskState {
    match code {
        "PENDING" | "CONFIGURING" | "REQUEUED" | "SUSPENDED" => EngineTaskState::Queued,
        "RUNNING" | "COMPLETING" => EngineTaskState::Running,
        "FAILED" | "NODE_FAIL" | "BOOT_FAIL" | "OUT_OF_MEMORY" | "TIMEOUT" => {
            // Terminal in squeue output only transiently; markers decide the
            // real outcome, the engine just stops claiming the task.
            EngineTaskState::Unknown
        }
        _ => EngineTaskState::Unknown,
    }
}

fn parse_squeue(stdout: &str) -> QueueSnapshot {
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
        // %K is the array index; "N/A" or empty for plain jobs. A pending
        // array shows its whole range ("2-4").
        let task_expr = fields.next().unwrap_or("").trim();
        let shards = if task_expr.is_empty() || task_expr == "N/A" {
            vec![1]
        } else {
            let expanded = expand_task_ids(task_expr);
            if expanded.is_empty() {
                vec![1]
            } else {
                expanded
            }
        };
        for shard in shards {
            let entry = snapshot
                .entry((name.trim().to_string(), shard))
                .or_insert(state);
            if *entry == EngineTaskState::Queued && state == EngineTaskState::Running {
                *entry = state;
            }
        }
    }
    snapshot
}

#[async_trait]
impl Engine for SlurmEngine {
    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    async fn stop(&self) {}

    async fn submit(&self, req: &SubmitRequest) -> Result<SubmitReceipt, EngineError> {
        std::fs::create_dir_all(&req.log_dir)?;
        let name = req.queue_name();
        let mut ids = Vec::new();

        // The worker reads its shard from SLURM_ARRAY_TASK_ID.
        let script = format!(
            "#!/usr/bin/env bash\nexec {}\n",
            shell_join(&req.call)
        );

        for range in contiguous_ranges(&req.shards) {
            let mut argv = vec!["sbatch".to_string()];
            argv.extend(self.options(&req.rqmt, &name, &req.log_dir.display().to_string(), range));

            let cmd = backend_command(self.gateway.as_deref(), &argv);
            let output =
                run_with_stdin(cmd, &script, SUBMIT_COMMAND_TIMEOUT, "sbatch").await?;
            if !output.status.success() {
                return Err(EngineError::SubmitFailed(format!(
                    "sbatch exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
            let stdout = String::from_utf8_lossy(&output.stdout);
            // "Submitted batch job 12345"
            if let Some(id) = stdout.split_whitespace().rev().find(|t| {
                !t.is_empty() && t.chars().all(|c| c.is_ascii_digit())
            }) {
                ids.push(id.to_string());
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
        let argv = vec!["scancel".to_string(), "-n".to_string(), task.queue_name()];
        let cmd = backend_command(self.gateway.as_deref(), &argv);
        let output = run_with_timeout(cmd, SUBMIT_COMMAND_TIMEOUT, "scancel").await?;
        if !output.status.success() {
            tracing::warn!(
                task = %task.queue_name(),
                shard = task.shard,
                "scancel failed; the task may have finished already"
            );
        }
        Ok(())
    }

    async fn reset_cache(&self) {
        *self.cache.lock().await = None;
    }
}

fn shell_join(argv: &[String]) -> String {
    argv.iter()
        .map(|a| {
            if a.chars().all(|c| c.is_ascii_alphanumeric() || "-_./=".contains(c)) {
                a.clone()
            } else {
                format!("'{}'", a.replace('\'', "'\\''"))
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
#[path = "slurm_tests.rs"]
mod tests;
