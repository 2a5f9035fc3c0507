// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for manager tests: a configurable step job, a recording
//! engine with scriptable queue states, and an engine that runs workers
//! inline for end-to-end tick tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sis_core::hash::{HashError, RecordEncoder};
use sis_core::{
    FakeClock, JobDef, JobKind, JobRegistry, OutputDecl, Path as SisPath, ProcessRole, Rqmt,
    RunContext, Settings, TaskContext, TaskSpec, WorkLayout,
};
use sis_engine::{Engine, EngineError, EngineTaskState, SubmitReceipt, SubmitRequest, TaskRef};
use std::collections::HashMap;
use std::sync::Arc;

/// One configurable pipeline step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepJob {
    pub label: String,
    pub input: Option<SisPath>,
    /// "ok" or "fail".
    pub mode: String,
    pub shards: usize,
    pub tries: u32,
}

impl StepJob {
    pub fn ok(label: &str) -> Self {
        Self {
            label: label.into(),
            input: None,
            mode: "ok".into(),
            shards: 1,
            tries: 1,
        }
    }

    pub fn after(label: &str, input: SisPath) -> Self {
        Self {
            input: Some(input),
            ..Self::ok(label)
        }
    }
}

impl JobDef for StepJob {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn hash_input(&self, rec: &mut RecordEncoder<'_>) -> Result<(), HashError> {
        rec.field("label", &self.label)?.field("input", &self.input)?;
        Ok(())
    }

    fn input_paths(&self) -> Vec<SisPath> {
        self.input.clone().into_iter().collect()
    }

    fn outputs(&self) -> Vec<OutputDecl> {
        vec![OutputDecl::file("out.txt")]
    }

    fn tasks(&self) -> Vec<TaskSpec> {
        vec![TaskSpec::new("run")
            .resume("run")
            .shards(self.shards)
            .tries(self.tries)
            .rqmt(Rqmt::new().mem(2.0))]
    }

    fn run(&self, ctx: &TaskContext<'_>, _task: &str, shard: usize) -> anyhow::Result<()> {
        if self.mode == "fail" {
            anyhow::bail!("step {} failed deliberately", self.label);
        }
        std::fs::write(
            ctx.output_path("out.txt"),
            format!("{} shard {shard}\n", self.label),
        )?;
        Ok(())
    }

    fn save(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

impl JobKind for StepJob {
    const KIND: &'static str = "test/StepJob";
}

pub struct Fixture {
    pub tmp: tempfile::TempDir,
    pub settings: Arc<Settings>,
    pub layout: WorkLayout,
    pub clock: FakeClock,
    pub manager_ctx: RunContext,
    pub worker_ctx: RunContext,
    pub registry: Arc<JobRegistry>,
}

pub fn fixture() -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    // Test-friendly timings: trust markers immediately, heartbeats go stale
    // after one second, don't sleep on shutdown checks.
    settings.wait_period_job_fs_sync = 0;
    settings.wait_period_between_checks = 1;
    settings.wait_period_cache = 0;
    settings.usage_poll_interval = 1;
    settings.usage_update_period = 1;
    settings.job_cleanup_grace = 0;
    let settings = Arc::new(settings);
    let layout = WorkLayout::new(tmp.path(), &settings);
    let clock = FakeClock::new();

    let manager_ctx = RunContext::new(
        ProcessRole::Manager,
        layout.clone(),
        Arc::clone(&settings),
    )
    .with_clock(Arc::new(clock.clone()));
    let worker_ctx = RunContext::new(ProcessRole::Worker, layout.clone(), Arc::clone(&settings))
        .with_clock(Arc::new(clock.clone()));

    let mut registry = JobRegistry::new();
    registry.register::<StepJob>();

    Fixture {
        tmp,
        settings,
        layout,
        clock,
        manager_ctx,
        worker_ctx,
        registry: Arc::new(registry),
    }
}

/// Records submissions; queue states are scripted by the test.
#[derive(Default)]
pub struct RecordingEngine {
    pub submitted: Mutex<Vec<SubmitRequest>>,
    pub states: Mutex<HashMap<(String, usize), EngineTaskState>>,
}

impl RecordingEngine {
    pub fn set_state(&self, name: &str, shard: usize, state: EngineTaskState) {
        self.states.lock().insert((name.to_string(), shard), state);
    }

    pub fn submissions(&self) -> Vec<SubmitRequest> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl Engine for RecordingEngine {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn stop(&self) {}

    async fn submit(&self, req: &SubmitRequest) -> Result<SubmitReceipt, EngineError> {
        self.submitted.lock().push(req.clone());
        Ok(SubmitReceipt {
            engine: "recording".into(),
            info: "test".into(),
        })
    }

    async fn task_state(&self, task: &TaskRef) -> EngineTaskState {
        self.states
            .lock()
            .get(&(task.queue_name(), task.shard))
            .copied()
            .unwrap_or(EngineTaskState::Unknown)
    }

    async fn kill(&self, _task: &TaskRef) -> Result<(), EngineError> {
        Ok(())
    }

    async fn reset_cache(&self) {}
}

/// Runs the worker synchronously inside `submit`, so one manager tick
/// carries a task from runnable to finished.
pub struct InlineEngine {
    worker_ctx: RunContext,
    registry: Arc<JobRegistry>,
    pub submitted: Mutex<Vec<SubmitRequest>>,
}

impl InlineEngine {
    pub fn new(worker_ctx: RunContext, registry: Arc<JobRegistry>) -> Self {
        Self {
            worker_ctx,
            registry,
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn submissions(&self) -> Vec<SubmitRequest> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl Engine for InlineEngine {
    fn name(&self) -> &'static str {
        "inline"
    }

    async fn stop(&self) {}

    async fn submit(&self, req: &SubmitRequest) -> Result<SubmitReceipt, EngineError> {
        self.submitted.lock().push(req.clone());
        let job_dir = self.worker_ctx.layout.job_dir(&req.job);
        for &shard in &req.shards {
            let outcome =
                sis_worker::execute(&self.worker_ctx, &self.registry, &job_dir, &req.task, shard)
                    .map_err(|e| EngineError::SubmitFailed(e.to_string()))?;
            tracing::debug!(job = %req.job, task = %req.task, shard, outcome = %outcome, "inline worker done");
        }
        Ok(SubmitReceipt {
            engine: "inline".into(),
            info: "in-process".into(),
        })
    }

    async fn task_state(&self, _task: &TaskRef) -> EngineTaskState {
        // Work completes inside submit; the markers carry the state.
        EngineTaskState::Unknown
    }

    async fn kill(&self, _task: &TaskRef) -> Result<(), EngineError> {
        Ok(())
    }

    async fn reset_cache(&self) {}
}
