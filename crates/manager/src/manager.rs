// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The control loop.

use crate::cleaner;
use crate::dispatch;
use crate::outputs;
use crate::resolve::{resolve_all, Resolver, StateTable};
use fs2::FileExt;
use sis_core::state::JobState;
use sis_core::workdir::{
    touch_marker, JOB_FINISHED, MARKER_ERROR, MARKER_LOG, JOB_HOLD, MANAGER_LOCKFILE,
};
use sis_core::{Graph, GraphError, Job, RunContext, SisId};
use sis_engine::{Engine, EngineError};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Consecutive ticks of engine failure tolerated before giving up.
const MAX_ENGINE_FAILURE_TICKS: u32 = 10;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("another manager holds the lock on this work directory")]
    AlreadyRunning,
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("engine failed: {0}")]
    Engine(EngineError),
    #[error("engine failed {MAX_ENGINE_FAILURE_TICKS} ticks in a row, last error: {0}")]
    EngineGaveUp(EngineError),
    #[error("manager io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Start dispatching without the interactive prompt.
    pub start_computations: bool,
    /// Maintain the user-visible output/alias trees.
    pub link_outputs: bool,
    /// Exit once nothing actionable is left.
    pub stop_when_done: bool,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            start_computations: false,
            link_outputs: true,
            stop_when_done: true,
        }
    }
}

/// What one tick did and saw.
pub struct TickReport {
    pub table: StateTable,
    pub submitted: usize,
    pub resumed_continuations: usize,
    /// Nothing actionable and no suspended recipe left.
    pub done: bool,
}

pub struct Manager {
    graph: Graph,
    engine: Arc<dyn Engine>,
    ctx: RunContext,
    opts: ManagerOptions,
    /// Advisory single-manager lock, held for the manager's lifetime.
    _lock: std::fs::File,
    paused: bool,
    reported_errors: HashSet<String>,
    engine_failures: u32,
    last_overview: Vec<String>,
    last_overview_at: Option<Instant>,
}

impl Manager {
    pub fn new(
        graph: Graph,
        engine: Arc<dyn Engine>,
        ctx: RunContext,
        opts: ManagerOptions,
    ) -> Result<Self, ManagerError> {
        std::fs::create_dir_all(&ctx.layout.work_dir)?;
        let lock = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(ctx.layout.work_dir.join(MANAGER_LOCKFILE))?;
        if lock.try_lock_exclusive().is_err() {
            return Err(ManagerError::AlreadyRunning);
        }

        Ok(Self {
            graph,
            engine,
            ctx,
            opts,
            _lock: lock,
            paused: false,
            reported_errors: HashSet::new(),
            engine_failures: 0,
            last_overview: Vec::new(),
            last_overview_at: None,
        })
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// One iteration: graph-update phase, then dispatch phase.
    pub async fn tick(&mut self) -> Result<TickReport, ManagerError> {
        // Graph-update phase: fresh queue snapshot, resume suspended
        // recipes, derive all states ancestors-first.
        self.engine.reset_cache().await;
        let resumed = self.graph.resume_ready(&self.ctx.layout)?;
        if resumed > 0 {
            tracing::info!(resumed, "async recipe steps continued");
        }

        let jobs = self.graph.jobs_topological()?;
        let resolver = Resolver {
            ctx: self.ctx.clone(),
            engine: Arc::clone(&self.engine),
        };
        let mut table = resolve_all(&resolver, &jobs).await;

        // Errored shards with tries left get their markers rotated away and
        // count as interrupted from here on.
        let mut retried = Vec::new();
        for id in table.jobs_in(JobState::Error).to_vec() {
            if let Some(job) = self.graph.job(&id) {
                if self.consume_retries(&job) {
                    retried.push(id);
                }
            }
        }
        if !retried.is_empty() {
            // Recompute the affected jobs; their error markers are gone.
            let mut rebuilt = StateTable::default();
            rebuilt.missing_inputs = std::mem::take(&mut table.missing_inputs);
            for job in &jobs {
                let state = resolver.job_state(job).await;
                rebuilt.insert(job.id().clone(), state);
            }
            table = rebuilt;
        }

        self.print_overview(&table);

        // A paused manager keeps observing (graph-update phase above) but
        // dispatches nothing.
        if self.paused {
            return Ok(TickReport {
                table,
                submitted: 0,
                resumed_continuations: resumed,
                done: false,
            });
        }

        // Dispatch phase, ancestors before descendants.
        let mut submitted = 0usize;
        let mut engine_error: Option<EngineError> = None;
        for job in &jobs {
            let Some(state) = table.state_of(job.id()) else {
                continue;
            };
            match state {
                JobState::Hold => {
                    // Held jobs still get their directory for inspection.
                    dispatch::materialize(&self.ctx, job)?;
                }
                JobState::Runnable | JobState::Interrupted => {
                    dispatch::materialize(&self.ctx, job)?;
                    match dispatch::submit_next(&resolver, job).await {
                        Ok(true) => submitted += 1,
                        Ok(false) => {}
                        Err(e) => {
                            tracing::error!(job = %job.id(), error = %e, "submission failed");
                            engine_error = Some(e);
                        }
                    }
                }
                JobState::Finished => {
                    self.seal_finished(job)?;
                }
                JobState::Error | JobState::QueueError | JobState::RetryError => {
                    self.report_failure(job, state);
                }
                JobState::Unknown => {
                    if self.reported_errors.insert(format!("unknown:{}", job.id())) {
                        tracing::warn!(
                            job = %job.id(),
                            "markers contradict each other; manual intervention required"
                        );
                    }
                }
                JobState::Waiting | JobState::Queued | JobState::Running => {}
            }
        }

        match engine_error {
            Some(e) => {
                self.engine_failures += 1;
                if self.engine_failures >= MAX_ENGINE_FAILURE_TICKS {
                    return Err(ManagerError::EngineGaveUp(e));
                }
            }
            None => self.engine_failures = 0,
        }

        if self.opts.link_outputs {
            outputs::link_outputs(&self.graph, &self.ctx.layout)?;
            outputs::refresh_aliases(&self.graph, &self.ctx.layout)?;
        }
        if self.ctx.settings.job_auto_cleanup {
            cleaner::remove_orphans(&self.ctx, &self.graph.live_ids());
        }

        let done = !table.has_actionable() && self.graph.pending_continuations() == 0;
        Ok(TickReport {
            table,
            submitted,
            resumed_continuations: resumed,
            done,
        })
    }

    /// Run the loop until done or interrupted. On SIGINT no new work is
    /// submitted; in-flight tasks belong to the engine and keep running.
    pub async fn run(&mut self) -> Result<(), ManagerError> {
        self.engine.start().await.map_err(ManagerError::Engine)?;

        loop {
            let report = self.tick().await?;

            if report.done && self.opts.stop_when_done {
                // Settle, then double-check to dodge caching effects.
                tokio::time::sleep(std::time::Duration::from_secs(
                    self.ctx.settings.wait_period_cache.min(5),
                ))
                .await;
                let check = self.tick().await?;
                if check.done {
                    tracing::info!("all outputs computed, nothing left to do");
                    break;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.ctx.settings.tick()) => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupt: submitting nothing further; engine tasks continue");
                    break;
                }
            }
        }

        self.engine.stop().await;
        if self.opts.link_outputs {
            outputs::link_outputs(&self.graph, &self.ctx.layout)?;
            outputs::refresh_aliases(&self.graph, &self.ctx.layout)?;
        }
        Ok(())
    }

    /// Write the job-level finished marker once every task of the job is
    /// done; completion is monotone from here on.
    fn seal_finished(&self, job: &Job) -> std::io::Result<()> {
        let marker = self.ctx.layout.job_file(job.id(), JOB_FINISHED);
        if !marker.is_file() && self.ctx.layout.job_setup(job.id()) {
            touch_marker(&marker)?;
            tracing::info!(job = %job.id(), "job finished");
        }
        Ok(())
    }

    fn consume_retries(&self, job: &Job) -> bool {
        let mut any = false;
        for spec in job.tasks() {
            for shard in spec.shard_ids() {
                if dispatch::consume_retry(&self.ctx, job, &spec, shard) {
                    any = true;
                }
            }
        }
        any
    }

    /// Surface a failed job once, with a pointer to its error marker and
    /// the tail of its log.
    fn report_failure(&mut self, job: &Job, state: JobState) {
        if !self.reported_errors.insert(format!("{state}:{}", job.id())) {
            return;
        }
        let layout = &self.ctx.layout;
        for spec in job.tasks() {
            for shard in spec.shard_ids() {
                let error_path = layout.marker(job.id(), MARKER_ERROR, &spec.name, Some(shard));
                if !error_path.is_file() && state != JobState::RetryError {
                    continue;
                }
                tracing::error!(
                    job = %job.id(),
                    task = %spec.name,
                    shard,
                    state = %state,
                    error_file = %error_path.display(),
                    "job failed"
                );
                let log_path = layout.marker(job.id(), MARKER_LOG, &spec.name, Some(shard));
                if let Ok(log) = std::fs::read_to_string(&log_path) {
                    let lines: Vec<&str> = log.lines().collect();
                    let keep = self.ctx.settings.print_error_lines;
                    for line in lines.iter().rev().take(keep).rev() {
                        tracing::error!(job = %job.id(), "  {line}");
                    }
                }
                return;
            }
        }
        tracing::error!(job = %job.id(), state = %state, "job failed");
    }

    /// Log the state overview when it changed or went stale.
    fn print_overview(&mut self, table: &StateTable) {
        let overview = table.overview();
        let stale = self
            .last_overview_at
            .map_or(true, |at| {
                at.elapsed().as_secs() >= self.ctx.settings.stale_overview_period
            });
        if overview == self.last_overview && !stale {
            return;
        }
        self.last_overview = overview.clone();
        self.last_overview_at = Some(Instant::now());

        let targets = if self.ctx.settings.show_job_targets {
            job_targets(&self.graph)
        } else {
            BTreeMap::new()
        };
        for (id, state) in table.iter() {
            let annotation = targets
                .get(id)
                .and_then(|names| names.iter().next())
                .map(|name| format!(" <target: {name}>"))
                .unwrap_or_default();
            match state {
                JobState::Error | JobState::QueueError | JobState::RetryError => {
                    tracing::error!("{state}: {id}{annotation}")
                }
                JobState::Interrupted | JobState::Unknown => {
                    tracing::warn!("{state}: {id}{annotation}")
                }
                JobState::Queued | JobState::Running | JobState::Runnable => {
                    tracing::info!("{state}: {id}{annotation}")
                }
                _ => tracing::debug!("{state}: {id}{annotation}"),
            }
        }
        for input in &table.missing_inputs {
            tracing::error!(input = %input, "external input missing");
        }
        tracing::info!("{}", overview.join(" "));
    }

    /// Halt the dispatch phase while keeping the graph-update phase alive
    /// for observability.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn unpause(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Manually hold / release a job (the `hold` marker file).
    pub fn hold(&self, id: &SisId) -> std::io::Result<()> {
        let dir = self.ctx.layout.job_dir(id);
        std::fs::create_dir_all(&dir)?;
        touch_marker(&dir.join(JOB_HOLD))
    }

    pub fn release(&self, id: &SisId) -> std::io::Result<()> {
        let marker = self.ctx.layout.job_file(id, JOB_HOLD);
        if marker.is_file() {
            std::fs::remove_file(marker)?;
        }
        Ok(())
    }
}

/// Which registered outputs each live job is needed for.
pub fn job_targets(graph: &Graph) -> BTreeMap<SisId, BTreeSet<String>> {
    let mut map: BTreeMap<SisId, BTreeSet<String>> = BTreeMap::new();
    for target in graph.targets() {
        let Some(creator) = &target.path.creator else {
            continue;
        };
        let mut stack = vec![creator.clone()];
        let mut seen = BTreeSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            map.entry(id.clone())
                .or_default()
                .insert(target.name.clone());
            if let Some(job) = graph.job(&id) {
                stack.extend(job.predecessor_ids());
            }
        }
    }
    map
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
