// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Derived state resolution.
//!
//! States are never stored: each tick they are recomputed from the marker
//! files and the engine's cached queue snapshot. The precedence per shard:
//! a trusted finished marker wins, then an error marker (tagged interrupted
//! markers are retryable), then whatever the engine says; an engine that no
//! longer knows a started task means interrupted (or retry-error once the
//! submission history is exhausted).

use sis_core::state::JobState;
use sis_core::usage::heartbeat_fresh;
use sis_core::workdir::{
    error_is_interrupted, older_than, JOB_INFO, MARKER_ERROR, MARKER_FINISHED, MARKER_LOG,
    MARKER_USAGE,
};
use sis_core::{Job, JobInfo, RunContext, SisId, TaskSpec};
use sis_engine::{Engine, EngineTaskState, TaskRef};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Computes derived states for one tick.
pub struct Resolver {
    pub ctx: RunContext,
    pub engine: Arc<dyn Engine>,
}

impl Resolver {
    /// State of one shard of one task.
    pub async fn shard_state(&self, job: &Job, spec: &TaskSpec, shard: usize) -> JobState {
        let layout = &self.ctx.layout;
        let settings = &self.ctx.settings;
        let clock = self.ctx.clock.as_ref();
        let id = job.id();

        let finished_path = layout.marker(id, MARKER_FINISHED, &spec.name, Some(shard));
        let error_path = layout.marker(id, MARKER_ERROR, &spec.name, Some(shard));

        // Continuable tasks never write finished markers; they are complete
        // once every declared output of the job exists.
        let finished = if spec.continuable {
            let mut outputs = job.outputs().peekable();
            outputs.peek().is_some() && outputs.all(|p| p.exists(layout))
        } else {
            older_than(&finished_path, settings.fs_sync(), clock)
        };
        let errored = error_path.is_file();

        if finished && errored {
            // Contradictory markers; a human has to look.
            return JobState::Unknown;
        }
        if finished {
            return JobState::Finished;
        }
        if errored {
            return if error_is_interrupted(&error_path) {
                self.interrupted_or_retry_error(job, spec, shard)
            } else {
                JobState::Error
            };
        }

        let engine_state = self
            .engine
            .task_state(&TaskRef {
                job: id.clone(),
                task: spec.name.clone(),
                shard,
                engine: spec.rqmt.engine.clone(),
            })
            .await;

        match engine_state {
            EngineTaskState::Queued => JobState::Queued,
            EngineTaskState::Running => JobState::Running,
            EngineTaskState::QueueError => JobState::QueueError,
            EngineTaskState::Unknown => {
                let log_path = layout.marker(id, MARKER_LOG, &spec.name, Some(shard));
                if !log_path.is_file() {
                    // Never started here; possibly submitted by a previous
                    // manager whose engine lost it. Either way: submit.
                    return JobState::Runnable;
                }
                // Started at some point. A live heartbeat means the task is
                // still going even though the engine lost track of it.
                let usage_path = layout.marker(id, MARKER_USAGE, &spec.name, Some(shard));
                if heartbeat_fresh(&usage_path, settings.heartbeat_max_age(), clock)
                    == Some(true)
                {
                    return JobState::Running;
                }
                // A finished marker still inside the distrust window: let it
                // age rather than resubmitting a done task.
                if finished_path.is_file() {
                    return JobState::Running;
                }
                self.interrupted_or_retry_error(job, spec, shard)
            }
        }
    }

    fn interrupted_or_retry_error(&self, job: &Job, spec: &TaskSpec, shard: usize) -> JobState {
        let info_path = self.ctx.layout.job_file(job.id(), JOB_INFO);
        let submits = JobInfo::load_or_default(&info_path).submit_count(&spec.name, shard);
        if submits > self.ctx.settings.max_submit_retries {
            JobState::RetryError
        } else {
            JobState::Interrupted
        }
    }

    /// Worst state across all shards of a task.
    pub async fn task_state(&self, job: &Job, spec: &TaskSpec) -> JobState {
        let mut states = Vec::with_capacity(spec.shards);
        for shard in spec.shard_ids() {
            states.push(self.shard_state(job, spec, shard).await);
        }
        JobState::combine_shards(&states)
    }

    /// State of a whole job: the first non-finished task decides.
    pub async fn job_state(&self, job: &Job) -> JobState {
        let layout = &self.ctx.layout;
        let id = job.id();

        if layout.job_held(id) {
            return JobState::Hold;
        }
        if !layout.job_setup(id) {
            return if job.runnable(layout) {
                JobState::Runnable
            } else {
                JobState::Waiting
            };
        }
        if layout.job_finished(id) {
            return JobState::Finished;
        }
        // Inputs can disappear after setup (manual cleanup upstream).
        if !job.runnable(layout) {
            return JobState::Waiting;
        }
        for spec in job.tasks() {
            let state = self.task_state(job, &spec).await;
            if state != JobState::Finished {
                return state;
            }
        }
        JobState::Finished
    }
}

/// All job states of one tick, plus missing external inputs.
#[derive(Debug, Default)]
pub struct StateTable {
    states: BTreeMap<SisId, JobState>,
    by_state: BTreeMap<JobState, Vec<SisId>>,
    pub missing_inputs: Vec<String>,
}

impl StateTable {
    pub fn insert(&mut self, id: SisId, state: JobState) {
        self.by_state.entry(state).or_default().push(id.clone());
        self.states.insert(id, state);
    }

    pub fn state_of(&self, id: &SisId) -> Option<JobState> {
        self.states.get(id).copied()
    }

    pub fn jobs_in(&self, state: JobState) -> &[SisId] {
        self.by_state.get(&state).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn count(&self, state: JobState) -> usize {
        self.jobs_in(state).len()
    }

    /// True while any job still needs the manager.
    pub fn has_actionable(&self) -> bool {
        self.by_state
            .iter()
            .any(|(state, ids)| state.is_actionable() && !ids.is_empty())
    }

    /// `state(count)` summary tokens, sorted by state name.
    pub fn overview(&self) -> Vec<String> {
        let mut parts: Vec<String> = self
            .by_state
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(state, ids)| format!("{state}({})", ids.len()))
            .collect();
        if !self.missing_inputs.is_empty() {
            parts.push(format!("input_missing({})", self.missing_inputs.len()));
        }
        parts.sort();
        parts
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SisId, JobState)> {
        self.states.iter().map(|(id, state)| (id, *state))
    }
}

/// Resolve every job of the (topologically ordered) live set.
pub async fn resolve_all(resolver: &Resolver, jobs: &[Arc<Job>]) -> StateTable {
    let mut table = StateTable::default();
    for job in jobs {
        let state = resolver.job_state(job).await;
        table.insert(job.id().clone(), state);

        for input in job.inputs() {
            if input.creator.is_none() && !input.available(&resolver.ctx.layout) {
                let name = input.to_string();
                if !table.missing_inputs.contains(&name) {
                    table.missing_inputs.push(name);
                }
            }
        }
    }
    table
}

#[cfg(test)]
#[path = "resolve_tests.rs"]
mod tests;
