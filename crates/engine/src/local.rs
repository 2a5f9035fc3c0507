// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The local engine: an in-process worker pool.
//!
//! Tasks queue until the declared requirements fit the remaining capacity
//! (first fit), then run as child processes of the manager. After a manager
//! restart, running tasks are re-adopted from their usage heartbeat files
//! by probing the recorded pid.

use crate::{Engine, EngineError, EngineTaskState, SubmitReceipt, SubmitRequest, TaskRef};
use async_trait::async_trait;
use parking_lot::Mutex;
use sis_core::workdir::MARKER_USAGE;
use sis_core::{Rqmt, UsageSnapshot, WorkLayout};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const ENGINE_NAME: &str = "local";

/// Pool capacity. CPU and GPU are always enforced; memory only when a
/// budget was configured.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resources {
    pub cpu: u32,
    pub gpu: u32,
    pub mem: Option<f64>,
}

impl Resources {
    pub fn detect(cpu: Option<u32>, gpu: u32, mem: Option<f64>) -> Self {
        let cpu = cpu.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1)
        });
        Self { cpu, gpu, mem }
    }
}

struct FreePool {
    max: Resources,
    cpu: u32,
    gpu: u32,
    mem: Option<f64>,
}

impl FreePool {
    fn new(max: Resources) -> Self {
        Self {
            max,
            cpu: max.cpu,
            gpu: max.gpu,
            mem: max.mem,
        }
    }

    fn fits(&self, rqmt: &Rqmt) -> bool {
        if rqmt.cpu > self.max.cpu
            || rqmt.gpu > self.max.gpu
            || self.max.mem.is_some_and(|m| rqmt.mem > m)
        {
            tracing::warn!(
                requested = ?rqmt,
                available = ?self.max,
                "task requests more than the local pool will ever have"
            );
        }
        rqmt.cpu <= self.cpu
            && rqmt.gpu <= self.gpu
            && self.mem.map_or(true, |free| rqmt.mem <= free)
    }

    fn reserve(&mut self, rqmt: &Rqmt) {
        self.cpu = self.cpu.saturating_sub(rqmt.cpu);
        self.gpu = self.gpu.saturating_sub(rqmt.gpu);
        if let Some(free) = &mut self.mem {
            *free = (*free - rqmt.mem).max(0.0);
        }
    }

    fn release(&mut self, rqmt: &Rqmt) {
        self.cpu = (self.cpu + rqmt.cpu).min(self.max.cpu);
        self.gpu = (self.gpu + rqmt.gpu).min(self.max.gpu);
        if let (Some(free), Some(max)) = (&mut self.mem, self.max.mem) {
            *free = (*free + rqmt.mem).min(max);
        }
    }
}

type TaskKey = (String, usize);

struct Pending {
    key: TaskKey,
    task: String,
    shard: usize,
    call: Vec<String>,
    log_dir: PathBuf,
    rqmt: Rqmt,
}

struct Running {
    pid: u32,
    /// Present for tasks this process spawned; adopted tasks are polled
    /// through /proc instead.
    child: Option<tokio::process::Child>,
    rqmt: Rqmt,
}

struct LocalState {
    queue: VecDeque<Pending>,
    running: HashMap<TaskKey, Running>,
    free: FreePool,
}

pub struct LocalEngine {
    state: Arc<Mutex<LocalState>>,
    layout: WorkLayout,
    stopping: Arc<AtomicBool>,
}

impl LocalEngine {
    pub fn new(capacity: Resources, layout: WorkLayout) -> Self {
        Self {
            state: Arc::new(Mutex::new(LocalState {
                queue: VecDeque::new(),
                running: HashMap::new(),
                free: FreePool::new(capacity),
            })),
            layout,
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Reap finished children and start queued tasks that fit.
    fn pump(state: &Mutex<LocalState>) {
        let mut state = state.lock();

        let mut done: Vec<TaskKey> = Vec::new();
        for (key, running) in state.running.iter_mut() {
            let finished = match &mut running.child {
                Some(child) => child.try_wait().map(|s| s.is_some()).unwrap_or(true),
                None => !pid_alive(running.pid),
            };
            if finished {
                done.push(key.clone());
            }
        }
        for key in done {
            if let Some(finished) = state.running.remove(&key) {
                tracing::debug!(task = %key.0, shard = key.1, pid = finished.pid, "local task done");
                state.free.release(&finished.rqmt);
            }
        }

        let mut index = 0;
        while index < state.queue.len() {
            if !state.free.fits(&state.queue[index].rqmt) {
                index += 1;
                continue;
            }
            let Some(pending) = state.queue.remove(index) else {
                break;
            };
            match spawn_task(&pending) {
                Ok(child) => {
                    let pid = child.id().unwrap_or_default();
                    tracing::debug!(task = %pending.key.0, shard = pending.key.1, pid, "local task started");
                    state.free.reserve(&pending.rqmt);
                    state.running.insert(
                        pending.key.clone(),
                        Running {
                            pid,
                            child: Some(child),
                            rqmt: pending.rqmt,
                        },
                    );
                }
                Err(e) => {
                    tracing::error!(task = %pending.key.0, shard = pending.key.1, error = %e, "failed to start local task");
                }
            }
        }
    }

    /// Re-adopt a task left running by a previous manager process.
    fn try_recover(&self, task: &TaskRef) -> bool {
        let usage_path = self
            .layout
            .marker(&task.job, MARKER_USAGE, &task.task, Some(task.shard));
        let Some(snapshot) = UsageSnapshot::load(&usage_path) else {
            return false;
        };
        if !pid_alive(snapshot.pid) {
            return false;
        }

        let mut state = self.state.lock();
        let key = (task.queue_name(), task.shard);
        if state.running.contains_key(&key) {
            return true;
        }
        tracing::info!(task = %key.0, shard = key.1, pid = snapshot.pid, "adopted running local task");
        state.free.reserve(&snapshot.requested);
        state.running.insert(
            key,
            Running {
                pid: snapshot.pid,
                child: None,
                rqmt: snapshot.requested,
            },
        );
        true
    }
}

fn spawn_task(pending: &Pending) -> std::io::Result<tokio::process::Child> {
    std::fs::create_dir_all(&pending.log_dir)?;
    let log_path = pending.log_dir.join(format!(
        "{}.{}.{}",
        ENGINE_NAME, pending.task, pending.shard
    ));
    let log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let log_err = log.try_clone()?;

    let (program, args) = pending
        .call
        .split_first()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty worker call"))?;
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args)
        .arg(pending.shard.to_string())
        .stdout(std::process::Stdio::from(log))
        .stderr(std::process::Stdio::from(log_err))
        .kill_on_drop(false);
    cmd.spawn()
}

fn pid_alive(pid: u32) -> bool {
    std::path::Path::new(&format!("/proc/{pid}")).exists()
}

#[async_trait]
impl Engine for LocalEngine {
    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    async fn start(&self) -> Result<(), EngineError> {
        let state = Arc::clone(&self.state);
        let stopping = Arc::clone(&self.stopping);
        tokio::spawn(async move {
            while !stopping.load(Ordering::Relaxed) {
                Self::pump(&state);
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        });
        Ok(())
    }

    async fn stop(&self) {
        self.stopping.store(true, Ordering::Relaxed);
        let state = self.state.lock();
        if !state.running.is_empty() {
            tracing::warn!(
                count = state.running.len(),
                "local engine stopping with tasks still running; they keep their pids"
            );
        }
    }

    async fn submit(&self, req: &SubmitRequest) -> Result<SubmitReceipt, EngineError> {
        let name = req.queue_name();
        let mut state = self.state.lock();
        for &shard in &req.shards {
            state.queue.push_back(Pending {
                key: (name.clone(), shard),
                task: req.task.clone(),
                shard,
                call: req.call.clone(),
                log_dir: req.log_dir.clone(),
                rqmt: req.rqmt.clone(),
            });
        }
        drop(state);
        Self::pump(&self.state);

        let host = nix::unistd::gethostname()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        Ok(SubmitReceipt {
            engine: ENGINE_NAME.to_string(),
            info: host,
        })
    }

    async fn task_state(&self, task: &TaskRef) -> EngineTaskState {
        let key = (task.queue_name(), task.shard);
        {
            let state = self.state.lock();
            if state.queue.iter().any(|p| p.key == key) {
                return EngineTaskState::Queued;
            }
            if state.running.contains_key(&key) {
                return EngineTaskState::Running;
            }
        }
        if self.try_recover(task) {
            EngineTaskState::Running
        } else {
            EngineTaskState::Unknown
        }
    }

    async fn kill(&self, task: &TaskRef) -> Result<(), EngineError> {
        let key = (task.queue_name(), task.shard);
        let mut state = self.state.lock();
        state.queue.retain(|p| p.key != key);
        if let Some(running) = state.running.get(&key) {
            let pid = nix::unistd::Pid::from_raw(running.pid as i32);
            if let Err(e) = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM) {
                tracing::warn!(pid = running.pid, error = %e, "failed to signal local task");
            }
        }
        Ok(())
    }

    async fn reset_cache(&self) {
        // The pool holds live state; there is no snapshot to invalidate,
        // but a reap keeps task_state answers current.
        Self::pump(&self.state);
    }
}

#[cfg(test)]
#[path = "local_tests.rs"]
mod tests;
