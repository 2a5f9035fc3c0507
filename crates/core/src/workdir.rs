// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Work-directory layout and the on-disk marker protocol.
//!
//! The marker files under `<work>/<sis_id>/` ARE the persistent state of the
//! system; manager and workers coordinate exclusively through them. Names
//! are fixed so existing work trees stay interoperable:
//!
//! ```text
//! job.save                    serialized job consumed by the worker
//! input/                      symlinks to predecessor job directories
//! output/                     the job's outputs
//! work/                       scratch dir tasks execute in
//! engine/                     engine stdout/stderr capture
//! log.<task>.<shard>          task started (worker-owned)
//! submit_log.<task>.<shard>   submission history (manager-owned, JSONL)
//! engine_cmd.<task>.<shard>   exact command handed to the engine
//! finished.<task>.<shard>     shard completed successfully
//! error.<task>.<shard>        shard failed; body describes the cause
//! usage.<task>.<shard>        worker heartbeat (resource snapshot)
//! info                        parameters and attempt history
//! hold                        manual hold; never dispatched
//! finished                    job-level marker once all tasks are done
//! ```

use crate::clock::Clock;
use crate::id::SisId;
use crate::settings::Settings;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const JOB_SAVE: &str = "job.save";
pub const JOB_INFO: &str = "info";
pub const JOB_HOLD: &str = "hold";
pub const JOB_FINISHED: &str = "finished";

pub const MARKER_FINISHED: &str = "finished";
pub const MARKER_ERROR: &str = "error";
pub const MARKER_LOG: &str = "log";
pub const MARKER_SUBMIT_LOG: &str = "submit_log";
pub const MARKER_ENGINE_CMD: &str = "engine_cmd";
pub const MARKER_USAGE: &str = "usage";
pub const MARKER_LOCK: &str = ".lock";

pub const INPUT_DIR: &str = "input";
pub const OUTPUT_DIR: &str = "output";
pub const WORK_SUBDIR: &str = "work";
pub const ENGINE_LOG_DIR: &str = "engine";

/// Lockfile guarding against two managers on one work dir (advisory).
pub const MANAGER_LOCKFILE: &str = ".sis_manager_lock";

/// First-line tag of an `error.*` marker the manager treats as retryable
/// (preemption, SIGTERM before finish).
pub const INTERRUPTED_TAG: &str = "interrupted";

/// Resolved directory roots for one experiment.
#[derive(Debug, Clone)]
pub struct WorkLayout {
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
    pub alias_dir: PathBuf,
}

impl WorkLayout {
    pub fn new(base: impl AsRef<Path>, settings: &Settings) -> Self {
        let base = base.as_ref();
        Self {
            work_dir: base.join(&settings.work_dir),
            output_dir: base.join(&settings.output_dir),
            alias_dir: base.join(&settings.alias_dir),
        }
    }

    pub fn job_dir(&self, id: &SisId) -> PathBuf {
        self.work_dir.join(id.rel_dir())
    }

    pub fn job_file(&self, id: &SisId, name: &str) -> PathBuf {
        self.job_dir(id).join(name)
    }

    /// Marker file `<stem>.<task>[.<shard>]` inside the job directory.
    pub fn marker(&self, id: &SisId, stem: &str, task: &str, shard: Option<usize>) -> PathBuf {
        self.job_dir(id).join(marker_name(stem, task, shard))
    }

    /// Resolved location of a job output.
    pub fn job_output(&self, id: &SisId, rel: &str) -> PathBuf {
        self.job_dir(id).join(OUTPUT_DIR).join(rel)
    }

    /// True once the job-level finished marker exists.
    pub fn job_finished(&self, id: &SisId) -> bool {
        self.job_file(id, JOB_FINISHED).is_file()
    }

    /// True if the job directory has been materialized.
    pub fn job_setup(&self, id: &SisId) -> bool {
        self.job_dir(id).is_dir()
    }

    pub fn job_held(&self, id: &SisId) -> bool {
        self.job_file(id, JOB_HOLD).is_file()
    }

    /// Parse a sisyphus-id back out of a job directory path.
    pub fn id_of_dir(&self, dir: &Path) -> Option<SisId> {
        let rel = dir.strip_prefix(&self.work_dir).ok()?;
        let s = rel.to_str()?;
        if s.is_empty() {
            return None;
        }
        Some(SisId::from_string(s))
    }
}

/// `<stem>.<task>[.<shard>]`
pub fn marker_name(stem: &str, task: &str, shard: Option<usize>) -> String {
    match shard {
        Some(i) => format!("{stem}.{task}.{i}"),
        None => format!("{stem}.{task}"),
    }
}

/// Write a file atomically (tempfile in the same directory + rename), so a
/// concurrent reader sees either the old content or the new, never a torn
/// write.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "path has no parent directory")
    })?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Create an empty marker file atomically.
pub fn touch_marker(path: &Path) -> io::Result<()> {
    atomic_write(path, &[])
}

/// Age of a file according to its mtime, `None` if it does not exist.
pub fn file_age(path: &Path, clock: &dyn Clock) -> Option<Duration> {
    let mtime = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(
        clock
            .system()
            .duration_since(mtime)
            .unwrap_or(Duration::ZERO),
    )
}

/// True if an `error.*` marker records a retryable interruption (its first
/// line carries [`INTERRUPTED_TAG`]).
pub fn error_is_interrupted(path: &Path) -> bool {
    let Ok(body) = std::fs::read_to_string(path) else {
        return false;
    };
    body.lines()
        .next()
        .is_some_and(|line| line.starts_with(INTERRUPTED_TAG))
}

/// True if the file exists and its mtime is at least `min_age` old.
///
/// This is the network-filesystem trust rule: a freshly observed `finished`
/// marker is only believed once attribute caches have had time to settle.
pub fn older_than(path: &Path, min_age: Duration, clock: &dyn Clock) -> bool {
    match file_age(path, clock) {
        Some(age) => age >= min_age,
        None => false,
    }
}

#[cfg(test)]
#[path = "workdir_tests.rs"]
mod tests;
