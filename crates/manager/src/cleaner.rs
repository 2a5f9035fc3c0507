// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orphan detection and removal.
//!
//! A job directory is an orphan when no current registered output reaches
//! it. Removal is guarded: only orphans whose finished marker has aged past
//! the grace period go, so a directory freshly dropped from the recipe can
//! still be rescued by putting the output back.

use sis_core::workdir::{older_than, JOB_FINISHED, JOB_SAVE};
use sis_core::{Graph, RunContext, SisId, WorkLayout};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Directory nesting below the work dir we are willing to scan.
const MAX_SCAN_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDirEntry {
    pub id: SisId,
    pub dir: PathBuf,
}

/// Every materialized job directory under the work dir (identified by a
/// `job.save` file).
pub fn scan_job_dirs(layout: &WorkLayout) -> Vec<JobDirEntry> {
    let mut out = Vec::new();
    walk(layout, &layout.work_dir, 0, &mut out);
    out.sort_by(|a, b| a.id.cmp(&b.id));
    out
}

fn walk(layout: &WorkLayout, dir: &Path, depth: usize, out: &mut Vec<JobDirEntry>) {
    if depth > MAX_SCAN_DEPTH {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        // Never descend through symlinks (team-share imports).
        let Ok(meta) = std::fs::symlink_metadata(&path) else {
            continue;
        };
        if !meta.is_dir() {
            continue;
        }
        if path.join(JOB_SAVE).is_file() {
            if let Some(id) = layout.id_of_dir(&path) {
                out.push(JobDirEntry { id, dir: path });
            }
        } else {
            walk(layout, &path, depth + 1, out);
        }
    }
}

/// Materialized directories not reachable from the registered outputs.
pub fn orphans(layout: &WorkLayout, live: &BTreeSet<SisId>) -> Vec<JobDirEntry> {
    scan_job_dirs(layout)
        .into_iter()
        .filter(|entry| !live.contains(&entry.id))
        .collect()
}

/// Remove orphans whose finished marker is older than the grace period.
/// Unfinished orphans are kept (they may belong to an in-flight task of a
/// previous graph). Returns the removed ids.
pub fn remove_orphans(ctx: &RunContext, live: &BTreeSet<SisId>) -> Vec<SisId> {
    let mut removed = Vec::new();
    for entry in orphans(&ctx.layout, live) {
        let finished_marker = entry.dir.join(JOB_FINISHED);
        if !older_than(
            &finished_marker,
            ctx.settings.cleanup_grace(),
            ctx.clock.as_ref(),
        ) {
            tracing::debug!(job = %entry.id, "orphan not finished long enough; keeping");
            continue;
        }
        match std::fs::remove_dir_all(&entry.dir) {
            Ok(()) => {
                tracing::info!(job = %entry.id, "removed orphan job directory");
                removed.push(entry.id);
            }
            Err(e) => {
                tracing::warn!(job = %entry.id, error = %e, "failed to remove orphan");
            }
        }
    }
    removed
}

/// Remove a job directory and the directories of everything depending on
/// it — the console's "rerun this subtree" primitive. Returns the removed
/// ids.
pub fn remove_job_and_descendants(
    ctx: &RunContext,
    graph: &Graph,
    id: &SisId,
) -> std::io::Result<Vec<SisId>> {
    let mut removed = Vec::new();
    for job in graph.job_and_descendants(id) {
        let dir = ctx.layout.job_dir(job.id());
        if dir.is_dir() {
            std::fs::remove_dir_all(&dir)?;
            tracing::info!(job = %job.id(), "removed job directory for rerun");
            removed.push(job.id().clone());
        }
    }
    Ok(removed)
}

#[cfg(test)]
#[path = "cleaner_tests.rs"]
mod tests;
