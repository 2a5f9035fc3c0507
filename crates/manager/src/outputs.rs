// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User-visible `output/` and `alias/` symlink trees.
//!
//! Both trees are recreated every tick so they always reflect the live
//! graph: a link is replaced when it points at the wrong target and left
//! alone otherwise.

use sis_core::{Graph, WorkLayout};
use std::path::Path;

/// Link every available registered output into the output tree. Returns
/// the names linked for the first time.
pub fn link_outputs(graph: &Graph, layout: &WorkLayout) -> std::io::Result<Vec<String>> {
    let mut fresh = Vec::new();
    for target in graph.targets() {
        if !target.path.available(layout) {
            continue;
        }
        let dest = layout.output_dir.join(&target.name);
        let source = target.path.get_path(layout);
        let source = source.canonicalize().unwrap_or(source);
        if ensure_symlink(&dest, &source)? {
            tracing::info!(output = %target.name, "finished output");
            fresh.push(target.name.clone());
        }
    }
    Ok(fresh)
}

/// Recreate the alias tree: one symlink per alias pointing at the job
/// directory.
pub fn refresh_aliases(graph: &Graph, layout: &WorkLayout) -> std::io::Result<()> {
    for (alias, id) in graph.aliases() {
        let dest = layout.alias_dir.join(alias);
        let source = layout.job_dir(id);
        let source = source.canonicalize().unwrap_or(source);
        ensure_symlink(&dest, &source)?;
    }
    Ok(())
}

/// Point `dest` at `source`, replacing a stale link. Returns true when the
/// link was created or retargeted.
fn ensure_symlink(dest: &Path, source: &Path) -> std::io::Result<bool> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::read_link(dest) {
        Ok(existing) if existing == source => return Ok(false),
        Ok(_) => std::fs::remove_file(dest)?,
        Err(_) => {
            // A regular file squatting on the link name is replaced; a
            // directory is left alone (someone put real data there).
            if dest.is_file() {
                tracing::warn!(path = %dest.display(), "removing file shadowing an output link");
                std::fs::remove_file(dest)?;
            } else if dest.is_dir() {
                tracing::warn!(path = %dest.display(), "output link name occupied by a directory; skipping");
                return Ok(false);
            }
        }
    }
    std::os::unix::fs::symlink(source, dest)?;
    Ok(true)
}

#[cfg(test)]
#[path = "outputs_tests.rs"]
mod tests;
