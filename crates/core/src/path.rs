// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed handles to files exchanged between jobs.

use crate::hash::{Encoder, Fingerprint, HashError};
use crate::id::SisId;
use crate::workdir::{WorkLayout, OUTPUT_DIR};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A reference to an on-disk artifact.
///
/// With a creator, `path` is relative to the creator's `output/` directory
/// and the handle becomes available only once the creator job is finished.
/// Without a creator it names an external file that merely has to exist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Path {
    pub creator: Option<SisId>,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_overwrite: Option<HashOverwrite>,
}

/// Replacement fingerprint for a path, for keeping hashes stable across
/// refactors that move an output between jobs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HashOverwrite {
    Plain(String),
    WithCreator(SisId, String),
}

impl Path {
    /// An external input file, outside any job's output directory.
    pub fn input(path: impl Into<String>) -> Self {
        Self {
            creator: None,
            path: path.into(),
            hash_overwrite: None,
        }
    }

    /// An output of the given job. Constructed by [`crate::job::Job`] during
    /// interning; recipes get these from `Job::output`.
    pub fn output_of(creator: SisId, rel: impl Into<String>) -> Self {
        Self {
            creator: Some(creator),
            path: rel.into(),
            hash_overwrite: None,
        }
    }

    pub fn with_hash_overwrite(mut self, overwrite: HashOverwrite) -> Self {
        self.hash_overwrite = Some(overwrite);
        self
    }

    /// Resolve to a filesystem location.
    pub fn get_path(&self, layout: &WorkLayout) -> PathBuf {
        match &self.creator {
            Some(id) => layout.job_output(id, &self.path),
            None => PathBuf::from(&self.path),
        }
    }

    /// True iff the underlying file (or directory) is present.
    pub fn exists(&self, layout: &WorkLayout) -> bool {
        let p = self.get_path(layout);
        p.is_file() || p.is_dir()
    }

    /// Availability predicate: the file exists AND the creating job (if any)
    /// is finished. Never inspects file contents.
    pub fn available(&self, layout: &WorkLayout) -> bool {
        match &self.creator {
            None => self.exists(layout),
            Some(id) => {
                if !layout.job_finished(id) {
                    return false;
                }
                let present = self.exists(layout);
                if !present {
                    tracing::warn!(
                        path = %self,
                        "job marked as finished but requested output is missing"
                    );
                }
                present
            }
        }
    }
}

impl Fingerprint for Path {
    fn fingerprint(&self, enc: &mut Encoder) -> Result<Vec<u8>, HashError> {
        // Fingerprint is the (creator output dir, relative path) pair, never
        // file contents; the overwrite substitutes that pair wholesale.
        let (creator, path): (Option<String>, &str) = match &self.hash_overwrite {
            None => (
                self.creator
                    .as_ref()
                    .map(|id| format!("{}/{}", id, OUTPUT_DIR)),
                &self.path,
            ),
            Some(HashOverwrite::Plain(p)) => (None, p),
            Some(HashOverwrite::WithCreator(id, p)) => {
                (Some(format!("{}/{}", id, OUTPUT_DIR)), p)
            }
        };
        let pair = enc.encode(&(creator, path))?;
        Ok(enc.group("Path", &[pair]))
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.creator {
            Some(id) => write!(f, "{}/{}/{}", id, OUTPUT_DIR, self.path),
            None => f.write_str(&self.path),
        }
    }
}

#[cfg(test)]
#[path = "path_tests.rs"]
mod tests;
