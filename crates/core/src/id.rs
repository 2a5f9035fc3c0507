// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sisyphus job identifiers.
//!
//! A sisyphus-id is `<module_path>/<ClassName>.<hash>` where the hash is the
//! URL-safe base64 rendering of the SHA-256 input fingerprint. The id doubles
//! as the job's directory path relative to the work dir, so every character
//! must be filesystem-safe.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Content-addressed job identifier.
///
/// Two jobs share a `SisId` iff they were constructed from the same class
/// with equal kept arguments; this is the deduplication contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SisId(String);

impl SisId {
    /// Compose an id from a job kind (`module/Class`) and a hash string.
    pub fn new(kind: &str, hash: &str) -> Self {
        debug_assert!(
            kind.chars().all(is_safe_char) && hash.chars().all(is_safe_char),
            "unsafe character in sisyphus-id parts: {kind:?} {hash:?}"
        );
        Self(format!("{kind}.{hash}"))
    }

    /// Parse an id from its string form (e.g. a work-directory path).
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `module/Class` part, without the hash.
    pub fn kind(&self) -> &str {
        self.0.rsplit_once('.').map(|(k, _)| k).unwrap_or(&self.0)
    }

    /// The hash suffix after the final dot.
    pub fn hash_part(&self) -> &str {
        self.0.rsplit_once('.').map(|(_, h)| h).unwrap_or("")
    }

    /// The class name without module path or hash.
    pub fn class_name(&self) -> &str {
        let kind = self.kind();
        kind.rsplit_once('/').map(|(_, c)| c).unwrap_or(kind)
    }

    /// The module path, empty for top-level classes.
    pub fn module(&self) -> &str {
        self.kind().rsplit_once('/').map(|(m, _)| m).unwrap_or("")
    }

    /// Directory path of this job relative to the work dir.
    pub fn rel_dir(&self) -> PathBuf {
        PathBuf::from(&self.0)
    }

    /// Flattened form with `/` replaced by `_`, used for `input/` symlink
    /// names (one filesystem component).
    pub fn flat(&self) -> String {
        self.0.replace('/', "_")
    }
}

/// Characters allowed in id parts; the hash alphabet plus path separators.
fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/')
}

impl std::fmt::Display for SisId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SisId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for SisId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SisId {
    fn from(s: &str) -> Self {
        Self::from_string(s)
    }
}

impl From<String> for SisId {
    fn from(s: String) -> Self {
        Self::from_string(s)
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
