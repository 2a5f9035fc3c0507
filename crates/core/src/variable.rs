// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Variables: paths whose payload is a serialized value.

use crate::context::{ProcessRole, RoleError, RunContext};
use crate::hash::{Encoder, Fingerprint, HashError};
use crate::id::SisId;
use crate::path::Path;
use crate::workdir::{atomic_write, WorkLayout};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VariableError {
    /// Reading or writing payloads is a worker-only operation. Doing it from
    /// the manager would linearize computation onto the scheduling loop and
    /// break graph laziness.
    #[error(transparent)]
    Role(#[from] RoleError),
    #[error("variable {0} is not set")]
    Unset(String),
    #[error("reading variable: {0}")]
    Io(#[from] std::io::Error),
    #[error("decoding variable payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A [`Path`] whose on-disk content is a JSON-serialized value.
///
/// The type parameter is the payload type; it never influences the
/// fingerprint, which is the underlying path's.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variable<T> {
    path: Path,
    #[serde(skip)]
    _payload: PhantomData<fn() -> T>,
}

impl<T> Variable<T> {
    pub fn output_of(creator: SisId, rel: impl Into<String>) -> Self {
        Self {
            path: Path::output_of(creator, rel),
            _payload: PhantomData,
        }
    }

    pub fn from_path(path: Path) -> Self {
        Self {
            path,
            _payload: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_set(&self, layout: &WorkLayout) -> bool {
        self.path.exists(layout)
    }
}

impl<T: Serialize + DeserializeOwned> Variable<T> {
    /// Read the value. Worker-only.
    pub fn get(&self, ctx: &RunContext) -> Result<T, VariableError> {
        ctx.require_role(ProcessRole::Worker)?;
        let file = self.path.get_path(&ctx.layout);
        let bytes = match std::fs::read(&file) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VariableError::Unset(self.path.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Write the value atomically (tempfile + rename). Worker-only.
    pub fn set(&self, ctx: &RunContext, value: &T) -> Result<(), VariableError> {
        ctx.require_role(ProcessRole::Worker)?;
        let file = self.path.get_path(&ctx.layout);
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut bytes = serde_json::to_vec_pretty(value)?;
        bytes.push(b'\n');
        atomic_write(&file, &bytes)?;
        Ok(())
    }
}

impl<T> Fingerprint for Variable<T> {
    fn fingerprint(&self, enc: &mut Encoder) -> Result<Vec<u8>, HashError> {
        self.path.fingerprint(enc)
    }
}

impl<T> std::fmt::Display for Variable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.path.fmt(f)
    }
}

#[cfg(test)]
#[path = "variable_tests.rs"]
mod tests;
