// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The unit of computation.
//!
//! User job types implement [`JobDef`]: declare inputs, outputs, and tasks,
//! fingerprint the kept constructor arguments, and run a named task
//! function. [`crate::graph::Graph::intern`] turns a definition into the
//! canonical [`Job`] instance; equal definitions always yield the same
//! instance, which is the deduplication contract.

use crate::context::RunContext;
use crate::hash::{HashError, RecordEncoder};
use crate::id::SisId;
use crate::path::Path;
use crate::task::TaskSpec;
use crate::workdir::WORK_SUBDIR;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// A declared job output, relative to the job's `output/` directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDecl {
    pub rel: String,
    /// Created as a directory during materialization.
    pub directory: bool,
}

impl OutputDecl {
    pub fn file(rel: impl Into<String>) -> Self {
        Self {
            rel: rel.into(),
            directory: false,
        }
    }

    pub fn dir(rel: impl Into<String>) -> Self {
        Self {
            rel: rel.into(),
            directory: true,
        }
    }
}

/// The job contract user types implement.
///
/// Everything the core needs from a job: an identity fingerprint, the
/// declared input paths (graph edges), output declarations, the task list,
/// and the ability to run one task shard inside a worker.
pub trait JobDef: Send + Sync {
    /// `module/ClassName`, the prefix of the sisyphus-id. Implementations
    /// normally return [`JobKind::KIND`].
    fn kind(&self) -> &'static str;

    /// Fingerprint the kept constructor arguments. Arguments excluded from
    /// hashing are simply not added to the record.
    fn hash_input(&self, rec: &mut RecordEncoder<'_>) -> Result<(), HashError>;

    /// Input paths; each path with a creator is a dependency edge.
    fn input_paths(&self) -> Vec<Path>;

    /// Declared outputs.
    fn outputs(&self) -> Vec<OutputDecl>;

    /// Tasks in execution order.
    fn tasks(&self) -> Vec<TaskSpec>;

    /// Execute one task shard. Runs inside a worker process with the job
    /// work dir as scratch space.
    fn run(&self, ctx: &TaskContext<'_>, task: &str, shard: usize) -> anyhow::Result<()>;

    /// Serialize the definition for `job.save`. Typically
    /// `serde_json::to_value(self)`.
    fn save(&self) -> serde_json::Result<serde_json::Value>;
}

/// Static half of the job contract, required for registry decoding.
pub trait JobKind: JobDef + DeserializeOwned + 'static {
    /// `module/ClassName`; must match what [`JobDef::kind`] returns.
    const KIND: &'static str;
}

/// The canonical, deduplicated job instance.
pub struct Job {
    id: SisId,
    def: Arc<dyn JobDef>,
    inputs: Vec<Path>,
    outputs: BTreeMap<String, Path>,
}

impl Job {
    /// Assemble the canonical instance for an already-computed id. Called by
    /// the graph on intern and by the worker after decoding `job.save`.
    pub fn assemble(id: SisId, def: Arc<dyn JobDef>) -> Self {
        let inputs = def.input_paths();
        let outputs = def
            .outputs()
            .into_iter()
            .map(|decl| (decl.rel.clone(), Path::output_of(id.clone(), decl.rel)))
            .collect();
        Self {
            id,
            def,
            inputs,
            outputs,
        }
    }

    pub fn id(&self) -> &SisId {
        &self.id
    }

    pub fn kind(&self) -> &'static str {
        self.def.kind()
    }

    pub fn def(&self) -> &Arc<dyn JobDef> {
        &self.def
    }

    pub fn inputs(&self) -> &[Path] {
        &self.inputs
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Path> {
        self.outputs.values()
    }

    pub fn output_decls(&self) -> Vec<OutputDecl> {
        self.def.outputs()
    }

    /// Handle to a declared output.
    pub fn output(&self, rel: &str) -> Option<Path> {
        self.outputs.get(rel).cloned()
    }

    pub fn tasks(&self) -> Vec<TaskSpec> {
        self.def.tasks()
    }

    pub fn task(&self, name: &str) -> Option<TaskSpec> {
        self.tasks().into_iter().find(|t| t.name == name)
    }

    /// Ids of the jobs this one depends on.
    pub fn predecessor_ids(&self) -> Vec<SisId> {
        let mut ids: Vec<SisId> = self
            .inputs
            .iter()
            .filter_map(|p| p.creator.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// True once every input path is available.
    pub fn runnable(&self, layout: &crate::workdir::WorkLayout) -> bool {
        self.inputs.iter().all(|p| p.available(layout))
    }

    /// Run one task shard in the given context.
    pub fn run_task(&self, ctx: &RunContext, task: &str, shard: usize) -> anyhow::Result<()> {
        let task_ctx = TaskContext { ctx, job: self };
        self.def.run(&task_ctx, task, shard)
    }

    /// The `job.save` envelope: kind + payload, decodable via the registry.
    pub fn save_envelope(&self) -> serde_json::Result<SaveEnvelope> {
        Ok(SaveEnvelope {
            id: self.id.clone(),
            kind: self.def.kind().to_string(),
            def: self.def.save()?,
        })
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job").field("id", &self.id).finish()
    }
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id.as_str())
    }
}

/// What task functions see while running.
pub struct TaskContext<'a> {
    pub ctx: &'a RunContext,
    pub job: &'a Job,
}

impl TaskContext<'_> {
    /// Filesystem location of a declared output.
    pub fn output_path(&self, rel: &str) -> PathBuf {
        self.ctx.layout.job_output(self.job.id(), rel)
    }

    /// The job's scratch directory.
    pub fn work_dir(&self) -> PathBuf {
        self.ctx.layout.job_file(self.job.id(), WORK_SUBDIR)
    }

    /// Resolve any path handle to a filesystem location.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        path.get_path(&self.ctx.layout)
    }
}

/// On-disk form of `job.save`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SaveEnvelope {
    pub id: SisId,
    pub kind: String,
    pub def: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown job kind {0:?}; was the type registered?")]
    UnknownKind(String),
    #[error("decoding job definition: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("reading job.save: {0}")]
    Io(#[from] std::io::Error),
}

type DecodeFn = fn(serde_json::Value) -> serde_json::Result<Arc<dyn JobDef>>;

/// Registry of job types keyed by class name, used by workers to
/// deserialize `job.save`.
#[derive(Default, Clone)]
pub struct JobRegistry {
    decoders: HashMap<&'static str, DecodeFn>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: JobKind>(&mut self) -> &mut Self {
        fn decode<T: JobKind>(value: serde_json::Value) -> serde_json::Result<Arc<dyn JobDef>> {
            Ok(Arc::new(serde_json::from_value::<T>(value)?))
        }
        self.decoders.insert(T::KIND, decode::<T>);
        self
    }

    pub fn decode(&self, envelope: SaveEnvelope) -> Result<Job, RegistryError> {
        let decoder = self
            .decoders
            .get(envelope.kind.as_str())
            .ok_or_else(|| RegistryError::UnknownKind(envelope.kind.clone()))?;
        let def = decoder(envelope.def)?;
        Ok(Job::assemble(envelope.id, def))
    }

    /// Load and decode a `job.save` file.
    pub fn load(&self, path: &std::path::Path) -> Result<Job, RegistryError> {
        let bytes = std::fs::read(path)?;
        let envelope: SaveEnvelope = serde_json::from_slice(&bytes)?;
        self.decode(envelope)
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
