// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The lazy recipe graph.
//!
//! Recipes run to completion once per manager session; every job
//! constructor goes through [`Graph::intern`], which returns the canonical
//! instance for the computed sisyphus-id. Registered outputs root the
//! reachable set; everything else is invisible to the scheduler (and
//! eventually an orphan).
//!
//! Recipes that depend on intermediate results register continuations via
//! [`Graph::when_ready`]; the manager drains ready continuations at the
//! start of each tick, which is the only way graph structure may depend on
//! computed values.

use crate::hash::{digest_encoding, encode_digest, Encoder, HashError};
use crate::id::SisId;
use crate::job::{Job, JobDef};
use crate::path::Path;
use crate::workdir::WorkLayout;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("job graph contains a cycle involving {0}")]
    Cycle(SisId),
    #[error("sisyphus-id {id} already interned with kind {existing}, got {new}")]
    KindMismatch {
        id: SisId,
        existing: String,
        new: String,
    },
    #[error(transparent)]
    Hash(#[from] HashError),
    #[error("async recipe step failed: {0}")]
    Recipe(#[from] anyhow::Error),
}

/// A registered output: a name in the user-visible `output/` tree pinned to
/// a path, rooting the reachable set.
#[derive(Debug, Clone)]
pub struct OutputTarget {
    pub name: String,
    pub path: Path,
}

type ContinuationFn = Box<dyn FnOnce(&mut Graph) -> anyhow::Result<()> + Send>;

struct Continuation {
    guards: Vec<Path>,
    run: ContinuationFn,
}

/// Canonicalization table, registered outputs, aliases, and suspended
/// recipe continuations.
#[derive(Default)]
pub struct Graph {
    jobs: HashMap<String, Arc<Job>>,
    insertion_order: Vec<SisId>,
    targets: Vec<OutputTarget>,
    aliases: BTreeMap<String, SisId>,
    pending: Vec<Continuation>,
    used_output_names: HashSet<String>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonicalize a job definition.
    ///
    /// Computes the sisyphus-id from the class name and kept arguments; if a
    /// job with that id exists the existing instance is returned and the
    /// definition is dropped. This makes deduplication structural: a cycle
    /// cannot be built because a job's id exists before anything can
    /// reference its outputs.
    pub fn intern<D: JobDef + 'static>(&mut self, def: D) -> Result<Arc<Job>, GraphError> {
        let mut enc = Encoder::new();
        let mut rec = enc.record(def.kind());
        def.hash_input(&mut rec)?;
        let hash = encode_digest(&digest_encoding(&rec.finish()));
        let id = SisId::new(def.kind(), &hash);

        if let Some(existing) = self.jobs.get(id.as_str()) {
            if existing.kind() != def.kind() {
                return Err(GraphError::KindMismatch {
                    id,
                    existing: existing.kind().to_string(),
                    new: def.kind().to_string(),
                });
            }
            return Ok(existing.clone());
        }

        let job = Arc::new(Job::assemble(id.clone(), Arc::new(def)));
        self.jobs.insert(id.as_str().to_string(), job.clone());
        self.insertion_order.push(id);
        Ok(job)
    }

    /// Pin a path into the user-visible output tree and root the graph there.
    pub fn register_output(&mut self, name: impl Into<String>, path: Path) {
        let name = name.into();
        if !self.used_output_names.insert(name.clone()) {
            tracing::warn!(%name, "output name registered more than once; keeping the first");
            return;
        }
        self.targets.push(OutputTarget { name, path });
    }

    pub fn add_alias(&mut self, id: &SisId, alias: impl Into<String>) {
        let alias = alias.into();
        if let Some(previous) = self.aliases.get(&alias) {
            if previous != id {
                tracing::warn!(%alias, first = %previous, second = %id, "alias used for multiple jobs");
            }
            return;
        }
        self.aliases.insert(alias, id.clone());
    }

    /// Suspend part of a recipe until all guard paths are available.
    pub fn when_ready(
        &mut self,
        guards: Vec<Path>,
        run: impl FnOnce(&mut Graph) -> anyhow::Result<()> + Send + 'static,
    ) {
        self.pending.push(Continuation {
            guards,
            run: Box::new(run),
        });
    }

    /// Run every continuation whose guards are available, repeating until no
    /// further progress (a resumed recipe may queue new continuations).
    /// Returns the number of continuations run.
    pub fn resume_ready(&mut self, layout: &WorkLayout) -> Result<usize, GraphError> {
        let mut resumed = 0;
        loop {
            let pending = std::mem::take(&mut self.pending);
            let mut ready = Vec::new();
            for c in pending {
                if c.guards.iter().all(|g| g.available(layout)) {
                    ready.push(c);
                } else {
                    self.pending.push(c);
                }
            }
            if ready.is_empty() {
                return Ok(resumed);
            }
            for c in ready {
                (c.run)(self)?;
                resumed += 1;
            }
        }
    }

    /// Continuations still waiting on their guards.
    pub fn pending_continuations(&self) -> usize {
        self.pending.len()
    }

    pub fn job(&self, id: &SisId) -> Option<Arc<Job>> {
        self.jobs.get(id.as_str()).cloned()
    }

    pub fn targets(&self) -> &[OutputTarget] {
        &self.targets
    }

    pub fn aliases(&self) -> &BTreeMap<String, SisId> {
        &self.aliases
    }

    /// Jobs reachable from the registered outputs, sorted by id.
    fn reachable(&self) -> Vec<Arc<Job>> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<Arc<Job>> = VecDeque::new();

        for target in &self.targets {
            if let Some(creator) = &target.path.creator {
                match self.jobs.get(creator.as_str()) {
                    Some(job) => {
                        if seen.insert(creator.as_str().to_string()) {
                            queue.push_back(job.clone());
                        }
                    }
                    None => tracing::warn!(
                        output = %target.name,
                        creator = %creator,
                        "registered output points at a job that was never constructed"
                    ),
                }
            }
        }

        let mut out = Vec::new();
        while let Some(job) = queue.pop_front() {
            for pred in job.predecessor_ids() {
                if let Some(p) = self.jobs.get(pred.as_str()) {
                    if seen.insert(pred.as_str().to_string()) {
                        queue.push_back(p.clone());
                    }
                }
            }
            out.push(job);
        }

        // Deterministic order regardless of target registration order.
        out.sort_by(|a, b| a.id().cmp(b.id()));
        out
    }

    /// Ids of all live (reachable) jobs.
    pub fn live_ids(&self) -> BTreeSet<SisId> {
        self.reachable().iter().map(|j| j.id().clone()).collect()
    }

    /// Reachable jobs topologically ordered, every job after all of its
    /// predecessors.
    pub fn jobs_topological(&self) -> Result<Vec<Arc<Job>>, GraphError> {
        let jobs = self.reachable();
        let mut graph = DiGraph::<usize, ()>::new();
        let mut index_of = HashMap::new();

        for (i, job) in jobs.iter().enumerate() {
            let node = graph.add_node(i);
            index_of.insert(job.id().as_str().to_string(), node);
        }
        for job in &jobs {
            for pred in job.predecessor_ids() {
                if let Some(&from) = index_of.get(pred.as_str()) {
                    graph.add_edge(from, index_of[job.id().as_str()], ());
                }
            }
        }

        match toposort(&graph, None) {
            Ok(order) => Ok(order.into_iter().map(|n| jobs[graph[n]].clone()).collect()),
            Err(cycle) => {
                let job = &jobs[graph[cycle.node_id()]];
                Err(GraphError::Cycle(job.id().clone()))
            }
        }
    }

    /// A job and every job transitively depending on it (the "rerun this
    /// subtree" primitive). Considers all interned jobs, reachable or not.
    pub fn job_and_descendants(&self, id: &SisId) -> Vec<Arc<Job>> {
        let mut consumers: HashMap<String, Vec<Arc<Job>>> = HashMap::new();
        for job in self.jobs.values() {
            for pred in job.predecessor_ids() {
                consumers
                    .entry(pred.as_str().to_string())
                    .or_default()
                    .push(job.clone());
            }
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut queue = VecDeque::new();
        let mut out = Vec::new();
        if let Some(root) = self.jobs.get(id.as_str()) {
            seen.insert(root.id().as_str().to_string());
            queue.push_back(root.clone());
        }
        while let Some(job) = queue.pop_front() {
            if let Some(users) = consumers.get(job.id().as_str()) {
                for user in users {
                    if seen.insert(user.id().as_str().to_string()) {
                        queue.push_back(user.clone());
                    }
                }
            }
            out.push(job);
        }
        out.sort_by(|a, b| a.id().cmp(b.id()));
        out
    }

    /// Jobs whose id or alias contains the pattern (console query).
    pub fn find(&self, pattern: &str) -> Vec<Arc<Job>> {
        let mut out: Vec<Arc<Job>> = self
            .jobs
            .values()
            .filter(|j| j.id().as_str().contains(pattern))
            .cloned()
            .collect();
        for (alias, id) in &self.aliases {
            if alias.contains(pattern) {
                if let Some(job) = self.jobs.get(id.as_str()) {
                    if !out.iter().any(|j| j.id() == job.id()) {
                        out.push(job.clone());
                    }
                }
            }
        }
        out.sort_by(|a, b| a.id().cmp(b.id()));
        out
    }

    /// Jobs of one class (console query).
    pub fn by_kind(&self, kind: &str) -> Vec<Arc<Job>> {
        let mut out: Vec<Arc<Job>> = self
            .jobs
            .values()
            .filter(|j| j.kind() == kind)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id().cmp(b.id()));
        out
    }

    pub fn by_alias(&self, alias: &str) -> Option<Arc<Job>> {
        self.aliases
            .get(alias)
            .and_then(|id| self.jobs.get(id.as_str()).cloned())
    }

    /// All interned jobs in construction order, including unreachable ones.
    pub fn all_jobs(&self) -> Vec<Arc<Job>> {
        self.insertion_order
            .iter()
            .filter_map(|id| self.jobs.get(id.as_str()).cloned())
            .collect()
    }
}

#[cfg(test)]
#[path = "graph_tests.rs"]
mod tests;
