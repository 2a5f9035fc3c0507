// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Composite engine routing submissions by requirement tag.
//!
//! A requirement may carry `engine = "short"`/`"long"`/...; untagged work
//! goes to the default. Mini tasks arrive pre-tagged `short` by
//! `TaskSpec::mini_task`.

use crate::{Engine, EngineError, EngineTaskState, SubmitReceipt, SubmitRequest, TaskRef};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct EngineSelector {
    engines: BTreeMap<String, Arc<dyn Engine>>,
    default: String,
}

impl EngineSelector {
    pub fn new(engines: BTreeMap<String, Arc<dyn Engine>>, default: String) -> Self {
        debug_assert!(
            engines.contains_key(&default),
            "default engine {default:?} missing from selector table"
        );
        Self { engines, default }
    }

    fn route(&self, tag: Option<&str>) -> &Arc<dyn Engine> {
        let tag = tag.unwrap_or(&self.default);
        self.engines.get(tag).unwrap_or_else(|| {
            tracing::warn!(engine = tag, "unknown engine selector tag, using default");
            &self.engines[&self.default]
        })
    }

    /// Distinct engines, each visited once (a table may map several tags to
    /// one engine instance).
    fn distinct(&self) -> Vec<&Arc<dyn Engine>> {
        let mut seen = Vec::new();
        let mut out: Vec<&Arc<dyn Engine>> = Vec::new();
        for engine in self.engines.values() {
            let ptr = Arc::as_ptr(engine) as *const () as usize;
            if !seen.contains(&ptr) {
                seen.push(ptr);
                out.push(engine);
            }
        }
        out
    }
}

#[async_trait]
impl Engine for EngineSelector {
    fn name(&self) -> &'static str {
        "selector"
    }

    async fn start(&self) -> Result<(), EngineError> {
        for engine in self.distinct() {
            engine.start().await?;
        }
        Ok(())
    }

    async fn stop(&self) {
        for engine in self.distinct() {
            engine.stop().await;
        }
    }

    async fn submit(&self, req: &SubmitRequest) -> Result<SubmitReceipt, EngineError> {
        self.route(req.rqmt.engine.as_deref()).submit(req).await
    }

    async fn task_state(&self, task: &TaskRef) -> EngineTaskState {
        self.route(task.engine.as_deref()).task_state(task).await
    }

    async fn kill(&self, task: &TaskRef) -> Result<(), EngineError> {
        self.route(task.engine.as_deref()).kill(task).await
    }

    async fn reset_cache(&self) {
        for engine in self.distinct() {
            engine.reset_cache().await;
        }
    }
}

#[cfg(test)]
#[path = "selector_tests.rs"]
mod tests;
