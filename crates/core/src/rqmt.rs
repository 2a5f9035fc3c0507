// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task resource requirements and retry escalation.

use crate::hash::{Encoder, Fingerprint, HashError};
use crate::usage::UsageSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Resources requested for one task submission.
///
/// `mem` is gigabytes of RSS, `time` wall-clock hours. `extra` carries
/// engine-specific flags (e.g. `qsub_args`) passed through opaquely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rqmt {
    pub cpu: u32,
    pub gpu: u32,
    pub mem: f64,
    pub time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl Default for Rqmt {
    fn default() -> Self {
        Self {
            cpu: 1,
            gpu: 0,
            mem: 1.0,
            time: 1.0,
            engine: None,
            extra: BTreeMap::new(),
        }
    }
}

impl Rqmt {
    pub fn new() -> Self {
        Self::default()
    }

    crate::setters! {
        set {
            cpu: u32,
            gpu: u32,
            mem: f64,
            time: f64,
        }
        option {
            engine: String,
        }
    }

    pub fn extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Grouping key for batching shards with equal requirements into one
    /// engine submission.
    pub fn grouping_key(&self) -> String {
        // Requirements are plain data; the fingerprint cannot recurse.
        crate::hash::short_hash(self).unwrap_or_default()
    }

    /// Clamp `mem`/`time` to the configured engine caps.
    pub fn clamp(mut self, limits: &EngineLimits) -> Self {
        if let Some(cap) = limits.mem {
            self.mem = self.mem.min(cap);
        }
        if let Some(cap) = limits.time {
            self.time = self.time.min(cap);
        }
        self
    }
}

impl Fingerprint for Rqmt {
    fn fingerprint(&self, enc: &mut Encoder) -> Result<Vec<u8>, HashError> {
        let mut rec = enc.record("Rqmt");
        rec.field("cpu", &self.cpu)?
            .field("gpu", &self.gpu)?
            .field("mem", &self.mem)?
            .field("time", &self.time)?
            .field("engine", &self.engine)?
            .field("extra", &self.extra)?;
        Ok(rec.finish())
    }
}

/// Hard caps applied after escalation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineLimits {
    pub mem: Option<f64>,
    pub time: Option<f64>,
}

/// Requirements for a resubmission after an interrupted or killed run.
///
/// `initial` is the task's declared requirement, `last` what the previous
/// attempt was submitted with. Memory escalates when the last run was
/// observed out of memory (worker flag, or headroom under 0.25 GB); time
/// escalates when the run used up all but 0.1 h of its allowance. Escalated
/// values never drop below the declared requirement and are clamped by
/// `limits`.
pub fn escalated(
    initial: &Rqmt,
    last: &Rqmt,
    usage: Option<&UsageSnapshot>,
    factor: f64,
    limits: &EngineLimits,
) -> Rqmt {
    let usage = match usage {
        // No usage record means no evidence to escalate on; reuse the last
        // submitted requirements.
        None => return last.clone(),
        Some(u) => u,
    };

    let mut out = last.clone();
    let out_of_memory = usage.out_of_memory || last.mem - usage.max_rss_gb < 0.25;
    let out_of_time = last.time - usage.elapsed_hours < 0.1;

    if out_of_memory {
        out.mem = (last.mem * factor).max(initial.mem);
    }
    if out_of_time {
        out.time = (last.time * factor).max(initial.time);
    }

    out.clamp(limits)
}

#[cfg(test)]
#[path = "rqmt_tests.rs"]
mod tests;
