// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide configuration surface.
//!
//! Defaults come first, then an optional TOML settings file (path from
//! `SIS_SETTINGS`, falling back to `settings.toml` in the working
//! directory), then `SIS_*` environment overrides for scalar values.

use crate::rqmt::{EngineLimits, Rqmt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the settings file.
pub const SETTINGS_PATH_ENV: &str = "SIS_SETTINGS";

/// Prefix for scalar environment overrides, e.g.
/// `SIS_WAIT_PERIOD_BETWEEN_CHECKS=5`.
pub const ENV_PREFIX: &str = "SIS_";

const DEFAULT_SETTINGS_FILE: &str = "settings.toml";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("reading settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing settings file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("environment override {key}: {message}")]
    Env { key: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root of job directories, relative to the experiment base dir.
    pub work_dir: String,
    /// User-visible symlink trees.
    pub output_dir: String,
    pub alias_dir: String,

    /// Tick interval of the manager loop, seconds.
    pub wait_period_between_checks: u64,
    /// How long a freshly observed finished marker is distrusted (NFS
    /// attribute caches), seconds.
    pub wait_period_job_fs_sync: u64,
    /// Settle delay before concluding there is nothing left to do, seconds.
    pub wait_period_cache: u64,

    /// Remove orphan job directories automatically.
    pub job_auto_cleanup: bool,
    /// Minimum age of an orphan's finished marker before removal, seconds.
    pub job_cleanup_grace: u64,

    /// Annotate status lines with the outputs each job is needed for.
    pub show_job_targets: bool,

    /// Interrupted tasks are resubmitted at most this often before turning
    /// into a retry error.
    pub max_submit_retries: u32,
    /// Multiplier applied to mem/time on OOM or wall-time kill.
    pub rqmt_escalation_factor: f64,
    /// Hard caps applied after escalation.
    pub engine_limits: EngineLimits,

    /// Worker heartbeat file update period, seconds.
    pub usage_update_period: u64,
    /// Worker resource sampling interval, seconds.
    pub usage_poll_interval: u64,

    /// Lines of an errored task's log echoed in the status output.
    pub print_error_lines: usize,
    /// Reprint the (unchanged) state overview after this long, seconds.
    pub stale_overview_period: u64,

    /// Engine construction table.
    pub engine: EngineSettings,

    /// Argv prefix used to start workers; empty means the current
    /// executable.
    pub worker_command: Vec<String>,

    /// Hasher compatibility switches, reserved names accepted and carried
    /// through verbatim.
    pub hash_compat: BTreeMap<String, bool>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            work_dir: "work".into(),
            output_dir: "output".into(),
            alias_dir: "alias".into(),
            wait_period_between_checks: 30,
            wait_period_job_fs_sync: 30,
            wait_period_cache: 20,
            job_auto_cleanup: false,
            job_cleanup_grace: 10,
            show_job_targets: true,
            max_submit_retries: 3,
            rqmt_escalation_factor: 2.0,
            engine_limits: EngineLimits::default(),
            usage_update_period: 60,
            usage_poll_interval: 5,
            print_error_lines: 40,
            stale_overview_period: 900,
            engine: EngineSettings::default(),
            worker_command: Vec::new(),
            hash_compat: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Load settings honoring `SIS_SETTINGS` and `SIS_*` overrides.
    pub fn load() -> Result<Self, SettingsError> {
        let explicit = std::env::var(SETTINGS_PATH_ENV).ok();
        let path = explicit
            .as_deref()
            .map(Path::new)
            .or_else(|| {
                let default = Path::new(DEFAULT_SETTINGS_FILE);
                default.is_file().then_some(default)
            });
        let mut settings = match path {
            Some(p) => Self::load_file(p)?,
            None => Self::default(),
        };
        settings.apply_env(std::env::vars())?;
        Ok(settings)
    }

    pub fn load_file(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Apply `SIS_*` scalar overrides from an environment snapshot.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), SettingsError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "SETTINGS" => {}
                "WORK_DIR" => self.work_dir = value,
                "OUTPUT_DIR" => self.output_dir = value,
                "ALIAS_DIR" => self.alias_dir = value,
                "WAIT_PERIOD_BETWEEN_CHECKS" => {
                    self.wait_period_between_checks = parse(&key, &value)?
                }
                "WAIT_PERIOD_JOB_FS_SYNC" => self.wait_period_job_fs_sync = parse(&key, &value)?,
                "WAIT_PERIOD_CACHE" => self.wait_period_cache = parse(&key, &value)?,
                "JOB_AUTO_CLEANUP" => self.job_auto_cleanup = parse(&key, &value)?,
                "JOB_CLEANUP_GRACE" => self.job_cleanup_grace = parse(&key, &value)?,
                "SHOW_JOB_TARGETS" => self.show_job_targets = parse(&key, &value)?,
                "MAX_SUBMIT_RETRIES" => self.max_submit_retries = parse(&key, &value)?,
                "RQMT_ESCALATION_FACTOR" => self.rqmt_escalation_factor = parse(&key, &value)?,
                "USAGE_UPDATE_PERIOD" => self.usage_update_period = parse(&key, &value)?,
                "USAGE_POLL_INTERVAL" => self.usage_poll_interval = parse(&key, &value)?,
                "PRINT_ERROR_LINES" => self.print_error_lines = parse(&key, &value)?,
                "STALE_OVERVIEW_PERIOD" => self.stale_overview_period = parse(&key, &value)?,
                other => {
                    tracing::warn!(key = other, "unknown SIS_ environment override ignored");
                }
            }
        }
        Ok(())
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.wait_period_between_checks)
    }

    pub fn fs_sync(&self) -> Duration {
        Duration::from_secs(self.wait_period_job_fs_sync)
    }

    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_secs(self.job_cleanup_grace)
    }

    /// Maximum heartbeat age for a task to still count as running.
    pub fn heartbeat_max_age(&self) -> Duration {
        Duration::from_secs(self.wait_period_job_fs_sync + self.usage_update_period)
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, SettingsError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| SettingsError::Env {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Engine constructor table; mirrors the pluggable `engine()` hook of the
/// settings surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineSettings {
    /// In-process worker pool.
    Local {
        /// Cores the pool may use; absent means all available.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cpu: Option<u32>,
        #[serde(default)]
        gpu: u32,
        /// Gigabytes the pool may hand out; absent disables memory
        /// admission control.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mem: Option<f64>,
    },
    /// Son of Grid Engine (qsub/qstat).
    Sge {
        #[serde(default)]
        default_rqmt: Rqmt,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gateway: Option<String>,
        #[serde(default = "default_pe_name")]
        pe_name: String,
    },
    /// Slurm (sbatch/squeue).
    Slurm {
        #[serde(default)]
        default_rqmt: Rqmt,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gateway: Option<String>,
    },
    /// LSF (bsub/bjobs).
    Lsf {
        #[serde(default)]
        default_rqmt: Rqmt,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gateway: Option<String>,
    },
    /// Composite engine routing by requirement tag (`short`/`long`/...).
    Selector {
        engines: BTreeMap<String, EngineSettings>,
        default: String,
    },
}

fn default_pe_name() -> String {
    "mpi".into()
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings::Local {
            cpu: None,
            gpu: 0,
            mem: None,
        }
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
