// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process role and the context value threaded through all operations.
//!
//! "Which process am I" is a process-wide fact (manager, worker, console);
//! instead of a global it travels inside [`RunContext`], and role-gated
//! operations such as `Variable::get` check it explicitly.

use crate::clock::{Clock, SystemClock};
use crate::settings::Settings;
use crate::workdir::WorkLayout;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    /// The scheduling loop. Must never touch output file contents.
    Manager,
    /// A dispatched task executor; the only role allowed to read and write
    /// Variable payloads.
    Worker,
    /// Read-only inspection.
    Console,
}

crate::simple_display! {
    ProcessRole {
        Manager => "manager",
        Worker => "worker",
        Console => "console",
    }
}

#[derive(Debug, Error)]
#[error("operation requires the {required} role, but this process is the {actual}")]
pub struct RoleError {
    pub required: ProcessRole,
    pub actual: ProcessRole,
}

/// Everything an operation needs to know about the running process.
#[derive(Clone)]
pub struct RunContext {
    pub role: ProcessRole,
    pub layout: WorkLayout,
    pub settings: Arc<Settings>,
    pub clock: Arc<dyn Clock>,
}

impl RunContext {
    pub fn new(role: ProcessRole, layout: WorkLayout, settings: Arc<Settings>) -> Self {
        Self {
            role,
            layout,
            settings,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn require_role(&self, required: ProcessRole) -> Result<(), RoleError> {
        if self.role == required {
            Ok(())
        } else {
            Err(RoleError {
                required,
                actual: self.role,
            })
        }
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
