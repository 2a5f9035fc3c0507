// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sis-cli: subcommand surface and app wiring.
//!
//! Recipes are compiled Rust, so the executable is built by the user: a
//! binary crate registers its job types and recipe entry points on an
//! [`App`] and hands control to [`run`]:
//!
//! ```ignore
//! fn main() -> std::process::ExitCode {
//!     let mut app = sis_cli::App::new();
//!     app.registry.register::<CountVocab>();
//!     sis_cli::run(app.recipe("main", my_recipe))
//! }
//! ```

pub mod args;
pub mod commands;
pub mod exit;

use clap::Parser as _;
use sis_core::{Graph, JobRegistry};
use std::collections::BTreeMap;
use std::process::ExitCode;

pub use args::{Cli, Command};
pub use exit::{EXIT_BUSY, EXIT_ERROR, EXIT_OK, EXIT_USAGE};

/// A recipe entry point: builds the job graph and registers outputs.
pub type RecipeFn = fn(&mut Graph) -> anyhow::Result<()>;

/// Everything a user binary contributes: job types and recipes.
#[derive(Default)]
pub struct App {
    pub registry: JobRegistry,
    pub recipes: BTreeMap<String, RecipeFn>,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recipe(mut self, name: impl Into<String>, f: RecipeFn) -> Self {
        self.recipes.insert(name.into(), f);
        self
    }
}

/// Parse the process arguments and run the selected subcommand.
pub fn run(app: App) -> ExitCode {
    // clap reports usage errors with code 2 and help/version with 0.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };
    init_tracing();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "failed to start async runtime");
            return ExitCode::from(EXIT_ERROR);
        }
    };

    let code = runtime.block_on(async {
        match cli.command {
            Command::Manager(cmd) => commands::manager::run(&app, cmd).await,
            Command::Worker(cmd) => commands::worker::run(&app, cmd).await,
            Command::Console(cmd) => commands::console::run(&app, cmd).await,
        }
    });

    match code {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let no_color = std::env::var_os("NO_COLOR").is_some();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(!no_color)
        .with_target(false)
        .init();
}
