// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Argument definitions for the `sis` executable.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "sis",
    about = "Workflow manager for computationally expensive, reproducible pipelines"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the control loop over the recipe graph.
    #[command(visible_alias = "m")]
    Manager(ManagerArgs),
    /// Execute one task of one job on this machine (called by engines).
    Worker(WorkerArgs),
    /// Inspect the graph and job states read-only.
    #[command(visible_alias = "c")]
    Console(ConsoleArgs),
}

#[derive(Args, Debug)]
pub struct ManagerArgs {
    /// Start computations without prompting.
    #[arg(short = 'r', long = "run")]
    pub run: bool,

    /// Recipe entry point to execute.
    #[arg(long = "config", default_value = "main")]
    pub config: String,

    /// Port for the http observability dashboard (external component).
    #[arg(long = "http")]
    pub http: Option<u16>,
}

#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// The job directory under the work dir.
    pub job_dir: PathBuf,

    /// Task name to execute.
    pub task_name: String,

    /// Shard index; defaults to the engine's task-id environment, then 1.
    pub shard: Option<usize>,

    /// Engine selector tag this worker was dispatched under.
    #[arg(long = "engine")]
    pub engine: Option<String>,
}

#[derive(Args, Debug)]
pub struct ConsoleArgs {
    /// Recipe entry point to load.
    #[arg(long = "config", default_value = "main")]
    pub config: String,

    /// Only show jobs whose id or alias contains this pattern.
    pub pattern: Option<String>,
}

#[cfg(test)]
#[path = "args_tests.rs"]
mod tests;
