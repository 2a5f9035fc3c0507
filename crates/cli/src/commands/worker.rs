// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `worker` subcommand: execute one task shard on this machine.

use crate::args::WorkerArgs;
use crate::exit::{EXIT_BUSY, EXIT_ERROR, EXIT_OK};
use crate::App;
use anyhow::Context as _;
use sis_core::{ProcessRole, RunContext, Settings, WorkLayout};
use sis_worker::WorkerOutcome;
use std::sync::Arc;

pub async fn run(app: &App, args: WorkerArgs) -> anyhow::Result<u8> {
    let settings = Arc::new(Settings::load().context("loading settings")?);
    let layout = WorkLayout::new(".", &settings);
    let ctx = RunContext::new(ProcessRole::Worker, layout, settings);

    let outcome = sis_worker::run(
        ctx,
        Arc::new(app.registry.clone()),
        args.job_dir,
        args.task_name,
        args.shard,
    )
    .await?;

    Ok(match outcome {
        WorkerOutcome::Finished => EXIT_OK,
        WorkerOutcome::Busy => EXIT_BUSY,
        WorkerOutcome::Failed | WorkerOutcome::Interrupted => EXIT_ERROR,
    })
}
