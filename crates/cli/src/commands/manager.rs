// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `manager` subcommand: run the control loop.

use crate::args::ManagerArgs;
use crate::exit::{EXIT_ERROR, EXIT_OK};
use crate::App;
use anyhow::Context as _;
use sis_core::{ProcessRole, RunContext};
use sis_manager::{Manager, ManagerOptions};
use std::io::Write as _;

pub async fn run(app: &App, args: ManagerArgs) -> anyhow::Result<u8> {
    let (settings, layout, graph) = super::load_graph(app, &args.config)?;

    if args.http.is_some() {
        tracing::warn!("the http dashboard is a separate component; --http is ignored here");
    }

    if !args.run && !confirm_start(&graph)? {
        tracing::info!("not starting, bye");
        return Ok(EXIT_OK);
    }

    let ctx = RunContext::new(ProcessRole::Manager, layout.clone(), settings.clone());
    let engine = sis_engine::build(&settings.engine, &layout).context("building engine")?;
    let mut manager = Manager::new(
        graph,
        engine,
        ctx,
        ManagerOptions {
            start_computations: true,
            link_outputs: true,
            stop_when_done: true,
        },
    )?;

    match manager.run().await {
        Ok(()) => Ok(EXIT_OK),
        Err(e) => {
            tracing::error!("{e}");
            Ok(EXIT_ERROR)
        }
    }
}

/// Interactive gate before the first dispatch: start (y), list the graph
/// (v), or abort (n).
fn confirm_start(graph: &sis_core::Graph) -> anyhow::Result<bool> {
    let jobs = graph.jobs_topological()?;
    tracing::info!(
        jobs = jobs.len(),
        outputs = graph.targets().len(),
        "recipe loaded"
    );

    loop {
        print!("Start manager (y), print graph (v), or exit (n)? ");
        std::io::stdout().flush()?;
        let mut answer = String::new();
        if std::io::stdin().read_line(&mut answer)? == 0 {
            return Ok(false);
        }
        match answer.trim().to_lowercase().as_str() {
            "" | "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            "v" => {
                for job in &jobs {
                    println!("{}", job.id());
                }
            }
            other => tracing::warn!(answer = other, "unknown choice"),
        }
    }
}
