// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `console` subcommand: read-only graph and state inspection.
//!
//! The interactive console proper is a separate component; this provides
//! the non-interactive view it is built on: the state overview and the
//! pattern queries of the graph.

use crate::args::ConsoleArgs;
use crate::exit::EXIT_OK;
use crate::App;
use anyhow::Context as _;
use sis_core::{ProcessRole, RunContext};
use sis_manager::{resolve_all, Resolver};

pub async fn run(app: &App, args: ConsoleArgs) -> anyhow::Result<u8> {
    let (settings, layout, graph) = super::load_graph(app, &args.config)?;
    let ctx = RunContext::new(ProcessRole::Console, layout.clone(), settings.clone());
    let engine = sis_engine::build(&settings.engine, &layout).context("building engine")?;

    let resolver = Resolver { ctx, engine };
    let jobs = graph.jobs_topological()?;
    let table = resolve_all(&resolver, &jobs).await;

    match &args.pattern {
        Some(pattern) => {
            for job in graph.find(pattern) {
                let state = table
                    .state_of(job.id())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unreachable".to_string());
                println!("{state}: {}", job.id());
            }
        }
        None => {
            for (id, state) in table.iter() {
                println!("{state}: {id}");
            }
            for input in &table.missing_inputs {
                println!("input_missing: {input}");
            }
            println!("{}", table.overview().join(" "));
        }
    }
    Ok(EXIT_OK)
}
