// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subcommand implementations.

pub mod console;
pub mod manager;
pub mod worker;

use crate::App;
use anyhow::Context as _;
use sis_core::{Graph, Settings, WorkLayout};
use std::sync::Arc;

/// Load settings, build the layout rooted at the current directory, and
/// execute the named recipe entry point.
pub(crate) fn load_graph(app: &App, config: &str) -> anyhow::Result<(Arc<Settings>, WorkLayout, Graph)> {
    let settings = Arc::new(Settings::load().context("loading settings")?);
    let layout = WorkLayout::new(".", &settings);

    let recipe = app
        .recipes
        .get(config)
        .with_context(|| format!("no recipe entry point named {config:?} is registered"))?;
    let mut graph = Graph::new();
    recipe(&mut graph).context("recipe execution failed")?;
    Ok((settings, layout, graph))
}
