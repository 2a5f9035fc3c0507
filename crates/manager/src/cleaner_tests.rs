// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::{fixture, Fixture, StepJob};
use sis_core::workdir::touch_marker;
use sis_core::Graph;
use std::sync::Arc;
use std::time::Duration;

fn materialized(f: &Fixture, graph: &mut Graph, label: &str) -> Arc<sis_core::Job> {
    let job = graph.intern(StepJob::ok(label)).unwrap();
    crate::dispatch::materialize(&f.manager_ctx, &job).unwrap();
    job
}

fn finish(f: &Fixture, job: &sis_core::Job) {
    touch_marker(&f.layout.job_file(job.id(), JOB_FINISHED)).unwrap();
}

#[test]
fn scan_finds_materialized_jobs() {
    let f = fixture();
    let mut graph = Graph::new();
    let a = materialized(&f, &mut graph, "a");
    let b = materialized(&f, &mut graph, "b");

    let found = scan_job_dirs(&f.layout);
    let ids: Vec<&SisId> = found.iter().map(|e| &e.id).collect();
    assert_eq!(found.len(), 2);
    assert!(ids.contains(&a.id()));
    assert!(ids.contains(&b.id()));
}

#[test]
fn live_jobs_are_not_orphans() {
    let f = fixture();
    let mut graph = Graph::new();
    let live = materialized(&f, &mut graph, "live");
    let stray = materialized(&f, &mut graph, "stray");
    graph.register_output("out", live.output("out.txt").unwrap());

    let orphaned = orphans(&f.layout, &graph.live_ids());
    assert_eq!(orphaned.len(), 1);
    assert_eq!(&orphaned[0].id, stray.id());
}

#[test]
fn only_aged_finished_orphans_are_removed() {
    let f = fixture();
    let mut graph = Graph::new();
    let live = materialized(&f, &mut graph, "live");
    let unfinished = materialized(&f, &mut graph, "unfinished");
    let fresh = materialized(&f, &mut graph, "fresh");
    finish(&f, &fresh);
    graph.register_output("out", live.output("out.txt").unwrap());

    // Grace period of an hour: the freshly finished orphan survives.
    let mut settings = (*f.settings).clone();
    settings.job_cleanup_grace = 3600;
    let mut ctx = f.manager_ctx.clone();
    ctx.settings = Arc::new(settings);

    let removed = remove_orphans(&ctx, &graph.live_ids());
    assert!(removed.is_empty());
    assert!(f.layout.job_setup(unfinished.id()));
    assert!(f.layout.job_setup(fresh.id()));

    // Once the marker ages past the grace period, only the finished orphan
    // goes; the unfinished one is never touched.
    f.clock.advance(Duration::from_secs(3601));
    let removed = remove_orphans(&ctx, &graph.live_ids());
    assert_eq!(removed, vec![fresh.id().clone()]);
    assert!(f.layout.job_setup(unfinished.id()));
    assert!(f.layout.job_setup(live.id()));
}

#[test]
fn cleanup_never_touches_reachable_jobs() {
    let f = fixture();
    let mut graph = Graph::new();
    let up = materialized(&f, &mut graph, "up");
    finish(&f, &up);
    let down = graph
        .intern(StepJob::after("down", up.output("out.txt").unwrap()))
        .unwrap();
    crate::dispatch::materialize(&f.manager_ctx, &down).unwrap();
    finish(&f, &down);
    graph.register_output("out", down.output("out.txt").unwrap());

    f.clock.advance(Duration::from_secs(10));
    let removed = remove_orphans(&f.manager_ctx, &graph.live_ids());
    assert!(removed.is_empty());
    assert!(f.layout.job_setup(up.id()));
    assert!(f.layout.job_setup(down.id()));
}

#[test]
fn dropped_output_subtree_is_collected() {
    // Scenario: an output is removed from the recipe; the whole now
    // unreachable subtree becomes orphaned and is removed after the grace
    // period.
    let f = fixture();
    let mut graph = Graph::new();
    let up = materialized(&f, &mut graph, "up");
    finish(&f, &up);
    let down = graph
        .intern(StepJob::after("down", up.output("out.txt").unwrap()))
        .unwrap();
    crate::dispatch::materialize(&f.manager_ctx, &down).unwrap();
    finish(&f, &down);
    // No register_output: the subtree is unreachable.

    f.clock.advance(Duration::from_secs(10));
    let mut removed = remove_orphans(&f.manager_ctx, &graph.live_ids());
    removed.sort();
    let mut expected = vec![up.id().clone(), down.id().clone()];
    expected.sort();
    assert_eq!(removed, expected);
}

#[test]
fn remove_subtree_for_rerun() {
    let f = fixture();
    let mut graph = Graph::new();
    let up = materialized(&f, &mut graph, "up");
    let down = graph
        .intern(StepJob::after("down", up.output("out.txt").unwrap()))
        .unwrap();
    crate::dispatch::materialize(&f.manager_ctx, &down).unwrap();
    let unrelated = materialized(&f, &mut graph, "unrelated");

    let removed = remove_job_and_descendants(&f.manager_ctx, &graph, up.id()).unwrap();
    assert_eq!(removed.len(), 2);
    assert!(!f.layout.job_setup(up.id()));
    assert!(!f.layout.job_setup(down.id()));
    assert!(f.layout.job_setup(unrelated.id()));
}
