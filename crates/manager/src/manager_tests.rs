// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end tick tests: recipes run against an engine that executes
//! workers inline, so a handful of ticks carries a whole pipeline from
//! runnable to finished outputs.

use super::*;
use crate::test_support::{fixture, Fixture, InlineEngine, RecordingEngine, StepJob};
use sis_core::workdir::MARKER_FINISHED;
use sis_core::Variable;

fn chain_recipe(graph: &mut Graph) -> (Arc<Job>, Arc<Job>) {
    let first = graph.intern(StepJob::ok("first")).unwrap();
    let second = graph
        .intern(StepJob::after("second", first.output("out.txt").unwrap()))
        .unwrap();
    graph.register_output("final.txt", second.output("out.txt").unwrap());
    (first, second)
}

fn inline_manager(f: &Fixture, graph: Graph) -> (Manager, Arc<InlineEngine>) {
    let engine = Arc::new(InlineEngine::new(
        f.worker_ctx.clone(),
        Arc::clone(&f.registry),
    ));
    let manager = Manager::new(
        graph,
        engine.clone(),
        f.manager_ctx.clone(),
        ManagerOptions::default(),
    )
    .unwrap();
    (manager, engine)
}

async fn run_to_done(manager: &mut Manager) -> TickReport {
    for _ in 0..20 {
        let report = manager.tick().await.unwrap();
        if report.done {
            return report;
        }
    }
    panic!("manager never settled");
}

#[tokio::test]
async fn pipeline_runs_to_finished_outputs() {
    let f = fixture();
    let mut graph = Graph::new();
    let (first, second) = chain_recipe(&mut graph);
    let (mut manager, engine) = inline_manager(&f, graph);

    let report = run_to_done(&mut manager).await;
    assert_eq!(report.table.count(JobState::Finished), 2);

    // Both job-level markers sealed; output tree links the result.
    assert!(f.layout.job_finished(first.id()));
    assert!(f.layout.job_finished(second.id()));
    let out = f.layout.output_dir.join("final.txt");
    assert_eq!(std::fs::read_to_string(out).unwrap(), "second shard 1\n");

    // Each job was submitted exactly once.
    assert_eq!(engine.submissions().len(), 2);
}

#[tokio::test]
async fn descendants_wait_for_ancestors() {
    let f = fixture();
    let mut graph = Graph::new();
    let (first, second) = chain_recipe(&mut graph);
    let (mut manager, engine) = inline_manager(&f, graph);

    manager.tick().await.unwrap();
    // After one tick only the root ran; the dependent was still waiting
    // when dispatch decisions were made.
    let subs = engine.submissions();
    assert_eq!(subs.len(), 1);
    assert_eq!(&subs[0].job, first.id());
    assert!(!f.layout.job_setup(second.id()));
}

#[tokio::test]
async fn second_session_reuses_finished_work() {
    let f = fixture();

    // Session one: run everything.
    let mut graph = Graph::new();
    chain_recipe(&mut graph);
    let (mut manager, engine) = inline_manager(&f, graph);
    run_to_done(&mut manager).await;
    assert_eq!(engine.submissions().len(), 2);
    drop(manager);

    // Session two: same recipe, nothing to do.
    let mut graph = Graph::new();
    chain_recipe(&mut graph);
    let (mut manager, engine) = inline_manager(&f, graph);
    let report = run_to_done(&mut manager).await;
    assert_eq!(report.table.count(JobState::Finished), 2);
    assert!(engine.submissions().is_empty(), "no duplicate work");
}

#[tokio::test]
async fn deleting_a_leaf_marker_reruns_exactly_that_job() {
    let f = fixture();
    let mut graph = Graph::new();
    let (_, second) = chain_recipe(&mut graph);
    let (mut manager, _) = inline_manager(&f, graph);
    run_to_done(&mut manager).await;
    drop(manager);

    // Invalidate the leaf. The session-one heartbeat has to look stale, or
    // the manager would assume the task is still running somewhere.
    std::fs::remove_file(
        f.layout
            .marker(second.id(), MARKER_FINISHED, "run", Some(1)),
    )
    .unwrap();
    std::fs::remove_file(f.layout.job_file(second.id(), sis_core::workdir::JOB_FINISHED)).unwrap();
    f.clock.advance(std::time::Duration::from_secs(10));

    let mut graph = Graph::new();
    chain_recipe(&mut graph);
    let (mut manager, engine) = inline_manager(&f, graph);
    run_to_done(&mut manager).await;

    let subs = engine.submissions();
    assert_eq!(subs.len(), 1, "only the invalidated leaf reran");
    assert_eq!(&subs[0].job, second.id());
}

#[tokio::test]
async fn failed_job_surfaces_and_stops() {
    let f = fixture();
    let mut graph = Graph::new();
    let bad = graph.intern(StepJob {
        mode: "fail".into(),
        ..StepJob::ok("bad")
    });
    let bad = bad.unwrap();
    graph.register_output("never.txt", bad.output("out.txt").unwrap());
    let (mut manager, engine) = inline_manager(&f, graph);

    let report = run_to_done(&mut manager).await;
    assert_eq!(report.table.count(JobState::Error), 1);
    assert_eq!(engine.submissions().len(), 1, "user errors are not retried");
    assert!(f
        .layout
        .marker(bad.id(), "error", "run", Some(1))
        .is_file());
}

#[tokio::test]
async fn declared_tries_rerun_failed_tasks() {
    let f = fixture();
    let mut graph = Graph::new();
    let flaky = graph
        .intern(StepJob {
            mode: "fail".into(),
            tries: 2,
            ..StepJob::ok("flaky")
        })
        .unwrap();
    graph.register_output("never.txt", flaky.output("out.txt").unwrap());
    let (mut manager, engine) = inline_manager(&f, graph);

    let report = run_to_done(&mut manager).await;
    assert_eq!(report.table.count(JobState::Error), 1);
    assert_eq!(engine.submissions().len(), 2, "one declared retry consumed");
    // First attempt's log was rotated aside.
    assert!(f
        .layout
        .job_dir(flaky.id())
        .join("log.run.1.error.01")
        .is_file());
}

#[tokio::test]
async fn held_jobs_are_materialized_but_never_submitted() {
    let f = fixture();
    let mut graph = Graph::new();
    let job = graph.intern(StepJob::ok("held")).unwrap();
    graph.register_output("out.txt", job.output("out.txt").unwrap());

    // Hold before the first tick: the dir does not even exist yet.
    std::fs::create_dir_all(f.layout.job_dir(job.id())).unwrap();
    sis_core::workdir::touch_marker(&f.layout.job_file(job.id(), sis_core::workdir::JOB_HOLD))
        .unwrap();

    let (mut manager, engine) = inline_manager(&f, graph);
    let report = manager.tick().await.unwrap();

    assert_eq!(report.table.count(JobState::Hold), 1);
    assert!(engine.submissions().is_empty());
    assert!(f.layout.job_dir(job.id()).join("job.save").is_file());

    // Releasing the hold lets the job run.
    manager.release(job.id()).unwrap();
    let report = run_to_done(&mut manager).await;
    assert_eq!(report.table.count(JobState::Finished), 1);
}

#[tokio::test]
async fn async_recipe_extends_the_graph_mid_run() {
    let f = fixture();
    let mut graph = Graph::new();
    let first = graph.intern(StepJob::ok("first")).unwrap();
    let guard: Variable<String> = Variable::from_path(first.output("out.txt").unwrap());
    graph.register_output("first.txt", first.output("out.txt").unwrap());

    // Second experiment exists only once the first one's output is real.
    let guard_path = guard.path().clone();
    graph.when_ready(vec![guard_path.clone()], move |g| {
        let second = g.intern(StepJob::after("second", guard_path.clone()))?;
        g.register_output("second.txt", second.output("out.txt").unwrap());
        Ok(())
    });

    let (mut manager, engine) = inline_manager(&f, graph);

    let report = manager.tick().await.unwrap();
    assert!(!report.done, "continuation still pending");
    assert_eq!(manager.graph().targets().len(), 1);

    let report = run_to_done(&mut manager).await;
    assert_eq!(manager.graph().targets().len(), 2);
    assert_eq!(report.table.count(JobState::Finished), 2);
    assert_eq!(engine.submissions().len(), 2);
    assert!(f.layout.output_dir.join("second.txt").is_file());
}

#[tokio::test]
async fn crash_recovery_resubmits_lost_tasks() {
    let f = fixture();
    let mut graph = Graph::new();
    let job = graph.intern(StepJob::ok("lost")).unwrap();
    graph.register_output("out.txt", job.output("out.txt").unwrap());

    // Pretend a previous manager session started the task and died: the
    // directory is set up, the log exists, nothing else.
    crate::dispatch::materialize(&f.manager_ctx, &job).unwrap();
    sis_core::workdir::touch_marker(&f.layout.marker(job.id(), "log", "run", Some(1))).unwrap();
    f.clock.advance(std::time::Duration::from_secs(10));

    let (mut manager, engine) = inline_manager(&f, graph);
    let report = run_to_done(&mut manager).await;

    assert_eq!(report.table.count(JobState::Finished), 1);
    assert_eq!(engine.submissions().len(), 1, "interrupted task resubmitted");
}

#[tokio::test]
async fn still_running_tasks_are_left_with_the_engine() {
    let f = fixture();
    let mut graph = Graph::new();
    let job = graph.intern(StepJob::ok("busy")).unwrap();
    graph.register_output("out.txt", job.output("out.txt").unwrap());

    crate::dispatch::materialize(&f.manager_ctx, &job).unwrap();
    sis_core::workdir::touch_marker(&f.layout.marker(job.id(), "log", "run", Some(1))).unwrap();

    let engine = Arc::new(RecordingEngine::default());
    engine.set_state(
        &sis_engine::queue_name(job.id(), "run"),
        1,
        sis_engine::EngineTaskState::Running,
    );
    let mut manager = Manager::new(
        graph,
        engine.clone(),
        f.manager_ctx.clone(),
        ManagerOptions::default(),
    )
    .unwrap();

    let report = manager.tick().await.unwrap();
    assert_eq!(report.table.count(JobState::Running), 1);
    assert!(engine.submissions().is_empty());
    assert!(!report.done);
}

#[tokio::test]
async fn second_manager_on_same_work_dir_is_rejected() {
    let f = fixture();
    let graph = Graph::new();
    let (manager, _) = inline_manager(&f, graph);

    let second = Manager::new(
        Graph::new(),
        Arc::new(RecordingEngine::default()),
        f.manager_ctx.clone(),
        ManagerOptions::default(),
    );
    assert!(matches!(second, Err(ManagerError::AlreadyRunning)));
    drop(manager);

    // Lock released with the first manager.
    assert!(Manager::new(
        Graph::new(),
        Arc::new(RecordingEngine::default()),
        f.manager_ctx.clone(),
        ManagerOptions::default(),
    )
    .is_ok());
}

#[tokio::test]
async fn auto_cleanup_removes_orphans_during_ticks() {
    let f = fixture();

    // Session one: two independent results.
    let mut graph = Graph::new();
    let keep = graph.intern(StepJob::ok("keep")).unwrap();
    let drop_me = graph.intern(StepJob::ok("drop")).unwrap();
    graph.register_output("keep.txt", keep.output("out.txt").unwrap());
    graph.register_output("drop.txt", drop_me.output("out.txt").unwrap());
    let (mut manager, _) = inline_manager(&f, graph);
    run_to_done(&mut manager).await;
    drop(manager);

    // Session two: the second output vanished from the recipe, auto-cleanup
    // on. The orphaned directory is removed once its marker has aged.
    let mut settings = (*f.settings).clone();
    settings.job_auto_cleanup = true;
    let mut ctx = f.manager_ctx.clone();
    ctx.settings = Arc::new(settings);
    f.clock.advance(std::time::Duration::from_secs(5));

    let mut graph = Graph::new();
    let keep = graph.intern(StepJob::ok("keep")).unwrap();
    graph.register_output("keep.txt", keep.output("out.txt").unwrap());
    let engine = Arc::new(InlineEngine::new(
        f.worker_ctx.clone(),
        Arc::clone(&f.registry),
    ));
    let mut manager = Manager::new(graph, engine, ctx, ManagerOptions::default()).unwrap();
    run_to_done(&mut manager).await;

    assert!(f.layout.job_setup(keep.id()));
    assert!(!f.layout.job_setup(drop_me.id()), "orphan removed");
}

#[tokio::test]
async fn paused_manager_observes_but_never_dispatches() {
    let f = fixture();
    let mut graph = Graph::new();
    let job = graph.intern(StepJob::ok("a")).unwrap();
    graph.register_output("out.txt", job.output("out.txt").unwrap());
    let (mut manager, engine) = inline_manager(&f, graph);

    manager.pause();
    let report = manager.tick().await.unwrap();
    assert_eq!(report.table.count(JobState::Runnable), 1);
    assert!(engine.submissions().is_empty());
    assert!(!report.done, "a paused manager never claims to be done");

    manager.unpause();
    let report = run_to_done(&mut manager).await;
    assert_eq!(report.table.count(JobState::Finished), 1);
    assert_eq!(engine.submissions().len(), 1);
}

#[tokio::test]
async fn hold_marker_from_api_round_trips() {
    let f = fixture();
    let mut graph = Graph::new();
    let job = graph.intern(StepJob::ok("a")).unwrap();
    graph.register_output("out.txt", job.output("out.txt").unwrap());
    let (manager, _) = inline_manager(&f, graph);

    manager.hold(job.id()).unwrap();
    assert!(f.layout.job_held(job.id()));
    manager.release(job.id()).unwrap();
    assert!(!f.layout.job_held(job.id()));
}

#[tokio::test]
async fn job_targets_annotate_ancestors() {
    let f = fixture();
    let mut graph = Graph::new();
    let (first, second) = chain_recipe(&mut graph);

    let targets = job_targets(&graph);
    assert!(targets[first.id()].contains("final.txt"));
    assert!(targets[second.id()].contains("final.txt"));
    let _ = f;
}
