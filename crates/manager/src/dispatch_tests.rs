// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::resolve::Resolver;
use crate::test_support::{fixture, RecordingEngine, StepJob};
use sis_core::workdir::{touch_marker, MARKER_FINISHED, MARKER_SUBMIT_LOG};
use sis_core::{Graph, JobKind, Path as SisPath};
use std::sync::Arc;
use std::time::Duration;

fn scene(def: StepJob) -> (crate::test_support::Fixture, Arc<RecordingEngine>, Resolver, Arc<sis_core::Job>) {
    let f = fixture();
    let mut graph = Graph::new();
    let job = graph.intern(def).unwrap();
    let engine = Arc::new(RecordingEngine::default());
    let resolver = Resolver {
        ctx: f.manager_ctx.clone(),
        engine: engine.clone(),
    };
    (f, engine, resolver, job)
}

#[test]
fn materialize_builds_canonical_structure() {
    let (f, _engine, _resolver, _job) = scene(StepJob::ok("up"));
    let mut graph = Graph::new();
    let up = graph.intern(StepJob::ok("up")).unwrap();
    let down = graph
        .intern(StepJob::after("down", up.output("out.txt").unwrap()))
        .unwrap();

    materialize(&f.manager_ctx, &down).unwrap();

    let dir = f.layout.job_dir(down.id());
    for sub in [WORK_SUBDIR, OUTPUT_DIR, INPUT_DIR, ENGINE_LOG_DIR] {
        assert!(dir.join(sub).is_dir(), "{sub} missing");
    }
    assert!(dir.join(JOB_SAVE).is_file());
    assert!(dir.join(JOB_INFO).is_file());

    // One input symlink per predecessor, flattened name, pointing at its dir.
    let link = dir.join(INPUT_DIR).join(up.id().flat());
    let target = std::fs::read_link(&link).unwrap();
    assert_eq!(
        target.canonicalize().ok(),
        f.layout.job_dir(up.id()).canonicalize().ok()
    );

    let info = JobInfo::load_or_default(&dir.join(JOB_INFO));
    assert_eq!(info.kind, StepJob::KIND);
    assert_eq!(info.inputs.len(), 1);
}

#[test]
fn materialize_is_idempotent() {
    let (f, _engine, _resolver, job) = scene(StepJob::ok("a"));
    materialize(&f.manager_ctx, &job).unwrap();
    materialize(&f.manager_ctx, &job).unwrap();
    assert!(f.layout.job_dir(job.id()).join(JOB_SAVE).is_file());
}

#[test]
fn worker_call_names_job_dir_and_task() {
    let (f, _engine, _resolver, job) = scene(StepJob::ok("a"));
    let call = worker_call(&f.manager_ctx, &job, "run");
    assert!(call.len() >= 3);
    assert_eq!(call[call.len() - 2], f.layout.job_dir(job.id()).display().to_string());
    assert_eq!(call[call.len() - 3], "worker");
    assert_eq!(call.last().unwrap(), "run");
}

#[test]
fn worker_call_honors_configured_command() {
    let (f, _engine, _resolver, job) = scene(StepJob::ok("a"));
    let mut settings = (*f.settings).clone();
    settings.worker_command = vec!["/usr/bin/sis".into()];
    let mut ctx = f.manager_ctx.clone();
    ctx.settings = Arc::new(settings);

    let call = worker_call(&ctx, &job, "run");
    assert_eq!(call[0], "/usr/bin/sis");
    assert_eq!(call[1], "worker");
}

#[tokio::test]
async fn first_submission_uses_declared_rqmt() {
    let (f, engine, resolver, job) = scene(StepJob::ok("a"));
    materialize(&f.manager_ctx, &job).unwrap();

    assert!(submit_next(&resolver, &job).await.unwrap());

    let subs = engine.submissions();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].task, "run");
    assert_eq!(subs[0].shards, vec![1]);
    assert_eq!(subs[0].rqmt.mem, 2.0);

    // Bookkeeping markers.
    let dir = f.layout.job_dir(job.id());
    assert!(dir.join("engine_cmd.run.1").is_file());
    assert!(dir
        .join(marker_name(MARKER_SUBMIT_LOG, "run", Some(1)))
        .is_file());
    let info = JobInfo::load_or_default(&dir.join(JOB_INFO));
    assert_eq!(info.attempts.len(), 1);
    assert_eq!(info.submit_count("run", 1), 1);
}

#[tokio::test]
async fn interrupted_oom_shard_resubmits_with_doubled_memory() {
    let (f, engine, resolver, job) = scene(StepJob::ok("a"));
    materialize(&f.manager_ctx, &job).unwrap();

    // First submission.
    assert!(submit_next(&resolver, &job).await.unwrap());

    // Simulate the worker getting OOM-killed: started, heartbeat records
    // out-of-memory, then everything disappears.
    let dir = f.layout.job_dir(job.id());
    touch_marker(&dir.join(marker_name(MARKER_LOG, "run", Some(1)))).unwrap();
    UsageSnapshot {
        pid: 1,
        host: "node".into(),
        rss_gb: 1.9,
        vms_gb: 2.0,
        cpu_pct: 0.0,
        max_rss_gb: 1.95,
        elapsed_hours: 0.01,
        out_of_memory: true,
        requested: Rqmt::new().mem(2.0),
        updated_epoch_ms: 0,
    }
    .store(&dir.join(marker_name(MARKER_USAGE, "run", Some(1))))
    .unwrap();
    f.clock.advance(Duration::from_secs(10));

    assert!(submit_next(&resolver, &job).await.unwrap());

    let subs = engine.submissions();
    assert_eq!(subs.len(), 2);
    assert_eq!(subs[1].rqmt.mem, 4.0);
    // Both attempts recorded.
    let info = JobInfo::load_or_default(&dir.join(JOB_INFO));
    assert_eq!(info.attempts.len(), 2);
    assert_eq!(info.attempts[0].rqmt.mem, 2.0);
    assert_eq!(info.attempts[1].rqmt.mem, 4.0);
}

#[tokio::test]
async fn finished_task_is_not_resubmitted() {
    let (f, engine, resolver, job) = scene(StepJob::ok("a"));
    materialize(&f.manager_ctx, &job).unwrap();
    touch_marker(
        &f.layout
            .marker(job.id(), MARKER_FINISHED, "run", Some(1)),
    )
    .unwrap();

    assert!(!submit_next(&resolver, &job).await.unwrap());
    assert!(engine.submissions().is_empty());
}

#[tokio::test]
async fn queued_task_is_left_alone() {
    let (f, engine, resolver, job) = scene(StepJob::ok("a"));
    materialize(&f.manager_ctx, &job).unwrap();
    engine.set_state(
        &sis_engine::queue_name(job.id(), "run"),
        1,
        sis_engine::EngineTaskState::Queued,
    );

    assert!(!submit_next(&resolver, &job).await.unwrap());
    assert!(engine.submissions().is_empty());
}

#[tokio::test]
async fn multi_shard_submission_covers_all_shards() {
    let mut def = StepJob::ok("a");
    def.shards = 4;
    let (f, engine, resolver, job) = scene(def);
    materialize(&f.manager_ctx, &job).unwrap();
    // Shard 2 already finished: only 1, 3, 4 go out.
    touch_marker(
        &f.layout
            .marker(job.id(), MARKER_FINISHED, "run", Some(2)),
    )
    .unwrap();

    assert!(submit_next(&resolver, &job).await.unwrap());
    let subs = engine.submissions();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].shards, vec![1, 3, 4]);
}

#[tokio::test]
async fn resubmission_clears_interrupted_error_marker() {
    let (f, engine, resolver, job) = scene(StepJob::ok("a"));
    materialize(&f.manager_ctx, &job).unwrap();
    let error_path = f.layout.marker(job.id(), MARKER_ERROR, "run", Some(1));
    std::fs::write(&error_path, "interrupted: SIGTERM while running run.1\n").unwrap();

    assert!(submit_next(&resolver, &job).await.unwrap());
    assert!(!error_path.is_file());
    assert_eq!(engine.submissions().len(), 1);
}

#[test]
fn consume_retry_rotates_log_and_clears_error() {
    let mut def = StepJob::ok("a");
    def.tries = 2;
    let (f, _engine, _resolver, job) = scene(def);
    materialize(&f.manager_ctx, &job).unwrap();

    let spec = job.tasks().remove(0);
    let dir = f.layout.job_dir(job.id());
    std::fs::write(dir.join("log.run.1"), "attempt one\n").unwrap();
    std::fs::write(dir.join("error.run.1"), "task failed: boom\n").unwrap();

    assert!(consume_retry(&f.manager_ctx, &job, &spec, 1));
    assert!(!dir.join("error.run.1").is_file());
    assert!(!dir.join("log.run.1").is_file());
    assert_eq!(
        std::fs::read_to_string(dir.join("log.run.1.error.01")).unwrap(),
        "attempt one\n"
    );

    // Tries exhausted: the second failure sticks.
    std::fs::write(dir.join("log.run.1"), "attempt two\n").unwrap();
    std::fs::write(dir.join("error.run.1"), "task failed: boom\n").unwrap();
    assert!(!consume_retry(&f.manager_ctx, &job, &spec, 1));
    assert!(dir.join("error.run.1").is_file());
}

#[test]
fn single_try_tasks_never_rotate() {
    let (f, _engine, _resolver, job) = scene(StepJob::ok("a"));
    materialize(&f.manager_ctx, &job).unwrap();
    let spec = job.tasks().remove(0);
    let dir = f.layout.job_dir(job.id());
    std::fs::write(dir.join("error.run.1"), "task failed: boom\n").unwrap();
    assert!(!consume_retry(&f.manager_ctx, &job, &spec, 1));
    assert!(dir.join("error.run.1").is_file());
}
