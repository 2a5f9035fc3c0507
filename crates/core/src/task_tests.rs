// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn shard_ids_are_one_based() {
    let t = TaskSpec::new("run").shards(3);
    assert_eq!(t.shard_ids().collect::<Vec<_>>(), vec![1, 2, 3]);
}

#[test]
fn single_shard_default() {
    let t = TaskSpec::new("run");
    assert_eq!(t.shard_ids().collect::<Vec<_>>(), vec![1]);
    assert_eq!(t.tries, 1);
    assert!(!t.continuable);
}

#[test]
fn mini_task_routes_to_short_engine() {
    let t = TaskSpec::new("count").mini_task(true);
    assert!(t.mini_task);
    assert_eq!(t.rqmt.engine.as_deref(), Some("short"));
}

#[test]
fn mini_task_keeps_explicit_engine() {
    let t = TaskSpec::new("count")
        .rqmt(Rqmt::new().engine("special"))
        .mini_task(true);
    assert_eq!(t.rqmt.engine.as_deref(), Some("special"));
}

#[test]
fn resume_function_falls_back_to_start() {
    let plain = TaskSpec::new("train");
    assert!(!plain.resumable());
    assert_eq!(plain.resume_function(), "train");

    let resumable = TaskSpec::new("train").resume("continue_training");
    assert!(resumable.resumable());
    assert_eq!(resumable.resume_function(), "continue_training");
}

#[test]
fn serde_round_trip() {
    let t = TaskSpec::new("train")
        .resume("train")
        .rqmt(Rqmt::new().mem(8.0).gpu(1))
        .shards(4)
        .continuable(true);
    let json = serde_json::to_string(&t).unwrap();
    let back: TaskSpec = serde_json::from_str(&json).unwrap();
    assert_eq!(back, t);
}
