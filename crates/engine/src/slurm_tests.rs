// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn engine() -> SlurmEngine {
    SlurmEngine::new(Rqmt::default(), None)
}

#[test]
fn options_translate_requirements() {
    let rqmt = Rqmt::new().cpu(2).gpu(1).mem(4.0).time(0.5);
    let opts = engine().options(&rqmt, "j.run", "engine", (2, 5));
    let joined = opts.join(" ");

    assert!(joined.contains("-J j.run"));
    assert!(joined.contains("--mem=4096M"));
    assert!(joined.contains("--time=30"));
    assert!(joined.contains("--cpus-per-task=2"));
    assert!(joined.contains("-a 2-5"));
    assert!(joined.contains("--gres=gpu:1"));
}

#[test]
fn sbatch_args_pass_through() {
    let rqmt = Rqmt::new().extra("sbatch_args", "--partition=gpu --qos=high");
    let opts = engine().options(&rqmt, "j", "engine", (1, 1));
    let joined = opts.join(" ");
    assert!(joined.contains("--partition=gpu"));
    assert!(joined.contains("--qos=high"));
}

#[test]
fn squeue_output_parses() {
    let stdout = "\
m_C.h.run|RUNNING|1
m_C.h.run|PENDING|2-4
other.task|COMPLETING|N/A
broken.task|FAILED|1
";
    let snapshot = parse_squeue(stdout);

    assert_eq!(
        snapshot.get(&("m_C.h.run".to_string(), 1)),
        Some(&EngineTaskState::Running)
    );
    for shard in 2..=4 {
        assert_eq!(
            snapshot.get(&("m_C.h.run".to_string(), shard)),
            Some(&EngineTaskState::Queued)
        );
    }
    assert_eq!(
        snapshot.get(&("other.task".to_string(), 1)),
        Some(&EngineTaskState::Running)
    );
    // Terminal squeue states leave the decision to the markers.
    assert_eq!(snapshot.get(&("broken.task".to_string(), 1)), None);
}

#[test]
fn state_codes_map() {
    assert_eq!(map_state("PENDING"), EngineTaskState::Queued);
    assert_eq!(map_state("RUNNING"), EngineTaskState::Running);
    assert_eq!(map_state("COMPLETING"), EngineTaskState::Running);
    assert_eq!(map_state("TIMEOUT"), EngineTaskState::Unknown);
    assert_eq!(map_state("WHATEVER"), EngineTaskState::Unknown);
}

#[test]
fn shell_join_quotes_unsafe_arguments() {
    let joined = shell_join(&[
        "worker".to_string(),
        "work/m/C.h".to_string(),
        "has space".to_string(),
    ]);
    assert_eq!(joined, "worker work/m/C.h 'has space'");
}
