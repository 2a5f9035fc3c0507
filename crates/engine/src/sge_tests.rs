// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn engine() -> SgeEngine {
    SgeEngine::new(Rqmt::default(), None, "mpi".into())
}

#[test]
fn options_translate_requirements() {
    let rqmt = Rqmt::new().cpu(4).gpu(1).mem(8.0).time(2.0);
    let opts = engine().options(&rqmt, "job.run", "engine", (1, 4));
    let joined = opts.join(" ");

    assert!(joined.contains("-N job.run"));
    assert!(joined.contains("h_vmem=8G"));
    assert!(joined.contains("h_rt=7200"));
    assert!(joined.contains("-t 1-4:1"));
    assert!(joined.contains("gpu=1"));
    assert!(joined.contains("-pe mpi 4"));
}

#[test]
fn single_cpu_skips_parallel_environment() {
    let opts = engine().options(&Rqmt::default(), "j", "engine", (1, 1));
    assert!(!opts.contains(&"-pe".to_string()));
}

#[test]
fn opaque_qsub_args_pass_through() {
    let rqmt = Rqmt::new().extra("qsub_args", "-l hostname=node1 -now y");
    let opts = engine().options(&rqmt, "j", "engine", (1, 1));
    let joined = opts.join(" ");
    assert!(joined.contains("-l hostname=node1"));
    assert!(joined.contains("-now y"));
}

const QSTAT_SAMPLE: &str = r#"<?xml version='1.0'?>
<job_info>
  <queue_info>
    <job_list state="running">
      <JB_job_number>101</JB_job_number>
      <JB_name>m_C.h.run</JB_name>
      <state>r</state>
      <tasks>1</tasks>
    </job_list>
  </queue_info>
  <job_info>
    <job_list state="pending">
      <JB_job_number>102</JB_job_number>
      <JB_name>m_C.h.run</JB_name>
      <state>qw</state>
      <tasks>2-4:1</tasks>
    </job_list>
    <job_list state="pending">
      <JB_job_number>103</JB_job_number>
      <JB_name>stuck.run</JB_name>
      <state>Eqw</state>
    </job_list>
  </job_info>
</job_info>
"#;

#[test]
fn qstat_xml_parses_array_states() {
    let snapshot = parse_qstat_xml(QSTAT_SAMPLE);

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
    // Plain job without a tasks element counts as shard 1.
    assert_eq!(
        snapshot.get(&("stuck.run".to_string(), 1)),
        Some(&EngineTaskState::QueueError)
    );
    assert_eq!(snapshot.get(&("absent".to_string(), 1)), None);
}

#[test]
fn state_codes_map() {
    assert_eq!(map_state("qw"), EngineTaskState::Queued);
    assert_eq!(map_state("hqw"), EngineTaskState::Queued);
    assert_eq!(map_state("r"), EngineTaskState::Running);
    assert_eq!(map_state("t"), EngineTaskState::Running);
    assert_eq!(map_state("Eqw"), EngineTaskState::QueueError);
}

#[test]
fn submit_ack_parses_job_id() {
    assert_eq!(
        parse_submit_id("Your job-array 123.1-4:1 (\"j.run\") has been submitted\n"),
        Some("123".to_string())
    );
    assert_eq!(
        parse_submit_id("Your job 124 (\"j.run\") has been submitted\n"),
        Some("124".to_string())
    );
    assert_eq!(parse_submit_id("garbage"), None);
}
