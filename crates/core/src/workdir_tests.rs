// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::clock::{FakeClock, SystemClock};
use crate::settings::Settings;

fn layout(base: &Path) -> WorkLayout {
    WorkLayout::new(base, &Settings::default())
}

#[test]
fn marker_names() {
    assert_eq!(marker_name(MARKER_FINISHED, "run", Some(1)), "finished.run.1");
    assert_eq!(
        marker_name(MARKER_SUBMIT_LOG, "train", Some(2)),
        "submit_log.train.2"
    );
    assert_eq!(marker_name(MARKER_LOG, "train", None), "log.train");
}

#[test]
fn job_paths_follow_the_id() {
    let tmp = tempfile::tempdir().unwrap();
    let layout = layout(tmp.path());
    let id = SisId::new("text/CountVocab", "h");

    assert_eq!(layout.job_dir(&id), tmp.path().join("work/text/CountVocab.h"));
    assert_eq!(
        layout.marker(&id, MARKER_ERROR, "run", Some(2)),
        tmp.path().join("work/text/CountVocab.h/error.run.2")
    );
    assert_eq!(
        layout.job_output(&id, "counts.txt"),
        tmp.path().join("work/text/CountVocab.h/output/counts.txt")
    );
}

#[test]
fn id_of_dir_round_trips() {
    let tmp = tempfile::tempdir().unwrap();
    let layout = layout(tmp.path());
    let id = SisId::new("a/B", "h");
    assert_eq!(layout.id_of_dir(&layout.job_dir(&id)), Some(id));
    assert_eq!(layout.id_of_dir(tmp.path()), None);
}

#[test]
fn atomic_write_replaces_content() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("info");

    atomic_write(&path, b"first").unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), b"first");

    atomic_write(&path, b"second").unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), b"second");
}

#[test]
fn touch_marker_creates_empty_file() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("finished.run.1");
    touch_marker(&path).unwrap();
    assert!(path.is_file());
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
}

#[test]
fn job_finished_checks_marker() {
    let tmp = tempfile::tempdir().unwrap();
    let layout = layout(tmp.path());
    let id = SisId::new("m/C", "h");

    assert!(!layout.job_finished(&id));
    std::fs::create_dir_all(layout.job_dir(&id)).unwrap();
    touch_marker(&layout.job_file(&id, JOB_FINISHED)).unwrap();
    assert!(layout.job_finished(&id));
}

#[test]
fn file_age_with_fake_clock() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("finished.run.1");
    touch_marker(&path).unwrap();

    let clock = FakeClock::new();
    assert!(!older_than(&path, Duration::from_secs(30), &clock));

    clock.advance(Duration::from_secs(31));
    assert!(older_than(&path, Duration::from_secs(30), &clock));
}

#[test]
fn missing_file_has_no_age() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("absent");
    assert!(file_age(&path, &SystemClock).is_none());
    assert!(!older_than(&path, Duration::ZERO, &SystemClock));
}
