// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::settings::Settings;
use crate::workdir::{touch_marker, JOB_FINISHED};

fn layout(base: &std::path::Path) -> WorkLayout {
    WorkLayout::new(base, &Settings::default())
}

#[test]
fn external_path_resolves_verbatim() {
    let tmp = tempfile::tempdir().unwrap();
    let p = Path::input("/data/corpus.txt");
    assert_eq!(
        p.get_path(&layout(tmp.path())),
        std::path::PathBuf::from("/data/corpus.txt")
    );
}

#[test]
fn output_path_resolves_into_job_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let id = SisId::new("text/CountVocab", "h");
    let p = Path::output_of(id.clone(), "counts.txt");
    assert_eq!(
        p.get_path(&layout(tmp.path())),
        tmp.path().join("work/text/CountVocab.h/output/counts.txt")
    );
}

#[test]
fn external_path_available_iff_file_exists() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("in.txt");
    let p = Path::input(file.to_str().unwrap());
    let layout = layout(tmp.path());

    assert!(!p.available(&layout));
    std::fs::write(&file, b"x").unwrap();
    assert!(p.available(&layout));
}

#[test]
fn created_path_needs_creator_finished() {
    let tmp = tempfile::tempdir().unwrap();
    let layout = layout(tmp.path());
    let id = SisId::new("m/C", "h");
    let p = Path::output_of(id.clone(), "out.txt");

    // File present but creator not finished: unavailable.
    std::fs::create_dir_all(layout.job_dir(&id).join("output")).unwrap();
    std::fs::write(p.get_path(&layout), b"x").unwrap();
    assert!(p.exists(&layout));
    assert!(!p.available(&layout));

    touch_marker(&layout.job_file(&id, JOB_FINISHED)).unwrap();
    assert!(p.available(&layout));
}

#[test]
fn finished_creator_with_missing_file_is_unavailable() {
    let tmp = tempfile::tempdir().unwrap();
    let layout = layout(tmp.path());
    let id = SisId::new("m/C", "h");
    let p = Path::output_of(id.clone(), "never_written.txt");

    std::fs::create_dir_all(layout.job_dir(&id)).unwrap();
    touch_marker(&layout.job_file(&id, JOB_FINISHED)).unwrap();
    assert!(!p.available(&layout));
}

#[test]
fn fingerprint_uses_creator_not_contents() {
    let a = Path::output_of(SisId::new("m/C", "h"), "out.txt");
    let b = Path::output_of(SisId::new("m/C", "h"), "out.txt");
    let c = Path::output_of(SisId::new("m/C", "other"), "out.txt");

    let fa = crate::hash::fingerprint(&a).unwrap();
    assert_eq!(fa, crate::hash::fingerprint(&b).unwrap());
    assert_ne!(fa, crate::hash::fingerprint(&c).unwrap());
}

#[test]
fn hash_overwrite_replaces_fingerprint() {
    let plain = Path::input("/somewhere/file");
    let rewritten = Path::output_of(SisId::new("m/C", "h"), "file")
        .with_hash_overwrite(HashOverwrite::Plain("/somewhere/file".into()));

    assert_eq!(
        crate::hash::fingerprint(&plain).unwrap(),
        crate::hash::fingerprint(&rewritten).unwrap()
    );
}

#[test]
fn overwrite_with_creator_matches_moved_output() {
    let original = Path::output_of(SisId::new("m/Old", "h1"), "file");
    let moved = Path::output_of(SisId::new("m/New", "h2"), "file").with_hash_overwrite(
        HashOverwrite::WithCreator(SisId::new("m/Old", "h1"), "file".into()),
    );

    assert_eq!(
        crate::hash::fingerprint(&original).unwrap(),
        crate::hash::fingerprint(&moved).unwrap()
    );
}

#[test]
fn serde_round_trip() {
    let p = Path::output_of(SisId::new("m/C", "h"), "out.txt");
    let json = serde_json::to_string(&p).unwrap();
    let back: Path = serde_json::from_str(&json).unwrap();
    assert_eq!(back, p);
}
