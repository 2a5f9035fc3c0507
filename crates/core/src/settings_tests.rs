// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn defaults_match_documented_values() {
    let s = Settings::default();
    assert_eq!(s.work_dir, "work");
    assert_eq!(s.wait_period_between_checks, 30);
    assert_eq!(s.wait_period_job_fs_sync, 30);
    assert!(!s.job_auto_cleanup);
    assert_eq!(s.max_submit_retries, 3);
    assert_eq!(s.rqmt_escalation_factor, 2.0);
    assert_eq!(s.engine, EngineSettings::default());
}

#[test]
fn toml_file_overrides_defaults() {
    let text = r#"
        wait_period_between_checks = 5
        job_auto_cleanup = true

        [engine]
        kind = "local"
        cpu = 4
        mem = 16.0
    "#;
    let s: Settings = toml::from_str(text).unwrap();
    assert_eq!(s.wait_period_between_checks, 5);
    assert!(s.job_auto_cleanup);
    assert_eq!(
        s.engine,
        EngineSettings::Local {
            cpu: Some(4),
            gpu: 0,
            mem: Some(16.0),
        }
    );
    // Untouched fields keep defaults.
    assert_eq!(s.work_dir, "work");
}

#[test]
fn selector_engine_parses() {
    let text = r#"
        [engine]
        kind = "selector"
        default = "long"

        [engine.engines.short]
        kind = "local"
        cpu = 4

        [engine.engines.long]
        kind = "sge"
        pe_name = "smp"

        [engine.engines.long.default_rqmt]
        cpu = 1
        mem = 1.0
        time = 1.0
    "#;
    let s: Settings = toml::from_str(text).unwrap();
    match s.engine {
        EngineSettings::Selector { engines, default } => {
            assert_eq!(default, "long");
            assert!(matches!(engines["short"], EngineSettings::Local { .. }));
            match &engines["long"] {
                EngineSettings::Sge { pe_name, .. } => assert_eq!(pe_name, "smp"),
                other => panic!("expected sge, got {other:?}"),
            }
        }
        other => panic!("expected selector, got {other:?}"),
    }
}

#[test]
fn env_overrides_scalars() {
    let mut s = Settings::default();
    s.apply_env(vec![
        ("SIS_WAIT_PERIOD_BETWEEN_CHECKS".to_string(), "1".to_string()),
        ("SIS_JOB_AUTO_CLEANUP".to_string(), "true".to_string()),
        ("UNRELATED".to_string(), "x".to_string()),
    ])
    .unwrap();
    assert_eq!(s.wait_period_between_checks, 1);
    assert!(s.job_auto_cleanup);
}

#[test]
fn bad_env_value_is_an_error() {
    let mut s = Settings::default();
    let err = s
        .apply_env(vec![(
            "SIS_MAX_SUBMIT_RETRIES".to_string(),
            "many".to_string(),
        )])
        .unwrap_err();
    assert!(matches!(err, SettingsError::Env { .. }));
}

#[test]
fn unknown_sis_env_keys_are_ignored() {
    let mut s = Settings::default();
    s.apply_env(vec![("SIS_NOT_A_SETTING".to_string(), "1".to_string())])
        .unwrap();
    assert_eq!(s, Settings::default());
}

#[test]
fn settings_round_trip_through_toml() {
    let s = Settings::default();
    let text = toml::to_string(&s).unwrap();
    let back: Settings = toml::from_str(&text).unwrap();
    assert_eq!(back, s);
}

#[test]
fn load_file_reads_toml(){
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("settings.toml");
    std::fs::write(&path, "wait_period_cache = 2\n").unwrap();
    let s = Settings::load_file(&path).unwrap();
    assert_eq!(s.wait_period_cache, 2);
}
