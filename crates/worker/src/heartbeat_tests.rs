// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn heartbeat_writes_snapshot_file() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("usage.run.1");

    let hb = Heartbeat::start(
        path.clone(),
        Rqmt::new().mem(64.0),
        Duration::from_millis(20),
        Duration::from_millis(20),
    );
    std::thread::sleep(Duration::from_millis(120));
    let last = hb.stop().expect("at least one sample");

    assert_eq!(last.pid, std::process::id());
    assert!(!last.out_of_memory, "64G requested, test uses far less");
    assert!(last.max_rss_gb > 0.0);

    let on_disk = UsageSnapshot::load(&path).expect("heartbeat file written");
    assert_eq!(on_disk.pid, last.pid);
    assert_eq!(on_disk.requested.mem, 64.0);
}

#[test]
fn tiny_request_flags_out_of_memory() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("usage.run.1");

    // Any real process dwarfs a 1 MB memory request.
    let hb = Heartbeat::start(
        path,
        Rqmt::new().mem(0.001),
        Duration::from_millis(10),
        Duration::from_millis(10),
    );
    std::thread::sleep(Duration::from_millis(60));
    let last = hb.stop().expect("at least one sample");
    assert!(last.out_of_memory);
}

#[test]
fn stop_is_prompt() {
    let tmp = tempfile::tempdir().unwrap();
    let hb = Heartbeat::start(
        tmp.path().join("usage.run.1"),
        Rqmt::default(),
        Duration::from_secs(3600),
        Duration::from_secs(3600),
    );
    let started = std::time::Instant::now();
    hb.stop();
    assert!(started.elapsed() < Duration::from_secs(5));
}
