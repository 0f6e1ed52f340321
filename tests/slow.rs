//! Real-process end-to-end scenarios (spec §8, items 1-6) that need
//! several seconds of wall clock and a live supervisor. Run explicitly
//! with `cargo test -- --ignored`.

use assert_cmd::Command;
use predicates::prelude::*;
use serial_test::serial;
use std::thread::sleep;
use std::time::Duration;
use tempfile::tempdir;

fn tq(db: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("tq").unwrap();
    cmd.env("TASQUE_DB", db);
    cmd
}

fn read_pid(db: &std::path::Path) -> Option<i64> {
    let pid_path = db.parent().unwrap().join("tasque.pid");
    std::fs::read_to_string(pid_path).ok()?.trim().parse().ok()
}

#[test]
#[serial]
#[ignore = "forks a real daemon process and needs wall-clock time"]
fn scenario_1_empty_queue_idle() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("tasq.db");

    tq(&db).args(["start"]).assert().success();
    sleep(Duration::from_secs(3));

    assert!(read_pid(&db).is_some());
    tq(&db).args(["ls"]).assert().success().stdout(predicate::str::is_empty().not());

    tq(&db).args(["stop"]).assert().success();
    sleep(Duration::from_millis(500));
    let pid_path = dir.path().join("tasque.pid");
    assert!(!pid_path.exists());
}

#[test]
#[serial]
#[ignore = "forks a real daemon process and needs wall-clock time"]
fn scenario_2_single_task_success() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("tasq.db");

    tq(&db).args(["enqueue", "--", "/bin/true"]).assert().success();
    tq(&db).args(["start"]).assert().success();
    sleep(Duration::from_secs(5));

    tq(&db)
        .args(["ls"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[+]"));

    tq(&db).args(["stop"]).assert().success();
}

#[test]
#[serial]
#[ignore = "forks a real daemon process and needs wall-clock time"]
fn scenario_3_single_task_failure() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("tasq.db");

    tq(&db).args(["enqueue", "--", "/bin/false"]).assert().success();
    tq(&db).args(["start"]).assert().success();
    sleep(Duration::from_secs(5));

    tq(&db)
        .args(["ls"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[x]"));

    tq(&db).args(["stop"]).assert().success();
}

#[test]
#[serial]
#[ignore = "forks a real daemon process and needs wall-clock time"]
fn scenario_4_priority_ordering() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("tasq.db");

    tq(&db).args(["enqueue", "--pri", "0", "--", "sleep", "2"]).assert().success(); // A
    tq(&db).args(["enqueue", "--pri", "0", "--", "sleep", "2"]).assert().success(); // B
    tq(&db).args(["enqueue", "--pri", "5", "--", "sleep", "2"]).assert().success(); // C

    tq(&db).args(["start"]).assert().success();
    sleep(Duration::from_secs(7));

    // All three eventually finish OK; C (highest priority) is admitted
    // before A and B regardless of id order.
    let out = tq(&db).args(["ls"]).assert().success().get_output().stdout.clone();
    let text = String::from_utf8_lossy(&out);
    assert_eq!(text.matches("[+]").count(), 3);

    tq(&db).args(["stop"]).assert().success();
}

#[test]
#[serial]
#[ignore = "forks a real daemon process and needs wall-clock time"]
fn scenario_5_virtual_plugin_parallelism() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("tasq.db");

    // The first command against a fresh store seeds the config table, so
    // TASQUE_RESOURCE must be set on it (spec §6).
    tq(&db)
        .env("TASQUE_RESOURCE", "virtual")
        .args(["enqueue", "--rsc", "0.4", "--", "sleep", "3"])
        .assert()
        .success();
    tq(&db).args(["enqueue", "--rsc", "0.4", "--", "sleep", "3"]).assert().success();
    tq(&db).args(["enqueue", "--rsc", "0.4", "--", "sleep", "3"]).assert().success();

    tq(&db).args(["ls"]).assert().success().stdout(predicate::str::contains("resource=virtual"));

    let start = std::time::Instant::now();
    tq(&db).args(["start"]).assert().success();

    // Sample mid-flight: with 0.4 + 0.4 + 0.4 > 1.0, only two of the
    // three tasks can be admitted at once under the virtual plugin's
    // `rsc <= 1.0 - book` rule, so exactly two should be Running and one
    // still Waiting a couple seconds in.
    sleep(Duration::from_secs(2));
    let out = tq(&db).args(["ls"]).assert().success().get_output().stdout.clone();
    let text = String::from_utf8_lossy(&out);
    assert_eq!(text.matches("[R]").count(), 2, "expected exactly two concurrent workers:\n{text}");
    assert_eq!(text.matches("[W]").count(), 1, "expected the third task still waiting:\n{text}");

    // All three eventually complete; wall time is ~6s (two admission
    // rounds of one sleep-3 task each), not ~9s (fully sequential).
    sleep(Duration::from_secs(6));
    let out = tq(&db).args(["ls"]).assert().success().get_output().stdout.clone();
    let text = String::from_utf8_lossy(&out);
    assert_eq!(text.matches("[+]").count(), 3);
    assert!(start.elapsed() < Duration::from_secs(9), "ran sequentially instead of in parallel");

    tq(&db).args(["stop"]).assert().success();
}

#[test]
#[serial]
#[ignore = "forks a real daemon process and needs wall-clock time"]
fn scenario_6_accident_reconciliation() {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let dir = tempdir().unwrap();
    let db = dir.path().join("tasq.db");

    tq(&db).args(["enqueue", "--", "sleep", "30"]).assert().success();
    tq(&db).args(["start"]).assert().success();
    sleep(Duration::from_secs(2));

    let out = tq(&db).args(["dump"]).assert().success().get_output().stdout.clone();
    let text = String::from_utf8_lossy(&out);
    let pid: i32 = text
        .lines()
        .find(|l| l.contains("pid: Some"))
        .and_then(|l| l.split("Some(").nth(1))
        .and_then(|s| s.split(')').next())
        .and_then(|s| s.parse().ok())
        .expect("running task should have a pid");

    signal::kill(Pid::from_raw(pid), Signal::SIGKILL).unwrap();
    sleep(Duration::from_secs(2));

    tq(&db)
        .args(["ls"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[!]"));

    tq(&db).args(["dequeue", "1"]).assert().success();
    tq(&db).args(["stop"]).assert().success();
}
