use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn wifictl_cmd(runtime_dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("wifictl").unwrap();
    cmd.env("XDG_RUNTIME_DIR", runtime_dir);
    cmd.env("WIFICTL_INTERFACE", "wlan0");
    cmd.env("WIFICTL_SOCKET_DIR", runtime_dir.join("sockets"));
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    let dir = tempdir().unwrap();
    wifictl_cmd(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("start")
                .and(predicate::str::contains("monitor"))
                .and(predicate::str::contains("ping")),
        );
}

#[test]
fn test_version_flag() {
    let dir = tempdir().unwrap();
    wifictl_cmd(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("wifictl"));
}

#[test]
fn test_status_reports_unknown_daemon() {
    let dir = tempdir().unwrap();
    wifictl_cmd(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("wpa_supplicant is unknown"));
}

#[test]
fn test_status_json_output() {
    let dir = tempdir().unwrap();
    let output = wifictl_cmd(dir.path())
        .args(["status", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let report: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(report["status"], "unknown");
    assert_eq!(report["interface"], "wlan0");
}

#[test]
fn test_ping_fails_when_daemon_not_running() {
    let dir = tempdir().unwrap();
    wifictl_cmd(dir.path())
        .arg("ping")
        .assert()
        .failure()
        .code(69)
        .stderr(predicate::str::contains("not running"));
}

#[test]
fn test_cmd_fails_when_daemon_not_running() {
    let dir = tempdir().unwrap();
    wifictl_cmd(dir.path())
        .args(["cmd", "STATUS"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not running"));
}

#[test]
fn test_completions_generate() {
    let dir = tempdir().unwrap();
    wifictl_cmd(dir.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("wifictl"));
}
