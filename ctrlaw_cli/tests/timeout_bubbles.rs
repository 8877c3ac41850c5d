use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

fn write_config(dir: &tempfile::TempDir) -> PathBuf {
    fs::write(dir.path().join("k.csv"), "Channel,rb\nc1,1.0\n").unwrap();
    let toml = r#"
[loop]
gain = 0.5
interval_s = 0.01
steps = 5

[tables]
matrix = "k.csv"

[plant]
offsets = { rb = 1.0 }
"#;
    let cfg = dir.path().join("cfg.toml");
    fs::write(&cfg, toml).unwrap();
    cfg
}

#[rstest]
fn transport_timeout_bubbles_to_cli() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir);

    let mut cmd = Command::cargo_bin("ctrlaw").unwrap();
    // The initial setpoint read succeeds, the first readback read times out.
    cmd.env("CTRLAW_SIM_TIMEOUT", "1");
    cmd.arg("--config").arg(&cfg).arg("run");
    cmd.assert().code(4).stderr(predicate::str::contains(
        "What happened: A channel read or write timed out",
    ));
}

#[rstest]
fn liveness_abort_exits_with_code_2() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir);

    let mut cmd = Command::cargo_bin("ctrlaw").unwrap();
    cmd.env("CTRLAW_SIM_ABORT_AFTER", "0");
    cmd.arg("--config").arg(&cfg).arg("run");
    cmd.assert()
        .code(2)
        .stderr(predicate::str::contains("watchdog asked the loop to stop"));
}

#[rstest]
fn json_error_object_on_stdout() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir);

    let mut cmd = Command::cargo_bin("ctrlaw").unwrap();
    cmd.env("CTRLAW_SIM_TIMEOUT", "1");
    cmd.arg("--json")
        .arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(&cfg)
        .arg("run");
    let out = cmd.assert().code(4).get_output().stdout.clone();
    let stdout = String::from_utf8_lossy(&out);
    let line = stdout
        .lines()
        .find(|l| l.contains("\"reason\""))
        .unwrap_or_else(|| panic!("no error object; stdout was: {stdout}"));
    let v: Value = serde_json::from_str(line).unwrap();
    assert_eq!(v["reason"], "Timeout");
    assert_eq!(v["exit_code"].as_i64(), Some(4));
    assert!(v["message"].as_str().unwrap().contains("timed out"));
}
