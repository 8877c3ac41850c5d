use assert_cmd::prelude::*;
use rstest::rstest;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

fn write_valid_config(dir: &tempfile::TempDir) -> PathBuf {
    fs::write(dir.path().join("k.csv"), "Channel,r1,r2\nc1,1.0,0\nc2,0,1.0\n").unwrap();
    fs::write(
        dir.path().join("plant.csv"),
        "Channel,c1,c2\nr1,1.0,0\nr2,0,1.0\n",
    )
    .unwrap();
    let toml = r#"
[loop]
gain = 0.5
interval_s = 0.01
integral = true
update_interval = 2

[tables]
matrix = "k.csv"

[plant]
response = "plant.csv"
offsets = { r1 = 4.0, r2 = -2.0 }
"#;
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn lines(text: &str) -> Vec<Value> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).expect("valid JSON line"))
        .collect()
}

/// Validate the records file written by `run --records`.
#[rstest]
fn records_file_schema() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    let records = dir.path().join("records.jsonl");

    let mut cmd = Command::cargo_bin("ctrlaw").unwrap();
    cmd.arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(&cfg)
        .arg("run")
        .arg("--steps")
        .arg("4")
        .arg("--records")
        .arg(&records);
    cmd.assert().success();

    let all = lines(&fs::read_to_string(&records).unwrap());
    let recs: Vec<&Value> = all.iter().filter(|v| v["kind"] == "record").collect();
    let stats: Vec<&Value> = all.iter().filter(|v| v["kind"] == "stats").collect();
    assert_eq!(recs.len(), 4);
    // update_interval = 2
    assert_eq!(stats.len(), 2);

    for (i, r) in recs.iter().enumerate() {
        assert_eq!(r["step"].as_u64(), Some(i as u64 + 1));
        assert!(r["epoch_time"].as_f64().is_some());
        assert!(r["elapsed_time"].as_f64().unwrap() >= 0.0);
        assert_eq!(r["readbacks"].as_array().map(Vec::len), Some(2));
        assert_eq!(r["controls"].as_array().map(Vec::len), Some(2));
        assert!(r["tests"].is_null());
        assert_eq!(r["skipped"].as_bool(), Some(false));
        assert!(r["limit_factor"].as_f64().is_some());
    }

    // First step: c1 = -0.5 * 4, c2 = -0.5 * -2
    assert_eq!(recs[0]["controls"][0].as_f64(), Some(-2.0));
    assert_eq!(recs[0]["controls"][1].as_f64(), Some(1.0));

    for s in &stats {
        for key in ["readback", "readback_delta", "control", "control_delta"] {
            let c = &s[key];
            assert!(c["rms"].as_f64().is_some(), "{key} missing rms");
            assert!(c["mean"].as_f64().is_some());
            assert!(c["mad"].as_f64().is_some());
            assert!(c["largest_name"].as_str().is_some());
        }
    }
}

/// `--json` prints one result object on stdout.
#[rstest]
fn json_summary_on_stdout() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let mut cmd = Command::cargo_bin("ctrlaw").unwrap();
    cmd.arg("--json")
        .arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(&cfg)
        .arg("run")
        .arg("--steps")
        .arg("3");

    let out = cmd.assert().success().get_output().stdout.clone();
    let stdout = String::from_utf8_lossy(&out);
    let line = stdout
        .lines()
        .find(|l| l.contains("\"status\""))
        .unwrap_or_else(|| panic!("no status line; stdout was: {stdout}"));
    let v: Value = serde_json::from_str(line).expect("valid JSON");

    assert_eq!(v["status"], "finished");
    assert_eq!(v["steps"].as_u64(), Some(3));
    assert_eq!(v["skipped"].as_u64(), Some(0));
    assert_eq!(v["final_control"].as_array().map(Vec::len), Some(2));
}

#[rstest]
fn dry_run_records_but_leaves_controls() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    let records = dir.path().join("dry.jsonl");

    let mut cmd = Command::cargo_bin("ctrlaw").unwrap();
    cmd.arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(&cfg)
        .arg("run")
        .arg("--steps")
        .arg("2")
        .arg("--dry-run")
        .arg("--records")
        .arg(&records);
    cmd.assert().success();

    let all = lines(&fs::read_to_string(&records).unwrap());
    let recs: Vec<&Value> = all.iter().filter(|v| v["kind"] == "record").collect();
    // Nothing is written, so the readbacks never move.
    for r in &recs {
        assert_eq!(r["readbacks"][0].as_f64(), Some(4.0));
    }
}
