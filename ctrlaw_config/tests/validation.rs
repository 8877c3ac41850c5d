use ctrlaw_config::load_toml;
use rstest::rstest;

const BASE: &str = r#"
[loop]
gain = 0.5
interval_s = 1.0
steps = 10

[tables]
matrix = "matrix.csv"
"#;

#[test]
fn minimal_config_parses_with_defaults() {
    let cfg = load_toml(BASE).expect("parse TOML");
    cfg.validate().expect("valid config should pass");
    assert_eq!(cfg.control.update_interval, 1);
    assert_eq!(cfg.control.io_timeout_ms, 1000);
    assert_eq!(cfg.control.backoff_cap, 64);
    assert!((cfg.control.ping_interval_s - 2.0).abs() < 1e-12);
    assert_eq!(cfg.average.n, 1);
    assert!(!cfg.control.integral);
    assert!(cfg.compensation.is_none());
    assert!(cfg.trigger.is_none());
}

#[test]
fn full_config_parses() {
    let toml = r#"
[loop]
gain = 0.25
interval_s = 0.5
steps = 0
update_interval = 5
integral = true
hold_present_values = true
dry_run = true
action_limit = 0.01
delta_limit = 2.0

[average]
n = 3
interval_s = 0.05

[tables]
matrix = "m.csv"
filter = "f.csv"
tests = "t.csv"
delta_limits = "dl.csv"

[despike]
neighbors = 2
passes = 2
average_of = 1
start_threshold = 5.0
end_threshold = 1.0
steps_threshold = 5

[glitch]
rows = 8
readback_rms = 3.0

[trigger]
channel = "beam:trigger"
poll_s = 0.2

[live]
gain_channel = "ctl:gain"

[compensation]
matrix = "comp.csv"
gain = 0.8
integral = true

[logging]
rotation = "daily"

[plant]
offsets = { rb1 = 1.5 }
actuators = { c1 = 10.0 }
noise = 0.01
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    cfg.validate().expect("valid");
    assert_eq!(cfg.despike.steps_threshold, Some(5));
    assert_eq!(cfg.trigger.as_ref().map(|t| t.timeout_s), Some(10.0));
    assert_eq!(cfg.plant.offsets.get("rb1"), Some(&1.5));
    assert!(cfg.despike.is_enabled(&cfg.live));
}

fn with_loop_line(line: &str) -> String {
    BASE.replace("steps = 10", &format!("steps = 10\n{line}"))
}

#[rstest]
#[case("update_interval = 0", "update_interval must be >= 1")]
#[case("action_limit = -1.0", "action_limit must be >= 0")]
#[case("ping_interval_s = 0.0", "ping_interval_s must be > 0")]
#[case("io_timeout_ms = 0", "io_timeout_ms must be >= 1")]
#[case("backoff_cap = 0", "backoff_cap must be >= 1")]
fn rejects_bad_loop_fields(#[case] line: &str, #[case] msg: &str) {
    let cfg = load_toml(&with_loop_line(line)).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    assert!(format!("{err}").contains(msg), "got: {err}");
}

#[test]
fn rejects_zero_interval() {
    let cfg = load_toml(&BASE.replace("interval_s = 1.0", "interval_s = 0.0")).expect("parse");
    let err = cfg.validate().expect_err("should reject interval 0");
    assert!(format!("{err}").contains("interval_s must be > 0"));
}

#[test]
fn rejects_partial_ramp() {
    let toml = format!("{BASE}\n[despike]\nstart_threshold = 5.0\n");
    let cfg = load_toml(&toml).expect("parse");
    let err = cfg.validate().expect_err("partial ramp");
    assert!(format!("{err}").contains("together"));
}

#[test]
fn rejects_zero_average_count() {
    let toml = format!("{BASE}\n[average]\nn = 0\n");
    let cfg = load_toml(&toml).expect("parse");
    let err = cfg.validate().expect_err("n = 0");
    assert!(format!("{err}").contains("average.n must be >= 1"));
}

#[test]
fn rejects_unknown_rotation() {
    let toml = format!("{BASE}\n[logging]\nrotation = \"weekly\"\n");
    let cfg = load_toml(&toml).expect("parse");
    let err = cfg.validate().expect_err("rotation");
    assert!(format!("{err}").contains("logging.rotation"));
}

#[test]
fn compensation_gain_channel_needs_compensation() {
    let toml = format!("{BASE}\n[live]\ncompensation_gain_channel = \"x\"\n");
    let cfg = load_toml(&toml).expect("parse");
    let err = cfg.validate().expect_err("needs compensation");
    assert!(format!("{err}").contains("requires a [compensation] section"));
}

#[test]
fn missing_matrix_is_a_parse_error() {
    let toml = "[loop]\ngain = 1.0\ninterval_s = 1.0\n[tables]\n";
    assert!(load_toml(toml).is_err());
}
