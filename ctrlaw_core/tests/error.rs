mod common;

use std::error::Error;
use std::time::Duration;

use common::*;
use ctrlaw_core::error::LawError;
use ctrlaw_core::{DynControlLoop, Report};
use ctrlaw_traits::ValueProvider;
use ctrlaw_traits::clock::ManualClock;

type BoxError = Box<dyn Error + Send + Sync>;

fn law_error(e: &Report) -> Option<&LawError> {
    e.chain().find_map(|c| c.downcast_ref::<LawError>())
}

/// Answers `ok_reads` reads, then fails every read with `message`.
struct FlakyProvider {
    ok_reads: u32,
    message: &'static str,
}

impl ValueProvider for FlakyProvider {
    fn read(&mut self, names: &[String], _timeout: Duration) -> Result<Vec<f64>, BoxError> {
        if self.ok_reads == 0 {
            return Err(self.message.into());
        }
        self.ok_reads -= 1;
        Ok(vec![1.0; names.len()])
    }

    fn write(&mut self, _names: &[String], _values: &[f64], _timeout: Duration) -> Result<(), BoxError> {
        Err("write refused".into())
    }

    fn read_array(&mut self, _name: &str, _timeout: Duration) -> Result<Vec<f64>, BoxError> {
        Ok(Vec::new())
    }
}

fn flaky_loop(ok_reads: u32, message: &'static str) -> DynControlLoop {
    let clock = ManualClock::new();
    DynControlLoop::builder()
        .with_provider(FlakyProvider { ok_reads, message })
        .with_matrix(matrix(&["c1"], &["rb"], vec![1.0]))
        .with_params(integral(1.0))
        .with_clock(Box::new(clock))
        .build()
        .unwrap()
}

#[test]
fn provider_timeout_message_maps_to_timeout() {
    // One read for the initial setpoints, then the readback read fails.
    let mut lp = flaky_loop(1, "sensor timed out");
    let err = lp.step().expect_err("expected a timeout");
    assert_eq!(law_error(&err), Some(&LawError::Timeout));
}

#[test]
fn other_provider_errors_map_to_transport() {
    let mut lp = flaky_loop(1, "connection refused");
    let err = lp.step().expect_err("expected a transport error");
    assert!(
        matches!(law_error(&err), Some(LawError::Transport(m)) if m.contains("refused")),
        "{err:?}"
    );
}

#[test]
fn initial_read_failure_carries_context() {
    let mut lp = flaky_loop(0, "connection refused");
    let err = lp.begin().expect_err("expected begin to fail");
    assert!(format!("{err:#}").contains("reading initial actuator setpoints"));
    assert!(matches!(law_error(&err), Some(LawError::Transport(_))));
}

#[test]
fn write_failure_is_fatal_with_context() {
    let mut lp = flaky_loop(10, "unused");
    let err = lp.step().expect_err("expected the write to fail");
    assert!(format!("{err:#}").contains("writing actuator setpoints"));
    assert_eq!(
        law_error(&err),
        Some(&LawError::Transport("write refused".into()))
    );
}

#[test]
fn simulated_timeout_is_typed() {
    let p = plant(&["rb"], vec![0.0], &["c1"], &[0.0]);
    p.fail_after(1);
    let clock = ManualClock::new();
    let mut lp = builder(&p, matrix(&["c1"], &["rb"], vec![1.0]), integral(1.0), &clock)
        .build()
        .unwrap();
    let err = lp.step().unwrap_err();
    assert_eq!(law_error(&err), Some(&LawError::Timeout));
}

#[test]
fn disconnected_channel_is_transport() {
    let p = plant(&["rb"], vec![0.0], &["c1"], &[0.0]);
    p.disconnect("rb");
    let clock = ManualClock::new();
    let mut lp = builder(&p, matrix(&["c1"], &["rb"], vec![1.0]), integral(1.0), &clock)
        .build()
        .unwrap();
    let err = lp.step().unwrap_err();
    assert_eq!(
        law_error(&err),
        Some(&LawError::Transport("channel disconnected: rb".into()))
    );
}

#[test]
fn non_finite_readback_names_channel() {
    let p = plant(&["r1", "r2"], vec![0.0, 0.0], &["c1"], &[0.0]);
    p.script("r2", [f64::NAN]);
    let clock = ManualClock::new();
    let mut lp = builder(&p, matrix(&["c1"], &["r1", "r2"], vec![1.0, 1.0]), integral(1.0), &clock)
        .build()
        .unwrap();
    let err = lp.step().unwrap_err();
    assert_eq!(
        law_error(&err),
        Some(&LawError::NonFinite {
            stage: "acquisition",
            channel: "r2".into()
        })
    );
    assert_eq!(p.writes(), 0);
}

#[test]
fn non_finite_waveform_is_fatal() {
    let p = plant(&["rb"], vec![0.0], &["c1"], &[0.0]).with_waveform("wf", vec![0.0, f64::INFINITY]);
    let clock = ManualClock::new();
    let mut lp = builder(&p, matrix(&["c1"], &["rb"], vec![1.0]), integral(1.0), &clock)
        .with_waveform_tests(vec![ctrlaw_core::WaveformTest {
            waveform: "wf".into(),
            points: vec![ctrlaw_core::WaveformPoint {
                index: 0,
                min: -1.0,
                max: 1.0,
                sleep: Duration::ZERO,
                hold_off: Duration::ZERO,
            }],
        }])
        .build()
        .unwrap();
    let err = lp.step().unwrap_err();
    assert!(matches!(
        law_error(&err),
        Some(LawError::NonFinite { stage: "waveform test", .. })
    ));
}
