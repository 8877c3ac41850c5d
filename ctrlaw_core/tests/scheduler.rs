mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use common::*;
use ctrlaw_core::{
    IterationStatus, LawError, LoopParams, Reconfigure, SkipReason, TestSpec, TriggerSpec,
};
use ctrlaw_sim::{AlwaysAlive, MemorySink, ScriptedLiveness};
use ctrlaw_traits::clock::ManualClock;
use ctrlaw_traits::{LivenessStatus, Severity};

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn law_error(e: &eyre::Report) -> Option<&LawError> {
    e.chain().find_map(|c| c.downcast_ref::<LawError>())
}

#[test]
fn iterations_are_spaced_by_interval() {
    let p = plant(&["rb"], vec![0.0], &["c1"], &[0.0]);
    let clock = ManualClock::new();
    let mut lp = builder(&p, matrix(&["c1"], &["rb"], vec![1.0]), integral(1.0), &clock)
        .build()
        .unwrap();

    for _ in 0..3 {
        lp.step().unwrap();
    }
    assert_eq!(clock.sleeps(), vec![secs(1); 3]);
    assert_eq!(clock.elapsed(), secs(3));
}

#[test]
fn overrun_resets_target_to_now() {
    let p = plant(&["rb"], vec![0.0], &["c1"], &[0.0]);
    let clock = ManualClock::new();
    let mut lp = builder(&p, matrix(&["c1"], &["rb"], vec![1.0]), integral(1.0), &clock)
        .build()
        .unwrap();

    lp.step().unwrap();
    clock.advance(secs(3));
    // Target (t0 + 2) is already past: no sleep, target becomes now.
    lp.step().unwrap();
    assert_eq!(clock.sleeps(), vec![secs(1)]);
    lp.step().unwrap();
    assert_eq!(clock.sleeps(), vec![secs(1), secs(1)]);
    assert_eq!(clock.elapsed(), secs(5));
}

#[test]
fn long_interval_interleaves_pings() {
    let p = plant(&["rb"], vec![0.0], &["c1"], &[0.0]);
    let clock = ManualClock::new();
    let alive = AlwaysAlive::new();
    let params = LoopParams {
        interval: secs(5),
        ..integral(1.0)
    };
    let mut lp = builder(&p, matrix(&["c1"], &["rb"], vec![1.0]), params, &clock)
        .with_liveness(alive.clone())
        .build()
        .unwrap();

    lp.step().unwrap();
    assert!(clock.sleeps().iter().all(|d| *d <= secs(2)), "{:?}", clock.sleeps());
    // One at start, then one every 2 s of a 5 s wait.
    assert_eq!(alive.pings(), 3);
}

#[test]
fn liveness_abort_ends_the_run() {
    let p = plant(&["rb"], vec![0.0], &["c1"], &[0.0]);
    let clock = ManualClock::new();
    let params = LoopParams {
        interval: secs(5),
        ..integral(1.0)
    };
    let mut lp = builder(&p, matrix(&["c1"], &["rb"], vec![1.0]), params, &clock)
        .with_liveness(ScriptedLiveness::abort_after(1))
        .build()
        .unwrap();

    let err = lp.run().unwrap_err();
    assert_eq!(
        law_error(&err),
        Some(&LawError::Liveness(LivenessStatus::Abort))
    );
    assert_eq!(lp.steps_done(), 1);
}

#[test]
fn liveness_timeout_at_start_is_fatal() {
    let p = plant(&["rb"], vec![0.0], &["c1"], &[0.0]);
    let clock = ManualClock::new();
    let mut lp = builder(&p, matrix(&["c1"], &["rb"], vec![1.0]), integral(1.0), &clock)
        .with_liveness(ScriptedLiveness::timeout_after(0))
        .build()
        .unwrap();

    let err = lp.step().unwrap_err();
    assert_eq!(
        law_error(&err),
        Some(&LawError::Liveness(LivenessStatus::Timeout))
    );
    assert_eq!(p.writes(), 0);
}

#[test]
fn cancellation_stops_between_iterations() {
    let p = plant(&["rb"], vec![0.0], &["c1"], &[0.0]);
    let clock = ManualClock::new();
    let cancel = Arc::new(AtomicBool::new(false));
    let mut lp = builder(&p, matrix(&["c1"], &["rb"], vec![1.0]), integral(1.0), &clock)
        .with_cancel(cancel.clone())
        .build()
        .unwrap();

    lp.step().unwrap();
    lp.step().unwrap();
    cancel.store(true, Ordering::Relaxed);
    let err = lp.run().unwrap_err();
    assert_eq!(law_error(&err), Some(&LawError::Cancelled));
    assert_eq!(lp.summary().steps, 2);
}

#[test]
fn run_stops_after_configured_steps() {
    let p = plant(&["rb"], vec![1.0], &["c1"], &[0.0]);
    let clock = ManualClock::new();
    let params = LoopParams {
        steps: 3,
        ..integral(1.0)
    };
    let sink = MemorySink::new();
    let mut lp = builder(&p, matrix(&["c1"], &["rb"], vec![1.0]), params, &clock)
        .with_sink(sink.clone())
        .build()
        .unwrap();

    let summary = lp.run().unwrap();
    assert_eq!(summary.steps, 3);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.final_control, vec![-3.0]);
    assert_eq!(sink.records().len(), 3);
    assert_eq!(lp.step().unwrap(), IterationStatus::Finished);
}

#[test]
fn reconfiguration_applies_at_next_iteration() {
    let p = plant(&["r1", "r2"], vec![1.0, 0.0], &["c1", "c2"], &[0.0, 0.0]);
    let clock = ManualClock::new();
    let (tx, rx) = crossbeam_channel::unbounded();
    let k = matrix(&["c1", "c2"], &["r1", "r2"], vec![1.0, 0.0, 0.0, 1.0]);
    let params = LoopParams {
        ping_interval: secs(10),
        ..integral(1.0)
    };
    let mut lp = builder(&p, k, params, &clock)
        .with_reconfigure(rx)
        .build()
        .unwrap();

    lp.step().unwrap();
    assert_eq!(lp.controls().delta, vec![-1.0, 0.0]);

    tx.send(Reconfigure::Gain(2.0)).unwrap();
    tx.send(Reconfigure::Interval(secs(2))).unwrap();
    // Wrong shape: rejected, loop continues.
    tx.send(Reconfigure::Matrix(matrix(&["c1"], &["r1"], vec![9.0])))
        .unwrap();
    // Gain must be finite.
    tx.send(Reconfigure::Gain(f64::NAN)).unwrap();
    lp.step().unwrap();
    assert_eq!(lp.gain(), 2.0);
    assert_eq!(lp.controls().delta, vec![-2.0, 0.0]);
    assert_eq!(lp.matrix().get(0, 0), 1.0);
    assert_eq!(clock.sleeps().last(), Some(&secs(2)));

    // Same channels in another order are aligned to the loop's order.
    tx.send(Reconfigure::Matrix(matrix(
        &["c2", "c1"],
        &["r1", "r2"],
        vec![0.0, 3.0, 5.0, 0.0],
    )))
    .unwrap();
    tx.send(Reconfigure::Steps(3)).unwrap();
    lp.step().unwrap();
    assert_eq!(lp.matrix().get(0, 0), 5.0);
    assert_eq!(lp.matrix().get(1, 1), 3.0);
    assert_eq!(lp.step().unwrap(), IterationStatus::Finished);
}

#[test]
fn hold_off_delays_first_correction_after_recovery() {
    let p = plant(&["rb"], vec![1.0], &["c1"], &[0.0]);
    p.script("t", [12.0, 5.0]);
    let clock = ManualClock::new();
    let mut test = TestSpec::new("t", 0.0, 10.0);
    test.hold_off = secs(3);
    let mut lp = builder(&p, matrix(&["c1"], &["rb"], vec![1.0]), integral(1.0), &clock)
        .with_tests(vec![test])
        .build()
        .unwrap();

    assert_eq!(
        lp.step().unwrap(),
        IterationStatus::Skipped(SkipReason::OutOfRange)
    );
    assert_eq!(clock.elapsed(), secs(1));
    assert_eq!(
        lp.step().unwrap(),
        IterationStatus::Skipped(SkipReason::HoldOff)
    );
    // hold-off plus one interval
    assert_eq!(clock.elapsed(), secs(5));
    assert_eq!(p.writes(), 0);

    assert!(matches!(
        lp.step().unwrap(),
        IterationStatus::Corrected { .. }
    ));
    assert_eq!(p.writes(), 1);
    assert_eq!(clock.elapsed(), secs(6));
}

#[test]
fn huge_hold_off_is_an_error_not_a_panic() {
    let p = plant(&["rb"], vec![1.0], &["c1"], &[0.0]);
    p.script("t", [12.0, 5.0]);
    let clock = ManualClock::new();
    let mut test = TestSpec::new("t", 0.0, 10.0);
    test.hold_off = ctrlaw_core::util::secs(1e30);
    let mut lp = builder(&p, matrix(&["c1"], &["rb"], vec![1.0]), integral(1.0), &clock)
        .with_tests(vec![test])
        .build()
        .unwrap();

    lp.step().unwrap();
    let err = lp.step().unwrap_err();
    assert!(matches!(law_error(&err), Some(LawError::State(_))));
    assert_eq!(p.writes(), 0);
}

#[test]
fn huge_interval_reconfiguration_is_an_error_not_a_panic() {
    let p = plant(&["rb"], vec![0.0], &["c1"], &[0.0]);
    let clock = ManualClock::new();
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut lp = builder(&p, matrix(&["c1"], &["rb"], vec![1.0]), integral(1.0), &clock)
        .with_reconfigure(rx)
        .build()
        .unwrap();

    lp.step().unwrap();
    tx.send(Reconfigure::Interval(Duration::MAX)).unwrap();
    let err = lp.step().unwrap_err();
    assert!(matches!(law_error(&err), Some(LawError::State(_))));
}

#[test]
fn short_hold_off_is_raised_to_one_second() {
    let p = plant(&["rb"], vec![1.0], &["c1"], &[0.0]);
    p.script("t", [12.0, 5.0]);
    let clock = ManualClock::new();
    let params = LoopParams {
        interval: Duration::from_millis(100),
        ..integral(1.0)
    };
    let mut lp = builder(&p, matrix(&["c1"], &["rb"], vec![1.0]), params, &clock)
        .with_tests(vec![TestSpec::new("t", 0.0, 10.0)])
        .build()
        .unwrap();

    lp.step().unwrap();
    lp.step().unwrap();
    assert_eq!(clock.elapsed(), Duration::from_millis(1200));
}

#[test]
fn reset_time_restores_initial_setpoints_once() {
    let p = plant(&["rb"], vec![1.0], &["c1"], &[10.0]).with_channel("t", 12.0);
    let clock = ManualClock::new();
    let watchdog = ScriptedLiveness::new(u64::MAX, LivenessStatus::Ok);
    let mut test = TestSpec::new("t", 0.0, 10.0);
    test.reset = secs(2);
    let mut lp = builder(&p, matrix(&["c1"], &["rb"], vec![1.0]), integral(1.0), &clock)
        .with_tests(vec![test])
        .with_liveness(watchdog.clone())
        .build()
        .unwrap();

    for _ in 0..2 {
        lp.step().unwrap();
    }
    assert_eq!(p.writes(), 0);
    lp.step().unwrap();
    assert_eq!(p.writes(), 1);
    assert_eq!(p.channel("c1"), Some(10.0));
    lp.step().unwrap();
    assert_eq!(p.writes(), 1);

    let msgs = watchdog.messages();
    assert!(msgs.iter().any(|(m, s)| m.contains("out of range: t") && *s == Severity::Warning));
    assert!(msgs.iter().any(|(m, _)| m.contains("restored")));
}

#[test]
fn out_of_range_sleeps_the_longest_test_sleep() {
    let p = plant(&["rb"], vec![1.0], &["c1"], &[0.0])
        .with_channel("a", -1.0)
        .with_channel("b", 20.0);
    let clock = ManualClock::new();
    let mut a = TestSpec::new("a", 0.0, 10.0);
    a.sleep = Duration::from_millis(1500);
    let mut b = TestSpec::new("b", 0.0, 10.0);
    b.sleep = secs(3);
    let params = LoopParams {
        ping_interval: secs(10),
        ..integral(1.0)
    };
    let mut lp = builder(&p, matrix(&["c1"], &["rb"], vec![1.0]), params, &clock)
        .with_tests(vec![a, b])
        .build()
        .unwrap();

    lp.step().unwrap();
    assert_eq!(clock.sleeps(), vec![secs(3)]);
}

#[test]
fn trigger_timeout_skips_iteration() {
    let p = plant(&["rb"], vec![1.0], &["c1"], &[0.0]).with_channel("trig", 0.0);
    let clock = ManualClock::new();
    let trigger = TriggerSpec {
        channel: "trig".into(),
        poll: Duration::from_millis(100),
        timeout: Duration::from_millis(500),
    };
    let mut lp = builder(&p, matrix(&["c1"], &["rb"], vec![1.0]), integral(1.0), &clock)
        .with_trigger(trigger)
        .build()
        .unwrap();

    assert_eq!(
        lp.step().unwrap(),
        IterationStatus::Skipped(SkipReason::NoTrigger)
    );
    assert_eq!(clock.elapsed(), Duration::from_millis(500));
    assert_eq!(p.writes(), 0);

    p.set_channel("trig", 1.0);
    assert!(matches!(lp.step().unwrap(), IterationStatus::Corrected { .. }));
    assert_eq!(p.writes(), 1);
}

#[test]
fn action_limit_skips_small_errors() {
    let p = plant(&["rb"], vec![0.05], &["c1"], &[0.0]);
    let clock = ManualClock::new();
    let sink = MemorySink::new();
    let params = LoopParams {
        action_limit: Some(0.1),
        ..integral(1.0)
    };
    let mut lp = builder(&p, matrix(&["c1"], &["rb"], vec![1.0]), params, &clock)
        .with_sink(sink.clone())
        .build()
        .unwrap();

    assert_eq!(
        lp.step().unwrap(),
        IterationStatus::Skipped(SkipReason::ActionLimit)
    );
    assert_eq!(p.writes(), 0);
    let rec = &sink.records()[0];
    assert!(rec.skipped);
    assert_eq!(sink.stats().len(), 1);
}

#[test]
fn dry_run_computes_but_never_writes() {
    let p = plant(&["rb"], vec![2.0], &["c1"], &[1.0]);
    let clock = ManualClock::new();
    let sink = MemorySink::new();
    let params = LoopParams {
        dry_run: true,
        ..integral(1.0)
    };
    let mut lp = builder(&p, matrix(&["c1"], &["rb"], vec![1.0]), params, &clock)
        .with_sink(sink.clone())
        .build()
        .unwrap();

    lp.step().unwrap();
    lp.step().unwrap();
    assert_eq!(p.writes(), 0);
    assert_eq!(p.channel("c1"), Some(1.0));
    let recs = sink.records();
    assert_eq!(recs[1].controls, vec![-3.0]);
    assert!(!recs[1].skipped);
}

#[test]
fn statistics_follow_update_interval() {
    let p = plant(&["rb"], vec![2.0], &["c1"], &[1.0]);
    let clock = ManualClock::new();
    let sink = MemorySink::new();
    let params = LoopParams {
        update_interval: 2,
        ..integral(1.0)
    };
    let mut lp = builder(&p, matrix(&["c1"], &["rb"], vec![1.0]), params, &clock)
        .with_sink(sink.clone())
        .build()
        .unwrap();

    for _ in 0..5 {
        lp.step().unwrap();
    }
    let steps: Vec<u64> = sink.stats().iter().map(|s| s.step).collect();
    assert_eq!(steps, vec![2, 4]);
    assert_eq!(sink.stats()[0].readback.rms, 2.0);
}

#[test]
fn records_carry_elapsed_time() {
    let p = plant(&["rb"], vec![0.0], &["c1"], &[0.0]);
    let clock = ManualClock::new();
    let sink = MemorySink::new();
    let mut lp = builder(&p, matrix(&["c1"], &["rb"], vec![1.0]), integral(1.0), &clock)
        .with_sink(sink.clone())
        .build()
        .unwrap();

    lp.step().unwrap();
    lp.step().unwrap();
    let recs = sink.records();
    assert_eq!(recs[0].elapsed_time, 0.0);
    assert_eq!(recs[1].elapsed_time, 1.0);
    assert!((recs[1].epoch_time - recs[0].epoch_time - 1.0).abs() < 1e-6);
}
