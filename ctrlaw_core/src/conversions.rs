//! `From` implementations bridging `ctrlaw_config` types to `ctrlaw_core` types.
//!
//! `builder_from_loaded` assembles a builder from a whole loaded configuration, so the
//! CLI only has to add the provider, the sink and the watchdog.

use std::time::Duration;

use crate::builder::{ControlLoopBuilder, DynControlLoop, Missing, Set};
use crate::compensation::CompensationSpec;
use crate::config::{
    AverageSpec, DespikeParams, GlitchSpec, LiveBindings, LoopParams, RampSpec, TriggerSpec,
};
use crate::error::{BuildError, Result};
use crate::filter::FilterCoefficients;
use crate::limiter::Window;
use crate::matrix::CorrectionMatrix;
use crate::range_test::{TestSpec, WaveformPoint, WaveformTest};
use crate::util::secs;

// ── Loop ─────────────────────────────────────────────────────────────────────

impl From<&ctrlaw_config::LoopCfg> for LoopParams {
    fn from(c: &ctrlaw_config::LoopCfg) -> Self {
        Self {
            gain: c.gain,
            interval: secs(c.interval_s),
            steps: c.steps,
            update_interval: c.update_interval,
            integral: c.integral,
            hold_present_values: c.hold_present_values,
            dry_run: c.dry_run,
            action_limit: c.action_limit,
            ping_interval: secs(c.ping_interval_s),
            io_timeout: Duration::from_millis(c.io_timeout_ms),
            backoff_cap: c.backoff_cap,
        }
    }
}

impl From<&ctrlaw_config::AverageCfg> for AverageSpec {
    fn from(c: &ctrlaw_config::AverageCfg) -> Self {
        Self {
            n: c.n,
            interval: secs(c.interval_s),
        }
    }
}

// ── Despike ──────────────────────────────────────────────────────────────────

impl From<&ctrlaw_config::DespikeCfg> for DespikeParams {
    fn from(c: &ctrlaw_config::DespikeCfg) -> Self {
        Self {
            neighbors: c.neighbors,
            passes: c.passes,
            average_of: c.average_of,
            threshold: c.threshold,
            count_limit: c.count_limit,
        }
    }
}

/// The threshold ramp, when all three ramp fields are present.
pub fn ramp_from(c: &ctrlaw_config::DespikeCfg) -> Option<RampSpec> {
    match (c.start_threshold, c.end_threshold, c.steps_threshold) {
        (Some(start), Some(end), Some(steps)) => Some(RampSpec { start, end, steps }),
        _ => None,
    }
}

// ── Tables ───────────────────────────────────────────────────────────────────

impl TryFrom<&ctrlaw_config::MatrixTable> for CorrectionMatrix {
    type Error = BuildError;

    fn try_from(t: &ctrlaw_config::MatrixTable) -> std::result::Result<Self, Self::Error> {
        Self::new(t.rows.clone(), t.cols.clone(), t.values.clone())
    }
}

impl From<&ctrlaw_config::FilterTable> for FilterCoefficients {
    fn from(t: &ctrlaw_config::FilterTable) -> Self {
        Self {
            channels: t.channels.clone(),
            a: t.a.clone(),
            b: t.b.clone(),
        }
    }
}

impl From<&ctrlaw_config::TestRow> for TestSpec {
    fn from(r: &ctrlaw_config::TestRow) -> Self {
        Self {
            channel: r.channel.clone(),
            min: r.min,
            max: r.max,
            sleep: r.sleep_time.map_or(Duration::ZERO, secs),
            reset: r.reset_time.map_or(Duration::ZERO, secs),
            hold_off: r.hold_off_time.map_or(Duration::ZERO, secs),
            despike: r.despike(),
            glitch_log: r.glitch_log(),
        }
    }
}

/// Group waveform rows by waveform, in order of first appearance.
pub fn group_waveform_tests(rows: &[ctrlaw_config::WaveformTestRow]) -> Vec<WaveformTest> {
    let mut out: Vec<WaveformTest> = Vec::new();
    for r in rows {
        let point = WaveformPoint {
            index: r.index,
            min: r.min,
            max: r.max,
            sleep: r.sleep_time.map_or(Duration::ZERO, secs),
            hold_off: r.hold_off_time.map_or(Duration::ZERO, secs),
        };
        match out.iter_mut().find(|w| w.waveform == r.waveform) {
            Some(w) => w.points.push(point),
            None => out.push(WaveformTest {
                waveform: r.waveform.clone(),
                points: vec![point],
            }),
        }
    }
    out
}

impl From<&ctrlaw_config::WindowRow> for Window {
    fn from(r: &ctrlaw_config::WindowRow) -> Self {
        Self {
            min: r.min,
            max: r.max,
        }
    }
}

// ── Optional sections ────────────────────────────────────────────────────────

impl From<&ctrlaw_config::GlitchCfg> for GlitchSpec {
    fn from(c: &ctrlaw_config::GlitchCfg) -> Self {
        Self {
            rows: c.rows,
            readback_rms: c.readback_rms,
            control_rms: c.control_rms,
        }
    }
}

impl From<&ctrlaw_config::TriggerCfg> for TriggerSpec {
    fn from(c: &ctrlaw_config::TriggerCfg) -> Self {
        Self {
            channel: c.channel.clone(),
            poll: secs(c.poll_s),
            timeout: secs(c.timeout_s),
        }
    }
}

impl From<&ctrlaw_config::LiveCfg> for LiveBindings {
    fn from(c: &ctrlaw_config::LiveCfg) -> Self {
        Self {
            gain: c.gain_channel.clone(),
            compensation_gain: c.compensation_gain_channel.clone(),
            threshold: c.threshold_channel.clone(),
            ramp_trigger: c.ramp_trigger_channel.clone(),
        }
    }
}

/// A builder carrying everything `loaded` describes; the provider is still missing.
pub fn builder_from_loaded(loaded: &ctrlaw_config::Loaded) -> Result<ControlLoopBuilder<Missing, Set>> {
    let cfg = &loaded.config;
    let t = &loaded.tables;

    let mut b = DynControlLoop::builder()
        .with_matrix(CorrectionMatrix::try_from(&t.matrix)?)
        .with_params(LoopParams::from(&cfg.control))
        .with_average(AverageSpec::from(&cfg.average))
        .with_global_delta_limit(cfg.control.delta_limit)
        .with_delta_limits(t.delta_limits.iter().map(|r| (r.channel.clone(), r.limit)).collect())
        .with_readback_limits(
            t.readback_limits
                .iter()
                .map(|r| (r.channel.clone(), Window::from(r)))
                .collect(),
        )
        .with_control_limits(
            t.control_limits
                .iter()
                .map(|r| (r.channel.clone(), Window::from(r)))
                .collect(),
        )
        .with_tests(t.tests.iter().map(TestSpec::from).collect())
        .with_waveform_tests(group_waveform_tests(&t.waveform_tests))
        .with_glitch(GlitchSpec::from(&cfg.glitch))
        .with_live(LiveBindings::from(&cfg.live));

    if let Some(f) = t.filter.as_ref() {
        b = b.with_filter(FilterCoefficients::from(f));
    }
    if cfg.despike.is_enabled(&cfg.live) {
        b = b
            .with_despike(DespikeParams::from(&cfg.despike), ramp_from(&cfg.despike))
            .with_despike_selection(
                t.despike
                    .iter()
                    .map(|r| (r.channel.clone(), r.despike != 0))
                    .collect(),
            );
    }
    if let Some(tr) = cfg.trigger.as_ref() {
        b = b.with_trigger(TriggerSpec::from(tr));
    }
    if let (Some(c), Some(m)) = (cfg.compensation.as_ref(), t.compensation_matrix.as_ref()) {
        b = b.with_compensation(CompensationSpec {
            matrix: CorrectionMatrix::try_from(m)?,
            filter: t.compensation_filter.as_ref().map(FilterCoefficients::from),
            gain: c.gain,
            integral: c.integral,
        });
    }
    Ok(b)
}
