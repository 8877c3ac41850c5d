#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Configuration schema and table parsing for the correction loop.
//!
//! - `Config` and its sections are deserialized from TOML and validated.
//! - Tables (correction matrix, IIR filter, range tests, limits, despike selection)
//!   are CSV files referenced from `[tables]`, resolved relative to the config file.
//! - `load_config` does both and cross-checks channel names between tables.

pub mod loader;
pub mod tables;

pub use loader::{Loaded, Tables, load_config, load_tables};
pub use tables::{
    DespikeRow, FilterTable, LimitRow, MatrixTable, TestRow, WaveformTestRow, WindowRow,
};

use serde::Deserialize;
use std::collections::BTreeMap;

fn default_one_u64() -> u64 {
    1
}
fn default_ping_interval_s() -> f64 {
    2.0
}
fn default_io_timeout_ms() -> u64 {
    1000
}
fn default_backoff_cap() -> u32 {
    64
}

/// `[loop]`: cadence, gain and mode of the primary correction law.
#[derive(Debug, Deserialize, Clone)]
pub struct LoopCfg {
    pub gain: f64,
    /// Seconds between corrections.
    pub interval_s: f64,
    /// Number of iterations; 0 runs until cancelled.
    #[serde(default)]
    pub steps: u64,
    /// Emit statistics every this many iterations.
    #[serde(default = "default_one_u64")]
    pub update_interval: u64,
    /// Accumulate onto the present setpoint (true) or recompute from zero each step.
    #[serde(default)]
    pub integral: bool,
    /// Drive readbacks toward their values at start instead of toward zero.
    #[serde(default)]
    pub hold_present_values: bool,
    #[serde(default)]
    pub dry_run: bool,
    /// Skip the correction when every |error| is below this value.
    #[serde(default)]
    pub action_limit: Option<f64>,
    /// Global delta limit used when no delta limit table is given; <= 0 disables.
    #[serde(default)]
    pub delta_limit: f64,
    #[serde(default = "default_ping_interval_s")]
    pub ping_interval_s: f64,
    /// Timeout for every single read or write.
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    /// Largest gap (in out-of-range iterations) between two range log lines.
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AverageCfg {
    /// Samples averaged per acquisition.
    pub n: u32,
    /// Seconds between samples.
    pub interval_s: f64,
}

impl Default for AverageCfg {
    fn default() -> Self {
        Self {
            n: 1,
            interval_s: 0.0,
        }
    }
}

/// `[tables]`: CSV paths, relative to the config file.
#[derive(Debug, Deserialize, Clone)]
pub struct TablesCfg {
    /// Rows are actuators, columns are readbacks.
    pub matrix: String,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub tests: Option<String>,
    #[serde(default)]
    pub waveform_tests: Option<String>,
    #[serde(default)]
    pub delta_limits: Option<String>,
    #[serde(default)]
    pub readback_limits: Option<String>,
    #[serde(default)]
    pub control_limits: Option<String>,
    #[serde(default)]
    pub despike: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DespikeCfg {
    pub neighbors: usize,
    pub passes: usize,
    pub average_of: usize,
    /// 0 disables despiking unless a ramp or threshold channel is configured.
    pub threshold: f64,
    /// Abort a pass that flags more than this many points; 0 means no limit.
    pub count_limit: usize,
    pub start_threshold: Option<f64>,
    pub end_threshold: Option<f64>,
    pub steps_threshold: Option<u32>,
}

impl Default for DespikeCfg {
    fn default() -> Self {
        Self {
            neighbors: 3,
            passes: 1,
            average_of: 2,
            threshold: 0.0,
            count_limit: 0,
            start_threshold: None,
            end_threshold: None,
            steps_threshold: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct GlitchCfg {
    /// Snapshots kept in the glitch ring; 0 disables glitch capture.
    pub rows: usize,
    /// Dump when readback RMS exceeds this; 0 disables.
    pub readback_rms: f64,
    /// Dump when control RMS exceeds this; 0 disables.
    pub control_rms: f64,
}

fn default_trigger_poll_s() -> f64 {
    0.1
}
fn default_trigger_timeout_s() -> f64 {
    10.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct TriggerCfg {
    pub channel: String,
    #[serde(default = "default_trigger_poll_s")]
    pub poll_s: f64,
    #[serde(default = "default_trigger_timeout_s")]
    pub timeout_s: f64,
}

/// `[live]`: channels re-read every iteration that override configured values.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LiveCfg {
    pub gain_channel: Option<String>,
    pub compensation_gain_channel: Option<String>,
    pub threshold_channel: Option<String>,
    pub ramp_trigger_channel: Option<String>,
}

fn default_comp_gain() -> f64 {
    1.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompensationCfg {
    /// Rows are compensation actuators, columns are primary actuators.
    pub matrix: String,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default = "default_comp_gain")]
    pub gain: f64,
    #[serde(default)]
    pub integral: bool,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

/// `[plant]`: the simulated plant driven by `ctrlaw run` when no real transport is wired.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct PlantCfg {
    /// CSV with readback rows and actuator columns.
    pub response: Option<String>,
    pub offsets: BTreeMap<String, f64>,
    pub actuators: BTreeMap<String, f64>,
    /// Extra scalar channels (test values, triggers, live bindings).
    pub channels: BTreeMap<String, f64>,
    pub waveforms: BTreeMap<String, Vec<f64>>,
    pub noise: f64,
    pub seed: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(rename = "loop")]
    pub control: LoopCfg,
    #[serde(default)]
    pub average: AverageCfg,
    pub tables: TablesCfg,
    #[serde(default)]
    pub despike: DespikeCfg,
    #[serde(default)]
    pub glitch: GlitchCfg,
    #[serde(default)]
    pub trigger: Option<TriggerCfg>,
    #[serde(default)]
    pub live: LiveCfg,
    #[serde(default)]
    pub compensation: Option<CompensationCfg>,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub plant: PlantCfg,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

fn finite_nonneg(v: f64) -> bool {
    v.is_finite() && v >= 0.0
}

impl DespikeCfg {
    /// True when any source of a despike threshold is configured.
    pub fn is_enabled(&self, live: &LiveCfg) -> bool {
        self.threshold > 0.0 || self.steps_threshold.is_some() || live.threshold_channel.is_some()
    }
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        let l = &self.control;
        if !l.gain.is_finite() {
            eyre::bail!("loop.gain must be finite");
        }
        if !(l.interval_s.is_finite() && l.interval_s > 0.0) {
            eyre::bail!("loop.interval_s must be > 0");
        }
        if l.interval_s > 24.0 * 60.0 * 60.0 {
            eyre::bail!("loop.interval_s is unreasonably large (>24h)");
        }
        if l.update_interval == 0 {
            eyre::bail!("loop.update_interval must be >= 1");
        }
        if let Some(a) = l.action_limit
            && !finite_nonneg(a)
        {
            eyre::bail!("loop.action_limit must be >= 0");
        }
        if !l.delta_limit.is_finite() {
            eyre::bail!("loop.delta_limit must be finite");
        }
        if !(l.ping_interval_s.is_finite() && l.ping_interval_s > 0.0) {
            eyre::bail!("loop.ping_interval_s must be > 0");
        }
        if l.io_timeout_ms == 0 {
            eyre::bail!("loop.io_timeout_ms must be >= 1");
        }
        if l.backoff_cap == 0 {
            eyre::bail!("loop.backoff_cap must be >= 1");
        }

        if self.average.n == 0 {
            eyre::bail!("average.n must be >= 1");
        }
        if !finite_nonneg(self.average.interval_s) {
            eyre::bail!("average.interval_s must be >= 0");
        }

        let d = &self.despike;
        if d.neighbors == 0 {
            eyre::bail!("despike.neighbors must be >= 1");
        }
        if d.passes == 0 {
            eyre::bail!("despike.passes must be >= 1");
        }
        if d.average_of == 0 {
            eyre::bail!("despike.average_of must be >= 1");
        }
        if !d.threshold.is_finite() {
            eyre::bail!("despike.threshold must be finite");
        }
        match (d.start_threshold, d.end_threshold, d.steps_threshold) {
            (None, None, None) => {}
            (Some(s), Some(e), Some(n)) => {
                if !(s.is_finite() && e.is_finite()) {
                    eyre::bail!("despike ramp thresholds must be finite");
                }
                if n == 0 {
                    eyre::bail!("despike.steps_threshold must be >= 1");
                }
            }
            _ => eyre::bail!(
                "despike ramp needs start_threshold, end_threshold and steps_threshold together"
            ),
        }

        let g = &self.glitch;
        if !finite_nonneg(g.readback_rms) || !finite_nonneg(g.control_rms) {
            eyre::bail!("glitch thresholds must be >= 0");
        }

        if let Some(t) = &self.trigger {
            if t.channel.trim().is_empty() {
                eyre::bail!("trigger.channel must not be empty");
            }
            if !(t.poll_s.is_finite() && t.poll_s > 0.0) {
                eyre::bail!("trigger.poll_s must be > 0");
            }
            if !(t.timeout_s.is_finite() && t.timeout_s > 0.0) {
                eyre::bail!("trigger.timeout_s must be > 0");
            }
        }

        if let Some(c) = &self.compensation
            && !c.gain.is_finite()
        {
            eyre::bail!("compensation.gain must be finite");
        }
        if self.live.compensation_gain_channel.is_some() && self.compensation.is_none() {
            eyre::bail!("live.compensation_gain_channel requires a [compensation] section");
        }

        if let Some(r) = self.logging.rotation.as_deref()
            && !matches!(r, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never, daily, hourly (got {r})");
        }

        if !finite_nonneg(self.plant.noise) {
            eyre::bail!("plant.noise must be >= 0");
        }

        Ok(())
    }
}
