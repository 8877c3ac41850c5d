//! Runtime parameter types for the control loop.
//!
//! These are separate from the TOML-deserialized config in `ctrlaw_config`;
//! see `conversions` for the mapping.

use std::time::Duration;

/// Loop cadence, gain and mode.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopParams {
    pub gain: f64,
    /// Time between corrections.
    pub interval: Duration,
    /// Iterations to run; 0 runs until cancelled.
    pub steps: u64,
    /// Statistics are emitted every `update_interval` iterations.
    pub update_interval: u64,
    /// Accumulate onto the present setpoint instead of recomputing from zero.
    pub integral: bool,
    /// Error is measured from the readbacks' values at start instead of from zero.
    pub hold_present_values: bool,
    /// Compute and record everything but never write setpoints.
    pub dry_run: bool,
    /// Skip the correction when every |error| is below this.
    pub action_limit: Option<f64>,
    /// Liveness is pinged at least this often while the loop blocks.
    pub ping_interval: Duration,
    /// Timeout for every provider call.
    pub io_timeout: Duration,
    /// Largest gap, in out-of-range iterations, between range log lines.
    pub backoff_cap: u32,
}

impl Default for LoopParams {
    fn default() -> Self {
        Self {
            gain: 1.0,
            interval: Duration::from_secs(1),
            steps: 0,
            update_interval: 1,
            integral: false,
            hold_present_values: false,
            dry_run: false,
            action_limit: None,
            ping_interval: Duration::from_secs(2),
            io_timeout: Duration::from_secs(1),
            backoff_cap: 64,
        }
    }
}

/// Readback averaging: `n` reads spaced `interval` apart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AverageSpec {
    pub n: u32,
    pub interval: Duration,
}

impl Default for AverageSpec {
    fn default() -> Self {
        Self {
            n: 1,
            interval: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DespikeParams {
    /// Points considered on each side of a candidate.
    pub neighbors: usize,
    pub passes: usize,
    /// Unflagged points averaged to replace a spike.
    pub average_of: usize,
    /// Deviation above which a point is a spike; <= 0 disables despiking.
    pub threshold: f64,
    /// A pass flagging more than this many points leaves the data untouched; 0 = no limit.
    pub count_limit: usize,
}

impl Default for DespikeParams {
    fn default() -> Self {
        Self {
            neighbors: 3,
            passes: 1,
            average_of: 2,
            threshold: 0.0,
            count_limit: 0,
        }
    }
}

/// Linear ramp of the despike threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampSpec {
    pub start: f64,
    pub end: f64,
    pub steps: u32,
}

/// Wait for a non-zero trigger channel before each acquisition.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerSpec {
    pub channel: String,
    pub poll: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GlitchSpec {
    /// Snapshots kept; 0 disables glitch capture.
    pub rows: usize,
    /// Flush when readback RMS exceeds this; 0 disables.
    pub readback_rms: f64,
    /// Flush when setpoint RMS exceeds this; 0 disables.
    pub control_rms: f64,
}

/// Channels re-read every iteration whose values override configured parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LiveBindings {
    pub gain: Option<String>,
    pub compensation_gain: Option<String>,
    pub threshold: Option<String>,
    /// Rising edge (zero to non-zero) re-arms the threshold ramp.
    pub ramp_trigger: Option<String>,
}

impl LiveBindings {
    pub fn is_empty(&self) -> bool {
        self.gain.is_none()
            && self.compensation_gain.is_none()
            && self.threshold.is_none()
            && self.ramp_trigger.is_none()
    }
}
