//! Plain data handed to a `DiagnosticsSink`.

/// One row of the time-series output.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationRecord {
    pub step: u64,
    /// Seconds since the Unix epoch.
    pub epoch_time: f64,
    /// Seconds since the run started.
    pub elapsed_time: f64,
    pub readbacks: Vec<f64>,
    /// Setpoints as written (or as they would have been written in a dry run).
    pub controls: Vec<f64>,
    pub tests: Option<Vec<f64>>,
    /// True when the correction was skipped this iteration.
    pub skipped: bool,
    /// Scale applied by the delta limiter (1.0 when nothing was limited).
    pub limit_factor: f64,
}

/// Summary statistics over one vector of channel values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChannelStats {
    pub rms: f64,
    pub mean: f64,
    /// Mean absolute deviation from `mean`.
    pub mad: f64,
    /// Value with the largest magnitude (sign preserved).
    pub largest: f64,
    pub largest_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsRecord {
    pub step: u64,
    pub elapsed_time: f64,
    pub readback: ChannelStats,
    pub readback_delta: ChannelStats,
    pub control: ChannelStats,
    pub control_delta: ChannelStats,
}

/// Entry of the glitch ring.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub step: u64,
    pub elapsed_time: f64,
    pub readbacks: Vec<f64>,
    pub controls: Vec<f64>,
}
