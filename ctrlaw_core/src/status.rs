//! Outcome of one iteration of the control loop.

/// Why an iteration wrote nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A range test failed.
    OutOfRange,
    /// First iteration back in range; correction resumes after the hold-off.
    HoldOff,
    /// Every |error| was below the action limit.
    ActionLimit,
    /// The trigger channel never fired within its timeout.
    NoTrigger,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IterationStatus {
    /// Setpoints were computed (and written unless dry-run); `factor` is the delta limiter scale.
    Corrected { factor: f64 },
    Skipped(SkipReason),
    /// The configured number of steps has run.
    Finished,
}

/// Totals for a finished run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunSummary {
    pub steps: u64,
    pub skipped: u64,
    pub out_of_range: u64,
    pub glitches: u64,
    /// Last computed primary setpoints.
    pub final_control: Vec<f64>,
}
