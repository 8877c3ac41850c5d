//! Seams between the control-law engine and the outside world.
//!
//! The engine never talks to a transport, a watchdog, or a file directly; it goes
//! through the traits in this crate so that simulated plants and test doubles can
//! stand in for the real thing.

pub mod clock;
pub mod record;

pub use clock::{Clock, MonotonicClock};
pub use record::{ChannelStats, IterationRecord, Snapshot, StatsRecord};

use std::time::Duration;

/// Synchronous access to named process values.
///
/// Every call must complete within `timeout` or return an error; the engine treats
/// any error from a provider as fatal.
pub trait ValueProvider {
    /// Read one scalar per name, in the same order.
    fn read(
        &mut self,
        names: &[String],
        timeout: Duration,
    ) -> Result<Vec<f64>, Box<dyn std::error::Error + Send + Sync>>;

    /// Write one scalar per name, in the same order.
    fn write(
        &mut self,
        names: &[String],
        values: &[f64],
        timeout: Duration,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Read an array-valued channel (waveform).
    fn read_array(
        &mut self,
        name: &str,
        timeout: Duration,
    ) -> Result<Vec<f64>, Box<dyn std::error::Error + Send + Sync>>;
}

impl<T: ValueProvider + ?Sized> ValueProvider for Box<T> {
    fn read(
        &mut self,
        names: &[String],
        timeout: Duration,
    ) -> Result<Vec<f64>, Box<dyn std::error::Error + Send + Sync>> {
        (**self).read(names, timeout)
    }

    fn write(
        &mut self,
        names: &[String],
        values: &[f64],
        timeout: Duration,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).write(names, values, timeout)
    }

    fn read_array(
        &mut self,
        name: &str,
        timeout: Duration,
    ) -> Result<Vec<f64>, Box<dyn std::error::Error + Send + Sync>> {
        (**self).read_array(name, timeout)
    }
}

/// Answer from the supervising watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessStatus {
    Ok,
    Abort,
    Timeout,
    Error,
}

impl std::fmt::Display for LivenessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LivenessStatus::Ok => "ok",
            LivenessStatus::Abort => "abort",
            LivenessStatus::Timeout => "timeout",
            LivenessStatus::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Heartbeat to a supervising watchdog.
pub trait Liveness {
    fn ping(&mut self) -> LivenessStatus;
    fn log_message(&mut self, text: &str, severity: Severity);
}

/// Receiver of per-iteration diagnostics (persistence lives behind this).
pub trait DiagnosticsSink {
    fn record(
        &mut self,
        record: &IterationRecord,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    fn statistics(
        &mut self,
        stats: &StatsRecord,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Dump of the buffered snapshots, oldest first.
    fn glitch(
        &mut self,
        snapshots: &[Snapshot],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}
