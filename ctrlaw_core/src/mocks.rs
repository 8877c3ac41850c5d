//! Stand-ins used when the builder is not given a sink or a watchdog.

use ctrlaw_traits::{
    DiagnosticsSink, IterationRecord, Liveness, LivenessStatus, Severity, Snapshot, StatsRecord,
};

/// Discards all diagnostics.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticsSink for NullSink {
    fn record(&mut self, _: &IterationRecord) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }

    fn statistics(&mut self, _: &StatsRecord) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }

    fn glitch(&mut self, _: &[Snapshot]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

/// No supervising watchdog: pings always succeed, messages go to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWatchdog;

impl Liveness for NoWatchdog {
    fn ping(&mut self) -> LivenessStatus {
        LivenessStatus::Ok
    }

    fn log_message(&mut self, text: &str, severity: Severity) {
        match severity {
            Severity::Error => tracing::error!(text, "watchdog message"),
            Severity::Warning => tracing::warn!(text, "watchdog message"),
            Severity::Info => tracing::info!(text, "watchdog message"),
        }
    }
}
