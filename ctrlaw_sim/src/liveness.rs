//! Watchdog doubles.

use ctrlaw_traits::{Liveness, LivenessStatus, Severity};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Watchdog that always answers `Ok` and counts pings.
#[derive(Debug, Clone, Default)]
pub struct AlwaysAlive {
    pings: Arc<AtomicU64>,
}

impl AlwaysAlive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pings(&self) -> u64 {
        self.pings.load(Ordering::Relaxed)
    }
}

impl Liveness for AlwaysAlive {
    fn ping(&mut self) -> LivenessStatus {
        self.pings.fetch_add(1, Ordering::Relaxed);
        LivenessStatus::Ok
    }

    fn log_message(&mut self, text: &str, severity: Severity) {
        tracing::debug!(?severity, text, "liveness message");
    }
}

/// Watchdog that answers `Ok` for a fixed number of pings, then a chosen status forever.
#[derive(Debug, Clone)]
pub struct ScriptedLiveness {
    ok_pings: u64,
    then: LivenessStatus,
    pings: Arc<AtomicU64>,
    messages: Arc<std::sync::Mutex<Vec<(String, Severity)>>>,
}

impl ScriptedLiveness {
    pub fn new(ok_pings: u64, then: LivenessStatus) -> Self {
        Self {
            ok_pings,
            then,
            pings: Arc::new(AtomicU64::new(0)),
            messages: Arc::default(),
        }
    }

    pub fn abort_after(ok_pings: u64) -> Self {
        Self::new(ok_pings, LivenessStatus::Abort)
    }

    pub fn timeout_after(ok_pings: u64) -> Self {
        Self::new(ok_pings, LivenessStatus::Timeout)
    }

    pub fn pings(&self) -> u64 {
        self.pings.load(Ordering::Relaxed)
    }

    /// Messages passed to `log_message`, in order.
    pub fn messages(&self) -> Vec<(String, Severity)> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

impl Liveness for ScriptedLiveness {
    fn ping(&mut self) -> LivenessStatus {
        let n = self.pings.fetch_add(1, Ordering::Relaxed);
        if n < self.ok_pings {
            LivenessStatus::Ok
        } else {
            self.then
        }
    }

    fn log_message(&mut self, text: &str, severity: Severity) {
        if let Ok(mut m) = self.messages.lock() {
            m.push((text.to_string(), severity));
        }
    }
}
