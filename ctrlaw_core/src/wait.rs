//! Interruptible waiting with liveness pings.
//!
//! Every suspension point of the loop goes through `Pacer::wait`, which sleeps in
//! slices no longer than the ping interval, pings the watchdog when due, and
//! checks the cancellation flag between slices.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use ctrlaw_traits::{Clock, Liveness, LivenessStatus, Severity};

use crate::error::LawError;

pub struct Pacer {
    clock: Arc<dyn Clock + Send + Sync>,
    liveness: Box<dyn Liveness + Send>,
    cancel: Arc<AtomicBool>,
    ping_interval: Duration,
    last_ping: Option<Instant>,
}

impl std::fmt::Debug for Pacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pacer")
            .field("ping_interval", &self.ping_interval)
            .field("last_ping", &self.last_ping)
            .field("cancelled", &self.cancel.load(Ordering::Relaxed))
            .finish()
    }
}

impl Pacer {
    pub fn new(
        clock: Arc<dyn Clock + Send + Sync>,
        liveness: Box<dyn Liveness + Send>,
        cancel: Arc<AtomicBool>,
        ping_interval: Duration,
    ) -> Self {
        Self {
            clock,
            liveness,
            cancel,
            ping_interval: ping_interval.max(Duration::from_millis(1)),
            last_ping: None,
        }
    }

    #[inline]
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    pub fn clock(&self) -> &Arc<dyn Clock + Send + Sync> {
        &self.clock
    }

    pub fn check_cancel(&self) -> Result<(), LawError> {
        if self.cancel.load(Ordering::Relaxed) {
            Err(LawError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Ping unconditionally. Anything but `Ok` is fatal.
    pub fn ping(&mut self) -> Result<(), LawError> {
        let status = self.liveness.ping();
        self.last_ping = Some(self.clock.now());
        match status {
            LivenessStatus::Ok => Ok(()),
            other => {
                tracing::error!(status = %other, "liveness ping failed");
                Err(LawError::Liveness(other))
            }
        }
    }

    pub fn ping_if_due(&mut self) -> Result<(), LawError> {
        match self.last_ping {
            Some(t) if self.clock.now().saturating_duration_since(t) < self.ping_interval => Ok(()),
            _ => self.ping(),
        }
    }

    /// Forward a message to the watchdog's log.
    pub fn log_message(&mut self, text: &str, severity: Severity) {
        self.liveness.log_message(text, severity);
    }

    /// Block for `d`, pinging at least once per ping interval.
    pub fn wait(&mut self, d: Duration) -> Result<(), LawError> {
        let start = self.clock.now();
        let end = start
            .checked_add(d)
            .ok_or_else(|| LawError::State(format!("wait of {d:?} overflows the clock")))?;
        loop {
            self.check_cancel()?;
            self.ping_if_due()?;
            let now = self.clock.now();
            if now >= end {
                return Ok(());
            }
            let until_ping = match self.last_ping {
                Some(t) => self
                    .ping_interval
                    .saturating_sub(now.saturating_duration_since(t)),
                None => self.ping_interval,
            };
            let slice = (end - now).min(until_ping.max(Duration::from_millis(1)));
            tracing::trace!(slice_ms = slice.as_millis() as u64, "wait slice");
            self.clock.sleep(slice);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctrlaw_sim::{AlwaysAlive, ScriptedLiveness};
    use ctrlaw_traits::clock::ManualClock;

    fn pacer(clock: &ManualClock, l: impl Liveness + Send + 'static) -> (Pacer, Arc<AtomicBool>) {
        let cancel = Arc::new(AtomicBool::new(false));
        let p = Pacer::new(
            Arc::new(clock.clone()),
            Box::new(l),
            cancel.clone(),
            Duration::from_secs(2),
        );
        (p, cancel)
    }

    #[test]
    fn long_wait_interleaves_pings() {
        let clock = ManualClock::new();
        let alive = AlwaysAlive::new();
        let (mut p, _) = pacer(&clock, alive.clone());
        p.wait(Duration::from_secs(5)).unwrap();
        assert_eq!(
            clock.sleeps(),
            vec![
                Duration::from_secs(2),
                Duration::from_secs(2),
                Duration::from_secs(1)
            ]
        );
        assert_eq!(alive.pings(), 3);
        assert_eq!(clock.elapsed(), Duration::from_secs(5));
    }

    #[test]
    fn short_waits_do_not_ping_every_time() {
        let clock = ManualClock::new();
        let alive = AlwaysAlive::new();
        let (mut p, _) = pacer(&clock, alive.clone());
        for _ in 0..4 {
            p.wait(Duration::from_millis(500)).unwrap();
        }
        // pings at t=0 and t=2s
        assert_eq!(alive.pings(), 2);
    }

    #[test]
    fn abort_during_wait_is_fatal() {
        let clock = ManualClock::new();
        let (mut p, _) = pacer(&clock, ScriptedLiveness::abort_after(1));
        let err = p.wait(Duration::from_secs(10)).unwrap_err();
        assert_eq!(err, LawError::Liveness(LivenessStatus::Abort));
        assert_eq!(clock.elapsed(), Duration::from_secs(2));
    }

    #[test]
    fn cancellation_stops_wait() {
        let clock = ManualClock::new();
        let (mut p, cancel) = pacer(&clock, AlwaysAlive::new());
        cancel.store(true, Ordering::Relaxed);
        assert_eq!(p.wait(Duration::from_secs(1)), Err(LawError::Cancelled));
        assert!(clock.sleeps().is_empty());
    }
}
