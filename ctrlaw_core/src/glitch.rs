use std::collections::VecDeque;

use ctrlaw_traits::Snapshot;

use crate::config::GlitchSpec;
use crate::range_test::Failure;

/// The last `capacity` snapshots, oldest first.
#[derive(Debug, Clone)]
pub struct GlitchBuffer {
    rows: VecDeque<Snapshot>,
    capacity: usize,
}

impl GlitchBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            rows: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push(&mut self, s: Snapshot) {
        if self.capacity == 0 {
            return;
        }
        if self.rows.len() == self.capacity {
            self.rows.pop_front();
        }
        self.rows.push_back(s);
    }

    /// Drain the buffer, oldest first.
    pub fn take(&mut self) -> Vec<Snapshot> {
        self.rows.drain(..).collect()
    }
}

/// A glitch is an RMS above its threshold or a failing test marked for glitch logging.
pub fn is_glitch(spec: &GlitchSpec, readback_rms: f64, control_rms: f64, failures: &[Failure]) -> bool {
    (spec.readback_rms > 0.0 && readback_rms > spec.readback_rms)
        || (spec.control_rms > 0.0 && control_rms > spec.control_rms)
        || failures.iter().any(|f| f.glitch_log)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(step: u64) -> Snapshot {
        Snapshot {
            step,
            elapsed_time: step as f64,
            readbacks: vec![],
            controls: vec![],
        }
    }

    #[test]
    fn keeps_last_rows() {
        let mut g = GlitchBuffer::new(3);
        for s in 1..=5 {
            g.push(snap(s));
        }
        let steps: Vec<u64> = g.take().iter().map(|s| s.step).collect();
        assert_eq!(steps, vec![3, 4, 5]);
        assert!(g.is_empty());
    }

    #[test]
    fn disabled_buffer_stays_empty() {
        let mut g = GlitchBuffer::new(0);
        g.push(snap(1));
        assert!(g.is_empty() && !g.is_enabled());
    }

    #[test]
    fn glitch_conditions() {
        let spec = GlitchSpec {
            rows: 4,
            readback_rms: 2.0,
            control_rms: 0.0,
        };
        assert!(!is_glitch(&spec, 1.9, 100.0, &[]));
        assert!(is_glitch(&spec, 2.1, 0.0, &[]));
    }
}
