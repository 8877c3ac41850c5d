//! Spike removal on a selected subset of channels, and the threshold ramp.

use crate::config::{DespikeParams, RampSpec};

/// Spike removal strategy over a packed vector.
pub trait Despike {
    /// Replace spikes in `data` in place; returns the number of points replaced.
    fn despike(&self, data: &mut [f64], params: &DespikeParams) -> usize;
}

/// Neighbour-window despiker.
///
/// Each pass flags points whose distance from the mean of up to `neighbors` points on
/// either side exceeds `threshold`, then replaces every flagged point with the mean of
/// its `average_of` nearest unflagged points. A pass flagging more than `count_limit`
/// points (when non-zero) abandons the whole run and leaves the data untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeighborDespiker;

impl NeighborDespiker {
    fn flag(work: &[f64], neighbors: usize, threshold: f64) -> Vec<bool> {
        let n = work.len();
        (0..n)
            .map(|i| {
                let lo = i.saturating_sub(neighbors);
                let hi = (i + neighbors).min(n - 1);
                let (sum, count) = (lo..=hi)
                    .filter(|&j| j != i)
                    .fold((0.0, 0usize), |(s, c), j| (s + work[j], c + 1));
                count > 0 && (work[i] - sum / count as f64).abs() > threshold
            })
            .collect()
    }

    fn replacement(work: &[f64], flagged: &[bool], i: usize, average_of: usize) -> Option<f64> {
        let n = work.len();
        let mut picked = 0usize;
        let mut sum = 0.0;
        // Walk outward, lower index first on ties.
        for dist in 1..n {
            for j in [i.checked_sub(dist), Some(i + dist).filter(|&j| j < n)]
                .into_iter()
                .flatten()
            {
                if !flagged[j] {
                    sum += work[j];
                    picked += 1;
                    if picked == average_of {
                        return Some(sum / picked as f64);
                    }
                }
            }
        }
        (picked > 0).then(|| sum / picked as f64)
    }
}

impl Despike for NeighborDespiker {
    fn despike(&self, data: &mut [f64], params: &DespikeParams) -> usize {
        if params.threshold <= 0.0 || data.len() < 2 {
            return 0;
        }
        let mut work = data.to_vec();
        let mut replaced = 0;
        for pass in 0..params.passes.max(1) {
            let flagged = Self::flag(&work, params.neighbors.max(1), params.threshold);
            let count = flagged.iter().filter(|f| **f).count();
            if count == 0 {
                break;
            }
            if params.count_limit > 0 && count > params.count_limit {
                tracing::debug!(pass, count, limit = params.count_limit, "despike count limit exceeded");
                return 0;
            }
            let mut next = work.clone();
            for i in (0..work.len()).filter(|&i| flagged[i]) {
                if let Some(v) = Self::replacement(&work, &flagged, i, params.average_of.max(1)) {
                    next[i] = v;
                    replaced += 1;
                }
            }
            work = next;
        }
        data.copy_from_slice(&work);
        replaced
    }
}

/// Despike only the channels with `mask[i]` set; the rest are never touched.
pub fn despike_masked(
    despiker: &dyn Despike,
    values: &mut [f64],
    mask: &[bool],
    params: &DespikeParams,
) -> usize {
    if params.threshold <= 0.0 {
        return 0;
    }
    let idx: Vec<usize> = (0..values.len()).filter(|&i| mask.get(i) == Some(&true)).collect();
    if idx.is_empty() {
        return 0;
    }
    let mut packed: Vec<f64> = idx.iter().map(|&i| values[i]).collect();
    let n = despiker.despike(&mut packed, params);
    for (&i, v) in idx.iter().zip(packed) {
        values[i] = v;
    }
    n
}

/// Linear ramp of the despike threshold, frozen once it reaches its end value.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdRamp {
    start: f64,
    end: f64,
    delta: f64,
    current: f64,
    frozen: bool,
}

impl ThresholdRamp {
    pub fn new(spec: RampSpec) -> Self {
        if spec.steps <= 1 || spec.start == spec.end {
            return Self {
                start: spec.start,
                end: spec.end,
                delta: 0.0,
                current: spec.end,
                frozen: true,
            };
        }
        Self {
            start: spec.start,
            end: spec.end,
            delta: (spec.end - spec.start) / f64::from(spec.steps - 1),
            current: spec.start,
            frozen: false,
        }
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Step toward the end value and return the new threshold.
    pub fn advance(&mut self) -> f64 {
        if self.frozen {
            return self.current;
        }
        self.current += self.delta;
        let reached = if self.delta < 0.0 {
            self.current <= self.end
        } else {
            self.current >= self.end
        };
        if reached {
            self.current = self.end;
            self.frozen = true;
        }
        self.current
    }

    /// Restart the ramp; the next `advance` yields the start value.
    pub fn rearm(&mut self) {
        if self.delta == 0.0 {
            return;
        }
        self.current = self.start - self.delta;
        self.frozen = false;
    }
}
