//! Delta limiting and setpoint clamping.

use crate::channel::ChannelSet;

/// Maximum |delta| per actuator. A limit `<= 0` means unlimited.
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaLimits {
    Global(f64),
    PerChannel(Vec<f64>),
}

impl Default for DeltaLimits {
    fn default() -> Self {
        Self::Global(0.0)
    }
}

impl DeltaLimits {
    #[inline]
    pub fn limit(&self, i: usize) -> f64 {
        match self {
            Self::Global(l) => *l,
            Self::PerChannel(v) => v.get(i).copied().unwrap_or(0.0),
        }
    }
}

// Relative slack on the exceedance test so an already-limited vector is left alone.
const LIMIT_SLACK: f64 = 1e-12;

/// `min(1, min_i limit_i / |delta_i|)` over the channels exceeding their limit.
pub fn limit_factor(delta: &[f64], limits: &DeltaLimits) -> f64 {
    let mut factor: f64 = 1.0;
    for (i, d) in delta.iter().enumerate() {
        let lim = limits.limit(i);
        if lim > 0.0 && d.abs() > lim * (1.0 + LIMIT_SLACK) {
            factor = factor.min(lim / d.abs());
        }
    }
    factor
}

/// Scale every delta of `set` by `factor`.
///
/// Integral mode rebuilds `value` as `old + delta`; proportional mode scales `value`
/// itself (its `old` is zero).
pub fn scale_deltas(set: &mut ChannelSet, factor: f64, integral: bool) {
    for i in 0..set.len() {
        if integral {
            set.delta[i] *= factor;
            set.value[i] = set.old[i] + set.delta[i];
        } else {
            set.value[i] *= factor;
            set.delta[i] = set.value[i] - set.old[i];
        }
    }
}

/// Scale deltas down so none exceeds its limit; returns the factor applied.
pub fn limit_deltas(set: &mut ChannelSet, limits: &DeltaLimits, integral: bool) -> f64 {
    let factor = limit_factor(&set.delta, limits);
    if factor < 1.0 {
        scale_deltas(set, factor, integral);
    }
    factor
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub min: f64,
    pub max: f64,
}

impl Window {
    #[inline]
    pub fn clamp(&self, v: f64) -> f64 {
        v.clamp(self.min, self.max)
    }
}

/// Clamp each value into its window; returns how many changed.
pub fn clamp_values(values: &mut [f64], windows: &[Option<Window>]) -> usize {
    let mut n = 0;
    for (v, w) in values.iter_mut().zip(windows) {
        if let Some(w) = w {
            let c = w.clamp(*v);
            if c != *v {
                *v = c;
                n += 1;
            }
        }
    }
    n
}

/// Clamp the setpoints that will be written (`value`, or `initial + value` in
/// proportional mode) and recompute `delta` for the clamped channels.
pub fn clamp_setpoints(set: &mut ChannelSet, windows: &[Option<Window>], integral: bool) -> usize {
    let mut n = 0;
    for (i, w) in windows.iter().enumerate().take(set.len()) {
        let Some(w) = w else { continue };
        let base = if integral { 0.0 } else { set.initial[i] };
        let sp = base + set.value[i];
        let c = w.clamp(sp);
        if c != sp {
            set.value[i] = c - base;
            set.delta[i] = set.value[i] - set.old[i];
            n += 1;
        }
    }
    n
}
