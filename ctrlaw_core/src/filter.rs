//! Per-actuator IIR filter on correction deltas.
//!
//! With `a` feedback and `b` feedforward coefficients per channel:
//!
//! ```text
//! y[0] = (Σ_{k=0..=nb} b[k]·x[k] − Σ_{k=1..=na} a[k]·y[k]) / a[0]
//! ```
//!
//! where `x[k]` / `y[k]` are the input and output `k` iterations ago.

use crate::error::BuildError;
use crate::ring::Ring;

/// Named coefficient table as loaded from configuration, one row per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCoefficients {
    pub channels: Vec<String>,
    pub a: Vec<Vec<f64>>,
    pub b: Vec<Vec<f64>>,
}

impl FilterCoefficients {
    /// Build a filter whose channel `i` is `order[i]`.
    pub fn to_filter(&self, order: &[String]) -> Result<IirFilter, BuildError> {
        if self.channels.len() != order.len() {
            return Err(BuildError::Shape(format!(
                "filter has {} channels, expected {}",
                self.channels.len(),
                order.len()
            )));
        }
        let mut a = Vec::with_capacity(order.len());
        let mut b = Vec::with_capacity(order.len());
        for name in order {
            let i = self
                .channels
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| BuildError::Shape(format!("filter has no channel {name}")))?;
            a.push(self.a[i].clone());
            b.push(self.b[i].clone());
        }
        IirFilter::new(a, b)
    }
}

#[derive(Debug, Clone)]
pub struct IirFilter {
    // Indexed [k][channel].
    a: Vec<Vec<f64>>,
    b: Vec<Vec<f64>>,
    history: Ring<Vec<f64>>,
    filtered: Ring<Vec<f64>>,
}

fn transpose(per_channel: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let order = per_channel.first().map_or(0, Vec::len);
    (0..order)
        .map(|k| per_channel.iter().map(|c| c[k]).collect())
        .collect()
}

impl IirFilter {
    /// `a[i]` and `b[i]` are the coefficients of channel `i`, lowest order first.
    pub fn new(a: Vec<Vec<f64>>, b: Vec<Vec<f64>>) -> Result<Self, BuildError> {
        let n = a.len();
        if n == 0 || b.len() != n {
            return Err(BuildError::Shape("filter needs a and b rows for every channel".into()));
        }
        let na = a[0].len();
        let nb = b[0].len();
        if na == 0 || nb == 0 || a.iter().any(|r| r.len() != na) || b.iter().any(|r| r.len() != nb)
        {
            return Err(BuildError::Shape("filter orders must match across channels".into()));
        }
        if a.iter().flatten().chain(b.iter().flatten()).any(|v| !v.is_finite()) {
            return Err(BuildError::InvalidConfig("filter coefficients must be finite"));
        }
        if a.iter().any(|r| r[0] == 0.0) {
            return Err(BuildError::InvalidConfig("filter a0 must be non-zero"));
        }
        Ok(Self {
            a: transpose(&a),
            b: transpose(&b),
            history: Ring::new(nb, vec![0.0; n]),
            filtered: Ring::new(na, vec![0.0; n]),
        })
    }

    /// Pass-through filter (`a = [1]`, `b = [1]`).
    pub fn identity(channels: usize) -> Self {
        Self {
            a: vec![vec![1.0; channels]],
            b: vec![vec![1.0; channels]],
            history: Ring::new(1, vec![0.0; channels]),
            filtered: Ring::new(1, vec![0.0; channels]),
        }
    }

    /// Push `raw` into the history and write the filtered output into `out`.
    pub fn apply(&mut self, raw: &[f64], out: &mut [f64]) {
        self.history.advance().copy_from_slice(raw);
        for (i, o) in out.iter_mut().enumerate() {
            let mut acc = 0.0;
            for (k, bk) in self.b.iter().enumerate() {
                acc += bk[i] * self.history.get(k)[i];
            }
            // Before the push below, slot k-1 holds the output from k iterations ago.
            for (k, ak) in self.a.iter().enumerate().skip(1) {
                acc -= ak[i] * self.filtered.get(k - 1)[i];
            }
            *o = acc / self.a[0][i];
        }
        self.filtered.advance().copy_from_slice(out);
    }
}
