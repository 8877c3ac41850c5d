//! The correction law: `delta = −gain · K · error`, optionally IIR-filtered.

use crate::acquire::check_finite;
use crate::channel::ChannelSet;
use crate::error::LawError;
use crate::filter::IirFilter;
use crate::matrix::CorrectionMatrix;

#[derive(Debug, Clone)]
pub struct CorrectionLaw {
    matrix: CorrectionMatrix,
    pub gain: f64,
    integral: bool,
    filter: Option<IirFilter>,
    accum: Vec<f64>,
    raw: Vec<f64>,
}

impl CorrectionLaw {
    pub fn new(matrix: CorrectionMatrix, gain: f64, integral: bool) -> Self {
        let n = matrix.rows().len();
        Self {
            matrix,
            gain,
            integral,
            filter: None,
            accum: vec![0.0; n],
            raw: vec![0.0; n],
        }
    }

    pub fn with_filter(mut self, filter: IirFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn matrix(&self) -> &CorrectionMatrix {
        &self.matrix
    }

    /// Replace the matrix; the caller guarantees it has the same row and column order.
    pub fn set_matrix(&mut self, matrix: CorrectionMatrix) {
        self.matrix = matrix;
    }

    pub fn is_integral(&self) -> bool {
        self.integral
    }

    /// Compute new values and deltas for `controls` from `error`.
    ///
    /// With `skip` set, deltas are zero and the filter is not run.
    pub fn correct(
        &mut self,
        controls: &mut ChannelSet,
        error: &[f64],
        skip: bool,
    ) -> Result<(), LawError> {
        let n = controls.len();
        if skip {
            // The actuators keep what was last written, in either mode.
            controls.old.copy_from_slice(&controls.value);
            controls.delta.iter_mut().for_each(|d| *d = 0.0);
            return Ok(());
        }
        for i in 0..n {
            if !self.integral {
                controls.value[i] = 0.0;
            }
            controls.old[i] = controls.value[i];
        }

        self.matrix.apply(error, &mut self.accum);
        for i in 0..n {
            controls.value[i] -= self.accum[i] * self.gain;
            controls.delta[i] = controls.value[i] - controls.old[i];
        }

        if let Some(f) = self.filter.as_mut() {
            self.raw.copy_from_slice(&controls.delta);
            f.apply(&self.raw, &mut controls.delta);
            for i in 0..n {
                controls.value[i] = controls.delta[i] + controls.old[i];
            }
        }

        check_finite("correction", controls.names(), &controls.delta)?;
        check_finite("correction", controls.names(), &controls.value)
    }

    /// Setpoints to write: `value` in integral mode, `initial + value` otherwise.
    pub fn setpoints(&self, controls: &ChannelSet) -> Vec<f64> {
        if self.integral {
            controls.value.clone()
        } else {
            controls
                .initial
                .iter()
                .zip(&controls.value)
                .map(|(i, v)| i + v)
                .collect()
        }
    }
}
