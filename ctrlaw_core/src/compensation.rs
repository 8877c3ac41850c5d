//! Feed-forward compensation: a second law driven by the primary law's deltas.

use crate::channel::ChannelSet;
use crate::error::LawError;
use crate::filter::FilterCoefficients;
use crate::law::CorrectionLaw;
use crate::limiter::scale_deltas;
use crate::matrix::CorrectionMatrix;

/// Builder input for the compensation law.
#[derive(Debug, Clone, PartialEq)]
pub struct CompensationSpec {
    /// Rows are compensation actuators, columns the primary actuators.
    pub matrix: CorrectionMatrix,
    pub filter: Option<FilterCoefficients>,
    pub gain: f64,
    pub integral: bool,
}

#[derive(Debug, Clone)]
pub struct Compensation {
    law: CorrectionLaw,
    controls: ChannelSet,
}

impl Compensation {
    /// `law`'s matrix rows are the compensation actuators and its columns the primary ones.
    pub fn new(law: CorrectionLaw) -> Self {
        let controls = ChannelSet::new(law.matrix().rows().to_vec());
        Self { law, controls }
    }

    pub fn law_mut(&mut self) -> &mut CorrectionLaw {
        &mut self.law
    }

    pub fn controls(&self) -> &ChannelSet {
        &self.controls
    }

    /// Seed from the actuators' present setpoints.
    pub fn begin(&mut self, initial: &[f64]) {
        self.controls.initial.copy_from_slice(initial);
        if self.law.is_integral() {
            self.controls.value.copy_from_slice(initial);
        } else {
            self.controls.value.iter_mut().for_each(|v| *v = 0.0);
        }
        self.controls.old.copy_from_slice(&self.controls.value);
    }

    /// Correct from the primary deltas before limiting, then apply the primary limit factor.
    pub fn correct(
        &mut self,
        primary_delta: &[f64],
        primary_factor: f64,
        skip: bool,
    ) -> Result<(), LawError> {
        self.law.correct(&mut self.controls, primary_delta, skip)?;
        if !skip && primary_factor < 1.0 {
            scale_deltas(&mut self.controls, primary_factor, self.law.is_integral());
        }
        Ok(())
    }

    pub fn setpoints(&self) -> Vec<f64> {
        self.law.setpoints(&self.controls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescaled_by_primary_factor() {
        let m = CorrectionMatrix::new(vec!["k".into()], vec!["c1".into(), "c2".into()], vec![
            1.0, 1.0,
        ])
        .unwrap();
        let mut comp = Compensation::new(CorrectionLaw::new(m, 1.0, true));
        comp.begin(&[100.0]);
        comp.correct(&[5.0, 1.0], 0.4, false).unwrap();
        // raw delta -(5+1) = -6, scaled by 0.4
        assert!((comp.controls().delta[0] + 2.4).abs() < 1e-12);
        assert!((comp.setpoints()[0] - 97.6).abs() < 1e-12);
    }

    #[test]
    fn skip_leaves_setpoints() {
        let m = CorrectionMatrix::new(vec!["k".into()], vec!["c1".into()], vec![1.0]).unwrap();
        let mut comp = Compensation::new(CorrectionLaw::new(m, 1.0, false));
        comp.begin(&[3.0]);
        comp.correct(&[5.0], 1.0, true).unwrap();
        assert_eq!(comp.setpoints(), vec![3.0]);
    }
}
