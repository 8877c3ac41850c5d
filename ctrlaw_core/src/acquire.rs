//! Reading and averaging channel vectors.

use std::time::Duration;

use ctrlaw_traits::ValueProvider;

use crate::config::AverageSpec;
use crate::error::LawError;
use crate::provider_error::map_provider_error;
use crate::wait::Pacer;

/// First non-finite element, reported as a `NonFinite` error naming its channel.
pub fn check_finite(stage: &'static str, names: &[String], values: &[f64]) -> Result<(), LawError> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(i) => Err(LawError::NonFinite {
            stage,
            channel: names.get(i).cloned().unwrap_or_default(),
        }),
        None => Ok(()),
    }
}

/// One synchronous read, checked for arity and finiteness.
pub fn read_checked<P: ValueProvider + ?Sized>(
    provider: &mut P,
    names: &[String],
    timeout: Duration,
    stage: &'static str,
) -> Result<Vec<f64>, LawError> {
    let v = read_raw(provider, names, timeout)?;
    check_finite(stage, names, &v)?;
    Ok(v)
}

fn read_raw<P: ValueProvider + ?Sized>(
    provider: &mut P,
    names: &[String],
    timeout: Duration,
) -> Result<Vec<f64>, LawError> {
    let v = provider
        .read(names, timeout)
        .map_err(|e| map_provider_error(e.as_ref()))?;
    if v.len() != names.len() {
        return Err(LawError::Transport(format!(
            "provider returned {} values for {} channels",
            v.len(),
            names.len()
        )));
    }
    Ok(v)
}

/// Average of `spec.n` reads spaced `spec.interval` apart.
///
/// Waits between samples go through `pacer`, so they ping and honour cancellation.
pub fn acquire_average<P: ValueProvider + ?Sized>(
    provider: &mut P,
    names: &[String],
    spec: &AverageSpec,
    timeout: Duration,
    pacer: &mut Pacer,
) -> Result<Vec<f64>, LawError> {
    let n = spec.n.max(1);
    let mut sum = vec![0.0; names.len()];
    for sample in 0..n {
        if sample > 0 && !spec.interval.is_zero() {
            pacer.wait(spec.interval)?;
        }
        let v = read_raw(provider, names, timeout)?;
        for (s, x) in sum.iter_mut().zip(&v) {
            *s += x;
        }
    }
    let scale = f64::from(n);
    for s in &mut sum {
        *s /= scale;
    }
    check_finite("acquisition", names, &sum)?;
    Ok(sum)
}
