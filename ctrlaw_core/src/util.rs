//! Time helpers shared by the loop and the config conversions.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds to `Duration`, mapping negative or NaN to zero and saturating on overflow.
#[inline]
pub fn secs(s: f64) -> Duration {
    if s.is_nan() || s <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(s).unwrap_or(Duration::MAX)
}

/// Wall-clock seconds since the Unix epoch; 0.0 if the system clock is before it.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secs_clamps() {
        assert_eq!(secs(-1.0), Duration::ZERO);
        assert_eq!(secs(f64::NAN), Duration::ZERO);
        assert_eq!(secs(f64::INFINITY), Duration::MAX);
        assert_eq!(secs(1.5), Duration::from_millis(1500));
    }
}
