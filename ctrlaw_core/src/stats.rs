use ctrlaw_traits::ChannelStats;

/// RMS, mean, mean absolute deviation and the largest-magnitude entry of `values`.
pub fn channel_stats(names: &[String], values: &[f64]) -> ChannelStats {
    if values.is_empty() {
        return ChannelStats::default();
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let rms = (values.iter().map(|v| v * v).sum::<f64>() / n).sqrt();
    let mad = values.iter().map(|v| (v - mean).abs()).sum::<f64>() / n;
    let (idx, largest) = values
        .iter()
        .copied()
        .enumerate()
        .fold((0, values[0]), |best, (i, v)| {
            if v.abs() > best.1.abs() { (i, v) } else { best }
        });
    ChannelStats {
        rms,
        mean,
        mad,
        largest,
        largest_name: names.get(idx).cloned().unwrap_or_default(),
    }
}

#[inline]
pub fn rms(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    (values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64).sqrt()
}
