//! Numeric helpers shared by the prober, testers and classifier.
//!
//! All aggregates return `Option<f64>`: `None` means "no data" and is
//! surfaced as such by the callers, never silently reported as zero.

pub fn mean_f64(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation.
pub fn stddev_f64(values: &[f64]) -> Option<f64> {
    let mean = mean_f64(values)?;

    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
        / values.len() as f64;

    Some(variance.sqrt())
}

/// Mean of the `n` largest values, or of all values when fewer exist.
///
/// Reports near-peak achievable throughput instead of a mean dragged down
/// by the slow-start of each new connection.
pub fn top_n_mean(values: &[f64], n: usize) -> Option<f64> {
    if values.is_empty() || n == 0 {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    sorted.truncate(n);

    mean_f64(&sorted)
}

/// Mean absolute difference between consecutive samples.
///
/// Zero when fewer than two samples exist.
pub fn jitter_f64(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }

    let total: f64 =
        values.windows(2).map(|pair| (pair[0] - pair[1]).abs()).sum();

    total / (values.len() - 1) as f64
}

/// Instantaneous throughput in Mbps for `bytes` transferred over `seconds`.
///
/// Returns `None` for a zero or negative interval so a zero-duration
/// reading can never produce an impossible spike.
pub fn speed_mbps(bytes: u64, seconds: f64) -> Option<f64> {
    if seconds <= 0.0 {
        return None;
    }

    Some((bytes as f64 * 8.0) / (seconds * 1e6))
}
