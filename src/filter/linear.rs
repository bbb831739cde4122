use chrono::{DateTime, Duration, Utc};

use crate::series::discretize::sequential_timestamps;
use crate::series::{SeriesError, TimeWindow};

/// Normalized squared deviation of the cumulative count from an ideal linear ramp.
///
/// `Σ (C[i] - n*i/bins)² / (bins * n)` where `C` is the cumulative per-bin count.
/// Returns `None` for an empty timestamp set.
pub fn linearity(
    timestamps: &[DateTime<Utc>],
    window: &TimeWindow,
    binsize: Duration,
) -> Result<Option<f64>, SeriesError> {
    let total = timestamps.len();
    if total == 0 {
        return Ok(None);
    }
    let counts = sequential_timestamps(timestamps, window, binsize)?;
    let bins = counts.len();
    let total = total as f64;

    let mut cumulative = 0.0;
    let mut deviation = 0.0;
    for (i, c) in counts.iter().enumerate() {
        cumulative += c;
        let ramp = total * i as f64 / bins as f64;
        deviation += (cumulative - ramp).powi(2);
    }
    Ok(Some(deviation / (bins as f64 * total)))
}

/// True when occurrences accumulate at a constant rate over the window.
///
/// Sets smaller than `min_count` are never linear.
pub fn filter_linear(
    timestamps: &[DateTime<Utc>],
    window: &TimeWindow,
    binsize: Duration,
    threshold: f64,
    min_count: usize,
) -> Result<bool, SeriesError> {
    if timestamps.len() < min_count {
        return Ok(false);
    }
    Ok(matches!(linearity(timestamps, window, binsize)?, Some(v) if v < threshold))
}
