//! Binning policies that turn occurrences into fixed-length series.
//!
//! All three policies produce `ceil(span / stride)` values regardless of how much
//! input they are given. Sequential binning is strict about its window; the
//! overlapping policies expect pre-extended input (see [`BinMethod::load_window`])
//! and silently ignore occurrences that fall into no bin.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{binarize, positive_millis, Occurrence, SeriesError, TimeWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinMethod {
    /// Non-overlapping bins, stride equals bin size.
    Sequential,
    /// Overlapping bins anchored at `start + i * stride`.
    Slide,
    /// Overlapping bins centered on `start + i * stride + stride / 2`.
    Radius,
}

impl std::fmt::Display for BinMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinMethod::Sequential => write!(f, "sequential"),
            BinMethod::Slide => write!(f, "slide"),
            BinMethod::Radius => write!(f, "radius"),
        }
    }
}

impl BinMethod {
    /// Window the raw occurrences must cover so that every output bin sees full data.
    pub fn load_window(&self, window: &TimeWindow, size: Duration, stride: Duration) -> TimeWindow {
        match self {
            BinMethod::Sequential => *window,
            BinMethod::Slide => window.extend(Duration::zero(), overlap(size, stride)),
            BinMethod::Radius => {
                let half = half_overlap(size, stride);
                window.extend(half, half)
            }
        }
    }

    pub fn discretize(
        &self,
        items: &[Occurrence],
        window: &TimeWindow,
        size: Duration,
        stride: Duration,
        binarized: bool,
    ) -> Result<Vec<f64>, SeriesError> {
        let mut series = match self {
            BinMethod::Sequential => sequential(items, window, size)?,
            BinMethod::Slide => slide(items, window, size, stride)?,
            BinMethod::Radius => radius(items, window, size, stride)?,
        };
        if binarized {
            binarize(&mut series);
        }
        Ok(series)
    }

    /// Label of every output bin: its anchor `start + i * step`.
    pub fn index(
        &self,
        window: &TimeWindow,
        size: Duration,
        stride: Duration,
    ) -> Result<Vec<DateTime<Utc>>, SeriesError> {
        let step = match self {
            BinMethod::Sequential => size,
            BinMethod::Slide | BinMethod::Radius => stride,
        };
        bin_index(window, step)
    }
}

pub fn bin_index(window: &TimeWindow, step: Duration) -> Result<Vec<DateTime<Utc>>, SeriesError> {
    let bins = window.bin_count(step)?;
    Ok((0..bins).map(|i| window.start + step * i as i32).collect())
}

/// Count (or sum) occurrences per non-overlapping bin of `size`.
///
/// A timestamp on a bin boundary belongs to the later bin. Occurrences outside the
/// window are a caller error.
pub fn sequential(
    items: &[Occurrence],
    window: &TimeWindow,
    size: Duration,
) -> Result<Vec<f64>, SeriesError> {
    let size_ms = positive_millis(size, "bin size")?;
    let mut series = vec![0.0; window.bin_count(size)?];
    for item in items {
        if !window.contains(&item.time) {
            return Err(SeriesError::OutOfWindow {
                timestamp: item.time,
                start: window.start,
                end: window.end,
            });
        }
        if item.value.is_nan() {
            continue;
        }
        let idx = ((item.time - window.start).num_milliseconds() / size_ms) as usize;
        series[idx] += item.value;
    }
    Ok(series)
}

pub fn sequential_timestamps(
    timestamps: &[DateTime<Utc>],
    window: &TimeWindow,
    size: Duration,
) -> Result<Vec<f64>, SeriesError> {
    sequential(&super::occurrences(timestamps), window, size)
}

pub fn slide(
    items: &[Occurrence],
    window: &TimeWindow,
    size: Duration,
    stride: Duration,
) -> Result<Vec<f64>, SeriesError> {
    overlapping(items, window, size, stride, 0)
}

pub fn radius(
    items: &[Occurrence],
    window: &TimeWindow,
    size: Duration,
    stride: Duration,
) -> Result<Vec<f64>, SeriesError> {
    let shift = half_overlap(size, stride).num_milliseconds();
    overlapping(items, window, size, stride, -shift)
}

/// Bin `i` covers `[start + offset + i*stride, start + offset + i*stride + size)`.
fn overlapping(
    items: &[Occurrence],
    window: &TimeWindow,
    size: Duration,
    stride: Duration,
    offset_ms: i64,
) -> Result<Vec<f64>, SeriesError> {
    let size_ms = positive_millis(size, "bin size")?;
    let stride_ms = positive_millis(stride, "stride")?;
    if stride_ms > size_ms {
        return Err(SeriesError::InvalidResolution(format!(
            "stride {}ms exceeds bin size {}ms",
            stride_ms, size_ms
        )));
    }

    let bins = window.bin_count(stride)?;
    let mut series = vec![0.0; bins];
    if bins == 0 {
        return Ok(series);
    }
    let last_bin = bins as i64 - 1;

    for item in items {
        if item.value.is_nan() {
            continue;
        }
        let pos = (item.time - window.start).num_milliseconds() - offset_ms;
        if pos < 0 {
            continue;
        }
        let first = if pos >= size_ms {
            (pos - size_ms) / stride_ms + 1
        } else {
            0
        };
        let last = std::cmp::min(pos / stride_ms, last_bin);
        for i in first..=last {
            series[i as usize] += item.value;
        }
    }
    Ok(series)
}

fn overlap(size: Duration, stride: Duration) -> Duration {
    std::cmp::max(size - stride, Duration::zero())
}

fn half_overlap(size: Duration, stride: Duration) -> Duration {
    Duration::milliseconds(overlap(size, stride).num_milliseconds() / 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::occurrences;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn day() -> TimeWindow {
        TimeWindow::new(t0(), t0() + Duration::days(1)).unwrap()
    }

    fn at(minutes: i64) -> DateTime<Utc> {
        t0() + Duration::minutes(minutes)
    }

    #[test]
    fn test_sequential_length_and_sum() {
        let ts: Vec<_> = [0, 1, 59, 60, 61, 300, 1439].iter().map(|m| at(*m)).collect();
        let series = sequential_timestamps(&ts, &day(), Duration::hours(1)).unwrap();
        assert_eq!(series.len(), 24);
        assert_eq!(series.iter().sum::<f64>(), ts.len() as f64);
        assert_eq!(series[0], 3.0);
        assert_eq!(series[1], 2.0);
        assert_eq!(series[5], 1.0);
        assert_eq!(series[23], 1.0);
    }

    #[test]
    fn test_sequential_length_with_partial_last_bin() {
        let w = TimeWindow::new(t0(), t0() + Duration::minutes(25)).unwrap();
        let series = sequential_timestamps(&[at(24)], &w, Duration::minutes(10)).unwrap();
        assert_eq!(series, vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_boundary_belongs_to_later_bin() {
        let series = sequential_timestamps(&[at(120)], &day(), Duration::hours(1)).unwrap();
        assert_eq!(series[1], 0.0);
        assert_eq!(series[2], 1.0);
    }

    #[test]
    fn test_sequential_rejects_out_of_window() {
        let err = sequential_timestamps(&[at(24 * 60)], &day(), Duration::hours(1));
        assert!(matches!(err, Err(SeriesError::OutOfWindow { .. })));
        let err = sequential_timestamps(&[at(-1)], &day(), Duration::hours(1));
        assert!(matches!(err, Err(SeriesError::OutOfWindow { .. })));
    }

    #[test]
    fn test_weighted_sum_skips_nan() {
        let items = vec![
            Occurrence::new(at(5), 2.5),
            Occurrence::new(at(6), f64::NAN),
            Occurrence::new(at(7), 1.5),
        ];
        let series = sequential(&items, &day(), Duration::hours(1)).unwrap();
        assert_eq!(series[0], 4.0);
    }

    #[test]
    fn test_empty_input_is_all_zero() {
        let series = BinMethod::Slide
            .discretize(&[], &day(), Duration::hours(2), Duration::hours(1), false)
            .unwrap();
        assert_eq!(series.len(), 24);
        assert!(crate::series::is_absent(&series));
    }

    #[test]
    fn test_slide_counts_every_covering_bin() {
        // 2h bins every hour: 01:30 lies in bins starting at 00:00 and 01:00.
        let items = occurrences(&[at(90)]);
        let series = slide(&items, &day(), Duration::hours(2), Duration::hours(1)).unwrap();
        assert_eq!(series.len(), 24);
        assert_eq!(series[0], 1.0);
        assert_eq!(series[1], 1.0);
        assert_eq!(series.iter().sum::<f64>(), 2.0);
    }

    #[test]
    fn test_slide_uses_extended_tail() {
        // Last bin starts at 23:00 and reaches 01:00 of the next day.
        let items = occurrences(&[at(24 * 60 + 30)]);
        let series = slide(&items, &day(), Duration::hours(2), Duration::hours(1)).unwrap();
        assert_eq!(series[23], 1.0);
        assert_eq!(series.iter().sum::<f64>(), 1.0);
    }

    #[test]
    fn test_radius_centers_bins() {
        // 2h bins every hour, centered at HH:30: bin 0 covers [-00:30, 01:30).
        let items = occurrences(&[at(-20), at(80)]);
        let series = radius(&items, &day(), Duration::hours(2), Duration::hours(1)).unwrap();
        assert_eq!(series[0], 2.0);
        assert_eq!(series[1], 1.0);
        assert_eq!(series[2], 0.0);
    }

    #[test]
    fn test_overlapping_converges_to_sequential() {
        let ts: Vec<_> = [0, 59, 60, 179, 600, 1200, 1439].iter().map(|m| at(*m)).collect();
        let items = occurrences(&ts);
        let seq = sequential(&items, &day(), Duration::hours(1)).unwrap();
        let sl = slide(&items, &day(), Duration::hours(1), Duration::hours(1)).unwrap();
        let rd = radius(&items, &day(), Duration::hours(1), Duration::hours(1)).unwrap();
        assert_eq!(seq, sl);
        assert_eq!(seq, rd);
    }

    #[test]
    fn test_stride_larger_than_size_is_rejected() {
        let err = slide(&[], &day(), Duration::hours(1), Duration::hours(2));
        assert!(matches!(err, Err(SeriesError::InvalidResolution(_))));
    }

    #[test]
    fn test_binarize_applies_to_all_methods() {
        let items = occurrences(&[at(10), at(11), at(12)]);
        for method in [BinMethod::Sequential, BinMethod::Slide, BinMethod::Radius] {
            let series = method
                .discretize(&items, &day(), Duration::hours(2), Duration::hours(1), true)
                .unwrap();
            assert!(series.iter().all(|v| *v == 0.0 || *v == 1.0), "{}", method);
        }
    }

    #[test]
    fn test_load_window_extension() {
        let w = day();
        let slide_w = BinMethod::Slide.load_window(&w, Duration::hours(3), Duration::hours(1));
        assert_eq!(slide_w.start, w.start);
        assert_eq!(slide_w.end, w.end + Duration::hours(2));

        let radius_w = BinMethod::Radius.load_window(&w, Duration::hours(3), Duration::hours(1));
        assert_eq!(radius_w.start, w.start - Duration::hours(1));
        assert_eq!(radius_w.end, w.end + Duration::hours(1));
    }

    #[test]
    fn test_index_labels() {
        let idx = BinMethod::Slide
            .index(&day(), Duration::hours(2), Duration::hours(1))
            .unwrap();
        assert_eq!(idx.len(), 24);
        assert_eq!(idx[3], t0() + Duration::hours(3));
    }
}
