//! Time windows, occurrences and discretized event series.

pub mod discretize;
pub mod spectrum;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SeriesError {
    #[error("timestamp {timestamp} outside window [{start}, {end})")]
    OutOfWindow {
        timestamp: DateTime<Utc>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("invalid resolution: {0}")]
    InvalidResolution(String),
    #[error("invalid window: start {start} is not before end {end}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, SeriesError> {
        if start >= end {
            return Err(SeriesError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn span(&self) -> Duration {
        self.end - self.start
    }

    pub fn contains(&self, t: &DateTime<Utc>) -> bool {
        *t >= self.start && *t < self.end
    }

    /// Length of the window in days, used for per-day rates.
    pub fn days(&self) -> f64 {
        self.span().num_milliseconds() as f64 / Duration::days(1).num_milliseconds() as f64
    }

    /// Number of bins of width `stride` needed to cover the window.
    pub fn bin_count(&self, stride: Duration) -> Result<usize, SeriesError> {
        let stride_ms = positive_millis(stride, "stride")?;
        let span_ms = self.span().num_milliseconds();
        if span_ms < 0 {
            return Err(SeriesError::InvalidWindow {
                start: self.start,
                end: self.end,
            });
        }
        Ok(((span_ms + stride_ms - 1) / stride_ms) as usize)
    }

    /// The trailing `length` of the window, `[end - length, end)`.
    /// `length` may exceed the span, in which case the result reaches further back.
    pub fn tail(&self, length: Duration) -> TimeWindow {
        TimeWindow {
            start: self.end - length,
            end: self.end,
        }
    }

    pub fn extend(&self, before: Duration, after: Duration) -> TimeWindow {
        TimeWindow {
            start: self.start - before,
            end: self.end + after,
        }
    }

    /// Split into consecutive windows of `unit`; the last one is cut at `end`.
    pub fn split(&self, unit: Duration) -> Result<Vec<TimeWindow>, SeriesError> {
        positive_millis(unit, "unit term")?;
        let mut windows = Vec::new();
        let mut top = self.start;
        while top < self.end {
            let next = std::cmp::min(top + unit, self.end);
            windows.push(TimeWindow {
                start: top,
                end: next,
            });
            top = next;
        }
        Ok(windows)
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// One event occurrence, optionally weighted (SNMP feature values).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    pub time: DateTime<Utc>,
    pub value: f64,
}

impl Occurrence {
    pub fn new(time: DateTime<Utc>, value: f64) -> Self {
        Self { time, value }
    }

    pub fn once(time: DateTime<Utc>) -> Self {
        Self { time, value: 1.0 }
    }
}

pub fn occurrences(timestamps: &[DateTime<Utc>]) -> Vec<Occurrence> {
    timestamps.iter().copied().map(Occurrence::once).collect()
}

/// Clamp every positive value to 1.
pub fn binarize(series: &mut [f64]) {
    for v in series.iter_mut() {
        if *v > 0.0 {
            *v = 1.0;
        }
    }
}

/// True when the series carries no data: empty, all zero, or all NaN.
pub fn is_absent(series: &[f64]) -> bool {
    series.iter().all(|v| v.is_nan() || *v == 0.0)
}

pub(crate) fn positive_millis(d: Duration, what: &str) -> Result<i64, SeriesError> {
    let ms = d.num_milliseconds();
    if ms <= 0 {
        return Err(SeriesError::InvalidResolution(format!(
            "{} must be positive, got {}ms",
            what, ms
        )));
    }
    Ok(ms)
}
