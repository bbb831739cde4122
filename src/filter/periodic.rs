//! Periodicity tests on discretized event series.
//!
//! Fourier test: the mean-removed periodogram `|X_k|²` (`k = 1..=N/2`) is scored with
//! Fisher's g statistic `g = max / Σ`, p-value approximated by `m (1 - g)^(m - 1)`
//! over `m` frequencies. The reported frequency is the lowest divisor of the peak
//! frequency that still carries at least half the peak power, so pulse trains report
//! their fundamental rather than whichever harmonic happens to be strongest.
//!
//! Correlation test: the lag with the highest autocorrelation among local peaks at
//! lag >= 2, accepted when it reaches the configured threshold.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::config::{FilterConfig, SampleRule};
use crate::event::loader::EventLoader;
use crate::event::EventDefinition;
use crate::series::discretize::sequential_timestamps;
use crate::series::spectrum::{autocorrelation, harmonic_waveform, periodogram};
use crate::series::TimeWindow;

/// Share of the peak power a sub-harmonic needs to be taken as the fundamental.
const FUNDAMENTAL_RATIO: f64 = 0.5;

/// Shortest series the frequency and lag tests run on.
const MIN_BINS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodicMethod {
    Remove,
    Replace,
    Corr,
}

impl std::fmt::Display for PeriodicMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeriodicMethod::Remove => write!(f, "remove"),
            PeriodicMethod::Replace => write!(f, "replace"),
            PeriodicMethod::Corr => write!(f, "corr"),
        }
    }
}

/// A detected periodic component.
#[derive(Debug, Clone, PartialEq)]
pub struct Periodicity {
    pub interval: Duration,
    /// Timestamps left after removing the periodic waveform (replace only).
    pub residual: Option<Vec<DateTime<Utc>>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dominant {
    /// Frequency index, cycles per series length.
    pub k: usize,
    pub g: f64,
    pub p_value: f64,
}

impl Dominant {
    pub fn period_bins(&self, len: usize) -> f64 {
        len as f64 / self.k as f64
    }
}

/// Strongest frequency of the series and its Fisher g significance.
pub fn dominant_frequency(series: &[f64]) -> Option<Dominant> {
    if series.len() < MIN_BINS {
        return None;
    }
    let power = periodogram(series);
    let total: f64 = power.iter().sum();
    if total <= f64::EPSILON || !total.is_finite() {
        return None;
    }
    let max = power.iter().cloned().fold(0.0, f64::max);
    let peak = power.iter().position(|p| *p >= max)? + 1;
    let k = (1..=peak)
        .find(|d| peak % d == 0 && power[d - 1] >= max * FUNDAMENTAL_RATIO)
        .unwrap_or(peak);

    let m = power.len() as f64;
    let g = max / total;
    let p_value = (m * (1.0 - g).powf(m - 1.0)).min(1.0);
    Some(Dominant { k, g, p_value })
}

fn significant(series: &[f64], p_threshold: f64) -> Option<Dominant> {
    dominant_frequency(series).filter(|d| d.p_value < p_threshold)
}

/// Period length in bins if a significant dominant frequency exists.
pub fn fourier_remove(series: &[f64], p_threshold: f64) -> Option<f64> {
    significant(series, p_threshold).map(|d| d.period_bins(series.len()))
}

/// Period length in bins and the non-negative integer residual after subtracting
/// the periodic waveform.
pub fn fourier_replace(series: &[f64], p_threshold: f64) -> Option<(f64, Vec<f64>)> {
    let dominant = significant(series, p_threshold)?;
    let wave = harmonic_waveform(series, dominant.k);
    let residual = series
        .iter()
        .zip(wave.iter())
        .map(|(x, w)| (x - w).round().max(0.0))
        .collect();
    Some((dominant.period_bins(series.len()), residual))
}

/// Period length in bins from the autocorrelation function.
pub fn periodic_corr(series: &[f64], threshold: f64) -> Option<f64> {
    if series.len() < MIN_BINS {
        return None;
    }
    let acf = autocorrelation(series, series.len() / 2)?;
    let mut best: Option<(usize, f64)> = None;
    for lag in 2..acf.len() {
        let r = acf[lag];
        let rising = r > acf[lag - 1];
        let not_falling_after = acf.get(lag + 1).map_or(true, |next| r >= *next);
        if rising && not_falling_after && best.map_or(true, |(_, b)| r > b) {
            best = Some((lag, r));
        }
    }
    best.filter(|(_, r)| *r >= threshold)
        .map(|(lag, _)| lag as f64)
}

/// Convert non-zero bins back to one timestamp at each bin start.
pub fn revert_event(series: &[f64], window: &TimeWindow, binsize: Duration) -> Vec<DateTime<Utc>> {
    series
        .iter()
        .enumerate()
        .filter(|(_, v)| **v > 0.0)
        .map(|(i, _)| window.start + binsize * i as i32)
        .collect()
}

fn interval_of(period_bins: f64, binsize: Duration) -> Duration {
    Duration::milliseconds((period_bins * binsize.num_milliseconds() as f64).round() as i64)
}

/// Test a timestamp set for a dominant periodic component.
///
/// Each sample rule is tried in order; the first one that detects periodicity wins.
/// Rules whose duration differs from the window re-load the look-back tail of the
/// window from `loader`.
pub fn filter_periodic(
    conf: &FilterConfig,
    loader: &dyn EventLoader,
    event: &EventDefinition,
    window: &TimeWindow,
    timestamps: &[DateTime<Utc>],
    method: PeriodicMethod,
) -> Result<Option<Periodicity>> {
    if timestamps.len() < conf.pre_count {
        debug!(%event, count = timestamps.len(), "time-series count too small, skip");
        return Ok(None);
    }
    let (Some(first), Some(last)) = (timestamps.iter().min(), timestamps.iter().max()) else {
        return Ok(None);
    };
    if *last - *first < conf.pre_term {
        debug!(%event, "time-series range too small, skip");
        return Ok(None);
    }

    for rule in &conf.sample_rules {
        if let Some(found) = test_rule(conf, loader, event, window, timestamps, rule, method)? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

fn test_rule(
    conf: &FilterConfig,
    loader: &dyn EventLoader,
    event: &EventDefinition,
    window: &TimeWindow,
    timestamps: &[DateTime<Utc>],
    rule: &SampleRule,
    method: PeriodicMethod,
) -> Result<Option<Periodicity>> {
    let sample_window = window.tail(rule.duration);
    let reloaded;
    let sample: &[DateTime<Utc>] = if rule.duration == window.span() {
        timestamps
    } else {
        reloaded = loader
            .load_timestamps(event, &sample_window)?
            .unwrap_or_default();
        &reloaded
    };
    let series = sequential_timestamps(sample, &sample_window, rule.binsize)?;

    let found = match method {
        PeriodicMethod::Remove => fourier_remove(&series, conf.fourier_p_value).map(|p| (p, None)),
        PeriodicMethod::Replace => {
            fourier_replace(&series, conf.fourier_p_value).map(|(p, residual)| {
                let mut remain = revert_event(&residual, &sample_window, rule.binsize);
                remain.retain(|t| window.contains(t));
                (p, Some(remain))
            })
        }
        PeriodicMethod::Corr => periodic_corr(&series, conf.corr_threshold).map(|p| (p, None)),
    };

    Ok(found.map(|(period_bins, residual)| {
        let interval = interval_of(period_bins, rule.binsize);
        debug!(
            %event,
            %method,
            rule = %rule,
            interval_secs = interval.num_seconds(),
            "periodic component found"
        );
        Periodicity { interval, residual }
    }))
}
