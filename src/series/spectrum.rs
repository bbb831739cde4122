//! Frequency and lag domain helpers for periodicity tests.
//!
//! Series here are short (hundreds to a few thousand bins), so a direct DFT is used.

use std::f64::consts::PI;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// DFT coefficient `X_k = Σ x_n e^{-2πikn/N}` as `(re, im)`.
pub fn dft_coefficient(values: &[f64], k: usize) -> (f64, f64) {
    let n = values.len();
    let mut re = 0.0;
    let mut im = 0.0;
    for (t, x) in values.iter().enumerate() {
        let theta = 2.0 * PI * ((k * t) % n) as f64 / n as f64;
        re += x * theta.cos();
        im -= x * theta.sin();
    }
    (re, im)
}

/// Power `|X_k|²` of the mean-removed series for `k = 1..=N/2`.
/// Element `j` holds frequency `k = j + 1`.
pub fn periodogram(values: &[f64]) -> Vec<f64> {
    let m = mean(values);
    let centered: Vec<f64> = values.iter().map(|v| v - m).collect();
    (1..=values.len() / 2)
        .map(|k| {
            let (re, im) = dft_coefficient(&centered, k);
            re * re + im * im
        })
        .collect()
}

/// Waveform made of the series mean plus frequency `k` and all its harmonics up to N/2.
pub fn harmonic_waveform(values: &[f64], k: usize) -> Vec<f64> {
    let n = values.len();
    let mut wave = vec![mean(values); n];
    if k == 0 || n == 0 {
        return wave;
    }
    let mut h = k;
    while h <= n / 2 {
        let (re, im) = dft_coefficient(values, h);
        // Nyquist has no conjugate partner.
        let scale = if 2 * h == n { 1.0 } else { 2.0 } / n as f64;
        for (t, w) in wave.iter_mut().enumerate() {
            let theta = 2.0 * PI * ((h * t) % n) as f64 / n as f64;
            *w += scale * (re * theta.cos() - im * theta.sin());
        }
        h += k;
    }
    wave
}

/// Biased autocorrelation `r(l)` for `l = 0..=max_lag`.
/// Returns `None` when the series has zero variance.
pub fn autocorrelation(values: &[f64], max_lag: usize) -> Option<Vec<f64>> {
    let m = mean(values);
    let denom: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    if denom <= f64::EPSILON || !denom.is_finite() {
        return None;
    }
    let max_lag = std::cmp::min(max_lag, values.len().saturating_sub(1));
    let acf = (0..=max_lag)
        .map(|lag| {
            values
                .iter()
                .zip(values.iter().skip(lag))
                .map(|(a, b)| (a - m) * (b - m))
                .sum::<f64>()
                / denom
        })
        .collect();
    Some(acf)
}
