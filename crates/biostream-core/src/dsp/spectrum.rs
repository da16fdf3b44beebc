//! Spectral pulse-rate estimate
//!
//! Finds the dominant frequency of a captured PPG window inside the
//! physiological band and reports it in beats per minute.

use rustfft::{num_complex::Complex, FftPlanner};
use serde::Serialize;
use std::f64::consts::PI;

/// Lowest pulse frequency considered (30 bpm)
pub const MIN_PULSE_HZ: f64 = 0.5;

/// Highest pulse frequency considered (210 bpm)
pub const MAX_PULSE_HZ: f64 = 3.5;

/// Shortest window that resolves the pulse band
pub const MIN_WINDOW_SECS: f64 = 4.0;

/// Minimum FFT length; shorter windows are zero-padded up to it
const MIN_FFT_SIZE: usize = 4096;

/// Dominant pulse frequency of a window
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PulseEstimate {
    /// Beats per minute
    pub bpm: f64,
    /// Peak frequency in Hz
    pub frequency_hz: f64,
    /// Share of in-band power at the peak bin (0.0 to 1.0)
    pub confidence: f64,
}

/// Estimate the pulse rate of `samples` taken at `sample_rate_hz`
///
/// Returns `None` for windows shorter than [`MIN_WINDOW_SECS`] or when the
/// pulse band carries no energy.
pub fn estimate_pulse_rate(samples: &[f64], sample_rate_hz: f64) -> Option<PulseEstimate> {
    let n = samples.len();
    if sample_rate_hz.is_nan()
        || sample_rate_hz <= 0.0
        || n < 2
        || (n as f64) < MIN_WINDOW_SECS * sample_rate_hz
    {
        return None;
    }

    let mean = samples.iter().sum::<f64>() / n as f64;
    let fft_size = (2 * n).next_power_of_two().max(MIN_FFT_SIZE);

    // Hann window over the mean-removed signal, zero padded
    let mut buffer: Vec<Complex<f64>> = samples
        .iter()
        .enumerate()
        .map(|(i, &x)| {
            let w = 0.5 - 0.5 * (2.0 * PI * i as f64 / (n - 1) as f64).cos();
            Complex::new((x - mean) * w, 0.0)
        })
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(fft_size)
        .collect();

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(fft_size);
    fft.process(&mut buffer);

    let bin_hz = sample_rate_hz / fft_size as f64;
    let first = (MIN_PULSE_HZ / bin_hz).ceil() as usize;
    let last = ((MAX_PULSE_HZ / bin_hz).floor() as usize).min(fft_size / 2);
    if first >= last {
        return None;
    }

    let power: Vec<f64> = buffer[..=last + 1].iter().map(|c| c.norm_sqr()).collect();
    let band = &power[first..=last];
    let total: f64 = band.iter().sum();
    if total <= f64::EPSILON {
        return None;
    }

    let (offset, &peak) = band
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))?;
    let k = first + offset;

    // Parabolic interpolation between neighbouring bins
    let shift = if k > 0 {
        let (l, c, r) = (power[k - 1], power[k], power[k + 1]);
        let denom = l - 2.0 * c + r;
        if denom.abs() > f64::EPSILON {
            (0.5 * (l - r) / denom).clamp(-0.5, 0.5)
        } else {
            0.0
        }
    } else {
        0.0
    };

    let frequency_hz = (k as f64 + shift) * bin_hz;
    Some(PulseEstimate {
        bpm: frequency_hz * 60.0,
        frequency_hz,
        confidence: peak / total,
    })
}
