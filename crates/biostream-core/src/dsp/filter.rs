//! Streaming band-pass filter
//!
//! Wraps a Butterworth [`SosCascade`] and carries its state from one sample
//! to the next so a live stream is filtered continuously and causally. The
//! state belongs to one coefficient epoch: every successful reconfiguration
//! designs new coefficients and zeroes the history.
//!
//! For complete, already-captured segments [`StreamingFilter::apply_to_array`]
//! runs a forward-backward (zero-phase) pass that never touches the live state.

use super::butterworth::SosCascade;
use super::Sample;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Samples per filter order required before the IIR output is trusted
const WARMUP_PER_ORDER: usize = 3;

/// Highest accepted Butterworth order
pub const MAX_ORDER: usize = 10;

/// Errors raised when a filter configuration violates its invariants
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Low cutoff must be positive, got {lowcut} Hz")]
    LowcutNonPositive { lowcut: f64 },

    #[error("Low cutoff ({lowcut} Hz) must be below high cutoff ({highcut} Hz)")]
    LowAboveHigh { lowcut: f64, highcut: f64 },

    #[error("High cutoff ({highcut} Hz) must be below Nyquist ({nyquist} Hz)")]
    HighAboveNyquist { highcut: f64, nyquist: f64 },

    #[error("Filter order must be at least 1")]
    OrderZero,

    #[error("Filter order {order} exceeds the maximum of {max}")]
    OrderTooHigh { order: usize, max: usize },

    #[error("Filter parameters must be finite")]
    NonFinite,
}

/// Returned alongside the untouched input when a batch is too short to filter
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[error("Insufficient data to filter: {actual} samples, need at least {required}")]
pub struct InsufficientDataWarning {
    pub required: usize,
    pub actual: usize,
}

/// Band-pass filter configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Low cutoff frequency in Hz
    pub lowcut_hz: f64,
    /// High cutoff frequency in Hz
    pub highcut_hz: f64,
    /// Butterworth order (the band-pass has twice as many poles)
    pub order: usize,
    /// Sampling rate of the stream in Hz
    pub sample_rate_hz: f64,
    /// When false, samples pass through unfiltered
    pub enabled: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            lowcut_hz: 0.5,
            highcut_hz: 45.0,
            order: 4,
            sample_rate_hz: crate::DEFAULT_SAMPLE_RATE as f64,
            enabled: true,
        }
    }
}

impl FilterConfig {
    /// Nyquist frequency of the configured sample rate
    pub fn nyquist_hz(&self) -> f64 {
        self.sample_rate_hz / 2.0
    }

    /// Check `0 < lowcut < highcut < fs/2` and `1 <= order <= MAX_ORDER`
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(self.lowcut_hz.is_finite()
            && self.highcut_hz.is_finite()
            && self.sample_rate_hz.is_finite())
        {
            return Err(ValidationError::NonFinite);
        }
        if self.order == 0 {
            return Err(ValidationError::OrderZero);
        }
        if self.order > MAX_ORDER {
            return Err(ValidationError::OrderTooHigh {
                order: self.order,
                max: MAX_ORDER,
            });
        }
        if self.lowcut_hz <= 0.0 {
            return Err(ValidationError::LowcutNonPositive {
                lowcut: self.lowcut_hz,
            });
        }
        if self.lowcut_hz >= self.highcut_hz {
            return Err(ValidationError::LowAboveHigh {
                lowcut: self.lowcut_hz,
                highcut: self.highcut_hz,
            });
        }
        if self.highcut_hz >= self.nyquist_hz() {
            return Err(ValidationError::HighAboveNyquist {
                highcut: self.highcut_hz,
                nyquist: self.nyquist_hz(),
            });
        }
        Ok(())
    }

    /// Samples that must be seen after a reset before filtering starts
    pub fn warmup_samples(&self) -> usize {
        WARMUP_PER_ORDER * self.order
    }
}

/// Result of an offline batch filter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutput {
    /// Filtered values, or the input unchanged when a warning is set
    pub values: Vec<f64>,
    /// Set when the input was too short to filter
    pub warning: Option<InsufficientDataWarning>,
}

/// Causal band-pass filter with state carried across samples
///
/// # Example
/// ```
/// use biostream_core::dsp::filter::{FilterConfig, StreamingFilter};
///
/// let mut filter = StreamingFilter::new(FilterConfig::default()).unwrap();
///
/// // The first 3 x order samples pass through while the filter warms up
/// let sample = filter.process_sample(0.0, 512.0);
/// assert_eq!(sample.filtered, 512.0);
/// ```
#[derive(Debug, Clone)]
pub struct StreamingFilter {
    config: FilterConfig,
    cascade: SosCascade,
    /// Samples seen since the last reset
    processed: usize,
}

impl StreamingFilter {
    /// Create a filter from a validated configuration
    pub fn new(config: FilterConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self {
            cascade: design(&config),
            config,
            processed: 0,
        })
    }

    /// Current configuration
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Samples seen since the last reset
    pub fn samples_since_reset(&self) -> usize {
        self.processed
    }

    /// Reconfigure the filter, keeping the stream's sample rate
    ///
    /// On success the coefficients are redesigned and the state is zeroed.
    /// On failure nothing changes and the previous filter stays in effect.
    pub fn configure(
        &mut self,
        lowcut_hz: f64,
        highcut_hz: f64,
        order: usize,
        enabled: bool,
    ) -> Result<FilterConfig, ValidationError> {
        let candidate = FilterConfig {
            lowcut_hz,
            highcut_hz,
            order,
            sample_rate_hz: self.config.sample_rate_hz,
            enabled,
        };

        if let Err(e) = candidate.validate() {
            tracing::warn!(
                lowcut_hz,
                highcut_hz,
                order,
                error = %e,
                "filter_config_rejected"
            );
            return Err(e);
        }

        self.cascade = design(&candidate);
        self.config = candidate;
        self.processed = 0;

        tracing::info!(
            lowcut_hz,
            highcut_hz,
            order,
            enabled,
            "filter_configured"
        );
        Ok(candidate)
    }

    /// Zero the filter history and restart the warm-up
    pub fn reset(&mut self) {
        self.cascade.reset();
        self.processed = 0;
    }

    /// Filter one live sample
    ///
    /// Passes `raw` through while disabled or while fewer than `3 x order`
    /// samples have been seen since the last reset. After that one causal
    /// step of the cascade is applied and its state carried forward.
    pub fn process_sample(&mut self, timestamp: f64, raw: f64) -> Sample {
        let warm = self.processed >= self.config.warmup_samples();
        self.processed = self.processed.saturating_add(1);

        let filtered = if self.config.enabled && warm {
            self.cascade.process(raw)
        } else {
            raw
        };

        Sample {
            timestamp,
            raw,
            filtered,
        }
    }

    /// Zero-phase (forward-backward) filtering of a captured segment
    ///
    /// Uses its own copy of the coefficients; the live state is untouched.
    pub fn apply_to_array(&self, data: &[f64]) -> BatchOutput {
        if !self.config.enabled {
            return BatchOutput {
                values: data.to_vec(),
                warning: None,
            };
        }

        let required = self.config.warmup_samples();
        if data.len() < required {
            let warning = InsufficientDataWarning {
                required,
                actual: data.len(),
            };
            tracing::warn!(%warning, "batch_filter_skipped");
            return BatchOutput {
                values: data.to_vec(),
                warning: Some(warning),
            };
        }

        BatchOutput {
            values: zero_phase(&self.cascade, data),
            warning: None,
        }
    }
}

fn design(config: &FilterConfig) -> SosCascade {
    SosCascade::bandpass(
        config.lowcut_hz,
        config.highcut_hz,
        config.sample_rate_hz,
        config.order,
    )
}

/// Forward-backward pass over an odd extension of `data`
fn zero_phase(cascade: &SosCascade, data: &[f64]) -> Vec<f64> {
    let n = data.len();
    if n == 0 {
        return Vec::new();
    }

    let taps = 2 * cascade.sections().len() + 1;
    let pad = (3 * taps).min(n - 1);

    let first = data[0];
    let last = data[n - 1];
    let mut extended = Vec::with_capacity(n + 2 * pad);
    extended.extend((1..=pad).rev().map(|i| 2.0 * first - data[i]));
    extended.extend_from_slice(data);
    extended.extend((1..=pad).map(|i| 2.0 * last - data[n - 1 - i]));

    let mut pass = cascade.clone();
    pass.steady_state(extended[0]);
    let mut forward = pass.filter(&extended);

    forward.reverse();
    pass.steady_state(forward[0]);
    let mut backward = pass.filter(&forward);
    backward.reverse();

    backward[pad..pad + n].to_vec()
}
