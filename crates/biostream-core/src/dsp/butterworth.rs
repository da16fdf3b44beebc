//! Butterworth band-pass design as cascaded second-order sections
//!
//! The design follows the classical analog-prototype route:
//!
//! 1. Normalize both cutoffs to Nyquist and pre-warp them for the bilinear
//!    transform.
//! 2. Place the `order` Butterworth prototype poles on the left half of the
//!    unit circle.
//! 3. Transform low-pass to band-pass, which doubles the pole count and adds
//!    `order` zeros at the origin.
//! 4. Map to the z-plane with the bilinear transform. The analog zeros at the
//!    origin land on z = 1 and the zeros at infinity on z = -1.
//! 5. Group the poles into conjugate (or real) pairs, one biquad per pair.
//!
//! Every section therefore has numerator `[1, 0, -1]`; the overall gain is
//! folded into the first section.

use rustfft::num_complex::Complex64;
use std::f64::consts::PI;

/// Sampling frequency used by the normalized bilinear transform
const NORMALIZED_FS: f64 = 2.0;

/// Second-order section (biquad) coefficients
///
/// Transfer function: H(z) = (b0 + b1*z^-1 + b2*z^-2) / (1 + a1*z^-1 + a2*z^-2)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl BiquadCoeffs {
    /// Response of this section at normalized angular frequency `omega` (rad/sample)
    fn response(&self, omega: f64) -> Complex64 {
        let z1 = Complex64::from_polar(1.0, -omega);
        let z2 = z1 * z1;
        let num = self.b0 + z1 * self.b1 + z2 * self.b2;
        let den = 1.0 + z1 * self.a1 + z2 * self.a2;
        num / den
    }
}

/// Direct Form II Transposed state of one section
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct BiquadState {
    z1: f64,
    z2: f64,
}

/// Cascade of biquads with carried-forward state
#[derive(Debug, Clone)]
pub struct SosCascade {
    sections: Vec<BiquadCoeffs>,
    states: Vec<BiquadState>,
}

impl SosCascade {
    /// Build a cascade with zeroed state
    pub fn new(sections: Vec<BiquadCoeffs>) -> Self {
        let states = vec![BiquadState::default(); sections.len()];
        Self { sections, states }
    }

    /// Design a Butterworth band-pass of the given order
    ///
    /// The caller is responsible for `0 < low_hz < high_hz < sample_rate_hz / 2`
    /// and `order >= 1`; see [`crate::dsp::filter::FilterConfig::validate`].
    ///
    /// # Example
    /// ```
    /// use biostream_core::dsp::butterworth::SosCascade;
    ///
    /// let cascade = SosCascade::bandpass(0.5, 8.0, 100.0, 2);
    /// assert_eq!(cascade.sections().len(), 2);
    /// ```
    pub fn bandpass(low_hz: f64, high_hz: f64, sample_rate_hz: f64, order: usize) -> Self {
        let nyquist = sample_rate_hz / 2.0;
        let warped_low = prewarp(low_hz / nyquist);
        let warped_high = prewarp(high_hz / nyquist);

        let bandwidth = warped_high - warped_low;
        let center_sq = warped_low * warped_high;

        // Low-pass prototype -> band-pass: each prototype pole splits in two
        let mut analog_poles = Vec::with_capacity(2 * order);
        for pole in prototype_poles(order) {
            let scaled = pole * (bandwidth / 2.0);
            let offset = (scaled * scaled - center_sq).sqrt();
            analog_poles.push(scaled + offset);
            analog_poles.push(scaled - offset);
        }

        // Bilinear transform; zeros at the origin contribute fs2^order to the gain
        let fs2 = 2.0 * NORMALIZED_FS;
        let pole_product = analog_poles
            .iter()
            .fold(Complex64::new(1.0, 0.0), |acc, &p| acc * (fs2 - p));
        let gain = (bandwidth * fs2).powi(order as i32) / pole_product.re;

        let digital_poles: Vec<Complex64> = analog_poles
            .iter()
            .map(|&p| (fs2 + p) / (fs2 - p))
            .collect();

        let mut sections = pair_poles(&digital_poles)
            .into_iter()
            .map(|(a1, a2)| BiquadCoeffs {
                b0: 1.0,
                b1: 0.0,
                b2: -1.0,
                a1,
                a2,
            })
            .collect::<Vec<_>>();

        if let Some(first) = sections.first_mut() {
            first.b0 *= gain;
            first.b2 *= gain;
        }

        tracing::debug!(
            low_hz,
            high_hz,
            sample_rate_hz,
            order,
            sections = sections.len(),
            "bandpass_designed"
        );

        Self::new(sections)
    }

    /// Section coefficients
    pub fn sections(&self) -> &[BiquadCoeffs] {
        &self.sections
    }

    /// Process a single sample through all sections
    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        let mut value = input;
        for (c, s) in self.sections.iter().zip(self.states.iter_mut()) {
            let output = c.b0 * value + s.z1;
            s.z1 = c.b1 * value - c.a1 * output + s.z2;
            s.z2 = c.b2 * value - c.a2 * output;
            value = output;
        }
        value
    }

    /// Process a signal and return a new array (state carries over)
    pub fn filter(&mut self, signal: &[f64]) -> Vec<f64> {
        signal.iter().map(|&x| self.process(x)).collect()
    }

    /// Zero all section states
    pub fn reset(&mut self) {
        self.states.fill(BiquadState::default());
    }

    /// Set the state a constant input `x0` would have settled into
    ///
    /// Starting a pass from this state suppresses the start-up transient
    /// that a zeroed state produces when the signal does not start at zero.
    pub fn steady_state(&mut self, x0: f64) {
        let mut input = x0;
        for (c, s) in self.sections.iter().zip(self.states.iter_mut()) {
            let dc_gain = (c.b0 + c.b1 + c.b2) / (1.0 + c.a1 + c.a2);
            let output = dc_gain * input;
            s.z2 = c.b2 * input - c.a2 * output;
            s.z1 = c.b1 * input - c.a1 * output + s.z2;
            input = output;
        }
    }

    /// Magnitude response at `freq_hz` for the given sample rate
    pub fn magnitude_at(&self, freq_hz: f64, sample_rate_hz: f64) -> f64 {
        let omega = 2.0 * PI * freq_hz / sample_rate_hz;
        self.sections
            .iter()
            .fold(Complex64::new(1.0, 0.0), |acc, c| acc * c.response(omega))
            .norm()
    }

    /// True when every pole lies strictly inside the unit circle
    pub fn is_stable(&self) -> bool {
        // For z^2 + a1 z + a2 both roots are inside iff |a2| < 1 and |a1| < 1 + a2
        self.sections
            .iter()
            .all(|c| c.a2.abs() < 1.0 && c.a1.abs() < 1.0 + c.a2)
    }
}

/// Pre-warp a Nyquist-normalized frequency for the bilinear transform
fn prewarp(normalized: f64) -> f64 {
    2.0 * NORMALIZED_FS * (PI * normalized / NORMALIZED_FS).tan()
}

/// Analog Butterworth prototype poles (unit cutoff)
fn prototype_poles(order: usize) -> impl Iterator<Item = Complex64> {
    let n = order as f64;
    (0..order).map(move |k| {
        let m = -(n - 1.0) + 2.0 * k as f64;
        let theta = PI * m / (2.0 * n);
        Complex64::new(-theta.cos(), -theta.sin())
    })
}

/// Group digital poles into second-order denominators `(a1, a2)`
///
/// Complex poles pair with their conjugates; real poles pair with each other.
fn pair_poles(poles: &[Complex64]) -> Vec<(f64, f64)> {
    const REAL_TOLERANCE: f64 = 1e-10;

    let mut pairs = Vec::with_capacity(poles.len() / 2);
    let mut reals = Vec::new();

    for p in poles {
        if p.im.abs() <= REAL_TOLERANCE {
            reals.push(p.re);
        } else if p.im > 0.0 {
            pairs.push((-2.0 * p.re, p.norm_sqr()));
        }
    }

    reals.sort_by(|a, b| a.total_cmp(b));
    for chunk in reals.chunks(2) {
        match chunk {
            [r1, r2] => pairs.push((-(r1 + r2), r1 * r2)),
            [r] => pairs.push((-r, 0.0)),
            _ => {}
        }
    }

    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_section_count_matches_order() {
        for order in 1..=6 {
            let cascade = SosCascade::bandpass(0.5, 8.0, 100.0, order);
            assert_eq!(cascade.sections().len(), order, "order {}", order);
        }
    }

    #[test]
    fn test_wide_band_odd_order_has_real_pole_pair() {
        // 0.5-45 Hz at 100 Hz: the odd prototype pole splits into two real poles
        let cascade = SosCascade::bandpass(0.5, 45.0, 100.0, 3);
        assert_eq!(cascade.sections().len(), 3);
        assert!(cascade.is_stable());
    }

    #[test]
    fn test_designs_are_stable() {
        for order in 1..=8 {
            for (low, high) in [(0.5, 45.0), (0.5, 5.0), (10.0, 12.0), (1.0, 40.0)] {
                let cascade = SosCascade::bandpass(low, high, 100.0, order);
                assert!(
                    cascade.is_stable(),
                    "{}-{} Hz order {} should be stable",
                    low,
                    high,
                    order
                );
            }
        }
    }

    #[test]
    fn test_dc_and_nyquist_are_blocked() {
        let cascade = SosCascade::bandpass(0.5, 8.0, 100.0, 4);
        assert!(cascade.magnitude_at(0.0, 100.0) < 1e-9);
        assert!(cascade.magnitude_at(50.0, 100.0) < 1e-9);
    }

    #[test]
    fn test_passband_gain_is_unity() {
        let cascade = SosCascade::bandpass(0.5, 8.0, 100.0, 4);
        assert_relative_eq!(cascade.magnitude_at(2.0, 100.0), 1.0, epsilon = 0.01);
    }

    #[test]
    fn test_cutoffs_are_half_power_points() {
        let cascade = SosCascade::bandpass(1.0, 10.0, 100.0, 2);
        let half_power = std::f64::consts::FRAC_1_SQRT_2;
        assert_relative_eq!(cascade.magnitude_at(1.0, 100.0), half_power, epsilon = 1e-6);
        assert_relative_eq!(cascade.magnitude_at(10.0, 100.0), half_power, epsilon = 1e-6);
    }

    #[test]
    fn test_steady_state_holds_constant_input() {
        let mut cascade = SosCascade::bandpass(0.5, 8.0, 100.0, 2);
        cascade.steady_state(3.0);
        // Band-pass rejects DC, so a settled constant input yields zero output
        for _ in 0..50 {
            assert!(cascade.process(3.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_reset_zeroes_state() {
        let mut cascade = SosCascade::bandpass(0.5, 8.0, 100.0, 2);
        let first = cascade.process(1.0);
        cascade.process(-0.5);
        cascade.reset();
        assert_eq!(cascade.process(1.0), first);
    }
}
