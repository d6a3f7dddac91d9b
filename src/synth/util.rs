//! Small DSP helpers.

use std::f32::consts::{FRAC_PI_4, TAU};

const DENORM_THRESH: f32 = 1.0e-20;

/// Flush denormals and non-finite values to zero.
#[inline(always)]
pub fn flush_denorm(x: f32) -> f32 {
    if !x.is_finite() || x.abs() < DENORM_THRESH {
        0.0
    } else {
        x
    }
}

/// Equal-power (left, right) gains for a pan position in [-1, 1].
#[inline]
pub fn pan_gains(pan: f32) -> (f32, f32) {
    let angle = (pan.clamp(-1.0, 1.0) + 1.0) * FRAC_PI_4;
    (angle.cos(), angle.sin())
}

/// Smoothing coefficient of a one-pole low-pass at `cutoff_hz`.
#[inline]
pub fn one_pole_coeff(cutoff_hz: f32, fs: f32) -> f32 {
    let nyquist = fs * 0.5;
    let fc = cutoff_hz.clamp(1.0, nyquist);
    1.0 - (-TAU * fc / fs).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centre_pan_is_equal_power() {
        let (l, r) = pan_gains(0.0);
        assert!((l - r).abs() < 1e-6);
        assert!((l * l + r * r - 1.0).abs() < 1e-6);
        let (l, r) = pan_gains(-1.0);
        assert!((l - 1.0).abs() < 1e-6 && r.abs() < 1e-6);
    }

    #[test]
    fn coeff_grows_with_cutoff() {
        let lo = one_pole_coeff(200.0, 48_000.0);
        let hi = one_pole_coeff(2000.0, 48_000.0);
        assert!(lo > 0.0 && lo < hi && hi < 1.0);
        assert_eq!(flush_denorm(f32::NAN), 0.0);
    }
}
