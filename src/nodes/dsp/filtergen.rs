//! Filter coefficient generators
//!
//! Coefficients are computed in `f64` and returned as `f32`. Frequencies are
//! normalized to the sample rate (0.5 is Nyquist).

use std::f64::consts::PI;
use std::fmt::Write;

use crate::runtime::ConfigError;

/// Below this magnitude the raised-cosine denominator is treated as zero
const RRC_SINGULARITY_EPS: f64 = 1e-9;

/// Hamming-windowed sinc low-pass filter with `order + 1` taps.
///
/// `fcut` is the cutoff frequency relative to the sample rate. The result is
/// scaled to a DC gain of `gain`.
pub fn lowpass(order: usize, fcut: f32, gain: f32) -> Result<Vec<f32>, ConfigError> {
    if order == 0 {
        return Err(ConfigError::InvalidParameter {
            name: "order",
            reason: "a windowed sinc needs at least two taps".to_string(),
        });
    }
    if !(fcut > 0.0 && fcut <= 0.5) {
        return Err(ConfigError::InvalidParameter {
            name: "fcut",
            reason: format!("{} is outside (0, 0.5]", fcut),
        });
    }

    let fcut = fcut as f64;
    let ncoeffs = order + 1;
    let center = (ncoeffs - 1) as f64 / 2.0;
    let mut coeffs: Vec<f32> = (0..ncoeffs)
        .map(|i| {
            let t = i as f64 - center;
            let sinc = if t == 0.0 {
                2.0 * fcut
            } else {
                (2.0 * PI * fcut * t).sin() / (PI * t)
            };
            let window = 0.54 - 0.46 * (2.0 * PI * i as f64 / order as f64).cos();
            (sinc * window) as f32
        })
        .collect();
    normalize_dcgain(&mut coeffs, gain);
    Ok(coeffs)
}

/// One tap of a root-raised-cosine filter at `t` samples from the center.
///
/// `fs` is the symbol rate relative to the sample rate. Both singular points
/// of the closed form use their analytic limits, so the response is
/// continuous in `t`.
pub fn rrc_tap(t: f64, fs: f64, rolloff: f64) -> f64 {
    let b = rolloff;
    if t == 0.0 {
        return fs.sqrt() * (1.0 - b + 4.0 * b / PI);
    }
    let t_t = t * fs;
    let den = 1.0 - (4.0 * b * t_t) * (4.0 * b * t_t);
    if den.abs() < RRC_SINGULARITY_EPS {
        let a = PI / (4.0 * b);
        b * (fs / 2.0).sqrt() * ((1.0 + 2.0 / PI) * a.sin() + (1.0 - 2.0 / PI) * a.cos())
    } else {
        fs.sqrt() * ((PI * t_t * (1.0 - b)).sin() + 4.0 * b * t_t * (PI * t_t * (1.0 + b)).cos())
            / (PI * t_t * den)
    }
}

/// Root-raised-cosine matched filter with an odd number of taps, `(order + 1) | 1`
pub fn root_raised_cosine(order: usize, fs: f32, rolloff: f32) -> Result<Vec<f32>, ConfigError> {
    if !(fs > 0.0 && fs <= 1.0) {
        return Err(ConfigError::InvalidParameter {
            name: "fs",
            reason: format!("symbol rate {} is outside (0, 1]", fs),
        });
    }
    if !(0.0..=1.0).contains(&rolloff) {
        return Err(ConfigError::InvalidParameter {
            name: "rolloff",
            reason: format!("{} is outside [0, 1]", rolloff),
        });
    }
    let ncoeffs = (order + 1) | 1;
    let half = (ncoeffs / 2) as f64;
    Ok((0..ncoeffs)
        .map(|i| rrc_tap(i as f64 - half, fs as f64, rolloff as f64) as f32)
        .collect())
}

/// Scale so that the sum of squares equals `gain²`. Returns the prior RMS gain.
pub fn normalize_power(coeffs: &mut [f32], gain: f32) -> f32 {
    let power: f64 = coeffs.iter().map(|&c| c as f64 * c as f64).sum();
    let current = power.sqrt() as f32;
    if current != 0.0 {
        let scale = gain / current;
        coeffs.iter_mut().for_each(|c| *c *= scale);
    }
    current
}

/// Scale so that the coefficients sum to `gain`. Returns the prior DC gain.
pub fn normalize_dcgain(coeffs: &mut [f32], gain: f32) -> f32 {
    let current = coeffs.iter().map(|&c| c as f64).sum::<f64>() as f32;
    if current != 0.0 {
        let scale = gain / current;
        coeffs.iter_mut().for_each(|c| *c *= scale);
    }
    current
}

/// Subtract the mean so the filter rejects DC. Returns the removed mean.
pub fn cancel_dcgain(coeffs: &mut [f32]) -> f32 {
    if coeffs.is_empty() {
        return 0.0;
    }
    let mean = (coeffs.iter().map(|&c| c as f64).sum::<f64>() / coeffs.len() as f64) as f32;
    coeffs.iter_mut().for_each(|c| *c -= mean);
    mean
}

/// Render coefficients as an Octave/Matlab assignment
pub fn dump_filter(name: &str, coeffs: &[f32]) -> String {
    let mut out = format!("{} = [", name);
    for (i, c) in coeffs.iter().enumerate() {
        let sep = if i == 0 { "" } else { "," };
        // Writing to a String cannot fail
        let _ = write!(out, "{} {:.8}", sep, c);
    }
    out.push_str(" ];\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_symmetric(coeffs: &[f32]) {
        let n = coeffs.len();
        for i in 0..n / 2 {
            assert!(
                (coeffs[i] - coeffs[n - 1 - i]).abs() < 1e-6,
                "Tap {} differs from its mirror",
                i
            );
        }
    }

    #[test]
    fn test_lowpass_shape() {
        let coeffs = lowpass(32, 0.1, 1.0).unwrap();
        assert_eq!(coeffs.len(), 33);
        assert_symmetric(&coeffs);

        let dc: f32 = coeffs.iter().sum();
        assert!((dc - 1.0).abs() < 1e-5, "DC gain {}", dc);
        let peak = coeffs.iter().cloned().fold(f32::MIN, f32::max);
        assert_eq!(peak, coeffs[16], "Center tap should be the largest");
    }

    #[test]
    fn test_lowpass_even_order_gain() {
        let coeffs = lowpass(15, 0.25, 2.0).unwrap();
        assert_eq!(coeffs.len(), 16);
        assert_symmetric(&coeffs);
        let dc: f32 = coeffs.iter().sum();
        assert!((dc - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_lowpass_rejects_bad_parameters() {
        assert!(lowpass(0, 0.1, 1.0).is_err());
        assert!(lowpass(8, 0.0, 1.0).is_err());
        assert!(lowpass(8, 0.6, 1.0).is_err());
    }

    #[test]
    fn test_rrc_odd_length_and_symmetry() {
        let coeffs = root_raised_cosine(64, 0.25, 0.35).unwrap();
        assert_eq!(coeffs.len(), 65);
        assert_symmetric(&coeffs);
        assert_eq!(root_raised_cosine(63, 0.25, 0.35).unwrap().len(), 65);

        let center = (0.25f64.sqrt() * (1.0 - 0.35 + 4.0 * 0.35 / PI)) as f32;
        assert!((coeffs[32] - center).abs() < 1e-6);
    }

    #[test]
    fn test_rrc_continuous_at_singular_point() {
        let (fs, b) = (0.25, 0.35);
        let t0 = 1.0 / (4.0 * b * fs);
        let limit = rrc_tap(t0, fs, b);
        for delta in [1e-4, -1e-4, 1e-6] {
            let near = rrc_tap(t0 + delta, fs, b);
            assert!(
                (near - limit).abs() < 1e-3 * limit.abs().max(1e-3),
                "Discontinuity at {}: {} vs {}",
                delta,
                near,
                limit
            );
        }
    }

    #[test]
    fn test_rrc_integer_singularity() {
        // 4 * 0.5 * 0.125 * 4 = 1: the singular point falls on a tap
        let coeffs = root_raised_cosine(16, 0.125, 0.5).unwrap();
        assert!(coeffs.iter().all(|c| c.is_finite()));
        let limit = rrc_tap(4.0, 0.125, 0.5) as f32;
        assert!((coeffs[8 + 4] - limit).abs() < 1e-6);
        assert!((rrc_tap(4.0 + 1e-5, 0.125, 0.5) as f32 - limit).abs() < 1e-3);
    }

    #[test]
    fn test_normalization_helpers() {
        let mut coeffs = vec![1.0, 2.0, 2.0];
        assert_eq!(normalize_power(&mut coeffs, 1.0), 3.0);
        let power: f32 = coeffs.iter().map(|c| c * c).sum();
        assert!((power - 1.0).abs() < 1e-6);

        let mut coeffs = vec![1.0, 3.0];
        assert_eq!(normalize_dcgain(&mut coeffs, 2.0), 4.0);
        assert_eq!(coeffs, vec![0.5, 1.5]);

        let mut coeffs = vec![1.0, 2.0, 6.0];
        assert_eq!(cancel_dcgain(&mut coeffs), 3.0);
        assert_eq!(coeffs, vec![-2.0, -1.0, 3.0]);

        let mut zeros = vec![0.0; 4];
        assert_eq!(normalize_dcgain(&mut zeros, 1.0), 0.0);
        assert_eq!(zeros, vec![0.0; 4]);
    }

    #[test]
    fn test_dump_filter() {
        assert_eq!(dump_filter("h", &[0.5, -0.25]), "h = [ 0.50000000, -0.25000000 ];\n");
    }
}
