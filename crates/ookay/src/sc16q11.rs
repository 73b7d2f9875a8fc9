//! # SC16Q11 sample conversion
//!
//! SDR hardware commonly delivers baseband samples as interleaved
//! 16-bit signed I/Q pairs in Q11 fixed-point format: twelve
//! significant bits, full-scale at ±2048. This module converts
//! between that wire format and the `Complex<f32>` representation
//! used by the rest of the pipeline.
//!
//! Conversion is pure and elementwise. After [`to_complexf()`], sample
//! magnitudes are approximately within `[-1.0, 1.0]`. The return trip
//! truncates toward zero, matching the hardware format's behavior; it
//! does not round.

use num_complex::Complex;

/// Fixed-point scale: Q11 full scale
const SCALE: f32 = 2048.0;

/// Convert interleaved SC16Q11 I/Q pairs to complex floats
///
/// `raw` holds interleaved `[i0, q0, i1, q1, ...]` values. Any trailing
/// unpaired value is ignored. Output samples are scaled by `1/2048`.
pub fn to_complexf(raw: &[i16]) -> Vec<Complex<f32>> {
    raw.chunks_exact(2)
        .map(|pair| Complex::new(pair[0] as f32 / SCALE, pair[1] as f32 / SCALE))
        .collect()
}

/// Convert complex floats to interleaved SC16Q11 I/Q pairs
///
/// Each component is scaled by `2048` and truncated (not rounded) to
/// `i16`. Values outside `[-1.0, 1.0)` saturate.
pub fn from_complexf(samples: &[Complex<f32>]) -> Vec<i16> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        out.push((sample.re * SCALE) as i16);
        out.push((sample.im * SCALE) as i16);
    }
    out
}

/// In-place variant of [`to_complexf()`]
///
/// Converts up to `raw.len() / 2` samples into `out`, stopping early
/// if `out` fills first. Returns the number of samples written.
pub fn to_complexf_buf(raw: &[i16], out: &mut [Complex<f32>]) -> usize {
    let count = (raw.len() / 2).min(out.len());
    for (pair, sample) in raw.chunks_exact(2).zip(out.iter_mut()) {
        *sample = Complex::new(pair[0] as f32 / SCALE, pair[1] as f32 / SCALE);
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_to_complexf() {
        let raw = [2048i16, -2048, 1024, 0];
        let samples = to_complexf(&raw);
        assert_eq!(2, samples.len());
        assert_approx_eq!(samples[0].re, 1.0f32);
        assert_approx_eq!(samples[0].im, -1.0f32);
        assert_approx_eq!(samples[1].re, 0.5f32);
        assert_approx_eq!(samples[1].im, 0.0f32);
    }

    #[test]
    fn test_from_complexf_truncates() {
        let samples = [Complex::new(0.4999f32, -0.4999f32)];
        let raw = from_complexf(&samples);

        // 0.4999 * 2048 = 1023.79, truncation keeps 1023
        assert_eq!(&[1023i16, -1023], raw.as_slice());
    }

    #[test]
    fn test_round_trip() {
        let raw = [0i16, 1, -1, 512, 2047, -2048];
        assert_eq!(raw.as_slice(), from_complexf(&to_complexf(&raw)).as_slice());
    }

    #[test]
    fn test_odd_length_ignored() {
        let raw = [100i16, 200, 300];
        assert_eq!(1, to_complexf(&raw).len());
    }

    #[test]
    fn test_to_complexf_buf_respects_output_length() {
        let raw = [2048i16, 0, 0, 2048, 1024, 1024];

        let mut out = vec![Complex::new(0.0f32, 0.0); 3];
        assert_eq!(3, to_complexf_buf(&raw, &mut out));
        assert_approx_eq!(out[2].re, 0.5f32);

        // output shorter than raw holds: count reflects what was written
        let mut short = vec![Complex::new(0.0f32, 0.0); 2];
        assert_eq!(2, to_complexf_buf(&raw, &mut short));
        assert_approx_eq!(short[0].re, 1.0f32);
        assert_approx_eq!(short[1].im, 1.0f32);
    }
}
