//! # Decimating FIR filter bank
//!
//! An [`FirFilter`] is a cascade of FIR stages. Each stage owns its own
//! tap set and decimation factor; the output of stage *i* feeds stage
//! *i + 1*, and the total decimation of the cascade is the product of
//! the per-stage factors.
//!
//! Each stage keeps its sample history in a buffer that is twice as
//! long as the tap set, with every incoming sample written at two
//! mirrored insertion points. The most recent `num_taps` samples are
//! therefore always available as one contiguous window ending at the
//! second insertion point, and a "shift" is just advancing two indices.
//! This trades 2× history memory for zero data movement per sample.
//!
//! Taps are stored *reversed* (as in GNU Octave's `filter()`, read
//! back-to-front), so the convolution is a forward multiply-accumulate
//! over the history window.
//!
//! Filters run in a streaming fashion: history persists across
//! [`process()`](FirFilter::process) calls, and a cascade produces
//! bit-identical output whether it is driven in one large call or many
//! small ones. [`reset()`](FirFilter::reset) returns every stage to
//! zero initial conditions without touching the configuration.

use nalgebra::DVector;
use num_complex::Complex;
use num_traits::Zero;
use thiserror::Error;

use log::trace;

/// Description of a single FIR stage
///
/// The filter description loader produces one of these per stage.
/// `decimation` must be at least 1; `taps` must be non-empty.
#[derive(Clone, Debug, PartialEq)]
pub struct FirStageDesc {
    /// Keep every `decimation`-th filtered sample
    pub decimation: u32,

    /// FIR impulse response, in natural (Octave) order
    pub taps: Vec<f32>,
}

/// Errors raised while building or driving an [`FirFilter`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    /// The stage list was empty
    #[error("filter must have one or more stages")]
    NoStages,

    /// A stage had an empty tap array
    #[error("filter stage {0} must have one or more taps")]
    NoTaps(usize),

    /// A stage had a decimation factor of zero
    #[error("filter stage {0} has a decimation factor of zero")]
    BadDecimation(usize),

    /// More input samples than the filter was sized for
    #[error("input of {got} samples exceeds the configured maximum of {max}")]
    InputTooLong { got: usize, max: usize },

    /// The caller's output buffer cannot hold the worst-case output
    #[error("output buffer holds {got} samples but {needed} are required")]
    OutputTooSmall { needed: usize, got: usize },
}

/// One FIR stage: taps, decimation, and persistent history
#[derive(Clone, Debug)]
struct Stage {
    decimation: u32,

    // taps, stored reversed
    rev_taps: DVector<f32>,

    // decimation countdown; an output is produced when it reaches zero
    count: u32,

    // doubled history buffer, 2 * num_taps samples
    state: Vec<Complex<f32>>,

    // mirrored insertion indices; ins2 = ins1 + num_taps
    ins1: usize,
    ins2: usize,

    // inter-stage output buffer
    output: Vec<Complex<f32>>,
}

impl Stage {
    fn num_taps(&self) -> usize {
        self.rev_taps.len()
    }

    fn reset(&mut self) {
        self.state.fill(Complex::zero());
        self.output.fill(Complex::zero());
        self.count = self.decimation;
        self.ins1 = 0;
        self.ins2 = self.num_taps();
    }

    /// Insert one sample; emit a filtered sample if the countdown expires
    fn update(&mut self, sample: Complex<f32>) -> Option<Complex<f32>> {
        self.state[self.ins1] = sample;
        self.state[self.ins2] = sample;

        self.count -= 1;

        let out = if self.count == 0 {
            let num_taps = self.num_taps();
            let window = &self.state[self.ins2 + 1 - num_taps..=self.ins2];

            let mut acc = Complex::zero();
            for (sample, coeff) in window.iter().zip(self.rev_taps.iter()) {
                acc += *sample * *coeff;
            }

            self.count = self.decimation;
            Some(acc)
        } else {
            None
        };

        self.ins1 += 1;
        self.ins2 += 1;
        if self.ins2 == self.state.len() {
            self.ins1 = 0;
            self.ins2 = self.num_taps();
        }

        out
    }

    /// Feed `input` through this stage, writing into `output`
    ///
    /// Returns the number of output samples produced. The caller
    /// guarantees `output` can hold `ceil(input.len() / decimation)`.
    fn run(&mut self, input: &[Complex<f32>], output: &mut [Complex<f32>]) -> usize {
        let mut num_out = 0;
        for &sample in input {
            if let Some(filtered) = self.update(sample) {
                output[num_out] = filtered;
                num_out += 1;
            }
        }
        num_out
    }
}

/// Multi-stage decimating FIR filter
///
/// Built from an ordered list of [`FirStageDesc`] and a maximum
/// per-call input length. All buffers are allocated ahead of time;
/// [`process()`](FirFilter::process) performs no allocation.
#[derive(Clone, Debug)]
pub struct FirFilter {
    stages: Vec<Stage>,
    max_input: usize,
    total_decimation: u32,
}

impl FirFilter {
    /// Build a filter cascade
    ///
    /// `max_input` is the largest number of samples a single
    /// [`process()`](FirFilter::process) call will be given; it sizes
    /// the inter-stage buffers. Fails if the stage list is empty, a
    /// stage has no taps, or a decimation factor is zero.
    pub fn new(descs: &[FirStageDesc], max_input: usize) -> Result<Self, FilterError> {
        if descs.is_empty() {
            return Err(FilterError::NoStages);
        }

        let mut stages = Vec::with_capacity(descs.len());
        let mut cumulative: usize = 1;

        for (index, desc) in descs.iter().enumerate() {
            if desc.taps.is_empty() {
                return Err(FilterError::NoTaps(index + 1));
            }
            if desc.decimation == 0 {
                return Err(FilterError::BadDecimation(index + 1));
            }

            cumulative *= desc.decimation as usize;

            // worst case for this stage: ceil(max_input / cumulative)
            let output_len = (max_input + cumulative - 1) / cumulative;
            trace!("stage {} output buffer length: {}", index + 1, output_len);

            let num_taps = desc.taps.len();
            stages.push(Stage {
                decimation: desc.decimation,
                rev_taps: DVector::from_iterator(num_taps, desc.taps.iter().rev().copied()),
                count: desc.decimation,
                state: vec![Complex::zero(); 2 * num_taps],
                ins1: 0,
                ins2: num_taps,
                output: vec![Complex::zero(); output_len],
            });
        }

        let mut filter = FirFilter {
            stages,
            max_input,
            total_decimation: cumulative as u32,
        };
        filter.reset();

        Ok(filter)
    }

    /// Reset all stages to zero initial conditions
    ///
    /// Clears histories and output buffers and restarts every
    /// decimation countdown. Idempotent; the configuration is
    /// untouched.
    pub fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.reset();
        }
    }

    /// Product of all stage decimation factors
    ///
    /// Callers size their own output buffers from this: a `process()`
    /// call with `n` input samples produces at most
    /// `ceil(n / total_decimation)` output samples.
    pub fn total_decimation(&self) -> u32 {
        self.total_decimation
    }

    /// Largest input length a single `process()` call accepts
    pub fn max_input(&self) -> usize {
        self.max_input
    }

    /// Filter and decimate a block of samples
    ///
    /// Streams `input` through every stage in order and writes the
    /// final stage's output into `output`, returning the number of
    /// samples produced. Intermediate stages may emit fewer samples
    /// than they consume; only the returned count of `output` samples
    /// is meaningful.
    ///
    /// `input` must not exceed `max_input`, and `output` must hold at
    /// least `ceil(input.len() / total_decimation)` samples.
    pub fn process(
        &mut self,
        input: &[Complex<f32>],
        output: &mut [Complex<f32>],
    ) -> Result<usize, FilterError> {
        if input.len() > self.max_input {
            return Err(FilterError::InputTooLong {
                got: input.len(),
                max: self.max_input,
            });
        }

        let total = self.total_decimation as usize;
        let needed = (input.len() + total - 1) / total;
        if output.len() < needed {
            return Err(FilterError::OutputTooSmall {
                needed,
                got: output.len(),
            });
        }

        let num_stages = self.stages.len();
        let mut num = input.len();

        for index in 0..num_stages {
            let (done, rest) = self.stages.split_at_mut(index);
            let stage = &mut rest[0];

            let stage_input: &[Complex<f32>] = if index == 0 {
                &input[..num]
            } else {
                &done[index - 1].output[..num]
            };

            if index == num_stages - 1 {
                num = stage.run(stage_input, output);
            } else {
                // detach the stage's output buffer so the stage may
                // borrow mutably while the previous stage's buffer is
                // borrowed as its input
                let mut buf = std::mem::take(&mut stage.output);
                num = stage.run(stage_input, &mut buf);
                stage.output = buf;
            }

            trace!("stage {}: {} in, {} out", index + 1, stage_input.len(), num);
        }

        Ok(num)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_approx_eq::assert_approx_eq;

    fn real(values: &[f32]) -> Vec<Complex<f32>> {
        values.iter().map(|&v| Complex::new(v, 0.0)).collect()
    }

    fn stage(decimation: u32, taps: &[f32]) -> FirStageDesc {
        FirStageDesc {
            decimation,
            taps: taps.to_vec(),
        }
    }

    #[test]
    fn test_bad_configs() {
        assert_eq!(FilterError::NoStages, FirFilter::new(&[], 64).unwrap_err());
        assert_eq!(
            FilterError::NoTaps(1),
            FirFilter::new(&[stage(1, &[])], 64).unwrap_err()
        );
        assert_eq!(
            FilterError::BadDecimation(2),
            FirFilter::new(&[stage(1, &[1.0]), stage(0, &[1.0])], 64).unwrap_err()
        );
    }

    #[test]
    fn test_identity() {
        // one stage, unit impulse, no decimation: output == input
        let mut filter = FirFilter::new(&[stage(1, &[1.0])], 16).unwrap();
        assert_eq!(1, filter.total_decimation());

        let input = real(&[0.25, -0.5, 1.0, 0.0, 0.75]);
        let mut output = vec![Complex::zero(); input.len()];

        let count = filter.process(&input, &mut output).unwrap();
        assert_eq!(input.len(), count);
        for (inp, out) in input.iter().zip(output.iter()) {
            assert_approx_eq!(inp.re, out.re);
            assert_approx_eq!(inp.im, out.im);
        }
    }

    #[test]
    fn test_decimate_by_two_boxcar() {
        // decimation=2, taps=[0.5, 0.5]: first output at the second
        // input sample is the average of samples one and two
        let mut filter = FirFilter::new(&[stage(2, &[0.5, 0.5])], 8).unwrap();

        let input = real(&[1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0]);
        let mut output = vec![Complex::zero(); 4];

        let count = filter.process(&input, &mut output).unwrap();
        assert_eq!(4, count);

        let expect = [1.0f32, 0.0, 1.0, 0.0];
        for (out, exp) in output.iter().zip(expect.iter()) {
            assert_approx_eq!(out.re, *exp);
            assert_approx_eq!(out.im, 0.0f32);
        }
    }

    #[test]
    fn test_total_decimation_and_output_count() {
        let descs = [stage(2, &[1.0]), stage(3, &[1.0, 0.0]), stage(1, &[1.0])];
        let mut filter = FirFilter::new(&descs, 60).unwrap();
        assert_eq!(6, filter.total_decimation());

        // constant input: output count accumulates to floor(N / 6)
        // across repeated calls
        let input = real(&[1.0; 60]);
        let mut output = vec![Complex::zero(); 10];
        let mut total = 0;
        for _ in 0..4 {
            total += filter.process(&input, &mut output).unwrap();
        }
        assert_eq!(240 / 6, total);

        filter.reset();
        let count = filter.process(&input, &mut output).unwrap();
        assert_eq!(10, count);
    }

    #[test]
    fn test_streaming_equivalence() {
        // a cascade produces bit-identical output whether driven in
        // one large call or many small calls
        let descs = [stage(2, &[0.3, 0.5, 0.2]), stage(2, &[0.9, 0.1])];

        let input: Vec<Complex<f32>> = (0..96)
            .map(|i| Complex::new(((i * 7 % 13) as f32) / 13.0, ((i * 5 % 11) as f32) / 11.0))
            .collect();

        let mut one_call = FirFilter::new(&descs, input.len()).unwrap();
        let mut expect = vec![Complex::zero(); input.len()];
        let expect_count = one_call.process(&input, &mut expect).unwrap();

        let mut chunked = FirFilter::new(&descs, input.len()).unwrap();
        let mut got = Vec::new();
        let mut buf = vec![Complex::zero(); input.len()];
        for chunk in input.chunks(7) {
            let count = chunked.process(chunk, &mut buf).unwrap();
            got.extend_from_slice(&buf[..count]);
        }

        assert_eq!(expect_count, got.len());
        for (exp, out) in expect[..expect_count].iter().zip(got.iter()) {
            assert_eq!(exp, out);
        }
    }

    #[test]
    fn test_buffer_contracts_checked() {
        let mut filter = FirFilter::new(&[stage(2, &[1.0])], 8).unwrap();

        let input = real(&[1.0; 9]);
        let mut output = vec![Complex::zero(); 8];
        assert!(matches!(
            filter.process(&input, &mut output),
            Err(FilterError::InputTooLong { got: 9, max: 8 })
        ));

        let input = real(&[1.0; 8]);
        let mut short = vec![Complex::zero(); 3];
        assert!(matches!(
            filter.process(&input, &mut short),
            Err(FilterError::OutputTooSmall { needed: 4, got: 3 })
        ));
    }
}
