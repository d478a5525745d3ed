//! Decimating FIR filter stage

use std::ops::{Add, Mul};

use crate::runtime::{ConfigError, PipeBuf, PipeReader, PipeWriter, Stage, WorkResult};

/// Sample types a real-coefficient FIR can filter
pub trait FirSample: Copy + Default + Add<Output = Self> + Mul<f32, Output = Self> + 'static {}

impl<T> FirSample for T where T: Copy + Default + Add<Output = T> + Mul<f32, Output = T> + 'static {}

/// FIR filter with real coefficients, keeping one output every `decimation` inputs.
///
/// Works on `f32` and `Complex<f32>` streams. Output `k` is the convolution
/// of the coefficients with the `coeffs.len()` inputs starting at
/// `k * decimation`.
pub struct FirFilter<T> {
    name: String,
    coeffs: Vec<f32>,
    decimation: usize,
    input: PipeReader<T>,
    output: PipeWriter<T>,
}

impl<T: FirSample> FirFilter<T> {
    pub fn new(
        input: &PipeBuf<T>,
        output: &PipeBuf<T>,
        coeffs: Vec<f32>,
        decimation: usize,
    ) -> Result<Self, ConfigError> {
        if coeffs.is_empty() {
            return Err(ConfigError::InvalidParameter {
                name: "coeffs",
                reason: "filter needs at least one tap".to_string(),
            });
        }
        if decimation == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "decimation",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(Self {
            name: "fir_filter".to_string(),
            coeffs,
            decimation,
            input: input.add_reader()?,
            output: output.writer()?,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn coeffs(&self) -> &[f32] {
        &self.coeffs
    }
}

impl<T: FirSample> Stage for FirFilter<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self) -> WorkResult {
        let ntaps = self.coeffs.len();
        let readable = self.input.readable();
        if readable < ntaps {
            return Ok(());
        }
        let count = ((readable - ntaps) / self.decimation + 1)
            .min(readable / self.decimation)
            .min(self.output.writable());
        if count == 0 {
            return Ok(());
        }
        {
            let data = self.input.rd();
            let mut out = self.output.wr();
            for (k, dst) in out[..count].iter_mut().enumerate() {
                let window = &data[k * self.decimation..k * self.decimation + ntaps];
                *dst = self
                    .coeffs
                    .iter()
                    .zip(window.iter().rev())
                    .fold(T::default(), |acc, (&c, &x)| acc + x * c);
            }
        }
        self.input.read(count * self.decimation)?;
        self.output.written(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::dsp::filtergen;
    use crate::runtime::Scheduler;
    use num_complex::Complex;

    #[test]
    fn test_moving_average() {
        let mut sch = Scheduler::new();
        let input = sch.pipe::<f32>("in", 16).unwrap();
        let output = sch.pipe::<f32>("out", 16).unwrap();
        let out = output.add_reader().unwrap();
        sch.add_stage(FirFilter::new(&input, &output, vec![0.5, 0.5], 1).unwrap())
            .unwrap();

        input.writer().unwrap().write_slice(&[1.0, 3.0, 5.0, 7.0]).unwrap();
        sch.run().unwrap();
        assert_eq!(&*out.rd(), &[2.0, 4.0, 6.0]);
        assert_eq!(input.total_read(), 3, "Last tap's history stays queued");
    }

    #[test]
    fn test_tap_order_and_decimation() {
        let mut sch = Scheduler::new();
        let input = sch.pipe::<f32>("in", 16).unwrap();
        let output = sch.pipe::<f32>("out", 16).unwrap();
        let out = output.add_reader().unwrap();
        // coeffs[0] weighs the newest sample of each window
        sch.add_stage(FirFilter::new(&input, &output, vec![1.0, 0.0, 0.0], 2).unwrap())
            .unwrap();

        input
            .writer()
            .unwrap()
            .write_slice(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
            .unwrap();
        sch.run().unwrap();
        assert_eq!(&*out.rd(), &[2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_complex_lowpass_passes_dc() {
        let coeffs = filtergen::lowpass(16, 0.1, 1.0).unwrap();
        let mut sch = Scheduler::new();
        let input = sch.pipe::<Complex<f32>>("iq", 128).unwrap();
        let output = sch.pipe::<Complex<f32>>("filtered", 128).unwrap();
        let out = output.add_reader().unwrap();
        sch.add_stage(FirFilter::new(&input, &output, coeffs, 4).unwrap())
            .unwrap();

        input
            .writer()
            .unwrap()
            .write_slice(&[Complex::new(0.5, -0.25); 100])
            .unwrap();
        sch.run().unwrap();

        let filtered = out.rd();
        assert_eq!(filtered.len(), 21);
        for y in filtered.iter() {
            assert!((y - Complex::new(0.5, -0.25)).norm() < 1e-5);
        }
    }

    #[test]
    fn test_rejects_empty_filter() {
        let input = PipeBuf::<f32>::new("in", 4);
        let output = PipeBuf::<f32>::new("out", 4);
        assert!(FirFilter::new(&input, &output, Vec::new(), 1).is_err());
        assert!(FirFilter::new(&input, &output, vec![1.0], 0).is_err());
    }
}
