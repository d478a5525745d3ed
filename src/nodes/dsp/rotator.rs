//! Frequency shifter for complex baseband
//!
//! Multiplies each sample by a unit phasor taken from a shared table of
//! 65 536 phases, so the frequency resolution is 1/65536 of the sample rate.

use std::f64::consts::TAU;

use num_complex::Complex;

use crate::runtime::{ConfigError, PipeBuf, PipeReader, PipeWriter, Stage, WorkResult};

const PHASE_BITS: u32 = 16;
const PHASE_MASK: u32 = (1 << PHASE_BITS) - 1;

lazy_static::lazy_static! {
    static ref PHASORS: Vec<Complex<f32>> = (0..1u32 << PHASE_BITS)
        .map(|i| {
            let phase = TAU * i as f64 / (1u32 << PHASE_BITS) as f64;
            Complex::new(phase.cos() as f32, phase.sin() as f32)
        })
        .collect();
}

/// Shift a `Complex<f32>` stream by a fixed frequency
pub struct Rotator {
    name: String,
    input: PipeReader<Complex<f32>>,
    output: PipeWriter<Complex<f32>>,
    phase: u32,
    step: u32,
}

impl Rotator {
    /// `freq` is in cycles per sample; negative values shift down
    pub fn new(
        input: &PipeBuf<Complex<f32>>,
        output: &PipeBuf<Complex<f32>>,
        freq: f32,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            name: "rotator".to_string(),
            input: input.add_reader()?,
            output: output.writer()?,
            phase: 0,
            step: Self::phase_step(freq),
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn phase_step(freq: f32) -> u32 {
        let steps = (freq as f64 * (1u32 << PHASE_BITS) as f64).round() as i64;
        (steps.rem_euclid(1 << PHASE_BITS)) as u32
    }

    /// Retune without a phase discontinuity
    pub fn set_freq(&mut self, freq: f32) {
        self.step = Self::phase_step(freq);
    }

    /// Frequency actually applied, after quantization
    pub fn freq(&self) -> f32 {
        let step = self.step as i64;
        let signed = if step > (PHASE_MASK as i64) / 2 { step - (1 << PHASE_BITS) } else { step };
        signed as f32 / (1u32 << PHASE_BITS) as f32
    }
}

impl Stage for Rotator {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self) -> WorkResult {
        let count = self.input.readable().min(self.output.writable());
        if count == 0 {
            return Ok(());
        }
        {
            let data = self.input.rd();
            let mut out = self.output.wr();
            for (dst, &x) in out[..count].iter_mut().zip(&data[..count]) {
                *dst = x * PHASORS[self.phase as usize];
                self.phase = (self.phase + self.step) & PHASE_MASK;
            }
        }
        self.input.read(count)?;
        self.output.written(count)
    }
}
