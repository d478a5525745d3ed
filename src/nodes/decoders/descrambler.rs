//! Self-synchronizing ETR 192 (V.35 style) scrambler and descrambler
//!
//! The register holds the last 20 line bits, so a descrambler started in any
//! state produces correct output once 20 scrambled bits have passed and its
//! run-length counter has re-aligned with the transmitter's.

use crate::runtime::{ConfigError, PipeBuf, PipeReader, PipeWriter, Stage, WorkResult};

const REGISTER_MASK: u32 = 0xf_ffff;

/// 20-bit feedback register with the 5-bit run-length counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SelfSyncLfsr {
    shiftreg: u32,
    counter: u32,
}

impl SelfSyncLfsr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an arbitrary register and counter
    pub fn with_state(shiftreg: u32, counter: u32) -> Self {
        Self {
            shiftreg: shiftreg & REGISTER_MASK,
            counter: counter & 31,
        }
    }

    /// Clock one bit. The register shifts in `bit_in` when descrambling and
    /// the output bit when scrambling.
    fn clock(&mut self, bit_in: u32, descramble: bool) -> u32 {
        let reset_counter = (self.shiftreg ^ (self.shiftreg >> 8)) & 1 != 0;
        let overflow = (self.counter == 31) as u32;
        let taps = (self.shiftreg >> 2) ^ (self.shiftreg >> 19);
        let bit_out = (taps ^ overflow ^ bit_in ^ 1) & 1;
        let line_bit = if descramble { bit_in } else { bit_out };
        self.shiftreg = ((self.shiftreg << 1) | line_bit) & REGISTER_MASK;
        self.counter = if reset_counter { 0 } else { (self.counter + 1) & 31 };
        bit_out
    }

    fn clock_byte(&mut self, byte: u8, descramble: bool) -> u8 {
        (0..8).rev().fold(0u8, |out, i| {
            let bit = self.clock(((byte >> i) & 1) as u32, descramble);
            (out << 1) | bit as u8
        })
    }

    /// Descramble one byte, most significant bit first
    pub fn descramble_byte(&mut self, byte: u8) -> u8 {
        self.clock_byte(byte, true)
    }

    /// Scramble one byte, most significant bit first
    pub fn scramble_byte(&mut self, byte: u8) -> u8 {
        self.clock_byte(byte, false)
    }
}

/// Direction of a [`LfsrStage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Scramble,
    Descramble,
}

/// Byte stage applying the self-synchronizing LFSR.
///
/// Built with [`LfsrStage::descrambler`] (scrambled bits in, clear bits out)
/// or [`LfsrStage::scrambler`], its exact inverse.
pub struct LfsrStage {
    name: String,
    direction: Direction,
    lfsr: SelfSyncLfsr,
    input: PipeReader<u8>,
    output: PipeWriter<u8>,
}

impl LfsrStage {
    fn build(
        input: &PipeBuf<u8>,
        output: &PipeBuf<u8>,
        direction: Direction,
        name: &str,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            name: name.to_string(),
            direction,
            lfsr: SelfSyncLfsr::new(),
            input: input.add_reader()?,
            output: output.writer()?,
        })
    }

    pub fn descrambler(input: &PipeBuf<u8>, output: &PipeBuf<u8>) -> Result<Self, ConfigError> {
        Self::build(input, output, Direction::Descramble, "descrambler")
    }

    pub fn scrambler(input: &PipeBuf<u8>, output: &PipeBuf<u8>) -> Result<Self, ConfigError> {
        Self::build(input, output, Direction::Scramble, "scrambler")
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_lfsr(mut self, lfsr: SelfSyncLfsr) -> Self {
        self.lfsr = lfsr;
        self
    }

    pub fn lfsr(&self) -> SelfSyncLfsr {
        self.lfsr
    }
}

impl Stage for LfsrStage {
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
            for (dst, &src) in out[..count].iter_mut().zip(&data[..count]) {
                *dst = match self.direction {
                    Direction::Descramble => self.lfsr.descramble_byte(src),
                    Direction::Scramble => self.lfsr.scramble_byte(src),
                };
            }
        }
        self.input.read(count)?;
        self.output.written(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Scheduler;

    fn pseudo_random(len: usize, seed: u32) -> Vec<u8> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 24) as u8
            })
            .collect()
    }

    #[test]
    fn test_descramble_inverts_scramble() {
        let clear = pseudo_random(500, 7);
        let mut tx = SelfSyncLfsr::new();
        let mut rx = SelfSyncLfsr::new();
        let line: Vec<u8> = clear.iter().map(|&b| tx.scramble_byte(b)).collect();
        let recovered: Vec<u8> = line.iter().map(|&b| rx.descramble_byte(b)).collect();
        assert_eq!(recovered, clear);
        assert_ne!(line, clear, "Scrambling should change the data");
    }

    #[test]
    fn test_self_synchronization() {
        let clear = pseudo_random(200, 11);
        let mut tx = SelfSyncLfsr::with_state(0x5_a5a5, 3);
        let mut rx = SelfSyncLfsr::with_state(0xf_0f0f, 30);
        let line: Vec<u8> = clear.iter().map(|&b| tx.scramble_byte(b)).collect();
        let recovered: Vec<u8> = line.iter().map(|&b| rx.descramble_byte(b)).collect();

        // Registers agree after 20 bits, counters at the next reset
        assert_eq!(&recovered[8..], &clear[8..]);
    }

    #[test]
    fn test_all_ones_scrambles_to_mixed_data() {
        let mut tx = SelfSyncLfsr::new();
        let line: Vec<u8> = (0..64).map(|_| tx.scramble_byte(0xff)).collect();
        assert!(line.iter().any(|&b| b != 0xff && b != 0x00));
    }

    #[test]
    fn test_stage_chain() {
        let clear = pseudo_random(3000, 3);
        let mut sch = Scheduler::new();
        let src = sch.pipe::<u8>("clear", 1024).unwrap();
        let line = sch.pipe::<u8>("line", 256).unwrap();
        let out = sch.pipe::<u8>("recovered", 4096).unwrap();
        let mut result = out.add_reader().unwrap();
        let mut feed = src.writer().unwrap();

        sch.add_stage(LfsrStage::scrambler(&src, &line).unwrap()).unwrap();
        sch.add_stage(LfsrStage::descrambler(&line, &out).unwrap()).unwrap();

        for block in clear.chunks(1000) {
            feed.write_slice(block).unwrap();
            sch.run().unwrap();
        }

        assert_eq!(&*result.rd(), &clear[..]);
        result.read(clear.len()).unwrap();
        assert_eq!(line.total_written(), 3000);
    }
}
