//! Common decoder types and enums

use crate::runtime::ConfigError;

/// Bit polarity of a received HDLC stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Polarity {
    /// Bits arrive as transmitted
    #[default]
    Normal,
    /// Every bit arrives complemented (e.g. after a 180° carrier phase ambiguity)
    Inverted,
}

impl Polarity {
    /// Both polarities, in decoder order
    pub const ALL: [Polarity; 2] = [Polarity::Normal, Polarity::Inverted];

    /// XOR mask applied to each received byte
    pub fn mask(self) -> u8 {
        match self {
            Polarity::Normal => 0x00,
            Polarity::Inverted => 0xff,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Polarity::Normal => 0,
            Polarity::Inverted => 1,
        }
    }
}

/// Errors seen by one decoder while consuming input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeErrors {
    /// Frames rejected for any reason: misalignment, short length, bad checksum
    pub framing: u32,
    /// Frames of plausible length whose checksum failed
    pub checksum: u32,
}

impl DecodeErrors {
    pub fn add(&mut self, other: DecodeErrors) {
        self.framing += other.framing;
        self.checksum += other.checksum;
    }
}

/// Cumulative counters of a deframer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeframerStats {
    /// Verified frames emitted
    pub frames: u64,
    pub checksum_errors: u64,
    pub framing_errors: u64,
    /// Raw stream bytes consumed
    pub hdlc_bytes: u64,
    /// Payload bytes emitted, headers excluded
    pub data_bytes: u64,
    pub polarity_switches: u64,
}

/// Parameters of the dual-polarity HDLC resynchronizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HdlcSyncConfig {
    /// Smallest accepted frame, checksum included
    pub min_frame_size: usize,
    /// Largest accepted frame, checksum included
    pub max_frame_size: usize,
    /// Chunks between polarity re-evaluations
    pub resync_period: usize,
    /// Re-evaluations remembered per decoder
    pub error_history: usize,
    /// Prefix each output frame with its 16-bit big-endian length
    pub header16: bool,
    pub initial_polarity: Polarity,
}

impl HdlcSyncConfig {
    pub fn new(min_frame_size: usize, max_frame_size: usize) -> Self {
        Self {
            min_frame_size,
            max_frame_size,
            resync_period: 32,
            error_history: 2,
            header16: false,
            initial_polarity: Polarity::Normal,
        }
    }

    pub fn with_resync_period(mut self, resync_period: usize) -> Self {
        self.resync_period = resync_period;
        self
    }

    pub fn with_error_history(mut self, error_history: usize) -> Self {
        self.error_history = error_history;
        self
    }

    pub fn with_header16(mut self, header16: bool) -> Self {
        self.header16 = header16;
        self
    }

    pub fn with_initial_polarity(mut self, polarity: Polarity) -> Self {
        self.initial_polarity = polarity;
        self
    }

    /// Input bytes processed per decoding step
    pub fn chunk_size(&self) -> usize {
        self.max_frame_size + 2
    }

    /// Output space the deframer needs before it consumes a chunk
    pub fn output_reserve(&self) -> usize {
        self.max_frame_size + self.chunk_size()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frame_size < 2 {
            return Err(ConfigError::InvalidParameter {
                name: "max_frame_size",
                reason: format!("{} cannot hold a checksum", self.max_frame_size),
            });
        }
        if self.min_frame_size > self.max_frame_size {
            return Err(ConfigError::InvalidParameter {
                name: "min_frame_size",
                reason: format!(
                    "{} exceeds max_frame_size {}",
                    self.min_frame_size, self.max_frame_size
                ),
            });
        }
        if self.header16 && self.max_frame_size - 2 > u16::MAX as usize {
            return Err(ConfigError::InvalidParameter {
                name: "max_frame_size",
                reason: "payload length does not fit a 16-bit header".to_string(),
            });
        }
        if self.resync_period == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "resync_period",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.error_history == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "error_history",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for HdlcSyncConfig {
    fn default() -> Self {
        Self::new(2, 278)
    }
}
