//! HDLC bit-level deframing and framing
//!
//! [`HdlcDecoder`] recovers frames from a packed bitstream (most significant
//! bit of each byte first). Frames are delimited by the flag `0x7e`, carry
//! zero-bit stuffing after five consecutive ones, and end with a CRC-16/X.25
//! frame check sequence sent least significant bit first.
//!
//! [`HdlcFramer`] produces the same line format, for loopback tests and
//! transmit chains.

use super::types::{DecodeErrors, Polarity};

/// Frame delimiter
pub const HDLC_FLAG: u8 = 0x7e;

const CRC16_INIT: u16 = 0xffff;
const CRC16_POLY: u16 = 0x8408;
/// Complemented residue left by a frame with a valid FCS
const CRC16_CHECK: u16 = 0x0f47;

lazy_static::lazy_static! {
    static ref CRC16_TABLE: [u16; 256] = {
        let mut table = [0u16; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            let mut crc = i as u16;
            for _ in 0..8 {
                crc = if crc & 1 != 0 { (crc >> 1) ^ CRC16_POLY } else { crc >> 1 };
            }
            *entry = crc;
        }
        table
    };
}

fn crc16_update(crc: u16, byte: u8) -> u16 {
    (crc >> 8) ^ CRC16_TABLE[((crc ^ byte as u16) & 0xff) as usize]
}

/// Frame check sequence (CRC-16/X.25) of `data`
pub fn crc16(data: &[u8]) -> u16 {
    !data.iter().fold(CRC16_INIT, |crc, &b| crc16_update(crc, b))
}

// ────────────────────────────────────────────────────────────────────────────
// Decoder
// ────────────────────────────────────────────────────────────────────────────

/// Result of one [`HdlcDecoder::decode`] call
#[derive(Debug)]
pub struct Decoded<'a> {
    /// Input bytes consumed
    pub consumed: usize,
    /// Payload of a verified frame, checksum removed
    pub frame: Option<&'a [u8]>,
    pub errors: DecodeErrors,
}

/// Bit-level HDLC state machine for one polarity
pub struct HdlcDecoder {
    min_frame_size: usize,
    max_frame_size: usize,
    polarity: Polarity,
    frame: Vec<u8>,
    frame_len: usize,
    shiftreg: u8,
    in_frame: bool,
    byte_out: u8,
    nbits_out: u32,
    crc: u16,
}

impl HdlcDecoder {
    /// `min_frame_size` and `max_frame_size` count the checksum bytes
    pub fn new(min_frame_size: usize, max_frame_size: usize, polarity: Polarity) -> Self {
        let mut decoder = Self {
            min_frame_size,
            max_frame_size,
            polarity,
            frame: vec![0; max_frame_size],
            frame_len: 0,
            shiftreg: 0,
            in_frame: false,
            byte_out: 0,
            nbits_out: 0,
            crc: CRC16_INIT,
        };
        decoder.reset();
        decoder
    }

    pub fn polarity(&self) -> Polarity {
        self.polarity
    }

    /// True while between an opening flag and the end of a frame
    pub fn in_frame(&self) -> bool {
        self.in_frame
    }

    /// Drop any partial frame and hunt for the next flag
    pub fn reset(&mut self) {
        self.shiftreg = 0;
        self.in_frame = false;
        self.begin_frame();
    }

    fn begin_frame(&mut self) {
        self.frame_len = 0;
        self.nbits_out = 0;
        self.crc = CRC16_INIT;
    }

    /// Validate the frame closed by a flag. Returns the payload length.
    fn end_frame(&mut self, errors: &mut DecodeErrors) -> Option<usize> {
        if self.frame_len == 0 {
            // Flag fill between frames
            return None;
        }
        if self.nbits_out != 7 {
            errors.framing += 1;
            return None;
        }
        let too_short = self.frame_len < self.min_frame_size.max(2);
        if too_short || self.crc ^ 0xffff != CRC16_CHECK {
            errors.framing += 1;
            if self.frame_len >= self.min_frame_size {
                errors.checksum += 1;
            }
            return None;
        }
        Some(self.frame_len - 2)
    }

    /// Consume input until a frame completes or the input runs out.
    ///
    /// Stops after the byte in which a verified frame closed, so the caller
    /// can take the frame before decoding resumes.
    pub fn decode(&mut self, input: &[u8]) -> Decoded<'_> {
        let mut errors = DecodeErrors::default();
        let mut completed = None;
        let mut consumed = 0;

        for &raw in input {
            let mut byte = raw ^ self.polarity.mask();
            for _ in 0..8 {
                let bit_in = byte & 0x80;
                byte <<= 1;
                self.shiftreg = (self.shiftreg >> 1) | bit_in;

                if !self.in_frame {
                    if self.shiftreg == HDLC_FLAG {
                        self.begin_frame();
                        self.in_frame = true;
                    }
                    continue;
                }

                if self.shiftreg & 0xfe == 0x7c {
                    // Stuffed zero
                    continue;
                }

                if self.shiftreg == HDLC_FLAG {
                    if let Some(len) = self.end_frame(&mut errors) {
                        completed = Some(len);
                    }
                    // At most 7 bits remain in this byte, so the completed
                    // frame cannot be overwritten before we return.
                    self.begin_frame();
                } else if self.shiftreg == 0xfe {
                    // Seven ones: abort
                    if self.frame_len > 0 {
                        errors.framing += 1;
                    }
                    self.in_frame = false;
                } else {
                    self.byte_out = (self.byte_out >> 1) | bit_in;
                    self.nbits_out += 1;
                    if self.nbits_out == 8 {
                        if self.frame_len < self.max_frame_size {
                            self.frame[self.frame_len] = self.byte_out;
                            self.crc = crc16_update(self.crc, self.byte_out);
                            self.frame_len += 1;
                        }
                        self.nbits_out = 0;
                    }
                }
            }
            consumed += 1;
            if completed.is_some() {
                break;
            }
        }

        Decoded {
            consumed,
            frame: completed.map(|len| &self.frame[..len]),
            errors,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Framer
// ────────────────────────────────────────────────────────────────────────────

/// Builds a packed HDLC bitstream, most significant bit of each byte first
pub struct HdlcFramer {
    bytes: Vec<u8>,
    acc: u8,
    nbits: u32,
    ones: u32,
    after_flag: bool,
}

impl HdlcFramer {
    pub fn new() -> Self {
        Self {
            bytes: Vec::new(),
            acc: 0,
            nbits: 0,
            ones: 0,
            after_flag: false,
        }
    }

    fn push_bit(&mut self, bit: bool) {
        self.acc = (self.acc << 1) | bit as u8;
        self.nbits += 1;
        if self.nbits == 8 {
            self.bytes.push(self.acc);
            self.acc = 0;
            self.nbits = 0;
        }
    }

    fn push_stuffed(&mut self, bit: bool) {
        self.push_bit(bit);
        if !bit {
            self.ones = 0;
            return;
        }
        self.ones += 1;
        if self.ones == 5 {
            self.push_bit(false);
            self.ones = 0;
        }
    }

    /// Emit a flag
    pub fn flag(&mut self) -> &mut Self {
        for i in 0..8 {
            self.push_bit((HDLC_FLAG >> i) & 1 != 0);
        }
        self.ones = 0;
        self.after_flag = true;
        self
    }

    /// Emit an opening flag unless one was just sent
    pub fn open(&mut self) -> &mut Self {
        if !self.after_flag {
            self.flag();
        }
        self
    }

    /// Emit bytes with bit stuffing, least significant bit first
    pub fn push_bytes(&mut self, data: &[u8]) -> &mut Self {
        for &byte in data {
            for i in 0..8 {
                self.push_stuffed((byte >> i) & 1 != 0);
            }
        }
        self.after_flag = false;
        self
    }

    /// Emit a complete frame: flag, payload, FCS, flag
    pub fn frame(&mut self, payload: &[u8]) -> &mut Self {
        let fcs = crc16(payload);
        self.open();
        self.push_bytes(payload);
        self.push_bytes(&fcs.to_le_bytes());
        self.flag()
    }

    /// Emit seven ones, aborting the frame in progress
    pub fn abort(&mut self) -> &mut Self {
        for _ in 0..7 {
            self.push_bit(true);
        }
        self.ones = 0;
        self.after_flag = false;
        self
    }

    /// Pad the last byte with idle ones and return the stream
    pub fn finish(mut self) -> Vec<u8> {
        while self.nbits != 0 {
            self.push_bit(true);
        }
        self.bytes
    }
}

impl Default for HdlcFramer {
    fn default() -> Self {
        Self::new()
    }
}
