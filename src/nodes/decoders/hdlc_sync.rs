//! Dual-polarity HDLC deframer stage
//!
//! Without carrier phase information the receiver cannot know whether bits
//! arrive inverted. [`HdlcSync`] keeps one [`HdlcDecoder`] per polarity and
//! periodically lets both decode the same chunk of input. Framing errors are
//! kept in a short rolling history per decoder, and the decoder with the
//! fewest recent errors becomes the one whose frames are emitted.

use tracing::{info, trace};

use super::hdlc::HdlcDecoder;
use super::types::{DecodeErrors, DeframerStats, HdlcSyncConfig, Polarity};
use crate::runtime::{
    ConfigError, OptionalWriter, PipeBuf, PipeReader, PipeWriter, Stage, WorkResult,
};

struct SyncSlot {
    decoder: HdlcDecoder,
    errhist: Vec<u32>,
}

impl SyncSlot {
    fn total_errors(&self) -> u32 {
        self.errhist.iter().sum()
    }
}

/// Counters accumulated over one run, emitted on the status pipes
#[derive(Default)]
struct RunCounters {
    frames: u32,
    errors: DecodeErrors,
    hdlc_bytes: u32,
    data_bytes: u32,
}

/// Deframer stage with automatic polarity selection.
///
/// Reads packed bits (`u8`), writes verified frame payloads back to back,
/// optionally each preceded by a 16-bit big-endian length.
pub struct HdlcSync {
    name: String,
    config: HdlcSyncConfig,
    input: PipeReader<u8>,
    output: PipeWriter<u8>,
    lock_out: Option<PipeWriter<bool>>,
    framecount_out: Option<PipeWriter<u32>>,
    fcserrcount_out: Option<PipeWriter<u32>>,
    hdlcbytecount_out: Option<PipeWriter<u32>>,
    databytecount_out: Option<PipeWriter<u32>>,
    slots: [SyncSlot; 2],
    current: Polarity,
    resync_phase: usize,
    errslot: usize,
    locked: bool,
    stats: DeframerStats,
}

impl HdlcSync {
    pub fn new(
        input: &PipeBuf<u8>,
        output: &PipeBuf<u8>,
        config: HdlcSyncConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let slots = Polarity::ALL.map(|polarity| SyncSlot {
            decoder: HdlcDecoder::new(config.min_frame_size, config.max_frame_size, polarity),
            errhist: vec![0; config.error_history],
        });
        Ok(Self {
            name: "hdlc_sync".to_string(),
            input: input.add_reader()?,
            output: output.writer_with_min(config.output_reserve())?,
            lock_out: None,
            framecount_out: None,
            fcserrcount_out: None,
            hdlcbytecount_out: None,
            databytecount_out: None,
            slots,
            current: config.initial_polarity,
            resync_phase: 0,
            errslot: 0,
            locked: false,
            stats: DeframerStats::default(),
            config,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Receive the lock state whenever it changes.
    ///
    /// A run stops after the chunk that changed the lock, so an unlock
    /// followed by a relock shows up as two values.
    pub fn with_lock_output(mut self, pipe: &PipeBuf<bool>) -> Result<Self, ConfigError> {
        self.lock_out = Some(pipe.writer()?);
        Ok(self)
    }

    /// Receive the number of verified frames, per run that consumed input
    pub fn with_frame_count_output(mut self, pipe: &PipeBuf<u32>) -> Result<Self, ConfigError> {
        self.framecount_out = Some(pipe.writer()?);
        Ok(self)
    }

    /// Receive the number of checksum failures, per run that consumed input
    pub fn with_fcs_error_output(mut self, pipe: &PipeBuf<u32>) -> Result<Self, ConfigError> {
        self.fcserrcount_out = Some(pipe.writer()?);
        Ok(self)
    }

    /// Receive the number of stream bytes consumed, per run that consumed input
    pub fn with_hdlc_byte_output(mut self, pipe: &PipeBuf<u32>) -> Result<Self, ConfigError> {
        self.hdlcbytecount_out = Some(pipe.writer()?);
        Ok(self)
    }

    /// Receive the number of payload bytes emitted, per run that consumed input
    pub fn with_data_byte_output(mut self, pipe: &PipeBuf<u32>) -> Result<Self, ConfigError> {
        self.databytecount_out = Some(pipe.writer()?);
        Ok(self)
    }

    /// Polarity whose frames are currently emitted
    pub fn polarity(&self) -> Polarity {
        self.current
    }

    /// True once the selected decoder has produced a verified frame
    pub fn locked(&self) -> bool {
        self.locked
    }

    pub fn stats(&self) -> DeframerStats {
        self.stats
    }

    /// Framing errors remembered for one decoder
    pub fn error_history(&self, polarity: Polarity) -> u32 {
        self.slots[polarity.index()].total_errors()
    }

    pub fn config(&self) -> &HdlcSyncConfig {
        &self.config
    }

    fn process_chunk(&mut self, counters: &mut RunCounters) -> WorkResult {
        let chunk = self.config.chunk_size();
        let resync = self.resync_phase == 0;
        let current = self.current.index();
        {
            let guard = self.input.rd();
            let data = &guard[..chunk];

            for (s, slot) in self.slots.iter_mut().enumerate() {
                if s != current && !resync {
                    continue;
                }
                if s != current {
                    slot.decoder.reset();
                }
                if resync {
                    slot.errhist[self.errslot] = 0;
                }

                let mut pos = 0;
                while pos < chunk {
                    let decoded = slot.decoder.decode(&data[pos..]);
                    pos += decoded.consumed;
                    if resync {
                        slot.errhist[self.errslot] += decoded.errors.framing;
                    }
                    if s != current {
                        continue;
                    }
                    counters.errors.add(decoded.errors);
                    if let Some(frame) = decoded.frame {
                        trace!("[{}] Frame of {} bytes", self.name, frame.len());
                        if self.config.header16 {
                            self.output.write_slice(&(frame.len() as u16).to_be_bytes())?;
                        }
                        self.output.write_slice(frame)?;
                        counters.frames += 1;
                        counters.data_bytes += frame.len() as u32;
                        if !self.locked {
                            info!("[{}] Locked on {:?} polarity", self.name, self.current);
                            self.locked = true;
                        }
                    }
                }
            }
        }
        self.input.read(chunk)?;
        counters.hdlc_bytes += chunk as u32;

        if resync {
            self.errslot = (self.errslot + 1) % self.config.error_history;
            let mut best = current;
            for (s, slot) in self.slots.iter().enumerate() {
                if slot.total_errors() < self.slots[best].total_errors() {
                    best = s;
                }
            }
            if best != current {
                let next = Polarity::ALL[best];
                info!(
                    "[{}] Switching polarity {:?} ({} errors) -> {:?} ({} errors)",
                    self.name,
                    self.current,
                    self.slots[current].total_errors(),
                    next,
                    self.slots[best].total_errors()
                );
                self.current = next;
                self.locked = false;
                self.stats.polarity_switches += 1;
            }
        }
        self.resync_phase = (self.resync_phase + 1) % self.config.resync_period;
        Ok(())
    }
}

impl Stage for HdlcSync {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self) -> WorkResult {
        // Status pipes take at most one value each per run
        if !(self.lock_out.opt_writable(1)
            && self.framecount_out.opt_writable(1)
            && self.fcserrcount_out.opt_writable(1)
            && self.hdlcbytecount_out.opt_writable(1)
            && self.databytecount_out.opt_writable(1))
        {
            return Ok(());
        }

        let was_locked = self.locked;
        let mut counters = RunCounters::default();
        let mut chunks = 0;
        while self.input.readable() >= self.config.chunk_size()
            && self.output.writable() >= self.config.output_reserve()
        {
            self.process_chunk(&mut counters)?;
            chunks += 1;
            // One lock transition per run so each one reaches the lock pipe
            if self.locked != was_locked {
                break;
            }
        }
        if chunks == 0 {
            return Ok(());
        }

        self.stats.frames += counters.frames as u64;
        self.stats.checksum_errors += counters.errors.checksum as u64;
        self.stats.framing_errors += counters.errors.framing as u64;
        self.stats.hdlc_bytes += counters.hdlc_bytes as u64;
        self.stats.data_bytes += counters.data_bytes as u64;

        if self.locked != was_locked {
            self.lock_out.opt_write(self.locked)?;
        }
        self.framecount_out.opt_write(counters.frames)?;
        self.fcserrcount_out.opt_write(counters.errors.checksum)?;
        self.hdlcbytecount_out.opt_write(counters.hdlc_bytes)?;
        self.databytecount_out.opt_write(counters.data_bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::decoders::HdlcFramer;
    use crate::runtime::Scheduler;

    struct Harness {
        sch: Scheduler,
        input: PipeBuf<u8>,
        feed: PipeWriter<u8>,
        frames: PipeReader<u8>,
        lock: PipeReader<bool>,
        frame_counts: PipeReader<u32>,
        sync: std::rc::Rc<std::cell::RefCell<HdlcSync>>,
    }

    fn harness(config: HdlcSyncConfig) -> Harness {
        let mut sch = Scheduler::new();
        let input = sch.pipe::<u8>("bits", 8192).unwrap();
        let output = sch.pipe::<u8>("frames", 8192).unwrap();
        let lock_pipe = sch.pipe::<bool>("lock", 16).unwrap();
        let count_pipe = sch.pipe::<u32>("frame_count", 64).unwrap();
        let frames = output.add_reader().unwrap();
        let lock = lock_pipe.add_reader().unwrap();
        let frame_counts = count_pipe.add_reader().unwrap();
        let feed = input.writer().unwrap();
        let sync = HdlcSync::new(&input, &output, config)
            .unwrap()
            .with_lock_output(&lock_pipe)
            .unwrap()
            .with_frame_count_output(&count_pipe)
            .unwrap();
        let sync = sch.add_stage(sync).unwrap();
        Harness {
            sch,
            input,
            feed,
            frames,
            lock,
            frame_counts,
            sync,
        }
    }

    /// Frames followed by enough flag fill to flush the last chunk
    fn stream(payloads: &[Vec<u8>], fill: usize) -> Vec<u8> {
        let mut framer = HdlcFramer::new();
        for p in payloads {
            framer.frame(p);
        }
        for _ in 0..fill {
            framer.flag();
        }
        framer.finish()
    }

    fn drain(reader: &mut PipeReader<u8>) -> Vec<u8> {
        let data = reader.rd().to_vec();
        reader.read(data.len()).unwrap();
        data
    }

    #[test]
    fn test_config_validation() {
        let pipe = PipeBuf::<u8>::new("in", 64);
        let out = PipeBuf::<u8>::new("out", 64);
        let bad = HdlcSyncConfig::new(10, 4);
        assert!(matches!(
            HdlcSync::new(&pipe, &out, bad),
            Err(ConfigError::InvalidParameter { name: "min_frame_size", .. })
        ));

        // Output must hold max_frame_size + chunk_size
        let small_out = PipeBuf::<u8>::new("small", 10);
        assert!(HdlcSync::new(&pipe, &small_out, HdlcSyncConfig::new(2, 32)).is_err());
    }

    #[test]
    fn test_deframes_normal_polarity() {
        let payloads: Vec<Vec<u8>> = (0..10u8).map(|i| vec![i; 5 + i as usize]).collect();
        let mut h = harness(HdlcSyncConfig::new(2, 32));
        h.feed.write_slice(&stream(&payloads, 40)).unwrap();
        h.sch.run().unwrap();

        let expected: Vec<u8> = payloads.concat();
        assert_eq!(drain(&mut h.frames), expected);

        let sync = h.sync.borrow();
        assert!(sync.locked());
        assert_eq!(sync.polarity(), Polarity::Normal);
        assert_eq!(sync.stats().frames, 10);
        assert_eq!(sync.stats().framing_errors, 0);
        assert_eq!(sync.stats().polarity_switches, 0);
        drop(sync);

        assert_eq!(h.lock.rd().to_vec(), vec![true], "Lock emitted once");
        let counted: u32 = h.frame_counts.rd().iter().sum();
        assert_eq!(counted, 10);
    }

    #[test]
    fn test_header16_output() {
        let payloads = vec![b"abc".to_vec(), vec![0xaa; 300]];
        let mut h = harness(HdlcSyncConfig::new(2, 400).with_header16(true));
        h.feed.write_slice(&stream(&payloads, 410)).unwrap();
        h.sch.run().unwrap();

        let mut expected = vec![0x00, 0x03];
        expected.extend_from_slice(b"abc");
        expected.extend_from_slice(&[0x01, 0x2c]);
        expected.extend_from_slice(&[0xaa; 300]);
        assert_eq!(drain(&mut h.frames), expected);
    }

    #[test]
    fn test_switches_to_inverted_polarity() {
        // Complemented 0x81 looks like a flag to the non-inverting decoder
        let payloads: Vec<Vec<u8>> = (0..40u8)
            .map(|i| vec![0x81, 0x12, 0x34, 0x56, 0x81, i, 0x81, 0x9a, 0xbc, 0x81])
            .collect();
        let inverted: Vec<u8> = stream(&payloads, 40).iter().map(|b| !b).collect();

        let mut h = harness(HdlcSyncConfig::new(2, 32).with_resync_period(4));
        h.feed.write_slice(&inverted).unwrap();
        h.sch.run().unwrap();

        let sync = h.sync.borrow();
        assert_eq!(sync.polarity(), Polarity::Inverted);
        assert!(sync.locked(), "Inverted decoder should lock after the switch");
        assert_eq!(sync.stats().polarity_switches, 1);
        assert_eq!(sync.error_history(Polarity::Inverted), 0);
        assert!(sync.error_history(Polarity::Normal) > 0);
        let emitted = sync.stats().frames;
        drop(sync);

        // At most the frames overlapping the first chunk are lost
        assert!(emitted >= 36, "Only {} frames emitted", emitted);
        let data = drain(&mut h.frames);
        assert_eq!(data.len() as u64, emitted * 10);
        assert!(data.ends_with(&payloads[39]));
        assert_eq!(h.lock.rd().to_vec(), vec![true]);
    }

    #[test]
    fn test_lock_pipe_sees_unlock_before_relock() {
        let clean: Vec<Vec<u8>> = (0..10u8).map(|i| vec![i; 5 + i as usize]).collect();
        let flipped: Vec<Vec<u8>> = (0..40u8)
            .map(|i| vec![0x81, 0x12, 0x34, 0x56, 0x81, i, 0x81, 0x9a, 0xbc, 0x81])
            .collect();
        let mut line = stream(&clean, 40);
        line.extend(stream(&flipped, 40).iter().map(|b| !b));

        let mut h = harness(HdlcSyncConfig::new(2, 32).with_resync_period(4));
        h.feed.write_slice(&line).unwrap();
        h.sch.run().unwrap();

        let sync = h.sync.borrow();
        assert_eq!(sync.polarity(), Polarity::Inverted);
        assert_eq!(sync.stats().polarity_switches, 1);
        assert!(sync.locked());
        drop(sync);

        assert_eq!(h.lock.rd().to_vec(), vec![true, false, true]);
        assert_eq!(h.input.hash(), 2 * line.len() as u64 - line.len() as u64 % 34);
    }

    #[test]
    fn test_partial_chunk_waits_for_more_input() {
        let mut h = harness(HdlcSyncConfig::new(2, 32));
        h.feed.write_slice(&[0x7e; 20]).unwrap();
        let hash_before = h.sch.hash();
        h.sch.run().unwrap();
        assert_eq!(h.sch.hash(), hash_before, "Nothing moves below one chunk");
        assert_eq!(h.frame_counts.readable(), 0, "No status emitted while idle");

        h.feed.write_slice(&[0x7e; 20]).unwrap();
        h.sch.run().unwrap();
        assert_eq!(h.input.total_read(), 34);
        assert_eq!(h.frame_counts.rd().to_vec(), vec![0]);
    }
}
