//! Generic utility stages
//!
//! Small element-type agnostic stages used to assemble receive chains:
//! ratio estimation, decimation, byte-level reinterpretation, counting, and
//! bridges between pipes and ordinary memory or other threads.

use std::mem::size_of;

use bytemuck::Pod;
use crossbeam_channel::{Receiver as ChannelReceiver, TryRecvError};
use tracing::debug;

use crate::runtime::{ConfigError, PipeBuf, PipeReader, PipeWriter, Stage, WorkResult};

// ────────────────────────────────────────────────────────────────────────────
// RateEstimator
// ────────────────────────────────────────────────────────────────────────────

/// Default window of a [`RateEstimator`], in denominator units
pub const RATE_SAMPLE_SIZE: f64 = 10_000.0;

/// Estimates `Σ numerator / Σ denominator` over windows of fixed size.
///
/// Typical use is an error rate from a pair of counter streams, such as the
/// checksum errors and frame counts of a deframer.
pub struct RateEstimator<T> {
    name: String,
    num: PipeReader<T>,
    den: PipeReader<T>,
    rate: PipeWriter<f32>,
    sample_size: f64,
    acc_num: f64,
    acc_den: f64,
}

impl<T: Copy + Default + Into<f64> + 'static> RateEstimator<T> {
    pub fn new(
        num: &PipeBuf<T>,
        den: &PipeBuf<T>,
        rate: &PipeBuf<f32>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            name: "rate_estimator".to_string(),
            num: num.add_reader()?,
            den: den.add_reader()?,
            rate: rate.writer()?,
            sample_size: RATE_SAMPLE_SIZE,
            acc_num: 0.0,
            acc_den: 0.0,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_sample_size(mut self, sample_size: f64) -> Self {
        self.sample_size = sample_size;
        self
    }
}

impl<T: Copy + Into<f64>> Stage for RateEstimator<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self) -> WorkResult {
        if self.rate.writable() < 1 {
            return Ok(());
        }
        let count = self.num.readable().min(self.den.readable());
        if count == 0 {
            return Ok(());
        }
        for (&n, &d) in self.num.rd()[..count].iter().zip(&self.den.rd()[..count]) {
            self.acc_num += Into::<f64>::into(n);
            self.acc_den += Into::<f64>::into(d);
        }
        self.num.read(count)?;
        self.den.read(count)?;

        if self.acc_den >= self.sample_size {
            self.rate.write((self.acc_num / self.acc_den) as f32)?;
            self.acc_num = 0.0;
            self.acc_den = 0.0;
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Decimator
// ────────────────────────────────────────────────────────────────────────────

/// Keeps the first element of every group of `factor`
pub struct Decimator<T> {
    name: String,
    factor: usize,
    input: PipeReader<T>,
    output: PipeWriter<T>,
}

impl<T: Copy + Default + 'static> Decimator<T> {
    pub fn new(input: &PipeBuf<T>, output: &PipeBuf<T>, factor: usize) -> Result<Self, ConfigError> {
        if factor == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "factor",
                reason: "decimation factor must be at least 1".to_string(),
            });
        }
        Ok(Self {
            name: "decimator".to_string(),
            factor,
            input: input.add_reader()?,
            output: output.writer()?,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T: Copy> Stage for Decimator<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self) -> WorkResult {
        let count = (self.input.readable() / self.factor).min(self.output.writable());
        if count == 0 {
            return Ok(());
        }
        {
            let data = self.input.rd();
            let mut out = self.output.wr();
            for (dst, src) in out[..count].iter_mut().zip(data.iter().step_by(self.factor)) {
                *dst = *src;
            }
        }
        self.input.read(count * self.factor)?;
        self.output.written(count)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Serializer
// ────────────────────────────────────────────────────────────────────────────

/// Reinterprets a stream of `Tin` as a stream of `Tout`, byte for byte.
///
/// Consumes `nin` inputs and produces `nout` outputs per batch, where the
/// smaller type's count is scaled up to cover the larger one.
pub struct Serializer<Tin, Tout> {
    name: String,
    nin: usize,
    nout: usize,
    input: PipeReader<Tin>,
    output: PipeWriter<Tout>,
}

impl<Tin, Tout> Serializer<Tin, Tout>
where
    Tin: Pod + Default,
    Tout: Pod + Default,
{
    pub fn new(input: &PipeBuf<Tin>, output: &PipeBuf<Tout>) -> Result<Self, ConfigError> {
        if size_of::<Tin>() == 0 || size_of::<Tout>() == 0 {
            return Err(ConfigError::IncompatibleSizes {
                input: size_of::<Tin>(),
                output: size_of::<Tout>(),
            });
        }
        let nin = (size_of::<Tout>() / size_of::<Tin>()).max(1);
        let nout = (size_of::<Tin>() / size_of::<Tout>()).max(1);
        if nin * size_of::<Tin>() != nout * size_of::<Tout>() {
            return Err(ConfigError::IncompatibleSizes {
                input: size_of::<Tin>(),
                output: size_of::<Tout>(),
            });
        }
        debug!("Serializer batches: {} in, {} out", nin, nout);
        Ok(Self {
            name: "serializer".to_string(),
            nin,
            nout,
            input: input.add_reader()?,
            output: output.writer_with_min(nout)?,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<Tin: Pod, Tout: Pod> Stage for Serializer<Tin, Tout> {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self) -> WorkResult {
        let batches = (self.input.readable() / self.nin).min(self.output.writable() / self.nout);
        if batches == 0 {
            return Ok(());
        }
        let (nin, nout) = (batches * self.nin, batches * self.nout);
        {
            let data = self.input.rd();
            let mut out = self.output.wr();
            bytemuck::cast_slice_mut::<Tout, u8>(&mut out[..nout])
                .copy_from_slice(bytemuck::cast_slice::<Tin, u8>(&data[..nin]));
        }
        self.input.read(nin)?;
        self.output.written(nout)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ItemCounter
// ────────────────────────────────────────────────────────────────────────────

/// Consumes everything and emits how many items each run saw
pub struct ItemCounter<T> {
    name: String,
    input: PipeReader<T>,
    output: PipeWriter<u64>,
}

impl<T: Copy + Default + 'static> ItemCounter<T> {
    pub fn new(input: &PipeBuf<T>, output: &PipeBuf<u64>) -> Result<Self, ConfigError> {
        Ok(Self {
            name: "item_counter".to_string(),
            input: input.add_reader()?,
            output: output.writer()?,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T: Copy> Stage for ItemCounter<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self) -> WorkResult {
        if self.output.writable() < 1 {
            return Ok(());
        }
        let count = self.input.readable();
        if count == 0 {
            return Ok(());
        }
        self.output.write(count as u64)?;
        self.input.read(count)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Memory bridges
// ────────────────────────────────────────────────────────────────────────────

/// Source stage feeding the contents of a vector into a pipe
pub struct BufferReader<T> {
    name: String,
    data: Vec<T>,
    pos: usize,
    output: PipeWriter<T>,
}

impl<T: Copy + Default + 'static> BufferReader<T> {
    pub fn new(data: Vec<T>, output: &PipeBuf<T>) -> Result<Self, ConfigError> {
        Ok(Self {
            name: "buffer_reader".to_string(),
            data,
            pos: 0,
            output: output.writer()?,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_done(&self) -> bool {
        self.pos == self.data.len()
    }
}

impl<T: Copy> Stage for BufferReader<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self) -> WorkResult {
        let count = (self.data.len() - self.pos).min(self.output.writable());
        if count == 0 {
            return Ok(());
        }
        self.output.wr()[..count].copy_from_slice(&self.data[self.pos..self.pos + count]);
        self.pos += count;
        self.output.written(count)
    }
}

/// Sink stage collecting a pipe's contents into memory
pub struct BufferWriter<T> {
    name: String,
    input: PipeReader<T>,
    data: Vec<T>,
    limit: Option<usize>,
}

impl<T: Copy + Default + 'static> BufferWriter<T> {
    pub fn new(input: &PipeBuf<T>) -> Result<Self, ConfigError> {
        Ok(Self {
            name: "buffer_writer".to_string(),
            input: input.add_reader()?,
            data: Vec::new(),
            limit: None,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Stop consuming once `limit` elements are held
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Hand over collected data, making room under the limit again
    pub fn take(&mut self) -> Vec<T> {
        std::mem::take(&mut self.data)
    }
}

impl<T: Copy> Stage for BufferWriter<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self) -> WorkResult {
        let room = self.limit.map_or(usize::MAX, |l| l.saturating_sub(self.data.len()));
        let count = self.input.readable().min(room);
        if count == 0 {
            return Ok(());
        }
        self.data.extend_from_slice(&self.input.rd()[..count]);
        self.input.read(count)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ChannelSource
// ────────────────────────────────────────────────────────────────────────────

/// Source stage draining batches sent from another thread.
///
/// Never blocks: a run moves whatever has already arrived and fits. Batches
/// larger than the pipe are delivered over several runs.
pub struct ChannelSource<T> {
    name: String,
    receiver: ChannelReceiver<Vec<T>>,
    pending: Vec<T>,
    pos: usize,
    disconnected: bool,
    output: PipeWriter<T>,
}

impl<T: Copy + Default + 'static> ChannelSource<T> {
    pub fn new(receiver: ChannelReceiver<Vec<T>>, output: &PipeBuf<T>) -> Result<Self, ConfigError> {
        Ok(Self {
            name: "channel_source".to_string(),
            receiver,
            pending: Vec::new(),
            pos: 0,
            disconnected: false,
            output: output.writer()?,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// True once every sender is gone and all received data was delivered
    pub fn is_finished(&self) -> bool {
        self.disconnected && self.pos == self.pending.len()
    }
}

impl<T: Copy> Stage for ChannelSource<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self) -> WorkResult {
        loop {
            if self.pos == self.pending.len() {
                match self.receiver.try_recv() {
                    Ok(batch) => {
                        self.pending = batch;
                        self.pos = 0;
                        continue;
                    }
                    Err(TryRecvError::Empty) => return Ok(()),
                    Err(TryRecvError::Disconnected) => {
                        if !self.disconnected {
                            debug!("[{}] All senders disconnected", self.name);
                        }
                        self.disconnected = true;
                        return Ok(());
                    }
                }
            }
            let count = (self.pending.len() - self.pos).min(self.output.writable());
            if count == 0 {
                return Ok(());
            }
            self.output.wr()[..count].copy_from_slice(&self.pending[self.pos..self.pos + count]);
            self.pos += count;
            self.output.written(count)?;
        }
    }

    fn shutdown(&mut self) {
        let dropped = self.pending.len() - self.pos + self.receiver.try_iter().map(|b| b.len()).sum::<usize>();
        if dropped > 0 {
            debug!("[{}] Dropping {} undelivered items", self.name, dropped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Scheduler;
    use std::thread;

    #[test]
    fn test_rate_estimator_windows() {
        let mut sch = Scheduler::new();
        let errors = sch.pipe::<u32>("errors", 64).unwrap();
        let frames = sch.pipe::<u32>("frames", 64).unwrap();
        let rate = sch.pipe::<f32>("rate", 8).unwrap();
        let mut rates = rate.add_reader().unwrap();

        sch.add_stage(
            RateEstimator::new(&errors, &frames, &rate)
                .unwrap()
                .with_sample_size(100.0),
        )
        .unwrap();
        let mut err_feed = errors.writer().unwrap();
        let mut frame_feed = frames.writer().unwrap();

        err_feed.write_slice(&[1, 0, 4]).unwrap();
        frame_feed.write_slice(&[40, 40]).unwrap();
        sch.run().unwrap();
        assert_eq!(rates.readable(), 0, "Window not complete yet");

        frame_feed.write_slice(&[20]).unwrap();
        sch.run().unwrap();
        assert_eq!(rates.readable(), 1);
        assert!((rates.rd()[0] - 0.05).abs() < 1e-6);
        rates.read(1).unwrap();

        err_feed.write_slice(&[0]).unwrap();
        frame_feed.write_slice(&[0]).unwrap();
        sch.run().unwrap();
        assert_eq!(rates.readable(), 0, "Accumulators restart after a window");
    }

    #[test]
    fn test_decimator() {
        let mut sch = Scheduler::new();
        let input = sch.pipe::<i32>("in", 32).unwrap();
        let output = sch.pipe::<i32>("out", 32).unwrap();
        let out = output.add_reader().unwrap();
        sch.add_stage(Decimator::new(&input, &output, 3).unwrap()).unwrap();

        let mut feed = input.writer().unwrap();
        feed.write_slice(&(0..10).collect::<Vec<_>>()).unwrap();
        sch.run().unwrap();
        assert_eq!(&*out.rd(), &[0, 3, 6]);
        assert_eq!(input.total_read(), 9, "Incomplete group stays queued");

        assert!(Decimator::new(&input, &PipeBuf::<i32>::new("x", 4), 0).is_err());
    }

    #[test]
    fn test_serializer_bytes_to_words() {
        let mut sch = Scheduler::new();
        let bytes = sch.pipe::<u8>("bytes", 32).unwrap();
        let words = sch.pipe::<u32>("words", 8).unwrap();
        let out = words.add_reader().unwrap();
        sch.add_stage(Serializer::new(&bytes, &words).unwrap()).unwrap();

        let mut feed = bytes.writer().unwrap();
        feed.write_slice(&[1, 0, 0, 0, 0, 0, 0, 1, 0xff]).unwrap();
        sch.run().unwrap();

        assert_eq!(
            &*out.rd(),
            &[u32::from_ne_bytes([1, 0, 0, 0]), u32::from_ne_bytes([0, 0, 0, 1])]
        );
        assert_eq!(bytes.total_read(), 8);
    }

    #[test]
    fn test_serializer_words_to_bytes() {
        let mut sch = Scheduler::new();
        let words = sch.pipe::<u16>("words", 8).unwrap();
        let bytes = sch.pipe::<u8>("bytes", 32).unwrap();
        let out = bytes.add_reader().unwrap();
        sch.add_stage(Serializer::new(&words, &bytes).unwrap()).unwrap();

        words.writer().unwrap().write_slice(&[0x0102, 0x0304]).unwrap();
        sch.run().unwrap();

        let mut expected = 0x0102u16.to_ne_bytes().to_vec();
        expected.extend_from_slice(&0x0304u16.to_ne_bytes());
        assert_eq!(&*out.rd(), &expected[..]);
    }

    #[test]
    fn test_serializer_iq_to_interleaved_floats() {
        use num_complex::Complex;

        let mut sch = Scheduler::new();
        let iq = sch.pipe::<Complex<f32>>("iq", 8).unwrap();
        let floats = sch.pipe::<f32>("floats", 16).unwrap();
        let out = floats.add_reader().unwrap();
        sch.add_stage(Serializer::new(&iq, &floats).unwrap()).unwrap();

        iq.writer()
            .unwrap()
            .write_slice(&[Complex::new(1.0, -1.0), Complex::new(0.5, 2.0)])
            .unwrap();
        sch.run().unwrap();
        assert_eq!(&*out.rd(), &[1.0, -1.0, 0.5, 2.0]);
    }

    #[test]
    fn test_serializer_rejects_incompatible_sizes() {
        let input = PipeBuf::<[u8; 3]>::new("triples", 8);
        let output = PipeBuf::<u16>::new("words", 8);
        assert_eq!(
            Serializer::new(&input, &output).err(),
            Some(ConfigError::IncompatibleSizes { input: 3, output: 2 })
        );
    }

    #[test]
    fn test_serializer_rejects_zero_sized_items() {
        let units = PipeBuf::<()>::new("units", 8);
        let bytes = PipeBuf::<u8>::new("bytes", 8);
        assert_eq!(
            Serializer::new(&units, &bytes).err(),
            Some(ConfigError::IncompatibleSizes { input: 0, output: 1 })
        );

        let bytes = PipeBuf::<u8>::new("bytes", 8);
        let units = PipeBuf::<()>::new("units", 8);
        assert_eq!(
            Serializer::new(&bytes, &units).err(),
            Some(ConfigError::IncompatibleSizes { input: 1, output: 0 })
        );
    }

    #[test]
    fn test_item_counter() {
        let mut sch = Scheduler::new();
        let input = sch.pipe::<u8>("in", 16).unwrap();
        let counts = sch.pipe::<u64>("counts", 4).unwrap();
        let out = counts.add_reader().unwrap();
        sch.add_stage(ItemCounter::new(&input, &counts).unwrap()).unwrap();

        let mut feed = input.writer().unwrap();
        feed.write_slice(&[0; 5]).unwrap();
        sch.run().unwrap();
        sch.run().unwrap();
        feed.write_slice(&[0; 2]).unwrap();
        sch.run().unwrap();
        assert_eq!(&*out.rd(), &[5, 2], "Idle runs emit nothing");
    }

    #[test]
    fn test_buffer_bridges() {
        let mut sch = Scheduler::new();
        let pipe = sch.pipe::<u16>("samples", 7).unwrap();
        let source = sch
            .add_stage(BufferReader::new((0..100).collect(), &pipe).unwrap())
            .unwrap();
        let sink = sch
            .add_stage(BufferWriter::new(&pipe).unwrap().with_limit(60))
            .unwrap();

        sch.run().unwrap();
        assert_eq!(sink.borrow().data().len(), 60);
        assert!(!source.borrow().is_done(), "Full sink throttles the source");

        let first = sink.borrow_mut().take();
        sch.run().unwrap();
        let mut all = first;
        all.extend_from_slice(sink.borrow().data());
        assert_eq!(all, (0..100).collect::<Vec<u16>>());
        assert!(source.borrow().is_done());
        assert_eq!(source.borrow().remaining(), 0);
    }

    #[test]
    fn test_channel_source_across_threads() {
        let (tx, rx) = crossbeam_channel::bounded::<Vec<u8>>(4);
        let producer = thread::spawn(move || {
            for i in 0..10u8 {
                tx.send(vec![i; 10]).unwrap();
            }
        });

        let mut sch = Scheduler::new();
        let pipe = sch.pipe::<u8>("capture", 16).unwrap();
        let source = sch.add_stage(ChannelSource::new(rx, &pipe).unwrap()).unwrap();
        let sink = sch.add_stage(BufferWriter::new(&pipe).unwrap()).unwrap();

        while !source.borrow().is_finished() {
            sch.run().unwrap();
            thread::yield_now();
        }
        producer.join().unwrap();
        sch.run().unwrap();

        let expected: Vec<u8> = (0..10u8).flat_map(|i| vec![i; 10]).collect();
        assert_eq!(sink.borrow().data(), &expected[..]);
        sch.shutdown();
    }
}
