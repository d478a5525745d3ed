//! Processing stages
//!
//! Stages built on the pipe runtime:
//! - **Decoders**: HDLC deframing with polarity recovery, ETR 192 descrambling
//! - **Generic**: rate estimation, decimation, serialization, counting, memory and thread bridges
//! - **DSP**: filter design, FIR filtering, frequency shifting
//!
//! # Examples
//!
//! ```
//! use rxflow::nodes::{BufferReader, BufferWriter};
//! use rxflow::nodes::decoders::{HdlcFramer, HdlcSync, HdlcSyncConfig};
//! use rxflow::runtime::Scheduler;
//!
//! let mut framer = HdlcFramer::new();
//! framer.frame(b"hello");
//! for _ in 0..40 {
//!     framer.flag();
//! }
//!
//! let mut sch = Scheduler::new();
//! let bits = sch.pipe::<u8>("bits", 1024)?;
//! let frames = sch.pipe::<u8>("frames", 1024)?;
//! sch.add_stage(BufferReader::new(framer.finish(), &bits)?)?;
//! sch.add_stage(HdlcSync::new(&bits, &frames, HdlcSyncConfig::new(2, 32))?)?;
//! let sink = sch.add_stage(BufferWriter::new(&frames)?)?;
//! sch.run()?;
//!
//! assert_eq!(sink.borrow().data(), b"hello");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod decoders;
pub mod dsp;
mod generic;

pub use generic::{
    BufferReader, BufferWriter, ChannelSource, Decimator, ItemCounter, RATE_SAMPLE_SIZE,
    RateEstimator, Serializer,
};
