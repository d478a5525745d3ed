//! Cooperative dataflow runtime for software radio receivers
//!
//! This library provides typed pipes, a single-threaded scheduler that runs
//! processing stages until nothing moves, and the link-layer stages of a
//! digital receiver.
//!
//! # Architecture
//!
//! - **Pipes**: fixed-capacity buffers with one writer and up to eight readers
//! - **Stages**: non-blocking processing units driven by `run()`
//! - **Scheduler**: runs every stage in passes until the graph is quiescent
//! - **Decoders**: HDLC deframer with polarity recovery, ETR 192 descrambler
//! - **DSP**: filter design, FIR filtering and frequency shifting
//!
//! # Example
//!
//! ```
//! use rxflow::{LfsrStage, Scheduler};
//! use rxflow::nodes::{BufferReader, BufferWriter};
//!
//! let mut sch = Scheduler::new();
//! let scrambled = sch.pipe::<u8>("scrambled", 256)?;
//! let clear = sch.pipe::<u8>("clear", 256)?;
//! sch.add_stage(BufferReader::new(vec![0x55; 64], &scrambled)?)?;
//! sch.add_stage(LfsrStage::descrambler(&scrambled, &clear)?)?;
//! let sink = sch.add_stage(BufferWriter::new(&clear)?)?;
//! sch.run()?;
//! assert_eq!(sink.borrow().data().len(), 64);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod nodes;
pub mod runtime;

// Re-export decoder data types
pub use nodes::decoders::{DecodeErrors, DeframerStats, HdlcSyncConfig, Polarity};

// Re-export decoders
pub use nodes::decoders::{HdlcDecoder, HdlcFramer, HdlcSync, LfsrStage, SelfSyncLfsr};

// Re-export runtime components
pub use runtime::{
    ConfigError, OptionalWriter, PipeBuf, PipeReader, PipeReport, PipeWriter, RunPolicy,
    Scheduler, SchedulerConfig, Stage, WorkError, WorkResult,
};
