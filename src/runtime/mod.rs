//! Runtime support for pipe-and-stage graphs

pub mod errors;
pub mod pipe;
pub mod reader;
pub mod scheduler;
pub mod stage;
pub mod writer;

pub use errors::{ConfigError, WorkError, WorkResult};
pub use pipe::{MAX_READERS, PipeBuf, PipeReport, PipeStats};
pub use reader::PipeReader;
pub use scheduler::{MAX_PIPES, MAX_STAGES, RunPolicy, Scheduler, SchedulerConfig};
pub use stage::Stage;
pub use writer::{OptionalWriter, PipeWriter};
