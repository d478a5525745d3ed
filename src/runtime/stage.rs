//! Stage trait for cooperative processing
//!
//! Defines the [`Stage`] trait every processing unit implements. Stages hold
//! their own reader and writer handles; the scheduler only calls `run`.

pub use super::errors::{WorkError, WorkResult};

/// A processing unit driven by the scheduler.
///
/// - Sources have no readers and one or more writers
/// - Sinks have readers and no writers
/// - Processors have both
///
/// `run` must never block. It consumes whatever input is available, produces
/// as much output as fits, and returns. A run that can make no progress
/// returns without touching any pipe, which is what lets the scheduler detect
/// quiescence.
pub trait Stage {
    /// Get a debug name for this stage
    fn name(&self) -> &str;

    /// Process available input
    fn run(&mut self) -> WorkResult;

    /// Release resources when the pipeline is torn down
    fn shutdown(&mut self) {}
}
