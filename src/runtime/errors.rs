//! Error types for the runtime system
//!
//! Two classes of failure exist:
//! - [`ConfigError`]: defects in how a pipeline was assembled, reported at construction.
//! - [`WorkError`]: programming errors detected while a stage runs (pipe overflow or
//!   underflow). Bad input data is never an error; stages count it instead.

/// Error type for pipeline construction
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Too many pipes: limit is {0}")]
    TooManyPipes(usize),

    #[error("Too many stages: limit is {0}")]
    TooManyStages(usize),

    #[error("Too many readers on pipe '{pipe}': limit is {limit}")]
    TooManyReaders { pipe: String, limit: usize },

    #[error("Pipe '{0}' already has a writer")]
    WriterAlreadyAttached(String),

    #[error("Incompatible element sizes: {input} bytes in, {output} bytes out")]
    IncompatibleSizes { input: usize, output: usize },

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// Error type for stage run operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkError {
    #[error("Overflow on pipe '{pipe}': wrote {requested} with {available} writable")]
    Overflow {
        pipe: String,
        requested: usize,
        available: usize,
    },

    #[error("Underflow on pipe '{pipe}': read {requested} with {available} readable")]
    Underflow {
        pipe: String,
        requested: usize,
        available: usize,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Stage-specific error: {0}")]
    NodeError(String),
}

/// Result type for stage run functions
pub type WorkResult<T = ()> = Result<T, WorkError>;
