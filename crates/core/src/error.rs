//! Error types shared across the chunklog crates

use thiserror::Error;

/// Result type for chunklog operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the persistence core
#[derive(Debug, Error)]
pub enum Error {
    /// `delete` matched zero chunks
    #[error("no chunks to delete in partition '{partition}'")]
    StreamDeleteFailed { partition: String },

    /// Backend constructed with an unusable configuration
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// Append attempted through a read-only stream handle
    #[error("stream '{partition}' is read-only")]
    ReadOnlyStream { partition: String },

    /// Payload codec failure
    #[error("codec error: {0}")]
    Codec(String),

    /// The position-collision retry loop gave up
    #[error("sequence allocator failed to converge after {attempts} attempts")]
    SequenceExhausted { attempts: u32 },

    /// Underlying storage failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Operation observed a cancelled token
    #[error("operation cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
