//! Error types for the metrics server

use thiserror::Error;

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for request handling
#[derive(Error, Debug)]
pub enum Error {
    /// Requested database is not in the registry
    #[error("database not found")]
    DatabaseNotFound,

    /// Requested output resolution is not a positive multiple of the
    /// database's storage resolution
    #[error("resolution is not valid")]
    Resolution,

    /// Database name contains path-traversal or otherwise illegal characters
    #[error("invalid database name: {0:?}")]
    Name(String),

    /// Request bytes could not be decoded
    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Error surfaced by the epoch store
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// IO error outside the store (base directory handling)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A batch was terminated early by a sub-handler error.
    /// Side effects of earlier sub-requests are not rolled back.
    #[error("batch aborted at request {index}: {source}")]
    BatchAborted {
        /// Position of the failing sub-request in the batch
        index: usize,
        /// The first underlying error
        source: Box<Error>,
    },
}

/// Errors surfaced by the epoch store
#[derive(Error, Debug)]
pub enum StoreError {
    /// IO operation failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// On-disk state is not readable (bad metadata, truncated index, ...)
    #[error("corrupt store: {0}")]
    Corrupt(String),

    /// Store options violate an invariant (zero resolution, oversized
    /// segments, duration not a multiple of resolution, ...)
    #[error("invalid store options: {0}")]
    InvalidOptions(String),

    /// Write addressed an epoch outside the read-write window
    #[error("epoch starting at {epoch}ns is not writable")]
    ReadOnlyEpoch {
        /// Start timestamp of the addressed epoch
        epoch: i64,
    },

    /// Field tuple is empty or contains an empty string where a value
    /// is required
    #[error("invalid field tuple: {0}")]
    Fields(String),

    /// Timestamp falls outside the addressed epoch
    #[error("timestamp out of range")]
    Range,

    /// Metadata could not be serialized or parsed
    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}
