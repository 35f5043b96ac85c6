//! Epoch store: the storage engine underneath the request handlers
//!
//! Data is held in fixed-length epochs, each covering `duration`
//! nanoseconds and split into `duration / resolution` buckets. A bounded
//! number of recent epochs stay writable (`max_rw_epochs`); older epochs
//! are opened read-only on demand (`max_ro_epochs`). The request handlers
//! only ever talk to the [`EpochStore`] trait; [`DiskStore`] is the
//! memory-mapped file implementation behind it.

pub mod disk;
mod epoch;

pub use disk::DiskStore;

use crate::error::StoreError;
use crate::payload::Payload;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Maximum size of a single segment file (120 MiB)
pub const MAX_SEGMENT_FILE_SIZE: u64 = 120 * 1024 * 1024;

/// Current wall-clock time in nanoseconds since the epoch
pub fn now_ns() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Options used when creating a new database store
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Directory holding the database's files
    pub path: PathBuf,
    /// Bucket width in nanoseconds
    pub resolution: i64,
    /// Epoch length in nanoseconds; must be a multiple of `resolution`
    pub duration: i64,
    /// Retention window in nanoseconds
    pub retention: i64,
    /// Bytes per stored sample
    pub payload_size: usize,
    /// Field-tuple rows per segment file
    pub segment_size: u32,
    /// Maximum read-only epochs kept open
    pub max_ro_epochs: u32,
    /// Maximum read-write epochs kept open
    pub max_rw_epochs: u32,
}

/// Persistent description of a database store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMetadata {
    /// Bucket width in nanoseconds
    pub resolution: i64,
    /// Epoch length in nanoseconds
    pub duration: i64,
    /// Retention window in nanoseconds
    pub retention: i64,
    /// Bytes per stored sample
    pub payload_size: usize,
    /// Field-tuple rows per segment file
    pub segment_size: u32,
    /// Maximum read-only epochs kept open
    pub max_ro_epochs: u32,
    /// Maximum read-write epochs kept open
    pub max_rw_epochs: u32,
}

/// Narrow interface the request handlers consume from the storage engine
///
/// Timestamps are nanoseconds. `one` and `get` return one payload per
/// storage bucket in `[start, end)`; buckets nothing was written to come
/// back zero-filled from `one` and tuples nothing was written to are
/// omitted from `get`.
#[async_trait]
pub trait EpochStore: Send + Sync {
    /// Snapshot of the store's metadata
    fn info(&self) -> StoreMetadata;

    /// Update the read-only / read-write epoch caps
    async fn edit(&self, max_ro_epochs: u32, max_rw_epochs: u32) -> Result<(), StoreError>;

    /// Write one payload into the bucket containing `timestamp`
    async fn put(
        &self,
        timestamp: i64,
        fields: &[String],
        payload: Payload,
    ) -> Result<(), StoreError>;

    /// Read the payload vector for exactly one field tuple
    async fn one(
        &self,
        start: i64,
        end: i64,
        fields: &[String],
    ) -> Result<Vec<Payload>, StoreError>;

    /// Read payload vectors for every stored tuple matching the pattern.
    /// An empty string at position i of `fields` matches any value.
    async fn get(
        &self,
        start: i64,
        end: i64,
        fields: &[String],
    ) -> Result<Vec<(Vec<String>, Vec<Payload>)>, StoreError>;

    /// Flush and release the store's resources
    async fn close(&self) -> Result<(), StoreError>;
}
