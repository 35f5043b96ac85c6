//! Disk-backed epoch store
//!
//! A database is a directory holding `metadata.json` plus one
//! `epoch_<start_ns>` subdirectory per epoch that has ever been written.
//! Epochs inside the read-write window (the `max_rw_epochs` most recent)
//! are created and mapped writable on demand; anything older is opened
//! read-only when a query touches it and reported as zero-filled when its
//! directory does not exist. Open epochs are cached up to the configured
//! caps, evicting the oldest first. Epoch directories that have fallen
//! out of the retention window are deleted when the store is opened.

use super::epoch::Epoch;
use super::{EpochStore, StoreMetadata, StoreOptions, now_ns, MAX_SEGMENT_FILE_SIZE};
use crate::error::StoreError;
use crate::payload::{Payload, PAYLOAD_SIZE};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const METADATA_FILE: &str = "metadata.json";
const EPOCH_PREFIX: &str = "epoch_";

/// Memory-mapped file implementation of [`EpochStore`]
pub struct DiskStore {
    path: PathBuf,
    recovery: bool,
    meta: RwLock<StoreMetadata>,
    epochs: RwLock<HashMap<i64, Arc<Epoch>>>,
}

impl DiskStore {
    /// Open an existing database directory
    pub fn open(path: impl Into<PathBuf>, recovery: bool) -> Result<Self, StoreError> {
        let path = path.into();
        let raw = std::fs::read_to_string(path.join(METADATA_FILE))?;
        let meta: StoreMetadata = serde_json::from_str(&raw)?;
        validate_metadata(&meta)?;

        let store = Self {
            path,
            recovery,
            meta: RwLock::new(meta),
            epochs: RwLock::new(HashMap::new()),
        };
        store.purge_expired()?;
        Ok(store)
    }

    /// Create a new database directory from the given options
    pub fn create(options: StoreOptions) -> Result<Self, StoreError> {
        let meta = StoreMetadata {
            resolution: options.resolution,
            duration: options.duration,
            retention: options.retention,
            payload_size: options.payload_size,
            segment_size: options.segment_size,
            max_ro_epochs: options.max_ro_epochs,
            max_rw_epochs: options.max_rw_epochs,
        };
        validate_metadata(&meta)?;

        let segment_bytes = meta.segment_size as u64
            * points_per_epoch(&meta) as u64
            * meta.payload_size as u64;
        if segment_bytes > MAX_SEGMENT_FILE_SIZE {
            return Err(StoreError::InvalidOptions(format!(
                "segment files would be {segment_bytes} bytes"
            )));
        }

        if options.path.join(METADATA_FILE).exists() {
            return Err(StoreError::InvalidOptions(format!(
                "database already exists at {}",
                options.path.display()
            )));
        }
        std::fs::create_dir_all(&options.path)?;
        write_metadata(&options.path, &meta)?;

        Ok(Self {
            path: options.path,
            recovery: false,
            meta: RwLock::new(meta),
            epochs: RwLock::new(HashMap::new()),
        })
    }

    /// Delete epoch directories that ended before the retention window
    fn purge_expired(&self) -> Result<(), StoreError> {
        let meta = self.meta.read().clone();
        let deadline = now_ns() - meta.retention;

        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(start) = parse_epoch_dir(&name) else {
                continue;
            };
            if start + meta.duration < deadline {
                info!(epoch = start, path = %entry.path().display(), "removing expired epoch");
                if let Err(e) = std::fs::remove_dir_all(entry.path()) {
                    warn!(error = %e, "failed to remove expired epoch");
                }
            }
        }
        Ok(())
    }

    /// True when the epoch is inside the read-write window
    fn is_writable(meta: &StoreMetadata, epoch_start: i64) -> bool {
        epoch_start > now_ns() - meta.max_rw_epochs as i64 * meta.duration
    }

    /// Fetch or open the epoch starting at `epoch_start`.
    ///
    /// Writable epochs are created on first access; read-only epochs are
    /// only opened when their directory exists, otherwise `None` is
    /// returned and the caller treats the whole epoch as zero-filled.
    fn epoch_at(&self, epoch_start: i64) -> Result<Option<Arc<Epoch>>, StoreError> {
        if let Some(epoch) = self.epochs.read().get(&epoch_start) {
            return Ok(Some(epoch.clone()));
        }

        let meta = self.meta.read().clone();
        let writable = Self::is_writable(&meta, epoch_start);
        let dir = self.path.join(format!("{EPOCH_PREFIX}{epoch_start}"));
        if !writable && !dir.exists() {
            return Ok(None);
        }

        let mut epochs = self.epochs.write();
        if let Some(epoch) = epochs.get(&epoch_start) {
            return Ok(Some(epoch.clone()));
        }

        let epoch = Arc::new(Epoch::open(
            dir,
            epoch_start,
            meta.resolution,
            points_per_epoch(&meta),
            meta.segment_size,
            writable,
            self.recovery,
        )?);
        epochs.insert(epoch_start, epoch.clone());
        Self::evict(&mut epochs, &meta);
        Ok(Some(epoch))
    }

    /// Drop the oldest open epochs beyond the configured caps
    fn evict(epochs: &mut HashMap<i64, Arc<Epoch>>, meta: &StoreMetadata) {
        for (writable, cap) in [(true, meta.max_rw_epochs), (false, meta.max_ro_epochs)] {
            loop {
                let open: Vec<i64> = epochs
                    .values()
                    .filter(|e| e.writable == writable)
                    .map(|e| e.start)
                    .collect();
                if open.len() <= cap as usize {
                    break;
                }
                // cap >= 1 is validated, so the minimum exists
                let oldest = open.into_iter().min().unwrap();
                if let Some(epoch) = epochs.remove(&oldest) {
                    if let Err(e) = epoch.flush() {
                        warn!(epoch = oldest, error = %e, "flush on eviction failed");
                    }
                }
            }
        }
    }

    /// Copy `count` buckets starting at `start` for one exact tuple into
    /// `out[offset..]`, walking every epoch the range overlaps.
    fn read_range_one(
        &self,
        start: i64,
        count: usize,
        fields: &[String],
        out: &mut [Payload],
    ) -> Result<(), StoreError> {
        let meta = self.meta.read().clone();
        self.for_each_chunk(&meta, start, count, |epoch_start, lo, n, offset| {
            if let Some(epoch) = self.epoch_at(epoch_start)? {
                if let Some(data) = epoch.read_one(lo, n, fields)? {
                    out[offset..offset + n].copy_from_slice(&data);
                }
            }
            Ok(())
        })
    }

    /// Split `[start, start + count * resolution)` into per-epoch chunks
    /// and call `f(epoch_start, chunk_start, chunk_len, out_offset)`.
    fn for_each_chunk<F>(
        &self,
        meta: &StoreMetadata,
        start: i64,
        count: usize,
        mut f: F,
    ) -> Result<(), StoreError>
    where
        F: FnMut(i64, i64, usize, usize) -> Result<(), StoreError>,
    {
        let end = start + count as i64 * meta.resolution;
        let mut epoch_start = align(start, meta.duration);

        while epoch_start < end {
            let lo = start.max(epoch_start);
            let hi = end.min(epoch_start + meta.duration);
            let n = ((hi - lo) / meta.resolution) as usize;
            let offset = ((lo - start) / meta.resolution) as usize;
            if n > 0 {
                f(epoch_start, lo, n, offset)?;
            }
            epoch_start += meta.duration;
        }
        Ok(())
    }
}

#[async_trait]
impl EpochStore for DiskStore {
    fn info(&self) -> StoreMetadata {
        self.meta.read().clone()
    }

    async fn edit(&self, max_ro_epochs: u32, max_rw_epochs: u32) -> Result<(), StoreError> {
        if max_rw_epochs < 1 || max_ro_epochs < max_rw_epochs {
            return Err(StoreError::InvalidOptions(format!(
                "epoch caps must satisfy max_ro >= max_rw >= 1, got {max_ro_epochs}/{max_rw_epochs}"
            )));
        }

        let meta = {
            let mut meta = self.meta.write();
            meta.max_ro_epochs = max_ro_epochs;
            meta.max_rw_epochs = max_rw_epochs;
            meta.clone()
        };
        write_metadata(&self.path, &meta)?;
        Self::evict(&mut self.epochs.write(), &meta);
        Ok(())
    }

    async fn put(
        &self,
        timestamp: i64,
        fields: &[String],
        payload: Payload,
    ) -> Result<(), StoreError> {
        validate_put_fields(fields)?;

        let meta = self.meta.read().clone();
        let epoch_start = align(timestamp, meta.duration);
        if !Self::is_writable(&meta, epoch_start) {
            return Err(StoreError::ReadOnlyEpoch { epoch: epoch_start });
        }

        // writable epochs always open
        let epoch = self
            .epoch_at(epoch_start)?
            .ok_or(StoreError::ReadOnlyEpoch { epoch: epoch_start })?;
        epoch.put(timestamp, fields, payload)
    }

    async fn one(
        &self,
        start: i64,
        end: i64,
        fields: &[String],
    ) -> Result<Vec<Payload>, StoreError> {
        let meta = self.meta.read().clone();
        let start = align(start, meta.resolution);
        if end <= start {
            return Ok(Vec::new());
        }

        let count = ((end - start) / meta.resolution) as usize;
        let mut out = vec![[0u8; PAYLOAD_SIZE]; count];
        self.read_range_one(start, count, fields, &mut out)?;
        Ok(out)
    }

    async fn get(
        &self,
        start: i64,
        end: i64,
        fields: &[String],
    ) -> Result<Vec<(Vec<String>, Vec<Payload>)>, StoreError> {
        let meta = self.meta.read().clone();
        let start = align(start, meta.resolution);
        if end <= start {
            return Ok(Vec::new());
        }
        let count = ((end - start) / meta.resolution) as usize;

        let mut rows: HashMap<Vec<String>, Vec<Payload>> = HashMap::new();
        let mut order: Vec<Vec<String>> = Vec::new();

        self.for_each_chunk(&meta, start, count, |epoch_start, lo, n, offset| {
            let Some(epoch) = self.epoch_at(epoch_start)? else {
                return Ok(());
            };
            for (tuple, data) in epoch.scan(lo, n, fields)? {
                let row = rows.entry(tuple.clone()).or_insert_with(|| {
                    order.push(tuple);
                    vec![[0u8; PAYLOAD_SIZE]; count]
                });
                row[offset..offset + n].copy_from_slice(&data);
            }
            Ok(())
        })?;

        let mut out = Vec::with_capacity(order.len());
        for tuple in order {
            // every tuple in `order` was inserted into `rows` above
            let data = rows.remove(&tuple).unwrap();
            out.push((tuple, data));
        }
        Ok(out)
    }

    async fn close(&self) -> Result<(), StoreError> {
        let epochs = std::mem::take(&mut *self.epochs.write());
        for epoch in epochs.values() {
            epoch.flush()?;
        }
        Ok(())
    }
}

/// Snap `ts` down to a multiple of `width`
fn align(ts: i64, width: i64) -> i64 {
    ts - ts.rem_euclid(width)
}

fn points_per_epoch(meta: &StoreMetadata) -> u32 {
    (meta.duration / meta.resolution) as u32
}

fn parse_epoch_dir(name: &std::ffi::OsStr) -> Option<i64> {
    name.to_str()?.strip_prefix(EPOCH_PREFIX)?.parse().ok()
}

fn write_metadata(path: &Path, meta: &StoreMetadata) -> Result<(), StoreError> {
    let raw = serde_json::to_string_pretty(meta)?;
    std::fs::write(path.join(METADATA_FILE), raw)?;
    Ok(())
}

fn validate_metadata(meta: &StoreMetadata) -> Result<(), StoreError> {
    if meta.resolution <= 0 || meta.duration <= 0 || meta.retention <= 0 {
        return Err(StoreError::InvalidOptions(
            "resolution, duration and retention must be positive".into(),
        ));
    }
    if meta.duration % meta.resolution != 0 {
        return Err(StoreError::InvalidOptions(format!(
            "epoch duration {} is not a multiple of resolution {}",
            meta.duration, meta.resolution
        )));
    }
    if meta.payload_size != PAYLOAD_SIZE {
        return Err(StoreError::InvalidOptions(format!(
            "payload size must be {PAYLOAD_SIZE}, got {}",
            meta.payload_size
        )));
    }
    if meta.segment_size < 1 {
        return Err(StoreError::InvalidOptions("segment size must be >= 1".into()));
    }
    if meta.max_rw_epochs < 1 || meta.max_ro_epochs < meta.max_rw_epochs {
        return Err(StoreError::InvalidOptions(format!(
            "epoch caps must satisfy max_ro >= max_rw >= 1, got {}/{}",
            meta.max_ro_epochs, meta.max_rw_epochs
        )));
    }
    Ok(())
}

/// Stored tuples must be non-empty and fully specified; the empty string
/// is reserved as the query-side wildcard.
fn validate_put_fields(fields: &[String]) -> Result<(), StoreError> {
    if fields.is_empty() {
        return Err(StoreError::Fields("tuple is empty".into()));
    }
    if fields.iter().any(|f| f.is_empty()) {
        return Err(StoreError::Fields("tuple contains an empty value".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload;
    use tempfile::TempDir;

    const SEC: i64 = 1_000_000_000;

    fn options(dir: &TempDir) -> StoreOptions {
        StoreOptions {
            path: dir.path().join("db"),
            resolution: 60 * SEC,
            duration: 3600 * SEC,
            retention: 36000 * SEC,
            payload_size: PAYLOAD_SIZE,
            segment_size: 16,
            max_ro_epochs: 2,
            max_rw_epochs: 2,
        }
    }

    fn fields(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    fn bucket_now(store: &DiskStore) -> i64 {
        align(now_ns(), store.info().resolution)
    }

    #[tokio::test]
    async fn test_put_then_one() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::create(options(&dir)).unwrap();
        let ts = bucket_now(&store);
        let tuple = fields(&["a", "b", "c"]);

        store.put(ts, &tuple, payload::encode(1.1, 1)).await.unwrap();

        let data = store.one(ts, ts + 60 * SEC, &tuple).await.unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(payload::decode(&data[0]), (1.1, 1));
    }

    #[tokio::test]
    async fn test_one_unset_bucket_is_zero() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::create(options(&dir)).unwrap();
        let ts = bucket_now(&store);

        let data = store
            .one(ts, ts + 120 * SEC, &fields(&["nothing", "here"]))
            .await
            .unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(payload::decode(&data[0]), (0.0, 0));
        assert_eq!(payload::decode(&data[1]), (0.0, 0));
    }

    #[tokio::test]
    async fn test_empty_range_yields_empty_vector() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::create(options(&dir)).unwrap();
        let ts = bucket_now(&store);

        let data = store.one(ts, ts, &fields(&["a"])).await.unwrap();
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn test_get_matches_pattern() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::create(options(&dir)).unwrap();
        let ts = bucket_now(&store);

        store
            .put(ts, &fields(&["us", "web"]), payload::encode(1.0, 1))
            .await
            .unwrap();
        store
            .put(ts, &fields(&["us", "db"]), payload::encode(2.0, 1))
            .await
            .unwrap();
        store
            .put(ts, &fields(&["eu", "web"]), payload::encode(4.0, 1))
            .await
            .unwrap();

        let rows = store
            .get(ts, ts + 60 * SEC, &fields(&["us", ""]))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);

        let rows = store
            .get(ts, ts + 60 * SEC, &fields(&["", ""]))
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[tokio::test]
    async fn test_get_range_spanning_epochs() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::create(options(&dir)).unwrap();
        let tuple = fields(&["span"]);

        // one bucket near the end of the previous epoch, one in the current
        let meta = store.info();
        let current = align(now_ns(), meta.duration);
        let t1 = current - 60 * SEC;
        let t2 = current;

        store.put(t1, &tuple, payload::encode(1.0, 1)).await.unwrap();
        store.put(t2, &tuple, payload::encode(2.0, 1)).await.unwrap();

        let data = store.one(t1, t2 + 60 * SEC, &tuple).await.unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(payload::decode(&data[0]), (1.0, 1));
        assert_eq!(payload::decode(&data[1]), (2.0, 1));
    }

    #[tokio::test]
    async fn test_put_outside_rw_window_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::create(options(&dir)).unwrap();
        let meta = store.info();

        let old = align(now_ns(), meta.duration) - meta.duration * (meta.max_rw_epochs as i64 + 1);
        let err = store
            .put(old, &fields(&["late"]), payload::encode(1.0, 1))
            .await;
        assert!(matches!(err, Err(StoreError::ReadOnlyEpoch { .. })));
    }

    #[tokio::test]
    async fn test_put_rejects_empty_field_values() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::create(options(&dir)).unwrap();
        let ts = bucket_now(&store);

        assert!(matches!(
            store.put(ts, &[], payload::encode(1.0, 1)).await,
            Err(StoreError::Fields(_))
        ));
        assert!(matches!(
            store
                .put(ts, &fields(&["a", ""]), payload::encode(1.0, 1))
                .await,
            Err(StoreError::Fields(_))
        ));
    }

    #[tokio::test]
    async fn test_reopen_preserves_data() {
        let dir = TempDir::new().unwrap();
        let tuple = fields(&["persist"]);
        let ts;
        {
            let store = DiskStore::create(options(&dir)).unwrap();
            ts = bucket_now(&store);
            store.put(ts, &tuple, payload::encode(9.9, 4)).await.unwrap();
            store.close().await.unwrap();
        }

        let store = DiskStore::open(dir.path().join("db"), false).unwrap();
        let data = store.one(ts, ts + 60 * SEC, &tuple).await.unwrap();
        assert_eq!(payload::decode(&data[0]), (9.9, 4));
    }

    #[tokio::test]
    async fn test_edit_updates_caps_and_persists() {
        let dir = TempDir::new().unwrap();
        {
            let store = DiskStore::create(options(&dir)).unwrap();
            store.edit(3, 3).await.unwrap();
            let meta = store.info();
            assert_eq!(meta.max_ro_epochs, 3);
            assert_eq!(meta.max_rw_epochs, 3);
        }

        let store = DiskStore::open(dir.path().join("db"), false).unwrap();
        assert_eq!(store.info().max_rw_epochs, 3);
    }

    #[tokio::test]
    async fn test_edit_rejects_bad_caps() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::create(options(&dir)).unwrap();
        assert!(store.edit(1, 2).await.is_err());
        assert!(store.edit(0, 0).await.is_err());
    }

    #[test]
    fn test_create_rejects_bad_options() {
        let dir = TempDir::new().unwrap();

        let mut opts = options(&dir);
        opts.resolution = 7 * SEC; // duration not a multiple
        assert!(matches!(
            DiskStore::create(opts),
            Err(StoreError::InvalidOptions(_))
        ));

        let mut opts = options(&dir);
        opts.max_rw_epochs = 0;
        assert!(DiskStore::create(opts).is_err());

        let mut opts = options(&dir);
        opts.payload_size = 16;
        assert!(DiskStore::create(opts).is_err());
    }

    #[test]
    fn test_create_twice_fails() {
        let dir = TempDir::new().unwrap();
        DiskStore::create(options(&dir)).unwrap();
        assert!(DiskStore::create(options(&dir)).is_err());
    }
}
