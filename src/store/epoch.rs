//! A single memory-mapped epoch
//!
//! One epoch covers a fixed time window split into `points_per_epoch`
//! buckets. Every field tuple written to the epoch gets a row of
//! `points_per_epoch` payload slots; rows are packed into segment files of
//! `rows_per_segment` rows each, so no segment file outgrows the configured
//! maximum. Tuples are recorded in an append-only index file (one JSON line
//! per row) which is replayed on open to rebuild the row map.

use crate::error::StoreError;
use crate::payload::{Payload, PAYLOAD_SIZE};
use memmap2::{Mmap, MmapMut, MmapOptions};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tracing::warn;

const INDEX_FILE: &str = "index";

#[derive(Serialize, Deserialize)]
struct IndexEntry {
    fields: Vec<String>,
}

enum Segment {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

impl Segment {
    fn bytes(&self) -> &[u8] {
        match self {
            Segment::ReadOnly(map) => &map[..],
            Segment::ReadWrite(map) => &map[..],
        }
    }

    fn bytes_mut(&mut self) -> Option<&mut [u8]> {
        match self {
            Segment::ReadOnly(_) => None,
            Segment::ReadWrite(map) => Some(&mut map[..]),
        }
    }
}

struct EpochInner {
    /// field tuple -> row number
    rows: HashMap<Vec<String>, u32>,
    /// row number -> field tuple, in allocation order
    order: Vec<Vec<String>>,
    segments: Vec<Segment>,
    /// append handle, present only on writable epochs
    index: Option<File>,
}

/// One open epoch of a database store
pub(crate) struct Epoch {
    dir: PathBuf,
    pub(crate) start: i64,
    resolution: i64,
    points_per_epoch: u32,
    rows_per_segment: u32,
    pub(crate) writable: bool,
    inner: RwLock<EpochInner>,
}

impl Epoch {
    /// Open an epoch directory, creating it when writable.
    ///
    /// In recovery mode a truncated index or a missing segment file is
    /// tolerated by dropping the unreachable rows; otherwise either is an
    /// error.
    pub(crate) fn open(
        dir: PathBuf,
        start: i64,
        resolution: i64,
        points_per_epoch: u32,
        rows_per_segment: u32,
        writable: bool,
        recovery: bool,
    ) -> Result<Self, StoreError> {
        if writable {
            std::fs::create_dir_all(&dir)?;
        }

        let (rows, order) = read_index(&dir, recovery)?;

        let epoch = Self {
            dir,
            start,
            resolution,
            points_per_epoch,
            rows_per_segment,
            writable,
            inner: RwLock::new(EpochInner {
                rows,
                order,
                segments: Vec::new(),
                index: None,
            }),
        };

        epoch.load_segments(recovery)?;

        if writable {
            let index = OpenOptions::new()
                .append(true)
                .create(true)
                .open(epoch.dir.join(INDEX_FILE))?;
            epoch.inner.write().index = Some(index);
        }

        Ok(epoch)
    }

    fn row_bytes(&self) -> usize {
        self.points_per_epoch as usize * PAYLOAD_SIZE
    }

    fn segment_bytes(&self) -> u64 {
        self.rows_per_segment as u64 * self.row_bytes() as u64
    }

    /// Map every segment file the index refers to
    fn load_segments(&self, recovery: bool) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let row_count = inner.order.len() as u32;
        let needed = row_count.div_ceil(self.rows_per_segment);

        for seg in 0..needed {
            let path = self.dir.join(format!("seg_{seg}"));
            let mapped = if self.writable {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(&path)?;
                if file.metadata()?.len() < self.segment_bytes() {
                    file.set_len(self.segment_bytes())?;
                }
                // Safety: segment files are only resized here, before mapping
                Segment::ReadWrite(unsafe { MmapOptions::new().map_mut(&file)? })
            } else {
                match File::open(&path) {
                    Ok(file) => {
                        if file.metadata()?.len() < self.segment_bytes() {
                            return Err(StoreError::Corrupt(format!(
                                "segment file {} is too short",
                                path.display()
                            )));
                        }
                        Segment::ReadOnly(unsafe { MmapOptions::new().map(&file)? })
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound && recovery => {
                        warn!(segment = %path.display(), "segment missing, dropping its rows");
                        let keep = (seg * self.rows_per_segment) as usize;
                        inner.order.truncate(keep);
                        inner.rows.retain(|_, row| (*row as usize) < keep);
                        break;
                    }
                    Err(e) => return Err(e.into()),
                }
            };
            inner.segments.push(mapped);
        }

        Ok(())
    }

    /// Write one payload into the bucket containing `timestamp`
    pub(crate) fn put(
        &self,
        timestamp: i64,
        fields: &[String],
        payload: Payload,
    ) -> Result<(), StoreError> {
        if !self.writable {
            return Err(StoreError::ReadOnlyEpoch { epoch: self.start });
        }
        let bucket = self.bucket_of(timestamp)?;

        let mut inner = self.inner.write();
        let row = match inner.rows.get(fields).copied() {
            Some(row) => row,
            None => self.allocate_row(&mut inner, fields)?,
        };

        let (seg, offset) = self.locate(row, bucket);
        let bytes = inner.segments[seg]
            .bytes_mut()
            .ok_or(StoreError::ReadOnlyEpoch { epoch: self.start })?;
        bytes[offset..offset + PAYLOAD_SIZE].copy_from_slice(&payload);

        Ok(())
    }

    /// Read `count` buckets starting at the bucket containing `timestamp`
    /// for one exact tuple. Returns None when the tuple has no row in this
    /// epoch.
    pub(crate) fn read_one(
        &self,
        timestamp: i64,
        count: usize,
        fields: &[String],
    ) -> Result<Option<Vec<Payload>>, StoreError> {
        let from_bucket = self.bucket_of(timestamp)?;
        let inner = self.inner.read();

        let Some(&row) = inner.rows.get(fields) else {
            return Ok(None);
        };
        Ok(Some(self.copy_row(&inner, row, from_bucket, count)))
    }

    /// Read `count` buckets for every tuple matching the pattern
    pub(crate) fn scan(
        &self,
        timestamp: i64,
        count: usize,
        pattern: &[String],
    ) -> Result<Vec<(Vec<String>, Vec<Payload>)>, StoreError> {
        let from_bucket = self.bucket_of(timestamp)?;
        let inner = self.inner.read();

        let mut out = Vec::new();
        for (row, fields) in inner.order.iter().enumerate() {
            if fields_match(pattern, fields) {
                let data = self.copy_row(&inner, row as u32, from_bucket, count);
                out.push((fields.clone(), data));
            }
        }
        Ok(out)
    }

    /// Flush dirty pages and the index to disk
    pub(crate) fn flush(&self) -> Result<(), StoreError> {
        let inner = self.inner.read();
        for segment in &inner.segments {
            if let Segment::ReadWrite(map) = segment {
                map.flush()?;
            }
        }
        if let Some(index) = &inner.index {
            index.sync_all()?;
        }
        Ok(())
    }

    fn bucket_of(&self, timestamp: i64) -> Result<u32, StoreError> {
        let offset = timestamp - self.start;
        if offset < 0 || offset >= self.resolution * self.points_per_epoch as i64 {
            return Err(StoreError::Range);
        }
        Ok((offset / self.resolution) as u32)
    }

    fn locate(&self, row: u32, bucket: u32) -> (usize, usize) {
        let seg = (row / self.rows_per_segment) as usize;
        let row_in_seg = (row % self.rows_per_segment) as usize;
        let offset = row_in_seg * self.row_bytes() + bucket as usize * PAYLOAD_SIZE;
        (seg, offset)
    }

    /// Append the tuple to the index file and map a fresh segment when the
    /// new row crosses a segment boundary.
    fn allocate_row(&self, inner: &mut EpochInner, fields: &[String]) -> Result<u32, StoreError> {
        let row = inner.order.len() as u32;

        let seg = (row / self.rows_per_segment) as usize;
        if seg == inner.segments.len() {
            let path = self.dir.join(format!("seg_{seg}"));
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(&path)?;
            file.set_len(self.segment_bytes())?;
            // Safety: segment files are only resized here, before mapping
            inner
                .segments
                .push(Segment::ReadWrite(unsafe {
                    MmapOptions::new().map_mut(&file)?
                }));
        }

        let entry = IndexEntry {
            fields: fields.to_vec(),
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        let index = inner
            .index
            .as_mut()
            .ok_or(StoreError::ReadOnlyEpoch { epoch: self.start })?;
        index.write_all(&line)?;

        inner.rows.insert(fields.to_vec(), row);
        inner.order.push(fields.to_vec());
        Ok(row)
    }

    fn copy_row(
        &self,
        inner: &EpochInner,
        row: u32,
        from_bucket: u32,
        count: usize,
    ) -> Vec<Payload> {
        let mut out = Vec::with_capacity(count);
        let (seg, offset) = self.locate(row, from_bucket);
        let bytes = inner.segments[seg].bytes();

        for i in 0..count {
            let at = offset + i * PAYLOAD_SIZE;
            let mut payload = [0u8; PAYLOAD_SIZE];
            payload.copy_from_slice(&bytes[at..at + PAYLOAD_SIZE]);
            out.push(payload);
        }
        out
    }
}

/// A stored tuple matches a pattern of the same arity whose positions are
/// each empty (wildcard) or equal.
pub(crate) fn fields_match(pattern: &[String], fields: &[String]) -> bool {
    pattern.len() == fields.len()
        && pattern
            .iter()
            .zip(fields)
            .all(|(p, f)| p.is_empty() || p == f)
}

/// Replay the index file into the row map
fn read_index(
    dir: &std::path::Path,
    recovery: bool,
) -> Result<(HashMap<Vec<String>, u32>, Vec<Vec<String>>), StoreError> {
    let mut rows = HashMap::new();
    let mut order = Vec::new();

    let data = match std::fs::read_to_string(dir.join(INDEX_FILE)) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((rows, order)),
        Err(e) => return Err(e.into()),
    };

    for line in data.lines() {
        if line.is_empty() {
            continue;
        }
        let entry: IndexEntry = match serde_json::from_str(line) {
            Ok(entry) => entry,
            Err(e) if recovery => {
                warn!(error = %e, "truncated index entry, dropping remaining rows");
                break;
            }
            Err(e) => return Err(StoreError::Corrupt(format!("bad index entry: {e}"))),
        };
        rows.insert(entry.fields.clone(), order.len() as u32);
        order.push(entry.fields);
    }

    Ok((rows, order))
}
