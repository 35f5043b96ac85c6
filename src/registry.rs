//! Database registry
//!
//! Process-wide mapping from database name to an open epoch store. The
//! registry is filled once at startup by scanning the base directory and
//! grows when clients open new databases. Entries are never removed while
//! the server runs.
//!
//! The map is single-writer / multi-reader: lookups and snapshots take the
//! read lock, database creation takes the write lock.

use crate::error::{Error, Result, StoreError};
use crate::payload::PAYLOAD_SIZE;
use crate::store::{now_ns, DiskStore, EpochStore, StoreOptions, MAX_SEGMENT_FILE_SIZE};
use crate::wire::OpenReq;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Nanoseconds per second; the wire speaks seconds, the store nanoseconds
pub const NS_PER_SEC: i64 = 1_000_000_000;

/// Tag used by the startup health probe, chosen so it never collides
/// with production data
const PROBE_FIELDS: &[&str] = &[r"¯\_(ツ)_/¯"];

/// Name-to-store mapping with startup scan and lazy creation
pub struct Registry {
    base: PathBuf,
    databases: RwLock<HashMap<String, Arc<dyn EpochStore>>>,
}

impl Registry {
    /// Scan the base directory and open every healthy database in it.
    ///
    /// Databases that fail to open or fail the health probe are logged
    /// and skipped; only trouble with the base directory itself is fatal.
    pub async fn scan(base: impl Into<PathBuf>, recovery: bool) -> Result<Self> {
        let base = base.into();
        create_base_dir(&base)?;

        let registry = Self {
            base: base.clone(),
            databases: RwLock::new(HashMap::new()),
        };

        for entry in std::fs::read_dir(&base)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                warn!(path = %entry.path().display(), "skipping non-UTF-8 directory name");
                continue;
            };

            let store = match DiskStore::open(entry.path(), recovery) {
                Ok(store) => Arc::new(store) as Arc<dyn EpochStore>,
                Err(e) => {
                    warn!(database = %name, error = %e, "failed to open database, skipping");
                    continue;
                }
            };

            if let Err(e) = probe(store.as_ref()).await {
                warn!(database = %name, error = %e, "health probe failed, skipping");
                if let Err(e) = store.close().await {
                    warn!(database = %name, error = %e, "close after failed probe");
                }
                continue;
            }

            info!(database = %name, "registered database");
            registry.databases.write().insert(name, store);
        }

        Ok(registry)
    }

    /// Create and register a database, deriving the store layout from the
    /// requested resolution and epoch length.
    ///
    /// Opening a name that is already registered is a no-op; use `edit`
    /// to change the epoch caps of a live database.
    pub async fn open(&self, req: &OpenReq) -> Result<()> {
        if self.databases.read().contains_key(&req.database) {
            debug!(database = %req.database, "open on registered database is a no-op");
            return Ok(());
        }

        validate_name(&req.database)?;

        if req.resolution == 0 {
            return Err(StoreError::InvalidOptions("resolution must be positive".into()).into());
        }
        let points_per_epoch = req.epoch_time / req.resolution;
        if points_per_epoch == 0 {
            return Err(StoreError::InvalidOptions(
                "epoch time must cover at least one bucket".into(),
            )
            .into());
        }
        let segment_size =
            (MAX_SEGMENT_FILE_SIZE / (PAYLOAD_SIZE as u64 * points_per_epoch as u64)) as u32;
        if segment_size == 0 {
            return Err(StoreError::InvalidOptions(
                "epoch rows would exceed the segment file limit".into(),
            )
            .into());
        }

        let store = DiskStore::create(StoreOptions {
            path: self.base.join(&req.database),
            resolution: req.resolution as i64 * NS_PER_SEC,
            duration: req.epoch_time as i64 * NS_PER_SEC,
            retention: req.retention as i64 * NS_PER_SEC,
            payload_size: PAYLOAD_SIZE,
            segment_size,
            max_ro_epochs: req.max_ro_epochs,
            max_rw_epochs: req.max_rw_epochs,
        })?;

        info!(database = %req.database, resolution = req.resolution, "created database");
        self.databases
            .write()
            .entry(req.database.clone())
            .or_insert_with(|| Arc::new(store));
        Ok(())
    }

    /// Update the epoch caps of a registered database
    pub async fn edit(&self, name: &str, max_ro_epochs: u32, max_rw_epochs: u32) -> Result<()> {
        let store = self.find(name)?;
        store.edit(max_ro_epochs, max_rw_epochs).await?;
        Ok(())
    }

    /// Look up a registered database
    pub fn find(&self, name: &str) -> Result<Arc<dyn EpochStore>> {
        self.databases
            .read()
            .get(name)
            .cloned()
            .ok_or(Error::DatabaseNotFound)
    }

    /// All registered databases, for `info`
    pub fn snapshot(&self) -> Vec<(String, Arc<dyn EpochStore>)> {
        self.databases
            .read()
            .iter()
            .map(|(name, store)| (name.clone(), store.clone()))
            .collect()
    }
}

/// Touch every writable epoch of the store once. Forces the epochs to
/// load, so a database with unreadable recent data is caught at startup
/// instead of on the first client write.
async fn probe(store: &dyn EpochStore) -> std::result::Result<(), StoreError> {
    let meta = store.info();
    let now = now_ns();
    let fields: Vec<String> = PROBE_FIELDS.iter().map(|s| s.to_string()).collect();

    for i in 0..meta.max_rw_epochs {
        let start = now - i as i64 * meta.duration;
        store.one(start, start + meta.resolution, &fields).await?;
    }
    Ok(())
}

/// Reject names that could escape the base directory after joining
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.contains('\0')
    {
        return Err(Error::Name(name.to_string()));
    }
    Ok(())
}

fn create_base_dir(base: &std::path::Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(base)?;
    }
    #[cfg(not(unix))]
    std::fs::create_dir_all(base)?;
    Ok(())
}
