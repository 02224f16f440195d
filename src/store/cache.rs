//! Persistent cache store lifecycle and operations
//!
//! [`CacheStore`] wraps a RocksDB instance holding `path -> DirRecord`
//! mappings. The handle is open/close scoped: exactly one process may
//! hold the on-disk store at a time (RocksDB's directory lock enforces
//! this), and every operation after `close()` returns
//! [`StoreError::NotOpen`] instead of panicking.
//!
//! Background maintenance runs off the caller's path: every
//! [`COMPACTION_OP_INTERVAL`] operations a detached thread flushes and
//! compacts the store; failures there are logged, never surfaced.

use crate::error::{StoreError, StoreResult};
use crate::store::schema::{decode_record, encode_record, record_key, DirRecord, KEY_PREFIX};
use rocksdb::{IteratorMode, Options, WriteBatch, DB};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use tracing::{debug, warn};

/// Operations between background flush + compaction passes
const COMPACTION_OP_INTERVAL: u64 = 1000;

/// Durable mapping from directory path to [`DirRecord`]
pub struct CacheStore {
    storage_path: PathBuf,
    db: RwLock<Option<Arc<DB>>>,
    op_counter: AtomicU64,
    maintenance_running: Arc<AtomicBool>,
}

impl CacheStore {
    /// Create a closed store rooted at `storage_path`
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
            db: RwLock::new(None),
            op_counter: AtomicU64::new(0),
            maintenance_running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    pub fn is_open(&self) -> bool {
        self.db.read().expect("store lock poisoned").is_some()
    }

    /// Open the on-disk store.
    ///
    /// Classifies engine failures into the actionable variants of
    /// [`StoreError`]; in particular a second concurrent open reports
    /// [`StoreError::Locked`] so the user can be told another instance is
    /// running. Opening an already-open store is a no-op.
    pub fn open(&self) -> StoreResult<()> {
        let mut guard = self.db.write().expect("store lock poisoned");
        if guard.is_some() {
            return Ok(());
        }

        let db = DB::open(&store_options(), &self.storage_path)
            .map_err(|e| classify_open_error(&self.storage_path, e))?;

        debug!(path = %self.storage_path.display(), "cache store opened");
        *guard = Some(Arc::new(db));
        Ok(())
    }

    /// Release the store. Subsequent operations return `NotOpen`.
    pub fn close(&self) {
        let mut guard = self.db.write().expect("store lock poisoned");
        if guard.take().is_some() {
            debug!(path = %self.storage_path.display(), "cache store closed");
        }
    }

    /// Store a directory record, overwriting any previous one for the path
    pub fn put(&self, record: &DirRecord) -> StoreResult<()> {
        self.tick_maintenance();
        let db = self.handle()?;
        let bytes = encode_record(record)?;
        db.put(record_key(&record.path), bytes)
            .map_err(|e| StoreError::Write {
                path: record.path.clone(),
                detail: e.to_string(),
            })
    }

    /// Load the record for `path`.
    ///
    /// Returns `NotPresent` for a plain miss and `Corrupted` when the
    /// stored bytes cannot be decoded; both are recoverable by rescanning.
    pub fn get(&self, path: &str) -> StoreResult<DirRecord> {
        self.tick_maintenance();
        let db = self.handle()?;
        match db.get(record_key(path))? {
            Some(bytes) => decode_record(path, &bytes),
            None => Err(StoreError::NotPresent {
                path: path.to_string(),
            }),
        }
    }

    /// Remove the record for `path` (no error when absent)
    pub fn delete(&self, path: &str) -> StoreResult<()> {
        let db = self.handle()?;
        db.delete(record_key(path)).map_err(StoreError::Engine)
    }

    /// Remove every record in the store
    pub fn clear_all(&self) -> StoreResult<()> {
        let db = self.handle()?;

        let mut batch = WriteBatch::default();
        for item in db.iterator(IteratorMode::Start) {
            let (key, _) = item?;
            if key.starts_with(KEY_PREFIX.as_bytes()) {
                batch.delete(&key);
            }
        }
        db.write(batch).map_err(StoreError::Engine)
    }

    /// Approximate on-disk size of the store in bytes
    pub fn size_bytes(&self) -> StoreResult<u64> {
        let db = self.handle()?;
        let live = db
            .property_int_value("rocksdb.estimate-live-data-size")?
            .unwrap_or(0);
        Ok(live)
    }

    /// Write raw bytes under a path's key, bypassing the codec (tests only)
    #[cfg(test)]
    pub(crate) fn put_raw(&self, path: &str, bytes: &[u8]) -> StoreResult<()> {
        let db = self.handle()?;
        db.put(record_key(path), bytes).map_err(StoreError::Engine)
    }

    /// Snapshot the engine handle, or `NotOpen` after release
    fn handle(&self) -> StoreResult<Arc<DB>> {
        self.db
            .read()
            .expect("store lock poisoned")
            .clone()
            .ok_or_else(|| StoreError::NotOpen {
                path: self.storage_path.clone(),
            })
    }

    /// Count an operation and kick off background maintenance at the
    /// configured interval. Never blocks the calling operation.
    fn tick_maintenance(&self) {
        let ops = self.op_counter.fetch_add(1, Ordering::Relaxed) + 1;
        if ops % COMPACTION_OP_INTERVAL != 0 {
            return;
        }

        let Ok(db) = self.handle() else { return };
        let running = Arc::clone(&self.maintenance_running);
        if running.swap(true, Ordering::SeqCst) {
            // A previous pass is still going
            return;
        }

        let path = self.storage_path.clone();
        thread::Builder::new()
            .name("cache-maintenance".to_string())
            .spawn(move || {
                if let Err(e) = db.flush() {
                    warn!(path = %path.display(), "cache flush failed: {e}");
                }
                db.compact_range::<&[u8], &[u8]>(None, None);
                running.store(false, Ordering::SeqCst);
            })
            .ok();
    }
}

impl Drop for CacheStore {
    fn drop(&mut self) {
        self.close();
    }
}

/// RocksDB configuration for the cache workload: point lookups by path
/// key, bursty writes during rescans
fn store_options() -> Options {
    let mut opts = Options::default();
    opts.create_if_missing(true);
    opts.increase_parallelism(num_cpus::get() as i32);

    opts.set_write_buffer_size(16 * 1024 * 1024);
    opts.set_max_write_buffer_number(2);
    opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

    // Bloom filter for point lookups (10 bits/key)
    let mut block_opts = rocksdb::BlockBasedOptions::default();
    block_opts.set_bloom_filter(10.0, false);
    block_opts.set_cache_index_and_filter_blocks(true);
    opts.set_block_based_table_factory(&block_opts);

    opts
}

/// Map an engine open failure to the actionable error variants.
///
/// RocksDB reports these conditions only through its message text, so the
/// classification matches on it.
fn classify_open_error(path: &Path, err: rocksdb::Error) -> StoreError {
    let msg = err.to_string();
    let lower = msg.to_lowercase();

    if lower.contains("lock") || lower.contains("resource temporarily unavailable") {
        return StoreError::Locked {
            path: path.to_path_buf(),
        };
    }
    if lower.contains("corruption") || lower.contains("checksum") || lower.contains("manifest") {
        return StoreError::Corrupted {
            path: path.to_string_lossy().into_owned(),
            detail: msg,
        };
    }
    if lower.contains("permission denied") {
        return StoreError::PermissionDenied {
            path: path.to_path_buf(),
        };
    }
    if lower.contains("no space left") || lower.contains("disk full") {
        return StoreError::DiskFull {
            path: path.to_path_buf(),
        };
    }
    if lower.contains("no such file or directory") {
        return StoreError::NotFound {
            path: path.to_path_buf(),
        };
    }

    StoreError::Engine(err)
}
