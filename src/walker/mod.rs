//! Incremental tree walker
//!
//! The walker recurses over directories and decides, per directory,
//! whether the cached record is still valid:
//!
//! ```text
//!                 ┌────────────┐
//!        stat p ──│   ERROR?   │── '!' node, continue with siblings
//!                 └─────┬──────┘
//!                 ┌─────▼──────┐
//!                 │  FORCED?   │── rescan
//!                 └─────┬──────┘
//!                 ┌─────▼──────┐
//!                 │   MISS?    │── rescan (also on corrupt/unreadable entry)
//!                 └─────┬──────┘
//!                 ┌─────▼──────┐
//!                 │  EXPIRED?  │── rescan
//!                 └─────┬──────┘
//!                 ┌─────▼──────┐
//!                 │  CHANGED?  │── rescan (nanosecond mtime inequality)
//!                 └─────┬──────┘
//!                 ┌─────▼──────┐
//!                 │    HIT     │── rebuild subtree from cache, no I/O
//!                 └────────────┘
//! ```
//!
//! Rebuilds load child records directly instead of re-entering the
//! decision machine, so a warm cache loads each record exactly once; the
//! decision machine is re-entered only when a child record is missing.

use crate::error::StoreError;
use crate::progress::ProgressDelta;
use crate::stats::CacheStats;
use crate::store::schema::{path_key, DirRecord};
use crate::store::CacheStore;
use crate::throttle::{CancellationToken, IoThrottle};
use crate::tree::{DirNode, EntryFlag, FileNode, Node};
use crossbeam_channel::Sender;
use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

/// Fallback directory self-size when stat fails. Actual sizes vary by
/// filesystem and configuration; 4096 is the common block size.
pub const DEFAULT_DIR_BLOCK_SIZE: u64 = 4096;

/// Predicate deciding whether a subdirectory is skipped entirely
/// (no cache read, no listing, no recursion)
pub type ShouldIgnoreDir = Arc<dyn Fn(&str, &Path) -> bool + Send + Sync>;

/// Walk-time options, fixed for the duration of one run
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Records older than this are rescanned; zero disables expiry
    pub cache_max_age: Duration,
    /// Bypass the cache entirely and rescan everything
    pub force_full_scan: bool,
    /// Replace symlink sizes with their target's
    pub follow_symlinks: bool,
    /// Report git-annexed symlinks with the annexed content size
    pub show_annexed_size: bool,
}

/// Recursive scanner with per-directory cache validation
pub struct Walker {
    store: Arc<CacheStore>,
    throttle: Option<Arc<IoThrottle>>,
    stats: Arc<CacheStats>,
    progress_tx: Sender<ProgressDelta>,
    cancel: CancellationToken,
    ignore: ShouldIgnoreDir,
    options: WalkOptions,
}

impl Walker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<CacheStore>,
        throttle: Option<Arc<IoThrottle>>,
        stats: Arc<CacheStats>,
        progress_tx: Sender<ProgressDelta>,
        cancel: CancellationToken,
        ignore: ShouldIgnoreDir,
        options: WalkOptions,
    ) -> Self {
        Self {
            store,
            throttle,
            stats,
            progress_tx,
            cancel,
            ignore,
            options,
        }
    }

    /// Walk the tree rooted at `path` and return it
    pub fn walk(&self, path: &Path) -> DirNode {
        self.process_dir(path)
    }

    /// Per-directory decision state machine
    fn process_dir(&self, path: &Path) -> DirNode {
        if self.cancel.is_cancelled() {
            return DirNode::new(path, EntryFlag::Partial, SystemTime::UNIX_EPOCH);
        }

        // Current filesystem mtime is the sole invalidation signal
        let current_mtime = match fs::metadata(path).and_then(|m| m.modified()) {
            Ok(mtime) => mtime,
            Err(e) => {
                warn!("error stating directory {}: {e}", path.display());
                if e.kind() == io::ErrorKind::NotFound {
                    self.purge_orphan(path);
                }
                return self.error_dir(path);
            }
        };

        if self.options.force_full_scan {
            self.stats.record_rescan();
            return self.scan_and_cache(path, current_mtime);
        }

        let record = match self.store.get(&path_key(path)) {
            Ok(record) => record,
            Err(e) if e.is_not_present() => {
                debug!("cache miss for {}", path.display());
                self.stats.record_miss();
                self.stats.record_dir();
                return self.scan_and_cache(path, current_mtime);
            }
            Err(e) => {
                // Corrupt or unreadable entry: rescan and overwrite it
                warn!(
                    "recoverable cache error for {}, treating as miss: {e}",
                    path.display()
                );
                self.stats.record_miss();
                self.stats.record_dir();
                return self.scan_and_cache(path, current_mtime);
            }
        };

        if !self.options.cache_max_age.is_zero() {
            let age = SystemTime::now()
                .duration_since(record.cached_at)
                .unwrap_or(Duration::ZERO);
            if age > self.options.cache_max_age {
                self.stats.record_expired();
                self.stats.record_rescan();
                self.stats.record_dir();
                return self.scan_and_cache(path, current_mtime);
            }
        }

        // Whole-value equality including nanoseconds; no truncation
        if record.mtime != current_mtime {
            self.stats.record_rescan();
            self.stats.record_dir();
            return self.scan_and_cache(path, current_mtime);
        }

        self.stats.record_hit();
        self.stats.record_dir();
        self.stats.add_bytes_from_cache(record.size);
        self.rebuild_from_cache(record)
    }

    /// Scan `path` from the filesystem and overwrite its cache record
    fn scan_and_cache(&self, path: &Path, current_mtime: SystemTime) -> DirNode {
        let scan_started = Instant::now();

        if let Some(throttle) = &self.throttle {
            if throttle.acquire(&self.cancel).is_err() {
                debug!("walk cancelled at {}", path.display());
                return DirNode::new(path, EntryFlag::Partial, current_mtime);
            }
        }

        let dir = self.scan_directory(path, current_mtime);

        let record = DirRecord::from_dir_node(&dir, current_mtime, scan_started.elapsed());
        if let Err(e) = self.store.put(&record) {
            warn!("failed to cache {}: {e}", path.display());
        }

        self.stats.add_bytes_scanned(dir.size);
        self.emit_progress(&dir);
        dir
    }

    /// One throttled directory listing plus recursion into subdirectories
    fn scan_directory(&self, path: &Path, current_mtime: SystemTime) -> DirNode {
        let mut listing_error = false;
        let mut partial = false;
        let mut entries = Vec::new();

        match fs::read_dir(path) {
            Ok(read) => {
                for entry in read {
                    match entry {
                        Ok(e) => entries.push(e),
                        Err(e) => {
                            warn!("error listing {}: {e}", path.display());
                            partial = true;
                        }
                    }
                }
            }
            Err(e) => {
                warn!("error reading directory {}: {e}", path.display());
                listing_error = true;
            }
        }

        let listed = entries.len();
        let (self_size, self_usage) = match fs::metadata(path) {
            Ok(meta) => (meta.len(), block_usage(&meta)),
            Err(e) => {
                warn!(
                    "could not stat directory {}, using default size: {e}",
                    path.display()
                );
                (DEFAULT_DIR_BLOCK_SIZE, DEFAULT_DIR_BLOCK_SIZE)
            }
        };

        let mut dir = DirNode::new(path, EntryFlag::Normal, current_mtime);
        dir.size = self_size;
        dir.usage = self_usage;
        dir.children.reserve(listed);

        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            let entry_path = path.join(entry.file_name());

            let file_type = match entry.file_type() {
                Ok(t) => t,
                Err(e) => {
                    warn!("error getting file type for {}: {e}", entry_path.display());
                    partial = true;
                    continue;
                }
            };

            if file_type.is_dir() {
                if (self.ignore)(&name, &entry_path) {
                    continue;
                }
                dir.add_child(Node::Dir(self.process_dir(&entry_path)));
            } else {
                // DirEntry metadata does not traverse symlinks
                let meta = match entry.metadata() {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("error getting file info for {}: {e}", entry_path.display());
                        continue;
                    }
                };

                let mut file = FileNode {
                    name,
                    size: meta.len(),
                    usage: block_usage(&meta),
                    mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                    flag: if file_type.is_symlink() {
                        EntryFlag::Symlink
                    } else {
                        EntryFlag::Normal
                    },
                    hardlink_id: hardlink_id(&meta),
                    parent_path: path.to_path_buf(),
                };

                if self.options.follow_symlinks && file_type.is_symlink() {
                    match resolve_symlink(&entry_path, self.options.show_annexed_size) {
                        Ok((size, usage)) => {
                            file.size = size;
                            file.usage = usage;
                        }
                        // Keep pre-resolution metadata on failure
                        Err(e) => warn!("error following symlink {}: {e}", entry_path.display()),
                    }
                }

                dir.add_child(Node::File(file));
            }
        }

        dir.flag = if listing_error {
            EntryFlag::Error
        } else if partial {
            EntryFlag::Partial
        } else if listed == 0 {
            EntryFlag::Empty
        } else {
            EntryFlag::Normal
        };

        dir
    }

    /// Reconstruct a subtree from cache records without touching the
    /// filesystem.
    ///
    /// Directory children are loaded directly from the store rather than
    /// re-entering [`Self::process_dir`]; that shortcut keeps each record
    /// loaded once per warm run. Only a missing or unreadable child record
    /// falls back to the full decision machine, which then does its own
    /// stats accounting.
    fn rebuild_from_cache(&self, record: DirRecord) -> DirNode {
        debug!(
            "rebuilding from cache: {} ({} children)",
            record.path,
            record.children.len()
        );

        let path = PathBuf::from(&record.path);
        let mut dir = DirNode::new(&path, record.flag, record.mtime);
        // The stored record is authoritative for the rebuilt subtree;
        // totals are not recomputed from children
        dir.size = record.size;
        dir.usage = record.usage;
        dir.item_count = record.item_count;
        dir.children.reserve(record.children.len());

        let child_count = record.children.len() as u64;
        let subtree_bytes: u64 = record
            .children
            .iter()
            .filter(|c| c.is_dir)
            .map(|c| c.size)
            .sum();

        for child in record.children {
            if child.is_dir {
                let child_path = path.join(&child.name);
                match self.store.get(&path_key(&child_path)) {
                    Ok(child_record) => {
                        // Direct load bypasses the decision machine, so the
                        // hit is accounted here (without re-adding the
                        // subtree's bytes: the parent HIT already did)
                        self.stats.record_hit();
                        self.stats.record_dir();
                        dir.children
                            .push(Node::Dir(self.rebuild_from_cache(child_record)));
                    }
                    Err(e) => {
                        warn!("child cache miss for {}: {e}", child_path.display());
                        dir.children.push(Node::Dir(self.process_dir(&child_path)));
                    }
                }
            } else {
                dir.children.push(Node::File(FileNode {
                    name: child.name,
                    size: child.size,
                    usage: child.usage,
                    mtime: child.mtime,
                    flag: child.flag,
                    hardlink_id: child.hardlink_id,
                    parent_path: path.clone(),
                }));
            }
        }

        let _ = self.progress_tx.try_send(ProgressDelta {
            path,
            items: child_count,
            bytes: record.size.saturating_sub(subtree_bytes),
        });

        dir
    }

    /// Error node for a directory that cannot be stat'ed; siblings continue
    fn error_dir(&self, path: &Path) -> DirNode {
        let _ = self.progress_tx.try_send(ProgressDelta {
            path: path.to_path_buf(),
            items: 0,
            bytes: 0,
        });
        DirNode::error_dir(path)
    }

    /// Drop the cache record for a path that no longer exists
    fn purge_orphan(&self, path: &Path) {
        if !self.store.is_open() {
            return;
        }
        match self.store.delete(&path_key(path)) {
            Ok(()) => debug!("purged orphaned cache entry for {}", path.display()),
            Err(StoreError::NotOpen { .. }) => {}
            Err(e) => debug!("could not purge cache entry for {}: {e}", path.display()),
        }
    }

    fn emit_progress(&self, dir: &DirNode) {
        let subtree_bytes: u64 = dir
            .children
            .iter()
            .filter(|c| c.is_dir())
            .map(Node::size)
            .sum();
        let _ = self.progress_tx.try_send(ProgressDelta {
            path: dir.path(),
            items: dir.children.len() as u64,
            bytes: dir.size.saturating_sub(subtree_bytes),
        });
    }
}

/// Allocated size of an entry
#[cfg(unix)]
fn block_usage(meta: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    // st_blocks is in 512-byte units
    meta.blocks() * 512
}

#[cfg(not(unix))]
fn block_usage(meta: &Metadata) -> u64 {
    meta.len()
}

/// Stable id for multi-linked files, 0 when not hard-linked
#[cfg(unix)]
fn hardlink_id(meta: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    if meta.nlink() > 1 {
        meta.ino()
    } else {
        0
    }
}

#[cfg(not(unix))]
fn hardlink_id(_meta: &Metadata) -> u64 {
    0
}

/// Size and usage of a symlink's target.
///
/// For git-annexed links the content size is encoded in the object key,
/// so it is available even when the content itself is not present.
fn resolve_symlink(path: &Path, annexed_size: bool) -> io::Result<(u64, u64)> {
    if annexed_size {
        if let Ok(target) = fs::read_link(path) {
            if let Some(size) = annexed_key_size(&target) {
                return Ok((size, size));
            }
        }
    }
    let target_meta = fs::metadata(path)?;
    Ok((target_meta.len(), block_usage(&target_meta)))
}

/// git-annex object keys embed the content size as `-s<bytes>--`
fn annexed_key_size(target: &Path) -> Option<u64> {
    let name = target.file_name()?.to_str()?;
    let rest = name.split("-s").nth(1)?;
    let digits: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() || !rest[digits.len()..].starts_with("--") {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::fs::File;
    use std::io::Write as _;
    use tempfile::tempdir;

    fn test_walker(store: Arc<CacheStore>, options: WalkOptions) -> (Walker, Arc<CacheStats>) {
        let stats = Arc::new(CacheStats::new());
        // Receiver dropped: progress sends are lossy by design
        let (tx, _rx) = unbounded();
        let walker = Walker::new(
            store,
            None,
            Arc::clone(&stats),
            tx,
            CancellationToken::new(),
            Arc::new(|_, _| false),
            options,
        );
        (walker, stats)
    }

    fn open_store(dir: &Path) -> Arc<CacheStore> {
        let store = Arc::new(CacheStore::new(dir.join("cache")));
        store.open().unwrap();
        store
    }

    fn write_file(path: &Path, content: &[u8]) {
        let mut f = File::create(path).unwrap();
        f.write_all(content).unwrap();
    }

    #[test]
    fn test_cold_scan_builds_tree_and_populates_cache() {
        let cache = tempdir().unwrap();
        let root = tempdir().unwrap();
        fs::create_dir(root.path().join("sub")).unwrap();
        write_file(&root.path().join("top.txt"), b"hello");
        write_file(&root.path().join("sub").join("inner.txt"), b"world!");

        let store = open_store(cache.path());
        let (walker, stats) = test_walker(Arc::clone(&store), WalkOptions::default());

        let tree = walker.walk(root.path());

        // root + sub + 2 files
        assert_eq!(tree.item_count, 4);
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.flag, EntryFlag::Normal);

        // I1: aggregate equals self + children
        let child_sum: u64 = tree.children.iter().map(Node::size).sum();
        assert!(tree.size > child_sum);
        assert_eq!(
            tree.size - child_sum,
            fs::metadata(root.path()).unwrap().len()
        );

        // Both directories cached
        assert!(store.get(&path_key(root.path())).is_ok());
        assert!(store.get(&path_key(&root.path().join("sub"))).is_ok());

        let snap = stats.snapshot();
        assert_eq!(snap.cache_misses, 2);
        assert_eq!(snap.cache_hits, 0);
        assert_eq!(snap.total_dirs, 2);
    }

    #[test]
    fn test_warm_scan_hits_cache_and_rebuilds_identically() {
        let cache = tempdir().unwrap();
        let root = tempdir().unwrap();
        fs::create_dir(root.path().join("sub")).unwrap();
        write_file(&root.path().join("sub").join("inner.txt"), b"data");

        let store = open_store(cache.path());
        let (walker, _) = test_walker(Arc::clone(&store), WalkOptions::default());
        let cold = walker.walk(root.path());

        let (walker, stats) = test_walker(Arc::clone(&store), WalkOptions::default());
        let warm = walker.walk(root.path());

        // I4: indistinguishable from the fresh scan, same child order
        assert_eq!(warm, cold);

        let snap = stats.snapshot();
        assert_eq!(snap.cache_misses, 0);
        assert_eq!(snap.cache_hits, 2);
        // P5: no double counting through the rebuild path
        assert_eq!(snap.total_dirs, 2);
        assert_eq!(snap.bytes_from_cache, cold.size);
    }

    #[test]
    fn test_mtime_change_triggers_rescan_of_that_directory_only() {
        let cache = tempdir().unwrap();
        let root = tempdir().unwrap();
        fs::create_dir(root.path().join("stable")).unwrap();
        fs::create_dir(root.path().join("busy")).unwrap();

        let store = open_store(cache.path());
        let (walker, _) = test_walker(Arc::clone(&store), WalkOptions::default());
        walker.walk(root.path());

        // Exceed filesystem mtime granularity, then change the root's
        // entry list
        std::thread::sleep(Duration::from_millis(1100));
        fs::create_dir(root.path().join("fresh")).unwrap();

        let (walker, stats) = test_walker(Arc::clone(&store), WalkOptions::default());
        let tree = walker.walk(root.path());

        let snap = stats.snapshot();
        // Exactly the root was rescanned; unchanged children stay hits,
        // the new directory is a miss
        assert_eq!(snap.dirs_rescanned, 1);
        assert_eq!(snap.cache_hits, 2);
        assert_eq!(snap.cache_misses, 1);
        assert_eq!(snap.total_dirs, 4);
        assert_eq!(tree.children.len(), 3);
    }

    #[test]
    fn test_force_full_scan_ignores_cache() {
        let cache = tempdir().unwrap();
        let root = tempdir().unwrap();
        fs::create_dir(root.path().join("sub")).unwrap();

        let store = open_store(cache.path());
        let (walker, _) = test_walker(Arc::clone(&store), WalkOptions::default());
        walker.walk(root.path());

        let (walker, stats) = test_walker(
            Arc::clone(&store),
            WalkOptions {
                force_full_scan: true,
                ..Default::default()
            },
        );
        walker.walk(root.path());

        let snap = stats.snapshot();
        assert_eq!(snap.cache_hits, 0);
        assert_eq!(snap.dirs_rescanned, 2);
    }

    #[test]
    fn test_expired_record_is_rescanned() {
        let cache = tempdir().unwrap();
        let root = tempdir().unwrap();

        let store = open_store(cache.path());
        let (walker, _) = test_walker(Arc::clone(&store), WalkOptions::default());
        walker.walk(root.path());

        std::thread::sleep(Duration::from_millis(100));

        let (walker, stats) = test_walker(
            Arc::clone(&store),
            WalkOptions {
                cache_max_age: Duration::from_millis(50),
                ..Default::default()
            },
        );
        walker.walk(root.path());

        let snap = stats.snapshot();
        assert!(snap.cache_expired > 0);
        assert!(snap.dirs_rescanned > 0);
        assert_eq!(snap.cache_hits, 0);
    }

    #[test]
    fn test_missing_directory_yields_error_node_and_purges_orphan() {
        let cache = tempdir().unwrap();
        let root = tempdir().unwrap();
        let victim = root.path().join("victim");
        fs::create_dir(&victim).unwrap();

        let store = open_store(cache.path());
        let (walker, _) = test_walker(Arc::clone(&store), WalkOptions::default());
        walker.walk(root.path());
        assert!(store.get(&path_key(&victim)).is_ok());

        fs::remove_dir(&victim).unwrap();

        let (walker, _) = test_walker(Arc::clone(&store), WalkOptions::default());
        let node = walker.walk(&victim);
        assert_eq!(node.flag, EntryFlag::Error);
        assert!(node.children.is_empty());

        // The orphaned record was dropped
        assert!(store.get(&path_key(&victim)).unwrap_err().is_not_present());
    }

    #[test]
    fn test_corrupt_record_treated_as_miss_and_overwritten() {
        let cache = tempdir().unwrap();
        let root = tempdir().unwrap();

        let store = open_store(cache.path());
        let (walker, _) = test_walker(Arc::clone(&store), WalkOptions::default());
        walker.walk(root.path());

        // Corrupt the stored record out from under the walker
        store
            .put_raw(&path_key(root.path()), &[0xff, 0xde, 0xad])
            .unwrap();
        assert!(matches!(
            store.get(&path_key(root.path())),
            Err(StoreError::Corrupted { .. })
        ));

        let (walker, stats) = test_walker(Arc::clone(&store), WalkOptions::default());
        let tree = walker.walk(root.path());
        assert_eq!(tree.flag, EntryFlag::Empty);

        let snap = stats.snapshot();
        assert_eq!(snap.cache_misses, 1);

        // The subsequent store overwrote the corrupt entry
        assert!(store.get(&path_key(root.path())).is_ok());
    }

    #[test]
    fn test_ignored_directory_is_skipped_entirely() {
        let cache = tempdir().unwrap();
        let root = tempdir().unwrap();
        fs::create_dir(root.path().join("kept")).unwrap();
        fs::create_dir(root.path().join("skipped")).unwrap();

        let store = open_store(cache.path());
        let stats = Arc::new(CacheStats::new());
        let (tx, _rx) = unbounded();
        let walker = Walker::new(
            Arc::clone(&store),
            None,
            Arc::clone(&stats),
            tx,
            CancellationToken::new(),
            Arc::new(|name: &str, _: &Path| name == "skipped"),
            WalkOptions::default(),
        );

        let tree = walker.walk(root.path());
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].name(), Some("kept"));
        // No cache read or write for the skipped subtree
        assert!(store
            .get(&path_key(&root.path().join("skipped")))
            .unwrap_err()
            .is_not_present());
    }

    #[test]
    fn test_cancelled_walk_returns_partial_node() {
        let cache = tempdir().unwrap();
        let root = tempdir().unwrap();

        let store = open_store(cache.path());
        let stats = Arc::new(CacheStats::new());
        let (tx, _rx) = unbounded();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let walker = Walker::new(
            store,
            None,
            stats,
            tx,
            cancel,
            Arc::new(|_, _| false),
            WalkOptions::default(),
        );

        let tree = walker.walk(root.path());
        assert_eq!(tree.flag, EntryFlag::Partial);
        assert!(tree.children.is_empty());
    }

    #[test]
    fn test_empty_directory_flag() {
        let cache = tempdir().unwrap();
        let root = tempdir().unwrap();

        let store = open_store(cache.path());
        let (walker, _) = test_walker(store, WalkOptions::default());
        let tree = walker.walk(root.path());

        assert_eq!(tree.flag, EntryFlag::Empty);
        assert_eq!(tree.item_count, 1);
    }

    #[test]
    fn test_annexed_key_size_parsing() {
        assert_eq!(
            annexed_key_size(Path::new(
                ".git/annex/objects/xx/yy/SHA256E-s1048576--0123abcd.bin"
            )),
            Some(1_048_576)
        );
        assert_eq!(
            annexed_key_size(Path::new("SHA256E-s0--empty")),
            Some(0)
        );
        assert_eq!(annexed_key_size(Path::new("regular-target.txt")), None);
        assert_eq!(annexed_key_size(Path::new("MD5-sabc--nodigits")), None);
    }
}
