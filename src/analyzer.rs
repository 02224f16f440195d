//! Analyzer façade
//!
//! [`IncrementalAnalyzer`] owns the store handle, throttle, statistics,
//! progress plumbing and completion signal, and drives the walker over a
//! root path. Alternative analyzer implementations plug in behind the
//! [`Analyzer`] trait.
//!
//! Lifecycle per run: open the store, walk, join the progress delivery
//! task, release the store, fire the done signal. The store is released
//! on every exit path (a drop guard covers errors and panics), and the
//! done signal fires even when the store cannot be opened so consumers
//! never hang.

use crate::config::AnalyzerOptions;
use crate::error::StoreError;
use crate::progress::{CurrentProgress, ProgressDelta};
use crate::stats::{CacheStats, CacheStatsSnapshot};
use crate::store::CacheStore;
use crate::throttle::{CancellationToken, IoThrottle};
use crate::tree::{DirNode, Node};
use crate::walker::{ShouldIgnoreDir, WalkOptions, Walker};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::error;

/// Depth of the internal delta queue; deltas beyond it are dropped
/// (progress is a UI hint, not an audit trail)
const PROGRESS_QUEUE_DEPTH: usize = 256;

/// Interval between memory-pressure hook invocations
const MEMORY_HOOK_INTERVAL: Duration = Duration::from_secs(5);

/// Callback invoked periodically while a run is in flight when
/// `constant_gc` is disabled
pub type MemoryPressureHook = Arc<dyn Fn() + Send + Sync>;

/// Contract shared by all analyzer implementations
pub trait Analyzer {
    /// Analyze the tree rooted at `path`. Always returns a node; failures
    /// surface as an error-flagged root, never as a hang.
    fn analyze(&mut self, path: &Path, ignore: ShouldIgnoreDir, constant_gc: bool) -> Node;

    fn set_follow_symlinks(&mut self, follow: bool);

    fn set_show_annexed_size(&mut self, show: bool);

    /// Lossy channel of accumulated progress snapshots
    fn progress_channel(&self) -> Receiver<CurrentProgress>;

    /// Signal fired exactly once when analysis completes or fails
    fn done_signal(&self) -> DoneSignal;

    /// Prepare for reuse: clears progress, stats and the done signal.
    /// On-disk state is untouched.
    fn reset(&mut self);
}

/// Broadcast completion signal with at-most-once fire
#[derive(Clone, Default)]
pub struct DoneSignal {
    inner: Arc<DoneInner>,
}

#[derive(Default)]
struct DoneInner {
    fired: Mutex<bool>,
    cond: Condvar,
}

impl DoneSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal, waking all waiters. Subsequent calls are no-ops.
    pub fn broadcast(&self) {
        let mut fired = self.inner.fired.lock().expect("done signal poisoned");
        if !*fired {
            *fired = true;
            self.inner.cond.notify_all();
        }
    }

    pub fn is_done(&self) -> bool {
        *self.inner.fired.lock().expect("done signal poisoned")
    }

    /// Block until the signal fires
    pub fn wait(&self) {
        let mut fired = self.inner.fired.lock().expect("done signal poisoned");
        while !*fired {
            fired = self
                .inner
                .cond
                .wait(fired)
                .expect("done signal poisoned");
        }
    }

    /// Block until the signal fires or `timeout` elapses; true when fired
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut fired = self.inner.fired.lock().expect("done signal poisoned");
        while !*fired {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .inner
                .cond
                .wait_timeout(fired, deadline - now)
                .expect("done signal poisoned");
            fired = guard;
        }
        true
    }
}

/// Analyzer with per-directory incremental caching keyed on mtime
pub struct IncrementalAnalyzer {
    options: AnalyzerOptions,
    store: Arc<CacheStore>,
    throttle: Option<Arc<IoThrottle>>,
    stats: Arc<CacheStats>,
    cancel: CancellationToken,
    progress_tx: Sender<CurrentProgress>,
    progress_rx: Receiver<CurrentProgress>,
    done: DoneSignal,
    follow_symlinks: bool,
    show_annexed_size: bool,
    memory_hook: Option<MemoryPressureHook>,
}

impl IncrementalAnalyzer {
    pub fn new(options: AnalyzerOptions) -> Self {
        let (progress_tx, progress_rx) = bounded(1);
        let throttle =
            IoThrottle::new(options.max_iops, options.io_delay).map(Arc::new);

        Self {
            store: Arc::new(CacheStore::new(options.storage_path.clone())),
            throttle,
            stats: Arc::new(CacheStats::new()),
            cancel: CancellationToken::new(),
            progress_tx,
            progress_rx,
            done: DoneSignal::new(),
            follow_symlinks: false,
            show_annexed_size: false,
            memory_hook: None,
            options,
        }
    }

    /// Token observed by throttled waits; cancelling aborts the walk at
    /// the next throttle acquisition
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Snapshot of the run's cache statistics
    pub fn get_cache_stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// Install a callback invoked periodically during runs started with
    /// `constant_gc == false`
    pub fn set_memory_pressure_hook(&mut self, hook: Option<MemoryPressureHook>) {
        self.memory_hook = hook;
    }

    fn walk_options(&self) -> WalkOptions {
        WalkOptions {
            cache_max_age: self.options.cache_max_age,
            force_full_scan: self.options.force_full_scan,
            follow_symlinks: self.follow_symlinks,
            show_annexed_size: self.show_annexed_size,
        }
    }
}

impl Analyzer for IncrementalAnalyzer {
    fn analyze(&mut self, path: &Path, ignore: ShouldIgnoreDir, constant_gc: bool) -> Node {
        let started = Instant::now();
        self.stats.mark_start();

        // Progress delivery starts before the store opens so consumers
        // are never left waiting on a run that fails early
        let (delta_tx, delta_rx) = bounded::<ProgressDelta>(PROGRESS_QUEUE_DEPTH);
        let accumulator = spawn_progress_accumulator(delta_rx, self.progress_tx.clone());

        if let Err(e) = self.store.open() {
            let diagnostic = open_failure_diagnostic(self.store.storage_path(), &e);
            error!("{diagnostic}");
            eprintln!("{diagnostic}");

            drop(delta_tx);
            let _ = accumulator.join();
            self.stats.mark_end(started.elapsed());
            self.done.broadcast();
            return Node::Dir(DirNode::error_dir(path));
        }
        let close_guard = StoreCloseGuard {
            store: Arc::clone(&self.store),
        };

        let memory_task = if constant_gc {
            None
        } else {
            self.memory_hook
                .clone()
                .map(|hook| spawn_memory_pressure_task(hook, self.done.clone()))
        };

        let walker = Walker::new(
            Arc::clone(&self.store),
            self.throttle.clone(),
            Arc::clone(&self.stats),
            delta_tx,
            self.cancel.clone(),
            ignore,
            self.walk_options(),
        );

        let root = walker.walk(path);

        // Dropping the walker releases the delta sender; the delivery
        // task drains and exits, and is joined before done fires
        drop(walker);
        let _ = accumulator.join();

        drop(close_guard);

        self.stats.mark_end(started.elapsed());
        self.done.broadcast();

        if let Some(task) = memory_task {
            let _ = task.join();
        }

        Node::Dir(root)
    }

    fn set_follow_symlinks(&mut self, follow: bool) {
        self.follow_symlinks = follow;
    }

    fn set_show_annexed_size(&mut self, show: bool) {
        self.show_annexed_size = show;
    }

    fn progress_channel(&self) -> Receiver<CurrentProgress> {
        self.progress_rx.clone()
    }

    fn done_signal(&self) -> DoneSignal {
        self.done.clone()
    }

    fn reset(&mut self) {
        let (progress_tx, progress_rx) = bounded(1);
        self.progress_tx = progress_tx;
        self.progress_rx = progress_rx;
        self.stats = Arc::new(CacheStats::new());
        self.done = DoneSignal::new();
        self.cancel = CancellationToken::new();
        if let Some(throttle) = &self.throttle {
            throttle.reset();
        }
    }
}

/// Releases the store handle on every exit path, including unwinds
struct StoreCloseGuard {
    store: Arc<CacheStore>,
}

impl Drop for StoreCloseGuard {
    fn drop(&mut self) {
        self.store.close();
    }
}

/// Fold walker deltas into accumulated snapshots for consumers.
///
/// Publishing is lossy: a full output slot means a stale snapshot is
/// dropped in favor of the next one.
fn spawn_progress_accumulator(
    delta_rx: Receiver<ProgressDelta>,
    out_tx: Sender<CurrentProgress>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("progress-accumulator".to_string())
        .spawn(move || {
            let mut current = CurrentProgress::default();
            for delta in delta_rx.iter() {
                current.current_path = delta.path;
                current.item_count += delta.items;
                current.total_bytes += delta.bytes;
                let _ = out_tx.try_send(current.clone());
            }
        })
        .expect("Failed to spawn progress accumulator thread")
}

/// Invoke the memory-pressure hook periodically until the run completes
fn spawn_memory_pressure_task(hook: MemoryPressureHook, done: DoneSignal) -> JoinHandle<()> {
    thread::Builder::new()
        .name("memory-pressure".to_string())
        .spawn(move || {
            while !done.wait_timeout(MEMORY_HOOK_INTERVAL) {
                hook();
            }
        })
        .expect("Failed to spawn memory pressure thread")
}

/// Multi-line actionable diagnostic for a store-open failure
fn open_failure_diagnostic(storage_path: &Path, err: &StoreError) -> String {
    let path = storage_path.display();
    format!(
        "Failed to initialize incremental cache at {path}: {err}\n\
         \n\
         Possible causes and solutions:\n\
         \x20 1. Directory doesn't exist\n\
         \x20    -> Create it with: mkdir -p {path}\n\
         \n\
         \x20 2. Permission denied\n\
         \x20    -> Check directory permissions: ls -ld {path}\n\
         \x20    -> Ensure you have write access: chmod u+w {path}\n\
         \n\
         \x20 3. Disk full\n\
         \x20    -> Check disk space: df -h\n\
         \x20    -> Free up space or use a different location\n\
         \n\
         \x20 4. Cache corrupted or written by an incompatible version\n\
         \x20    -> Delete it with: rm -rf {path}\n\
         \n\
         \x20 5. Another incdu instance is using this cache\n\
         \x20    -> Wait for it to finish, or use a separate location\n\
         \n\
         To use a different cache location, pass:\n\
         \x20 --incremental-path /path/to/cache"
    )
}
