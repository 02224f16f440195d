//! Integration tests for incdu
//!
//! These drive the incremental analyzer end to end over real temporary
//! directory trees. Several tests sleep past filesystem mtime
//! granularity (1s on many filesystems) before modifying a tree, so the
//! suite takes a few seconds.

use incdu::store::schema::path_key;
use incdu::{
    Analyzer, AnalyzerOptions, CacheStatsSnapshot, CacheStore, CancellationToken, DirNode,
    EntryFlag, IncrementalAnalyzer, IoThrottle, Node,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

fn run_analyzer(options: AnalyzerOptions, root: &Path) -> (DirNode, CacheStatsSnapshot) {
    let mut analyzer = IncrementalAnalyzer::new(options);
    let done = analyzer.done_signal();
    let node = analyzer.analyze(root, Arc::new(|_, _| false), true);

    assert!(done.is_done(), "done signal must fire when analyze returns");
    let stats = analyzer.get_cache_stats();
    match node {
        Node::Dir(dir) => (dir, stats),
        other => panic!("expected a directory root, got {other:?}"),
    }
}

fn cache_options(cache_root: &Path) -> AnalyzerOptions {
    AnalyzerOptions {
        storage_path: cache_root.join("cache"),
        ..Default::default()
    }
}

/// Create `count` empty subdirectories named dir1..dirN
fn make_subdirs(root: &Path, count: usize) {
    for i in 1..=count {
        fs::create_dir(root.join(format!("dir{i}"))).unwrap();
    }
}

#[test]
fn cold_then_warm_unchanged() {
    let cache = tempdir().unwrap();
    let root = tempdir().unwrap();
    make_subdirs(root.path(), 10);

    let (cold, cold_stats) = run_analyzer(cache_options(cache.path()), root.path());
    assert_eq!(cold_stats.cache_misses, 11);
    assert_eq!(cold_stats.cache_hits, 0);
    assert_eq!(cold_stats.total_dirs, 11);
    assert_eq!(cold.children.len(), 10);

    let (warm, warm_stats) = run_analyzer(cache_options(cache.path()), root.path());
    assert!(warm_stats.cache_hits >= 10);
    assert!(warm_stats.cache_misses <= 1);
    assert!(warm_stats.hit_rate() > 90.0);
    // Warm-run total equals the number of directories, not double-counted
    assert_eq!(warm_stats.total_dirs, 11);

    // The rebuilt tree is indistinguishable from the fresh scan,
    // including child ordering
    assert_eq!(warm, cold);
}

#[test]
fn addition_detected_after_warm_cache() {
    let cache = tempdir().unwrap();
    let root = tempdir().unwrap();
    make_subdirs(root.path(), 10);

    run_analyzer(cache_options(cache.path()), root.path());

    // Exceed mtime granularity, then change the root's entry list
    thread::sleep(Duration::from_millis(1100));
    fs::create_dir(root.path().join("dir11")).unwrap();
    fs::create_dir(root.path().join("dir12")).unwrap();

    let (tree, stats) = run_analyzer(cache_options(cache.path()), root.path());
    assert!(stats.dirs_rescanned >= 1, "the root must be rescanned");
    assert_eq!(stats.cache_misses, 2, "the two new directories are misses");
    assert_eq!(tree.children.len(), 12);
}

#[test]
fn expiry_forces_rescan() {
    let cache = tempdir().unwrap();
    let root = tempdir().unwrap();
    make_subdirs(root.path(), 3);

    let options = AnalyzerOptions {
        cache_max_age: Duration::from_millis(50),
        ..cache_options(cache.path())
    };

    let (cold, _) = run_analyzer(options.clone(), root.path());
    thread::sleep(Duration::from_millis(100));

    let (tree, stats) = run_analyzer(options, root.path());
    assert!(stats.cache_expired > 0);
    assert!(stats.dirs_rescanned > 0);
    assert_eq!(stats.cache_hits, 0);
    // Output still matches the filesystem
    assert_eq!(tree, cold);
}

#[test]
fn force_full_scan_bypasses_cache() {
    let cache = tempdir().unwrap();
    let root = tempdir().unwrap();
    make_subdirs(root.path(), 5);
    fs::write(root.path().join("dir1").join("f.bin"), vec![0u8; 1024]).unwrap();

    let (cold, _) = run_analyzer(cache_options(cache.path()), root.path());

    let options = AnalyzerOptions {
        force_full_scan: true,
        ..cache_options(cache.path())
    };
    let (tree, stats) = run_analyzer(options, root.path());

    assert_eq!(stats.cache_hits, 0);
    assert!(stats.dirs_rescanned > 0);
    assert_eq!(tree, cold);

    // Stored records were overwritten with fresh scan results
    let store = CacheStore::new(cache.path().join("cache"));
    store.open().unwrap();
    let record = store.get(&path_key(root.path())).unwrap();
    assert_eq!(record.size, tree.size);
}

#[test]
fn store_open_failure_yields_error_root_and_done_fires() {
    let cache = tempdir().unwrap();
    let root = tempdir().unwrap();

    // Unusable storage location: the parent chain does not exist
    let options = AnalyzerOptions {
        storage_path: cache.path().join("no").join("such").join("parent"),
        ..Default::default()
    };

    let mut analyzer = IncrementalAnalyzer::new(options);
    let done = analyzer.done_signal();
    let node = analyzer.analyze(root.path(), Arc::new(|_, _| false), true);

    assert_eq!(node.flag(), Some(EntryFlag::Error));
    assert!(
        done.wait_timeout(Duration::from_secs(5)),
        "done must fire within bounded time even on open failure"
    );
}

#[test]
fn concurrent_open_is_refused_as_locked() {
    let cache = tempdir().unwrap();
    let path = cache.path().join("cache");

    let holder = CacheStore::new(&path);
    holder.open().unwrap();

    let root = tempdir().unwrap();
    let (tree, _) = run_analyzer(
        AnalyzerOptions {
            storage_path: path,
            ..Default::default()
        },
        root.path(),
    );
    // The analyzer surfaces the lock as an error root instead of hanging
    assert!(tree.flag.is_error());
}

#[test]
fn deleted_directory_yields_error_node_without_store_misuse() {
    let cache = tempdir().unwrap();
    let root = tempdir().unwrap();
    let victim = root.path().join("victim");
    fs::create_dir(&victim).unwrap();

    run_analyzer(cache_options(cache.path()), root.path());

    // The cache knows the directory; now it disappears
    {
        let store = CacheStore::new(cache.path().join("cache"));
        store.open().unwrap();
        assert!(store.get(&path_key(&victim)).is_ok());
    }
    fs::remove_dir(&victim).unwrap();

    // Analyzing the vanished path directly returns an error node
    let (gone, _) = run_analyzer(cache_options(cache.path()), &victim);
    assert_eq!(gone.flag, EntryFlag::Error);
    assert!(gone.children.is_empty());

    // And a rescan of the parent no longer lists it
    thread::sleep(Duration::from_millis(1100));
    fs::create_dir(root.path().join("replacement")).unwrap();
    let (tree, _) = run_analyzer(cache_options(cache.path()), root.path());
    assert!(tree.children.iter().all(|c| c.name() != Some("victim")));
}

#[test]
fn records_round_trip_against_filesystem_mtime() {
    let cache = tempdir().unwrap();
    let root = tempdir().unwrap();
    make_subdirs(root.path(), 3);

    run_analyzer(cache_options(cache.path()), root.path());

    let store = CacheStore::new(cache.path().join("cache"));
    store.open().unwrap();

    for dir in [
        root.path().to_path_buf(),
        root.path().join("dir1"),
        root.path().join("dir2"),
        root.path().join("dir3"),
    ] {
        let record = store.get(&path_key(&dir)).unwrap();
        let fs_mtime = fs::metadata(&dir).unwrap().modified().unwrap();
        // Nanosecond-preserving equality against the live filesystem
        assert_eq!(record.mtime, fs_mtime, "mtime mismatch for {dir:?}");
        assert_eq!(record.path, dir.to_string_lossy());
    }
}

#[test]
fn ignore_predicate_skips_subtree_entirely() {
    let cache = tempdir().unwrap();
    let root = tempdir().unwrap();
    fs::create_dir(root.path().join("kept")).unwrap();
    fs::create_dir(root.path().join("node_modules")).unwrap();
    fs::write(root.path().join("node_modules").join("big.bin"), vec![0u8; 4096]).unwrap();

    let mut analyzer = IncrementalAnalyzer::new(cache_options(cache.path()));
    let node = analyzer.analyze(
        root.path(),
        Arc::new(|name: &str, _: &Path| name == "node_modules"),
        true,
    );

    let dir = match node {
        Node::Dir(d) => d,
        _ => panic!("expected dir"),
    };
    assert_eq!(dir.children.len(), 1);
    assert_eq!(dir.children[0].name(), Some("kept"));

    // Skipped means skipped: no cache entry was created for it
    let store = CacheStore::new(cache.path().join("cache"));
    store.open().unwrap();
    assert!(store
        .get(&path_key(&root.path().join("node_modules")))
        .unwrap_err()
        .is_not_present());
}

#[test]
fn cancellation_aborts_promptly_and_still_completes() {
    let cache = tempdir().unwrap();
    let root = tempdir().unwrap();
    make_subdirs(root.path(), 5);

    let mut analyzer = IncrementalAnalyzer::new(cache_options(cache.path()));
    analyzer.cancel_token().cancel();
    let done = analyzer.done_signal();

    let node = analyzer.analyze(root.path(), Arc::new(|_, _| false), true);
    assert_eq!(node.flag(), Some(EntryFlag::Partial));
    assert!(done.is_done());
}

#[test]
fn throttle_shapes_sustained_load() {
    let throttle = IoThrottle::new(100, Duration::ZERO).unwrap();
    let cancel = CancellationToken::new();

    let start = Instant::now();
    for _ in 0..150 {
        throttle.acquire(&cancel).unwrap();
    }
    let elapsed = start.elapsed();
    // 100-token burst, then 50 more at 100/s: ~0.5s give or take
    assert!(elapsed >= Duration::from_millis(200), "elapsed {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(900), "elapsed {elapsed:?}");
}

#[test]
fn io_delay_paces_the_walk() {
    let cache = tempdir().unwrap();
    let root = tempdir().unwrap();
    make_subdirs(root.path(), 10);

    let options = AnalyzerOptions {
        io_delay: Duration::from_millis(5),
        ..cache_options(cache.path())
    };

    let start = Instant::now();
    run_analyzer(options, root.path());
    // 11 throttled directory listings, 5ms each
    assert!(start.elapsed() >= Duration::from_millis(50));
}

#[test]
fn concurrent_acquire_and_reset_complete() {
    let throttle = Arc::new(IoThrottle::new(50, Duration::ZERO).unwrap());
    let cancel = CancellationToken::new();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let throttle = Arc::clone(&throttle);
        let cancel = cancel.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..50 {
                throttle.acquire(&cancel).unwrap();
            }
        }));
    }

    let resetter = {
        let throttle = Arc::clone(&throttle);
        thread::spawn(move || {
            for _ in 0..200 {
                throttle.reset();
                thread::sleep(Duration::from_micros(200));
            }
        })
    };

    for handle in handles {
        handle.join().unwrap();
    }
    resetter.join().unwrap();
}

#[test]
fn analyzer_reset_supports_back_to_back_runs() {
    let cache = tempdir().unwrap();
    let root = tempdir().unwrap();
    make_subdirs(root.path(), 4);

    let mut analyzer = IncrementalAnalyzer::new(cache_options(cache.path()));

    analyzer.analyze(root.path(), Arc::new(|_, _| false), true);
    let first = analyzer.get_cache_stats();
    assert_eq!(first.cache_misses, 5);

    analyzer.reset();
    analyzer.analyze(root.path(), Arc::new(|_, _| false), true);
    let second = analyzer.get_cache_stats();

    // Fresh counters for the second run, served from cache
    assert_eq!(second.cache_misses, 0);
    assert!(second.cache_hits >= 4);
}

#[test]
fn file_metadata_survives_cache_round_trip() {
    let cache = tempdir().unwrap();
    let root = tempdir().unwrap();
    fs::write(root.path().join("a.txt"), b"0123456789").unwrap();
    fs::write(root.path().join("b.txt"), vec![0u8; 2048]).unwrap();

    let (cold, _) = run_analyzer(cache_options(cache.path()), root.path());
    let (warm, warm_stats) = run_analyzer(cache_options(cache.path()), root.path());
    assert_eq!(warm_stats.cache_hits, 1);

    assert_eq!(warm, cold);
    let a = warm
        .children
        .iter()
        .find(|c| c.name() == Some("a.txt"))
        .and_then(Node::as_file)
        .unwrap();
    assert_eq!(a.size, 10);
}
