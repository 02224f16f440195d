//! Cache statistics
//!
//! Counters are atomic and monotonic within a run; the time fields sit
//! behind a read-write lock so a rendering snapshot sees a consistent
//! set. Derived rates live on the snapshot.

use humansize::{format_size, BINARY};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, SystemTime};

/// Thread-safe statistics for one analyzer run
#[derive(Debug, Default)]
pub struct CacheStats {
    total_dirs: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_expired: AtomicU64,
    dirs_rescanned: AtomicU64,
    bytes_from_cache: AtomicU64,
    bytes_scanned: AtomicU64,
    times: RwLock<ScanTimes>,
}

#[derive(Debug, Default, Clone)]
struct ScanTimes {
    scan_start: Option<SystemTime>,
    scan_end: Option<SystemTime>,
    total_scan_time: Duration,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_dir(&self) {
        self.total_dirs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expired(&self) {
        self.cache_expired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rescan(&self) {
        self.dirs_rescanned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_from_cache(&self, bytes: u64) {
        self.bytes_from_cache.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_bytes_scanned(&self, bytes: u64) {
        self.bytes_scanned.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record the wall-clock start of a run
    pub fn mark_start(&self) {
        let mut times = self.times.write().expect("stats lock poisoned");
        times.scan_start = Some(SystemTime::now());
    }

    /// Record the end of a run and its measured duration
    pub fn mark_end(&self, total: Duration) {
        let mut times = self.times.write().expect("stats lock poisoned");
        times.scan_end = Some(SystemTime::now());
        times.total_scan_time = total;
    }

    /// Consistent copy of all fields for rendering
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        let times = self.times.read().expect("stats lock poisoned").clone();
        CacheStatsSnapshot {
            total_dirs: self.total_dirs.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_expired: self.cache_expired.load(Ordering::Relaxed),
            dirs_rescanned: self.dirs_rescanned.load(Ordering::Relaxed),
            bytes_from_cache: self.bytes_from_cache.load(Ordering::Relaxed),
            bytes_scanned: self.bytes_scanned.load(Ordering::Relaxed),
            scan_start: times.scan_start,
            scan_end: times.scan_end,
            total_scan_time: times.total_scan_time,
        }
    }
}

/// Point-in-time copy of the accumulator
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStatsSnapshot {
    pub total_dirs: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_expired: u64,
    pub dirs_rescanned: u64,
    pub bytes_from_cache: u64,
    pub bytes_scanned: u64,
    pub scan_start: Option<SystemTime>,
    pub scan_end: Option<SystemTime>,
    pub total_scan_time: Duration,
}

impl CacheStatsSnapshot {
    /// Cache hit rate as a percentage; 0.0 when nothing was looked up
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / total as f64 * 100.0
    }

    /// Share of bytes served from cache as a percentage; 0.0 when no
    /// bytes were accounted
    pub fn io_reduction(&self) -> f64 {
        let total = self.bytes_from_cache + self.bytes_scanned;
        if total == 0 {
            return 0.0;
        }
        self.bytes_from_cache as f64 / total as f64 * 100.0
    }
}

impl fmt::Display for CacheStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cache statistics:\n  \
             Hit rate:      {:.1}% ({} hits, {} misses)\n  \
             I/O reduction: {:.1}% ({} cached, {} scanned)\n  \
             Directories:   {} total, {} rescanned, {} expired\n  \
             Elapsed:       {:.2?}",
            self.hit_rate(),
            self.cache_hits,
            self.cache_misses,
            self.io_reduction(),
            format_size(self.bytes_from_cache, BINARY),
            format_size(self.bytes_scanned, BINARY),
            self.total_dirs,
            self.dirs_rescanned,
            self.cache_expired,
            self.total_scan_time,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = CacheStats::new();
        stats.record_dir();
        stats.record_dir();
        stats.record_hit();
        stats.record_miss();
        stats.record_expired();
        stats.record_rescan();
        stats.add_bytes_from_cache(1024);
        stats.add_bytes_scanned(2048);

        let snap = stats.snapshot();
        assert_eq!(snap.total_dirs, 2);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.cache_misses, 1);
        assert_eq!(snap.cache_expired, 1);
        assert_eq!(snap.dirs_rescanned, 1);
        assert_eq!(snap.bytes_from_cache, 1024);
        assert_eq!(snap.bytes_scanned, 2048);
    }

    #[test]
    fn test_rates_with_zero_denominators() {
        let snap = CacheStatsSnapshot::default();
        assert_eq!(snap.hit_rate(), 0.0);
        assert_eq!(snap.io_reduction(), 0.0);
    }

    #[test]
    fn test_rates() {
        let snap = CacheStatsSnapshot {
            cache_hits: 9,
            cache_misses: 1,
            bytes_from_cache: 750,
            bytes_scanned: 250,
            ..Default::default()
        };
        assert!((snap.hit_rate() - 90.0).abs() < f64::EPSILON);
        assert!((snap.io_reduction() - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(CacheStats::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let stats = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    stats.record_hit();
                    stats.add_bytes_from_cache(10);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let snap = stats.snapshot();
        assert_eq!(snap.cache_hits, 8000);
        assert_eq!(snap.bytes_from_cache, 80_000);
    }

    #[test]
    fn test_display_summary() {
        let snap = CacheStatsSnapshot {
            cache_hits: 3,
            cache_misses: 1,
            bytes_from_cache: 2048,
            bytes_scanned: 0,
            total_dirs: 4,
            ..Default::default()
        };
        let text = snap.to_string();
        assert!(text.contains("75.0%"));
        assert!(text.contains("2 KiB"));
    }
}
