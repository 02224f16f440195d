//! incdu - Incremental Disk Usage Analyzer
//!
//! Walks a directory tree and reports aggregate sizes, maintaining a
//! persistent per-directory metadata cache so unchanged subtrees are
//! rebuilt from the cache instead of re-read from disk. Designed for
//! large trees on shared (network) storage, where repeated full scans
//! are expensive for everyone on the filer.
//!
//! # Features
//!
//! - **Mtime-keyed incremental cache**: a directory whose modification
//!   time is unchanged is rebuilt from its cached record, including its
//!   whole subtree, with no filesystem reads.
//!
//! - **Durable store**: per-directory records live in an embedded
//!   RocksDB store and survive across runs. One process holds the store
//!   at a time; a concurrent open fails with a clear "locked" error.
//!
//! - **I/O throttling**: a token-bucket IOPS limit and/or a fixed
//!   inter-operation delay keep scan load off shared storage.
//!
//! - **Accurate statistics**: hits, misses, expiries, rescans and byte
//!   counters stay correct across every fallback path.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    IncrementalAnalyzer                       │
//! │   lifecycle, progress channel, done signal, cancellation     │
//! └───────────────────────────┬──────────────────────────────────┘
//!                             │
//!                     ┌───────▼────────┐
//!                     │     Walker     │
//!                     │  per-directory │
//!                     │ cache decision │
//!                     └──┬─────┬─────┬─┘
//!                        │     │     │
//!              ┌─────────▼┐ ┌──▼───┐ ┌▼──────────┐
//!              │CacheStore│ │Stats │ │ IoThrottle│
//!              │ RocksDB  │ │      │ │           │
//!              └──────────┘ └──────┘ └───────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use incdu::{Analyzer, AnalyzerOptions, IncrementalAnalyzer};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let mut analyzer = IncrementalAnalyzer::new(AnalyzerOptions::default());
//! let tree = analyzer.analyze(Path::new("/data"), Arc::new(|_, _| false), true);
//! println!("total: {} bytes", tree.size());
//! ```

pub mod analyzer;
pub mod config;
pub mod error;
pub mod progress;
pub mod stats;
pub mod store;
pub mod throttle;
pub mod tree;
pub mod walker;

pub use analyzer::{Analyzer, DoneSignal, IncrementalAnalyzer, MemoryPressureHook};
pub use config::{AnalyzerOptions, CliArgs, RunConfig};
pub use error::{AnalyzerError, Result, StoreError, ThrottleError};
pub use progress::CurrentProgress;
pub use stats::{CacheStats, CacheStatsSnapshot};
pub use store::{CacheStore, ChildEntry, DirRecord};
pub use throttle::{CancellationToken, IoThrottle};
pub use tree::{DirNode, EntryFlag, FileNode, Node, ParentSentinel};
pub use walker::{ShouldIgnoreDir, WalkOptions, Walker};
