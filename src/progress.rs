//! Progress reporting
//!
//! The walker emits per-directory deltas on a lossy channel; the
//! analyzer accumulates them into [`CurrentProgress`] snapshots for
//! display. This module also provides the terminal reporter and the
//! header/summary printers used by the CLI.

use crate::stats::CacheStatsSnapshot;
use crate::tree::DirNode;
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;

/// Per-directory delta emitted by the walker
#[derive(Debug, Clone)]
pub struct ProgressDelta {
    /// Directory just processed
    pub path: PathBuf,
    /// Entries processed in this directory
    pub items: u64,
    /// Bytes local to this directory (self metadata + direct files);
    /// subtree aggregates are reported by the subtree's own deltas
    pub bytes: u64,
}

/// Accumulated progress snapshot published to consumers
#[derive(Debug, Clone, Default)]
pub struct CurrentProgress {
    pub current_path: PathBuf,
    pub item_count: u64,
    pub total_bytes: u64,
}

/// Spinner-based progress display
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {elapsed} {prefix:.bold} {wide_msg}")
                .expect("progress template")
                .tick_strings(&["◐", "◓", "◑", "◒", "●"]),
        );
        bar.set_prefix("scanning");
        bar.enable_steady_tick(Duration::from_millis(120));

        Self { bar }
    }

    /// Update the display from an accumulated snapshot
    pub fn update(&self, progress: &CurrentProgress) {
        self.bar.set_message(format!(
            "{} items, {} ({})",
            format_number(progress.item_count),
            format_size(progress.total_bytes, BINARY),
            progress.current_path.display(),
        ));
    }

    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Print a header at the start of an analysis
pub fn print_header(root: &str, incremental: bool, cache_path: &str) {
    println!();
    println!(
        "{} {}",
        style("incdu").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Path:").bold(), root);
    if incremental {
        println!("  {} {}", style("Cache:").bold(), cache_path);
    }
    println!();
}

/// Print the result summary for a completed analysis
pub fn print_summary(root: &DirNode, duration: Duration) {
    println!();
    println!("{}", style("Analysis Complete").green().bold());
    println!("{}", style("─".repeat(50)).dim());
    println!(
        "  {} {}",
        style("Items:").bold(),
        format_number(root.item_count)
    );
    println!(
        "  {} {} apparent, {} on disk",
        style("Size:").bold(),
        format_size(root.size, BINARY),
        format_size(root.usage, BINARY)
    );
    println!(
        "  {} {:.1}s",
        style("Duration:").bold(),
        duration.as_secs_f64()
    );
    if root.flag.is_error() {
        println!(
            "  {} directory could not be fully read",
            style("Warning:").yellow().bold()
        );
    }
    println!();
}

/// Print the cache statistics block (`--show-cache-stats`)
pub fn print_cache_stats(stats: &CacheStatsSnapshot) {
    println!("{}", style("Cache Statistics").cyan().bold());
    println!("{}", style("─".repeat(50)).dim());
    println!(
        "  {} {:.1}% ({} hits, {} misses)",
        style("Hit rate:").bold(),
        stats.hit_rate(),
        format_number(stats.cache_hits),
        format_number(stats.cache_misses),
    );
    println!(
        "  {} {:.1}% ({} cached, {} scanned)",
        style("I/O reduction:").bold(),
        stats.io_reduction(),
        format_size(stats.bytes_from_cache, BINARY),
        format_size(stats.bytes_scanned, BINARY),
    );
    println!(
        "  {} {} total, {} rescanned, {} expired",
        style("Directories:").bold(),
        format_number(stats.total_dirs),
        format_number(stats.dirs_rescanned),
        format_number(stats.cache_expired),
    );
    println!(
        "  {} {:.2}s",
        style("Elapsed:").bold(),
        stats.total_scan_time.as_secs_f64()
    );
    println!();
}
