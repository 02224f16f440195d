//! Configuration types for incdu
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros; the cache-shaping
//!   flags declare `requires = "incremental"` so clap rejects them when
//!   the cache is off
//! - The validated runtime configuration
//! - Duration parsing for the throttle and expiry flags

use crate::error::ConfigError;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Incremental disk usage analyzer
#[derive(Parser, Debug, Clone)]
#[command(
    name = "incdu",
    version,
    about = "Incremental disk usage analyzer with a persistent per-directory cache",
    long_about = "Walks a directory tree and reports aggregate sizes.\n\n\
                  With --incremental, per-directory metadata is cached in an embedded\n\
                  key-value store and unchanged subtrees (by mtime) are rebuilt from\n\
                  the cache without touching the filesystem. I/O throttling protects\n\
                  shared storage from scan load.",
    after_help = "EXAMPLES:\n    \
        incdu /data\n    \
        incdu /data --incremental\n    \
        incdu /srv/share --incremental --incremental-path /var/cache/incdu --max-iops 500\n    \
        incdu /data --incremental --cache-max-age 24h --show-cache-stats\n    \
        incdu /data --incremental --force-full-scan"
)]
pub struct CliArgs {
    /// Directory to analyze
    #[arg(value_name = "PATH", default_value = ".")]
    pub path: PathBuf,

    /// Enable the incremental cache
    #[arg(long)]
    pub incremental: bool,

    /// Directory holding the cache store
    #[arg(long, value_name = "DIR", requires = "incremental")]
    pub incremental_path: Option<PathBuf>,

    /// Rescan cache entries older than this (e.g. 30m, 24h; 0 = no expiry)
    #[arg(long, value_name = "DURATION", value_parser = parse_duration_arg, requires = "incremental")]
    pub cache_max_age: Option<Duration>,

    /// Ignore the cache and rescan everything
    #[arg(long, requires = "incremental")]
    pub force_full_scan: bool,

    /// Limit filesystem operations per second (0 = unlimited)
    #[arg(long, value_name = "N")]
    pub max_iops: Option<u32>,

    /// Fixed delay between directory scans (e.g. 10ms; 0 = no delay)
    #[arg(long, value_name = "DURATION", value_parser = parse_duration_arg)]
    pub io_delay: Option<Duration>,

    /// Print cache statistics after the run
    #[arg(long, requires = "incremental")]
    pub show_cache_stats: bool,

    /// Follow symlinks and report target sizes
    #[arg(short = 'L', long)]
    pub follow_symlinks: bool,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output (show cache decisions and warnings)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

/// Configuration handed to analyzer construction
#[derive(Debug, Clone)]
pub struct AnalyzerOptions {
    /// Directory for the cache store
    pub storage_path: PathBuf,
    /// Zero means "no expiry"
    pub cache_max_age: Duration,
    pub force_full_scan: bool,
    /// Zero disables IOPS limiting
    pub max_iops: u32,
    /// Zero disables the fixed delay
    pub io_delay: Duration,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            storage_path: default_storage_path(),
            cache_max_age: Duration::ZERO,
            force_full_scan: false,
            max_iops: 0,
            io_delay: Duration::ZERO,
        }
    }
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Root directory to analyze
    pub root: PathBuf,

    /// Whether the incremental analyzer is active
    pub incremental: bool,

    /// Analyzer construction options
    pub analyzer: AnalyzerOptions,

    /// Print the cache statistics block after the run
    pub show_cache_stats: bool,

    /// Follow symlinks
    pub follow_symlinks: bool,

    /// Show the live progress spinner
    pub show_progress: bool,

    /// Verbose logging
    pub verbose: bool,
}

impl RunConfig {
    /// Build the runtime configuration from parsed CLI arguments.
    ///
    /// Flag combinations are already enforced by clap (`requires`); this
    /// only resolves defaults.
    pub fn from_args(args: CliArgs) -> Self {
        // Without --incremental the store is a throwaway: per-process
        // location, every directory rescanned, removed after the run
        let storage_path = if args.incremental {
            args.incremental_path.unwrap_or_else(default_storage_path)
        } else {
            scratch_storage_path()
        };

        let analyzer = AnalyzerOptions {
            storage_path,
            cache_max_age: args.cache_max_age.unwrap_or(Duration::ZERO),
            force_full_scan: args.force_full_scan || !args.incremental,
            max_iops: args.max_iops.unwrap_or(0),
            io_delay: args.io_delay.unwrap_or(Duration::ZERO),
        };

        Self {
            root: args.path,
            incremental: args.incremental,
            analyzer,
            show_cache_stats: args.show_cache_stats,
            follow_symlinks: args.follow_symlinks,
            show_progress: !args.quiet,
            verbose: args.verbose,
        }
    }
}

/// Default location for the cache store
pub fn default_storage_path() -> PathBuf {
    std::env::temp_dir().join("incdu-cache")
}

/// Per-process store location for non-incremental runs
fn scratch_storage_path() -> PathBuf {
    std::env::temp_dir().join(format!("incdu-scan-{}", std::process::id()))
}

/// Parse a human duration: `250ms`, `30s`, `5m`, `24h`, or bare seconds.
/// `0` disables the corresponding feature.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let input = input.trim();
    let invalid = |reason: &str| ConfigError::InvalidDuration {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    if input.is_empty() {
        return Err(invalid("empty string"));
    }

    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, unit) = input.split_at(split);

    let value: u64 = digits
        .parse()
        .map_err(|_| invalid("expected a number followed by ms, s, m or h"))?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        _ => Err(invalid("unknown unit (expected ms, s, m or h)")),
    }
}

/// clap adapter for [`parse_duration`]
fn parse_duration_arg(input: &str) -> Result<Duration, String> {
    parse_duration(input).map_err(|e| e.to_string())
}
