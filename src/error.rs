//! Error types for incdu
//!
//! This module defines the error hierarchy for the analyzer:
//! - Cache store errors (open lifecycle, read/write, corruption)
//! - Throttle errors (cancellation only)
//! - Configuration and CLI errors
//!
//! Design philosophy:
//! - Use thiserror for structured error types in library code
//! - Errors should be actionable - include the path and what to do about it
//! - Cache anomalies are recoverable: the walker falls back to a rescan

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the incdu application
#[derive(Error, Debug)]
pub enum AnalyzerError {
    /// Cache store errors
    #[error("cache store error: {0}")]
    Store(#[from] StoreError),

    /// Throttle errors
    #[error("throttle error: {0}")]
    Throttle(#[from] ThrottleError),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistent cache store errors
///
/// Open failures carry the storage path and a remedy so the failure
/// message shown to the user is directly actionable.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Operation attempted on a store that is not open (never opened, or
    /// already released)
    #[error("cache store at '{}' is not open", .path.display())]
    NotOpen { path: PathBuf },

    /// No cache entry exists for the given directory path
    #[error("no cache entry for '{path}'")]
    NotPresent { path: String },

    /// The storage directory does not exist
    #[error("cache directory does not exist at '{}' (create it with: mkdir -p {})", .path.display(), .path.display())]
    NotFound { path: PathBuf },

    /// Permission denied on the storage directory
    #[error("permission denied opening cache at '{}' (check with: ls -ld {})", .path.display(), .path.display())]
    PermissionDenied { path: PathBuf },

    /// Another process holds the store lock
    #[error("cache at '{}' is locked by another incdu process", .path.display())]
    Locked { path: PathBuf },

    /// A cache entry (or the store itself) could not be decoded
    #[error("corrupted cache entry for '{path}': {detail} (will rescan; delete the cache to clear it)")]
    Corrupted { path: String, detail: String },

    /// The disk holding the store is full
    #[error("insufficient disk space for cache at '{}' (check with: df -h)", .path.display())]
    DiskFull { path: PathBuf },

    /// Record could not be encoded for storage
    #[error("failed to encode cache record: {detail}")]
    Encode { detail: String },

    /// Write to the underlying engine failed
    #[error("cache write failed for '{path}': {detail}")]
    Write { path: String, detail: String },

    /// Any other engine-level error
    #[error("cache engine error: {0}")]
    Engine(#[from] rocksdb::Error),
}

impl StoreError {
    /// A plain miss: the entry simply is not there
    pub fn is_not_present(&self) -> bool {
        matches!(self, StoreError::NotPresent { .. })
    }

    /// Check if this error is recoverable by treating it as a cache miss
    /// and rescanning the directory
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StoreError::NotPresent { .. }
                | StoreError::Corrupted { .. }
                | StoreError::Engine(_)
                | StoreError::NotOpen { .. }
        )
    }
}

/// Throttle errors
///
/// The throttle has a single failure mode: the wait was cancelled.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ThrottleError {
    /// The cancellation token was signalled during a throttled wait
    #[error("throttled wait cancelled")]
    Cancelled,
}

/// Configuration and CLI errors.
///
/// Flag-combination misuse is rejected by clap itself (`requires`); only
/// value-level problems surface here.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Duration string could not be parsed
    #[error("invalid duration '{input}': {reason}")]
    InvalidDuration { input: String, reason: String },
}

/// Result type alias for AnalyzerError
pub type Result<T> = std::result::Result<T, AnalyzerError>;

/// Result type alias for StoreError
pub type StoreResult<T> = std::result::Result<T, StoreError>;
