//! Cache record schema
//!
//! Defines the key encoding and the persisted record types for the
//! directory metadata cache.
//!
//! Records are stored as a one-byte schema version followed by the
//! bincode serialization of [`DirRecord`]. An unknown version or a
//! decode failure surfaces as [`StoreError::Corrupted`], which the
//! walker treats as a miss, so an incompatible old cache is rescanned
//! (and overwritten) rather than crashing the run. Timestamps round-trip
//! with full nanosecond precision.

use crate::error::StoreError;
use crate::tree::{DirNode, EntryFlag, Node};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, SystemTime};

/// Key namespace for incremental directory records
pub const KEY_PREFIX: &str = "incr:";

/// Current record schema version
pub const RECORD_VERSION: u8 = 1;

/// Persisted metadata for one directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirRecord {
    /// Absolute path, stored verbatim (no normalization)
    pub path: String,
    /// Directory modification time at scan time, nanosecond precision
    pub mtime: SystemTime,
    /// Aggregate apparent size including all descendants
    pub size: u64,
    /// Aggregate allocated size including all descendants
    pub usage: u64,
    /// Descendant count + 1 (self)
    pub item_count: u64,
    /// Directory status flag
    pub flag: EntryFlag,
    /// Direct children only; grandchildren live in their own records
    pub children: Vec<ChildEntry>,
    /// When this record was written
    pub cached_at: SystemTime,
    /// How long the filesystem scan took
    pub scan_duration: Duration,
}

/// Metadata for a single direct child, stored inline in its parent record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub usage: u64,
    pub mtime: SystemTime,
    pub flag: EntryFlag,
    /// Multi-link inode id for hardlink deduplication (0 if none)
    pub hardlink_id: u64,
}

impl DirRecord {
    /// Build a record from a freshly scanned directory node.
    ///
    /// Captures self plus direct children only; subdirectory subtrees are
    /// reached through their own records on rebuild.
    pub fn from_dir_node(dir: &DirNode, mtime: SystemTime, scan_duration: Duration) -> Self {
        let children = dir
            .children
            .iter()
            .filter_map(|child| match child {
                Node::File(f) => Some(ChildEntry {
                    name: f.name.clone(),
                    is_dir: false,
                    size: f.size,
                    usage: f.usage,
                    mtime: f.mtime,
                    flag: f.flag,
                    hardlink_id: f.hardlink_id,
                }),
                Node::Dir(d) => Some(ChildEntry {
                    name: d.name.clone(),
                    is_dir: true,
                    size: d.size,
                    usage: d.usage,
                    mtime: d.mtime,
                    flag: d.flag,
                    hardlink_id: 0,
                }),
                Node::Parent(_) => None,
            })
            .collect();

        Self {
            path: dir.path().to_string_lossy().into_owned(),
            mtime,
            size: dir.size,
            usage: dir.usage,
            item_count: dir.item_count,
            flag: dir.flag,
            children,
            cached_at: SystemTime::now(),
            scan_duration,
        }
    }
}

/// Encode a path into its store key: `incr:` followed by the verbatim path
pub fn record_key(path: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(KEY_PREFIX.len() + path.len());
    key.extend_from_slice(KEY_PREFIX.as_bytes());
    key.extend_from_slice(path.as_bytes());
    key
}

/// Key string for a filesystem path (lossy for non-UTF-8 names)
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Serialize a record with its version prefix
pub fn encode_record(record: &DirRecord) -> Result<Vec<u8>, StoreError> {
    let body = bincode::serialize(record).map_err(|e| StoreError::Encode {
        detail: e.to_string(),
    })?;
    let mut bytes = Vec::with_capacity(1 + body.len());
    bytes.push(RECORD_VERSION);
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

/// Decode a versioned record; `path` is used for error context only
pub fn decode_record(path: &str, bytes: &[u8]) -> Result<DirRecord, StoreError> {
    let (&version, body) = bytes.split_first().ok_or_else(|| StoreError::Corrupted {
        path: path.to_string(),
        detail: "empty record".to_string(),
    })?;

    if version != RECORD_VERSION {
        return Err(StoreError::Corrupted {
            path: path.to_string(),
            detail: format!("unsupported record version {version} (expected {RECORD_VERSION})"),
        });
    }

    let record: DirRecord = bincode::deserialize(body).map_err(|e| StoreError::Corrupted {
        path: path.to_string(),
        detail: e.to_string(),
    })?;

    if record.path.is_empty() {
        return Err(StoreError::Corrupted {
            path: path.to_string(),
            detail: "empty path in record".to_string(),
        });
    }

    Ok(record)
}
