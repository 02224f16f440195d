//! Persistent directory-metadata cache
//!
//! Durable `path -> DirRecord` mapping backed by an embedded RocksDB
//! store, keyed under the `incr:` namespace.
//!
//! # Features
//!
//! - **Nanosecond-faithful round-trips**: records compare equal after
//!   store/load, including timestamps
//! - **Versioned encoding**: incompatible old caches are rejected as
//!   corrupted (and rescanned) instead of crashing
//! - **Closed-state discipline**: every operation after release returns
//!   `NotOpen`, never panics
//! - **Exclusive open**: a second process opening the same store gets a
//!   distinctive `Locked` error
//!
//! # Module Structure
//!
//! - `schema`: key encoding, `DirRecord`/`ChildEntry`, versioned codec
//! - `cache`: `CacheStore` lifecycle, operations, background compaction

pub mod cache;
pub mod schema;

pub use cache::CacheStore;
pub use schema::{
    decode_record, encode_record, path_key, record_key, ChildEntry, DirRecord, KEY_PREFIX,
    RECORD_VERSION,
};
