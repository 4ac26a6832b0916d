//! Store-wide configuration.
//!
//! Kept deliberately small: the on-disk format and the cache's sizing are
//! the only knobs this crate owns. Everything else (network ports, the
//! textual dump format, logging sinks) belongs to collaborators outside
//! this core and is configured by them.

use std::path::PathBuf;

/// Fixed logical block size of the objects file, in bytes.
pub const BLOCK_SIZE: usize = 256;

/// Minimum growth increment for the in-memory block bitmap, in blocks.
pub const DB_BITBLOCK: usize = 512;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding `objects`, `index` and `clean`.
    pub data_dir: PathBuf,

    /// Hash buckets in the object cache.
    pub cache_width: u32,

    /// Holders preallocated per bucket's inactive chain at startup.
    pub cache_depth: u32,

    /// `load_count` threshold above which `cleanup()` evicts harder.
    pub forced_cleanup_limit: u64,

    /// Aging bound used once `forced_cleanup_limit` has been crossed.
    pub forced_cleanup_bound: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./db"),
            cache_width: 512,
            cache_depth: 4,
            forced_cleanup_limit: 10_000,
            forced_cleanup_bound: 5,
        }
    }
}
