//! Engine, batch, and iterator configuration.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::{Error, Result};

/// Options for launching an [`Engine`](crate::Engine).
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory where the data files are stored.
    pub directory: PathBuf,

    /// Maximum size of a single data file in bytes. The active file is
    /// rotated before a write would push it past this size.
    pub max_data_file_size: i64,

    /// Fsync the active data file after every write.
    pub sync_writes: bool,

    /// Fsync the active data file once this many bytes have accumulated
    /// since the last sync. `0` disables byte-count-triggered syncs.
    pub sync_threshold: u64,

    /// Open data files with read-only memory maps during the startup scan.
    /// The engine switches back to buffered file I/O before any write.
    pub mmap_at_startup: bool,

    /// Run a merge automatically once the ratio of reclaimable bytes to
    /// total disk usage reaches this value. `0.0` disables auto-merge.
    pub merge_threshold: f64,

    /// Which index implementation keeps the key directory.
    pub index_variant: IndexVariant,
}

/// The index implementations the engine can keep its key directory in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexVariant {
    /// In-memory B-tree. Rebuilt from the data files on every launch.
    BTree,
    /// In-memory adaptive radix tree. Rebuilt on every launch.
    AdaptiveRadixTree,
    /// B+ tree persisted in its own file inside the directory. Survives
    /// restarts without replaying the data files.
    PersistentBPlusTree,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            directory: std::env::temp_dir().join("barreldb"),
            max_data_file_size: 256 * 1024 * 1024,
            sync_writes: false,
            sync_threshold: 0,
            mmap_at_startup: false,
            merge_threshold: 0.5,
            index_variant: IndexVariant::BTree,
        }
    }
}

impl Options {
    /// Validates the options before launch.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.directory.as_os_str().is_empty() {
            return Err(Error::DirectoryIsEmpty);
        }
        if self.max_data_file_size <= 0 {
            return Err(Error::MaxDataFileSizeNegative);
        }
        if !(0.0..=1.0).contains(&self.merge_threshold) {
            return Err(Error::InvalidMergeThreshold);
        }
        Ok(())
    }
}

/// Options for a [`WriteBatch`](crate::WriteBatch).
#[derive(Debug, Clone)]
pub struct WriteBatchOptions {
    /// Maximum number of pending writes a single batch may commit.
    pub max_batch_size: usize,

    /// Fsync the active data file once the whole batch has been appended.
    pub sync_writes: bool,
}

impl Default for WriteBatchOptions {
    fn default() -> Self {
        Self { max_batch_size: 10_000, sync_writes: true }
    }
}

/// Options for an engine [`Iter`](crate::Iter).
#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
    /// Only yield keys beginning with this prefix. Empty matches all keys.
    pub prefix: Vec<u8>,

    /// Iterate in descending key order.
    pub reverse: bool,
}

/// A point-in-time statistics snapshot of an engine.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stat {
    /// Number of live keys in the index.
    pub key_number: usize,

    /// Number of data files, active and inactive.
    pub data_file_number: usize,

    /// Cumulative size in bytes of superseded records that a merge would
    /// reclaim.
    pub reclaimable_size: u64,

    /// Total size in bytes of the engine directory on disk.
    pub disk_size: u64,
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Key(s): {}; Data file(s): {}; Reclaimable size: {} B; Disk size: {} B",
            self.key_number, self.data_file_number, self.reclaimable_size, self.disk_size,
        )
    }
}
