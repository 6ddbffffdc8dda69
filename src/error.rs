//! Error taxonomy of the engine. Every fallible operation returns
//! [`Result`]; errors are propagated to the caller, never swallowed.

use std::io;

/// Error returned by engine operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The operation requires a non-empty key.
    #[error("the key is empty")]
    KeyIsEmpty,

    /// The key has no live record, or its live record is a tombstone.
    #[error("key not found")]
    KeyNotFound,

    /// An index entry references a data file that is not in the engine's
    /// file set. This indicates an inconsistency between the index and the
    /// directory contents.
    #[error("data file {0:09} not found")]
    FileNotFound(u32),

    /// A decoded record's CRC disagrees with the recomputed value; the
    /// record is corrupted.
    #[error("invalid CRC value, the log record may be corrupted")]
    InvalidCrc,

    /// A `.data` file name in the directory does not parse as a file id.
    #[error("data directory may be corrupted: bad file name {0:?}")]
    DirectoryCorrupted(String),

    /// The configured directory name is empty.
    #[error("the database directory is empty")]
    DirectoryIsEmpty,

    /// `max_data_file_size` must be positive.
    #[error("max data file size must be positive")]
    MaxDataFileSizeNegative,

    /// `merge_threshold` must lie in `[0, 1]`.
    #[error("merge threshold must be between 0 and 1")]
    InvalidMergeThreshold,

    /// A batch holds more pending writes than `max_batch_size` allows.
    #[error("exceeded the maximum batch size")]
    ExceedMaxBatchSize,

    /// A merge is already in progress.
    #[error("merge is in progress, try again later")]
    MergeInProgress,

    /// The directory's advisory lock is held by another process.
    #[error("the database directory is used by another process")]
    DatabaseInUse,

    /// Creating a write batch would break transaction-serial monotonicity:
    /// the persistent B+-tree index is in use but the serial checkpoint file
    /// from the last clean shutdown is missing.
    #[error("cannot create a write batch: the transaction serial checkpoint is missing")]
    WriteBatchUnavailable,

    /// Not enough free disk space to complete a merge.
    #[error("not enough disk space for merging")]
    NoDiskSpace,

    /// Error from I/O operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
