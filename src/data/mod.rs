//! On-disk record format and data-file layout.

pub mod file;
pub mod record;

pub use file::DataFile;
pub use record::{LogRecord, Position, RecordType};

/// Suffix of every data file, e.g. `000000001.data`.
pub(crate) const DATA_FILE_SUFFIX: &str = ".data";

/// Index snapshot produced by the most recent merge.
pub(crate) const HINT_FILE_NAME: &str = "hint-index";

/// Merge-complete marker; its sole record's value is the decimal ascii of
/// the first file id that was not merged.
pub(crate) const MERGED_FILE_NAME: &str = "merged";

/// Transaction-serial checkpoint written on clean shutdown.
pub(crate) const TRAN_NO_FILE_NAME: &str = "tran-no";

/// Zero-byte advisory lock file.
pub(crate) const LOCK_FILE_NAME: &str = "flock";

/// Persistent index file used by the B+-tree index variant.
pub(crate) const BPTREE_INDEX_FILE_NAME: &str = "bplustree-index";
