//! Persistent B+-tree index variant.

use std::io;
use std::path::Path;

use jammdb::DB;

use crate::data::record::Position;
use crate::data::BPTREE_INDEX_FILE_NAME;
use crate::error::{Error, Result};
use crate::index::{Index, IndexIterator, SnapshotIterator};

/// Name of the bucket holding the key directory inside the tree file.
const INDEX_BUCKET: &str = "barreldb-index";

/// Index backed by a single B+-tree file inside the engine directory. Each
/// operation wraps a short read or write transaction on that store, so the
/// index survives restarts without replaying the data files.
///
/// # Panics
///
/// Operations panic if a transaction on the tree file fails after the index
/// opened successfully; at that point the backing store is corrupted and no
/// meaningful recovery is possible through the index contract.
pub struct BPlusTreeIndex {
    tree: DB,
}

impl BPlusTreeIndex {
    /// Opens (or creates) the tree file inside `directory`.
    pub fn open(directory: &Path) -> Result<Self> {
        let tree = DB::open(directory.join(BPTREE_INDEX_FILE_NAME)).map_err(store_error)?;
        let tx = tree.tx(true).map_err(store_error)?;
        tx.get_or_create_bucket(INDEX_BUCKET).map_err(store_error)?;
        tx.commit().map_err(store_error)?;
        Ok(Self { tree })
    }
}

fn store_error(err: jammdb::Error) -> Error {
    Error::Io(io::Error::other(err.to_string()))
}

impl Index for BPlusTreeIndex {
    fn put(&self, key: Vec<u8>, position: Position) -> Option<Position> {
        let tx = self.tree.tx(true).expect("failed to open a write transaction on the index file");
        let bucket = tx.get_bucket(INDEX_BUCKET).expect("the index bucket has vanished");
        let old = bucket.get_kv(&key).and_then(|kv| Position::decode(kv.value()));
        let _ = bucket.put(key, position.encode()).expect("failed to write to the index file");
        tx.commit().expect("failed to commit to the index file");
        old
    }

    fn get(&self, key: &[u8]) -> Option<Position> {
        let tx = self.tree.tx(false).expect("failed to open a read transaction on the index file");
        let bucket = tx.get_bucket(INDEX_BUCKET).expect("the index bucket has vanished");
        bucket.get_kv(key).and_then(|kv| Position::decode(kv.value()))
    }

    fn delete(&self, key: &[u8]) -> (Option<Position>, bool) {
        let tx = self.tree.tx(true).expect("failed to open a write transaction on the index file");
        let bucket = tx.get_bucket(INDEX_BUCKET).expect("the index bucket has vanished");
        let old = bucket.get_kv(key).and_then(|kv| Position::decode(kv.value()));
        if old.is_none() {
            return (None, false);
        }
        bucket.delete(key).expect("failed to delete from the index file");
        tx.commit().expect("failed to commit to the index file");
        (old, true)
    }

    fn size(&self) -> usize {
        let tx = self.tree.tx(false).expect("failed to open a read transaction on the index file");
        let bucket = tx.get_bucket(INDEX_BUCKET).expect("the index bucket has vanished");
        bucket.kv_pairs().count()
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let tx = self.tree.tx(false).expect("failed to open a read transaction on the index file");
        let bucket = tx.get_bucket(INDEX_BUCKET).expect("the index bucket has vanished");
        let entries = bucket
            .kv_pairs()
            .filter_map(|kv| Some((kv.key().to_vec(), Position::decode(kv.value())?)))
            .collect();
        Box::new(SnapshotIterator::new(entries, reverse))
    }

    fn close(&self) -> Result<()> {
        // The tree file is flushed on every committed transaction and its
        // handle is released on drop.
        Ok(())
    }
}
