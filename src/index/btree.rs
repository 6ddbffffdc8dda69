//! B-tree index variant.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::data::record::Position;
use crate::error::Result;
use crate::index::{Index, IndexIterator, SnapshotIterator};

/// In-memory ordered index over the standard library's B-tree map, guarded
/// by a read/write lock. Rebuilt from the data files on every launch.
pub struct BTreeIndex {
    tree: RwLock<BTreeMap<Vec<u8>, Position>>,
}

impl BTreeIndex {
    pub fn new() -> Self {
        Self { tree: RwLock::new(BTreeMap::new()) }
    }
}

impl Default for BTreeIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Index for BTreeIndex {
    fn put(&self, key: Vec<u8>, position: Position) -> Option<Position> {
        self.tree.write().insert(key, position)
    }

    fn get(&self, key: &[u8]) -> Option<Position> {
        self.tree.read().get(key).copied()
    }

    fn delete(&self, key: &[u8]) -> (Option<Position>, bool) {
        let old = self.tree.write().remove(key);
        let existed = old.is_some();
        (old, existed)
    }

    fn size(&self) -> usize {
        self.tree.read().len()
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let entries =
            self.tree.read().iter().map(|(key, position)| (key.clone(), *position)).collect();
        Box::new(SnapshotIterator::new(entries, reverse))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
