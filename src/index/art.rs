//! Adaptive radix tree index variant.

use art_tree::{Art, ByteString};
use parking_lot::RwLock;

use crate::data::record::Position;
use crate::error::Result;
use crate::index::{Index, IndexIterator, SnapshotIterator};

/// Adaptive radix tree index. Same contract and locking discipline as the
/// B-tree variant, backed by an ART for dense byte-string key sets.
///
/// The tree's entries carry the key alongside the position so the iterator
/// snapshot can be built without re-decoding radix paths; the tree itself
/// does not expose a length, so one is tracked here.
pub struct ArtIndex {
    inner: RwLock<ArtInner>,
}

struct ArtInner {
    tree: Art<ByteString, (Vec<u8>, Position)>,
    len: usize,
}

// `Art`'s `Rc<K>` marker is a zero-sized `PhantomData` only (see the
// `art-tree` source); no `Rc` value is ever stored, so sharing an `ArtInner`
// behind the `RwLock` above is sound even though the crate doesn't assert it.
unsafe impl Send for ArtInner {}
unsafe impl Sync for ArtInner {}

impl ArtIndex {
    pub fn new() -> Self {
        Self { inner: RwLock::new(ArtInner { tree: Art::new(), len: 0 }) }
    }
}

impl Default for ArtIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Index for ArtIndex {
    fn put(&self, key: Vec<u8>, position: Position) -> Option<Position> {
        let mut inner = self.inner.write();
        let radix_key = ByteString::new(&key);
        let old = inner.tree.remove(&radix_key).map(|(_, position)| position);
        inner.tree.insert(radix_key, (key, position));
        if old.is_none() {
            inner.len += 1;
        }
        old
    }

    fn get(&self, key: &[u8]) -> Option<Position> {
        self.inner.read().tree.get(&ByteString::new(key)).map(|(_, position)| *position)
    }

    fn delete(&self, key: &[u8]) -> (Option<Position>, bool) {
        let mut inner = self.inner.write();
        let old = inner.tree.remove(&ByteString::new(key)).map(|(_, position)| position);
        let existed = old.is_some();
        if existed {
            inner.len -= 1;
        }
        (old, existed)
    }

    fn size(&self) -> usize {
        self.inner.read().len
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let inner = self.inner.read();
        let entries =
            inner.tree.iter().map(|(_, (key, position))| (key.clone(), *position)).collect();
        Box::new(SnapshotIterator::new(entries, reverse))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
