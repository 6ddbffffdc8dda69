//! User-facing iteration over live keys.

use crate::data::record::Position;
use crate::engine::Engine;
use crate::error::Result;
use crate::index::IndexIterator;
use crate::options::IteratorOptions;

/// A cursor over the engine's live keys in lexicographic order (or its
/// reverse), optionally restricted to a key prefix.
///
/// The cursor iterates a snapshot of the index taken at construction;
/// values are fetched from the data files on demand through
/// [`Iter::value`].
pub struct Iter<'a> {
    engine: &'a Engine,
    index_iter: Box<dyn IndexIterator>,
    options: IteratorOptions,
}

impl<'a> Iter<'a> {
    pub(crate) fn new(engine: &'a Engine, options: IteratorOptions) -> Self {
        let index_iter = engine.index.iterator(options.reverse);
        let mut iter = Self { engine, index_iter, options };
        iter.skip_to_next_matching_prefix();
        iter
    }

    /// Repositions the cursor at the first matching entry.
    pub fn rewind(&mut self) {
        self.index_iter.rewind();
        self.skip_to_next_matching_prefix();
    }

    /// Positions the cursor at the smallest key >= `key` (or the largest
    /// key <= `key` when iterating in reverse).
    pub fn seek(&mut self, key: &[u8]) {
        self.index_iter.seek(key);
        self.skip_to_next_matching_prefix();
    }

    /// Advances the cursor to the next matching entry.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) {
        self.index_iter.next();
        self.skip_to_next_matching_prefix();
    }

    /// Whether the cursor points at an entry.
    pub fn valid(&self) -> bool {
        self.index_iter.valid()
    }

    /// Key of the current entry. Only valid while [`Iter::valid`] is true.
    pub fn key(&self) -> &[u8] {
        self.index_iter.key()
    }

    /// Position of the current entry's record.
    pub(crate) fn position(&self) -> Position {
        self.index_iter.value()
    }

    /// Fetches the value of the current entry from the data files.
    pub fn value(&self) -> Result<Vec<u8>> {
        let position = self.position();
        let files = self.engine.files.read();
        self.engine.read_value_at(&files, position)
    }

    /// Releases the underlying index snapshot.
    pub fn close(&mut self) {
        self.index_iter.close();
    }

    /// Advances past keys that do not carry the configured prefix. A no-op
    /// when the prefix is empty.
    fn skip_to_next_matching_prefix(&mut self) {
        let Self { options, index_iter, .. } = self;
        let prefix = options.prefix.as_slice();
        if prefix.is_empty() {
            return;
        }
        while index_iter.valid() {
            let key = index_iter.key();
            if key.len() >= prefix.len() && &key[..prefix.len()] == prefix {
                return;
            }
            index_iter.next();
        }
    }
}
