//! Atomic batched writes.
//!
//! A batch buffers puts and deletes in memory and commits them in one shot:
//! every record is appended under a fresh transaction serial, followed by a
//! finished marker. Recovery only applies serial-tagged records once it has
//! seen their marker, so a crash mid-commit leaves none of the batch's
//! effects behind.

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;

use crate::data::record::{encode_tran_key, LogRecord, Position, RecordType};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::options::{IndexVariant, WriteBatchOptions};

/// Key of the marker record that ends a committed transaction.
const TXN_FINISHED_KEY: &[u8] = b"transaction-finished";

/// A buffer of pending writes committed atomically.
pub struct WriteBatch<'a> {
    engine: &'a Engine,
    options: WriteBatchOptions,

    /// Pending records by caller-visible key; the last write to a key wins
    /// within the batch.
    pending: Mutex<HashMap<Vec<u8>, LogRecord>>,
}

impl Engine {
    /// Creates a write batch.
    ///
    /// With the persistent B+-tree index the transaction serial is only
    /// carried across restarts by the checkpoint file a clean shutdown
    /// leaves behind. If that file is missing on a pre-existing directory,
    /// handing out serials could repeat ones already in the log, so batch
    /// creation is refused.
    pub fn new_batch(&self, options: WriteBatchOptions) -> Result<WriteBatch<'_>> {
        if self.options.index_variant == IndexVariant::PersistentBPlusTree
            && !self.tran_no_file_existed
            && !self.is_first_launch
        {
            return Err(Error::WriteBatchUnavailable);
        }
        Ok(WriteBatch { engine: self, options, pending: Mutex::new(HashMap::new()) })
    }
}

impl WriteBatch<'_> {
    /// Stages a key/value pair.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let record = LogRecord {
            key: key.to_vec(),
            value: value.to_vec(),
            record_type: RecordType::Normal,
        };
        self.pending.lock().insert(key.to_vec(), record);
        Ok(())
    }

    /// Stages a tombstone for `key`. If the key exists neither on disk nor
    /// in the batch this is a no-op; if it only exists in the batch, the
    /// staged write is dropped instead.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let mut pending = self.pending.lock();
        if self.engine.index.get(key).is_none() {
            pending.remove(key);
            return Ok(());
        }
        let record =
            LogRecord { key: key.to_vec(), value: Vec::new(), record_type: RecordType::Tombstone };
        pending.insert(key.to_vec(), record);
        Ok(())
    }

    /// Commits every staged write atomically and clears the buffer.
    /// Committing an empty batch is a no-op and does not burn a serial.
    pub fn commit(&self) -> Result<()> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return Ok(());
        }
        if pending.len() > self.options.max_batch_size {
            return Err(Error::ExceedMaxBatchSize);
        }

        // The engine write lock serializes commits against each other and
        // against the plain write path, so a transaction's records appear
        // contiguously on disk, marker last.
        let mut files = self.engine.files.write();
        let serial = self.engine.tran_no.fetch_add(1, Ordering::SeqCst) + 1;

        let mut positions: HashMap<Vec<u8>, Position> = HashMap::with_capacity(pending.len());
        for (key, record) in pending.iter() {
            let tagged = LogRecord {
                key: encode_tran_key(key, serial),
                value: record.value.clone(),
                record_type: record.record_type,
            };
            let position = self.engine.append_record_locked(&mut files, &tagged)?;
            positions.insert(key.clone(), position);
        }

        let finished = LogRecord {
            key: encode_tran_key(TXN_FINISHED_KEY, serial),
            value: Vec::new(),
            record_type: RecordType::TxnFinished,
        };
        self.engine.append_record_locked(&mut files, &finished)?;

        if self.options.sync_writes {
            if let Some(active) = files.active.as_ref() {
                active.sync()?;
            }
        }

        // Apply to the index, maintaining reclaimable size the same way the
        // plain put/delete paths do.
        for (key, record) in pending.iter() {
            let superseded = match record.record_type {
                RecordType::Tombstone => {
                    self.engine
                        .reclaimable
                        .fetch_add(positions[key].size as u64, Ordering::SeqCst);
                    self.engine.index.delete(key).0
                }
                _ => self.engine.index.put(key.clone(), positions[key]),
            };
            if let Some(old) = superseded {
                self.engine.reclaimable.fetch_add(old.size as u64, Ordering::SeqCst);
            }
        }

        pending.clear();
        Ok(())
    }
}
