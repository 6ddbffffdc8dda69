//! The engine core: data files, the index, the write path, and recovery.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use fs4::fs_std::FileExt;
use itertools::Itertools;
use parking_lot::RwLock;

use crate::data::record::{
    decode_tran_key, encode_tran_key, LogRecord, Position, RecordType, NON_TRANSACTION_SERIAL,
};
use crate::data::{
    DataFile, DATA_FILE_SUFFIX, HINT_FILE_NAME, LOCK_FILE_NAME, MERGED_FILE_NAME,
    TRAN_NO_FILE_NAME,
};
use crate::error::{Error, Result};
use crate::fs_util;
use crate::index::{self, Index};
use crate::io::IoKind;
use crate::iter::Iter;
use crate::merge;
use crate::options::{IndexVariant, IteratorOptions, Options, Stat};

/// Key of the single record inside the transaction-serial checkpoint file.
const TRAN_NO_KEY: &[u8] = b"tran-no";

/// A Bitcask storage engine instance over a single directory.
///
/// The engine appends every write to an active data file and keeps an
/// in-memory index from each live key to the position of its most recent
/// record. Reads go through the index straight to the record, so at most one
/// disk seek is paid per lookup. Deletes append a tombstone. Superseded
/// records accumulate until a [`merge`](Engine::merge) rewrites the live
/// data into a fresh file set.
///
/// All operations take `&self`; the engine is meant to be shared across
/// threads behind an `Arc`.
pub struct Engine {
    pub(crate) options: Options,

    /// The active and inactive data files, behind the engine-wide
    /// read/write lock that serializes the write path.
    pub(crate) files: RwLock<Files>,

    /// The key directory. Carries its own internal lock.
    pub(crate) index: Box<dyn Index>,

    /// The last allocated transaction serial. Strictly monotone for the
    /// lifetime of the process.
    pub(crate) tran_no: AtomicU64,

    /// Cumulative size in bytes of superseded records.
    pub(crate) reclaimable: AtomicU64,

    /// Whether a merge is currently running.
    pub(crate) merging: AtomicBool,

    /// Advisory lock on the directory, held for the engine's lifetime.
    lock_file: File,

    /// Whether the directory was missing or empty at launch.
    pub(crate) is_first_launch: bool,

    /// Whether the transaction-serial checkpoint file was present at launch.
    pub(crate) tran_no_file_existed: bool,

    closed: AtomicBool,
}

/// The engine's file set, guarded by the engine lock.
pub(crate) struct Files {
    /// The single file currently accepting writes. `None` until the first
    /// write on a fresh directory.
    pub(crate) active: Option<DataFile>,

    /// Rotated files, read-only, by file id.
    pub(crate) inactive: HashMap<u32, DataFile>,

    /// Bytes appended since the last sync, for `sync_threshold`.
    bytes_since_sync: u64,
}

impl Files {
    /// The data file that owns `file_id`, if the engine has it.
    pub(crate) fn get(&self, file_id: u32) -> Option<&DataFile> {
        match &self.active {
            Some(active) if active.file_id() == file_id => Some(active),
            _ => self.inactive.get(&file_id),
        }
    }

    /// Every file id the engine holds, ascending.
    pub(crate) fn sorted_ids(&self) -> Vec<u32> {
        self.inactive
            .keys()
            .copied()
            .chain(self.active.as_ref().map(|file| file.file_id()))
            .sorted()
            .collect()
    }

    fn switch_all(&mut self, kind: IoKind) -> Result<()> {
        if let Some(active) = self.active.as_mut() {
            active.switch_io_backend(kind)?;
        }
        for file in self.inactive.values_mut() {
            file.switch_io_backend(kind)?;
        }
        Ok(())
    }
}

impl Engine {
    /// Launches an engine on the directory named by `options`.
    ///
    /// Recovery runs here: a completed merge left by a previous run is
    /// promoted, data files are discovered, and the index is rebuilt from
    /// the hint file and the log (unless the persistent B+-tree variant
    /// carries it across restarts).
    pub fn launch(options: Options) -> Result<Self> {
        options.validate()?;
        let directory = options.directory.clone();

        let mut is_first_launch = !directory.is_dir();
        fs::create_dir_all(&directory)?;
        if fs::read_dir(&directory)?.next().is_none() {
            is_first_launch = true;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(directory.join(LOCK_FILE_NAME))?;
        lock_file.try_lock_exclusive().map_err(|_| Error::DatabaseInUse)?;

        log::info!("opening database {}", directory.display());

        merge::promote_completed_merge(&directory)?;

        let mut files = load_data_files(&directory, &options)?;
        let index = index::new_index(options.index_variant, &directory)?;

        let tran_no_path = directory.join(TRAN_NO_FILE_NAME);
        let tran_no_file_existed = tran_no_path.is_file();
        let mut tran_no = 0;
        let mut reclaimable = 0;

        if options.index_variant == IndexVariant::PersistentBPlusTree {
            // The index survived the restart; only the serial checkpoint
            // and the active file's write offset need recovering.
            if tran_no_file_existed {
                tran_no = load_tran_no(&directory)?;
                fs::remove_file(&tran_no_path)?;
            }
            if options.mmap_at_startup {
                files.switch_all(IoKind::File)?;
            }
            if let Some(active) = files.active.as_mut() {
                let size = active.size()?;
                active.set_write_offset(size);
            }
        } else {
            load_index_from_hint_file(&directory, index.as_ref())?;
            let outcome = replay_log(&directory, &files, index.as_ref())?;
            tran_no = outcome.max_serial;
            reclaimable = outcome.reclaimable;
            if options.mmap_at_startup {
                files.switch_all(IoKind::File)?;
            }
            if let Some(active) = files.active.as_mut() {
                active.set_write_offset(outcome.final_offset);
            }
        }

        log::info!(
            "indexed {} live keys in {} data file(s)",
            index.size(),
            files.inactive.len() + usize::from(files.active.is_some()),
        );

        Ok(Self {
            options,
            files: RwLock::new(files),
            index,
            tran_no: AtomicU64::new(tran_no),
            reclaimable: AtomicU64::new(reclaimable),
            merging: AtomicBool::new(false),
            lock_file,
            is_first_launch,
            tran_no_file_existed,
            closed: AtomicBool::new(false),
        })
    }

    /// Writes a key/value pair, replacing any existing value for the key.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let record = LogRecord {
            key: encode_tran_key(key, NON_TRANSACTION_SERIAL),
            value: value.to_vec(),
            record_type: RecordType::Normal,
        };
        let position = self.append_record(&record)?;
        if let Some(old) = self.index.put(key.to_vec(), position) {
            self.reclaimable.fetch_add(old.size as u64, Ordering::SeqCst);
            self.maybe_auto_merge();
        }
        Ok(())
    }

    /// Reads the value of `key`, or [`Error::KeyNotFound`] if it has no
    /// live record.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let position = self.index.get(key).ok_or(Error::KeyNotFound)?;
        let files = self.files.read();
        self.read_value_at(&files, position)
    }

    /// Deletes `key` by appending a tombstone. Deleting an absent key is a
    /// no-op.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        if self.index.get(key).is_none() {
            return Ok(());
        }

        let record = LogRecord {
            key: encode_tran_key(key, NON_TRANSACTION_SERIAL),
            value: Vec::new(),
            record_type: RecordType::Tombstone,
        };
        let position = self.append_record(&record)?;

        // The tombstone itself is garbage from the moment it is written,
        // and so is the record it shadows.
        let mut reclaimed = position.size as u64;
        if let (Some(old), _) = self.index.delete(key) {
            reclaimed += old.size as u64;
        }
        self.reclaimable.fetch_add(reclaimed, Ordering::SeqCst);
        self.maybe_auto_merge();
        Ok(())
    }

    /// Creates an iterator over the live keys in lexicographic order.
    pub fn iterator(&self, options: IteratorOptions) -> Iter<'_> {
        Iter::new(self, options)
    }

    /// Collects every live key in index order.
    pub fn list_keys(&self) -> Vec<Vec<u8>> {
        let mut iter = self.index.iterator(false);
        let mut keys = Vec::with_capacity(self.index.size());
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        keys
    }

    /// Invokes `f` with every live key/value pair in index order until `f`
    /// returns `false`.
    ///
    /// The callback runs under the engine read lock; it must not re-enter
    /// the engine.
    pub fn fold<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], Vec<u8>) -> bool,
    {
        let files = self.files.read();
        let mut iter = self.index.iterator(false);
        while iter.valid() {
            let value = self.read_value_at(&files, iter.value())?;
            if !f(iter.key(), value) {
                break;
            }
            iter.next();
        }
        Ok(())
    }

    /// Flushes the active data file to stable storage.
    pub fn sync(&self) -> Result<()> {
        let mut files = self.files.write();
        if let Some(active) = files.active.as_ref() {
            active.sync()?;
            files.bytes_since_sync = 0;
        }
        Ok(())
    }

    /// Returns a statistics snapshot.
    pub fn stat(&self) -> Result<Stat> {
        let files = self.files.read();
        Ok(Stat {
            key_number: self.index.size(),
            data_file_number: files.inactive.len() + usize::from(files.active.is_some()),
            reclaimable_size: self.reclaimable.load(Ordering::SeqCst),
            disk_size: fs_util::dir_size(&self.options.directory)?,
        })
    }

    /// Copies every file in the directory except the advisory lock file
    /// into `target`.
    pub fn backup(&self, target: impl AsRef<Path>) -> Result<()> {
        let _files = self.files.read();
        fs_util::copy_dir(&self.options.directory, target.as_ref(), &[LOCK_FILE_NAME])
    }

    /// Backs the engine up into `directory` and launches a new engine on it
    /// with the same options.
    pub fn fork(&self, directory: impl AsRef<Path>) -> Result<Engine> {
        self.backup(directory.as_ref())?;
        let options =
            Options { directory: directory.as_ref().to_path_buf(), ..self.options.clone() };
        Engine::launch(options)
    }

    /// Persists the transaction serial, flushes and closes every data file,
    /// and releases the directory lock. Called automatically on drop.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut files = self.files.write();
        self.index.close()?;

        // Rewrite the serial checkpoint from scratch so it always holds
        // exactly one record.
        let tran_no_path = self.options.directory.join(TRAN_NO_FILE_NAME);
        if tran_no_path.is_file() {
            fs::remove_file(&tran_no_path)?;
        }
        let mut tran_no_file = DataFile::open_tran_no(&self.options.directory)?;
        let record = LogRecord {
            key: TRAN_NO_KEY.to_vec(),
            value: self.tran_no.load(Ordering::SeqCst).to_string().into_bytes(),
            record_type: RecordType::Normal,
        };
        tran_no_file.write(&record.encode())?;
        tran_no_file.sync()?;
        tran_no_file.close()?;

        if let Some(active) = files.active.as_mut() {
            active.sync()?;
            active.close()?;
        }
        for file in files.inactive.values_mut() {
            file.close()?;
        }

        self.lock_file.unlock()?;
        Ok(())
    }

    /// Appends a record to the active data file under the engine write
    /// lock, rotating the file when it would overflow.
    pub(crate) fn append_record(&self, record: &LogRecord) -> Result<Position> {
        let mut files = self.files.write();
        self.append_record_locked(&mut files, record)
    }

    /// [`Engine::append_record`] for callers already holding the engine
    /// write lock.
    pub(crate) fn append_record_locked(
        &self,
        files: &mut Files,
        record: &LogRecord,
    ) -> Result<Position> {
        let encoded = record.encode();
        let max_size = self.options.max_data_file_size as u64;

        let mut active = match files.active.take() {
            None => DataFile::open(&self.options.directory, 0, IoKind::File)?,
            Some(file) if file.write_offset() + encoded.len() as u64 > max_size => {
                file.sync()?;
                let next_id = file.file_id() + 1;
                log::debug!("rotating data file {:09} -> {next_id:09}", file.file_id());
                files.inactive.insert(file.file_id(), file);
                DataFile::open(&self.options.directory, next_id, IoKind::File)?
            }
            Some(file) => file,
        };

        let offset = active.write_offset();
        active.write(&encoded)?;
        files.bytes_since_sync += encoded.len() as u64;

        let threshold_reached = self.options.sync_threshold > 0
            && files.bytes_since_sync >= self.options.sync_threshold;
        if self.options.sync_writes || threshold_reached {
            active.sync()?;
            files.bytes_since_sync = 0;
        }

        let position =
            Position { file_id: active.file_id(), offset, size: encoded.len() as u32 };
        files.active = Some(active);
        Ok(position)
    }

    /// Reads the record at `position` and returns its value. The caller
    /// holds the engine read lock.
    pub(crate) fn read_value_at(&self, files: &Files, position: Position) -> Result<Vec<u8>> {
        let file = files.get(position.file_id).ok_or(Error::FileNotFound(position.file_id))?;
        let Some((record, _)) = file.read_log_record(position.offset)? else {
            return Err(Error::KeyNotFound);
        };
        // The index never points at tombstones; treat one as absent anyway.
        if record.record_type == RecordType::Tombstone {
            return Err(Error::KeyNotFound);
        }
        Ok(record.value)
    }

    /// Kicks off a merge when the reclaimable share of the directory has
    /// reached `merge_threshold`. Failures are logged, not propagated: the
    /// triggering write already succeeded.
    fn maybe_auto_merge(&self) {
        if self.options.merge_threshold <= 0.0 || self.merging.load(Ordering::SeqCst) {
            return;
        }
        let disk_size = match fs_util::dir_size(&self.options.directory) {
            Ok(size) if size > 0 => size,
            Ok(_) => return,
            Err(error) => {
                log::warn!("skipping auto merge: cannot size the directory: {error}");
                return;
            }
        };
        let ratio = self.reclaimable.load(Ordering::SeqCst) as f64 / disk_size as f64;
        if ratio < self.options.merge_threshold {
            return;
        }

        log::info!(
            "auto merge triggered: {:.0}% of {disk_size} B reclaimable",
            ratio * 100.0
        );
        match self.merge() {
            Ok(()) => {}
            Err(Error::MergeInProgress) => {
                log::debug!("skipping auto merge: another merge is running")
            }
            Err(error) => log::warn!("auto merge failed: {error}"),
        }
    }
}

/// Flush and release everything if the embedder forgot to `close()`.
impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            log::error!("failed to close the engine: {error}");
        }
    }
}

/// Discovers `*.data` files in `directory` and opens them, the highest id
/// as the active file and the rest as inactive.
fn load_data_files(directory: &Path, options: &Options) -> Result<Files> {
    let kind = if options.mmap_at_startup { IoKind::Mmap } else { IoKind::File };

    let mut ids = Vec::new();
    for entry in fs::read_dir(directory)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if let Some(stem) = name.strip_suffix(DATA_FILE_SUFFIX) {
            let id = stem.parse::<u32>().map_err(|_| Error::DirectoryCorrupted(name.clone()))?;
            ids.push(id);
        }
    }
    let ids = ids.into_iter().sorted().collect::<Vec<_>>();

    let mut files = Files { active: None, inactive: HashMap::new(), bytes_since_sync: 0 };
    for (i, id) in ids.iter().enumerate() {
        let file = DataFile::open(directory, *id, kind)?;
        if i == ids.len() - 1 {
            files.active = Some(file);
        } else {
            files.inactive.insert(*id, file);
        }
    }
    Ok(files)
}

/// Replays the hint file left by the most recent merge, if any. Hint
/// records carry the caller-visible key and a pre-encoded position.
fn load_index_from_hint_file(directory: &Path, index: &dyn Index) -> Result<()> {
    if !directory.join(HINT_FILE_NAME).is_file() {
        return Ok(());
    }
    log::info!("loading the index from the hint file");
    let hint = DataFile::open_hint(directory)?;
    let mut offset = 0;
    while let Some((record, size)) = hint.read_log_record(offset)? {
        let position = Position::decode(&record.value).ok_or(Error::InvalidCrc)?;
        index.put(record.key, position);
        offset += size;
    }
    Ok(())
}

struct ReplayOutcome {
    /// Highest transaction serial observed in the log.
    max_serial: u64,
    /// Bytes of superseded records observed during the scan.
    reclaimable: u64,
    /// End of the last valid record in the highest-id file.
    final_offset: u64,
}

/// Rebuilds the index by scanning the data files in id order, starting at
/// the first file the latest merge did not cover. Records tagged with a
/// transaction serial are buffered and only applied once the matching
/// finished marker is seen, so partial transactions are discarded.
fn replay_log(directory: &Path, files: &Files, index: &dyn Index) -> Result<ReplayOutcome> {
    let boundary = non_merged_file_id(directory)?;
    let ids = files.sorted_ids();

    let mut pending: HashMap<u64, Vec<(Vec<u8>, RecordType, Position)>> = HashMap::new();
    let mut outcome = ReplayOutcome { max_serial: 0, reclaimable: 0, final_offset: 0 };

    for (i, id) in ids.iter().enumerate() {
        let mut offset = 0;
        if *id >= boundary {
            let file = files.get(*id).ok_or(Error::FileNotFound(*id))?;
            while let Some((record, size)) = file.read_log_record(offset)? {
                let position = Position { file_id: *id, offset, size: size as u32 };
                let (key, serial) =
                    decode_tran_key(&record.key).ok_or(Error::InvalidCrc)?;

                if serial == NON_TRANSACTION_SERIAL {
                    outcome.reclaimable += apply_record(index, key, record.record_type, position);
                } else {
                    outcome.max_serial = outcome.max_serial.max(serial);
                    if record.record_type == RecordType::TxnFinished {
                        for (key, record_type, position) in
                            pending.remove(&serial).unwrap_or_default()
                        {
                            outcome.reclaimable += apply_record(index, key, record_type, position);
                        }
                    } else {
                        pending
                            .entry(serial)
                            .or_default()
                            .push((key, record.record_type, position));
                    }
                }
                offset += size;
            }
        }
        if i == ids.len() - 1 {
            outcome.final_offset = offset;
        }
    }
    Ok(outcome)
}

/// Applies one replayed record to the index, returning the number of bytes
/// it rendered reclaimable.
fn apply_record(
    index: &dyn Index,
    key: Vec<u8>,
    record_type: RecordType,
    position: Position,
) -> u64 {
    match record_type {
        RecordType::Tombstone => {
            let mut reclaimed = position.size as u64;
            if let (Some(old), _) = index.delete(&key) {
                reclaimed += old.size as u64;
            }
            reclaimed
        }
        _ => index.put(key, position).map_or(0, |old| old.size as u64),
    }
}

/// Reads the first file id the latest merge did not cover, or 0 when no
/// merge has completed.
pub(crate) fn non_merged_file_id(directory: &Path) -> Result<u32> {
    if !directory.join(MERGED_FILE_NAME).is_file() {
        return Ok(0);
    }
    let merged = DataFile::open_merged(directory)?;
    let Some((record, _)) = merged.read_log_record(0)? else {
        return Ok(0);
    };
    parse_ascii_number(&record.value, MERGED_FILE_NAME)
}

/// Reads the transaction serial persisted by the last clean shutdown.
fn load_tran_no(directory: &Path) -> Result<u64> {
    let file = DataFile::open_tran_no(directory)?;
    let Some((record, _)) = file.read_log_record(0)? else {
        return Ok(0);
    };
    parse_ascii_number(&record.value, TRAN_NO_FILE_NAME)
}

fn parse_ascii_number<T: std::str::FromStr>(value: &[u8], file_name: &str) -> Result<T> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| Error::DirectoryCorrupted(file_name.to_string()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;

    /// Options tuned for tests: small files, no auto merge.
    pub(crate) fn test_options(directory: impl Into<PathBuf>) -> Options {
        Options {
            directory: directory.into(),
            max_data_file_size: 64 * 1024,
            merge_threshold: 0.0,
            ..Options::default()
        }
    }

    pub(crate) fn test_key(n: usize) -> Vec<u8> {
        format!("barreldb-key-{n:09}").into_bytes()
    }

    pub(crate) fn test_value(n: usize) -> Vec<u8> {
        format!("barreldb-value-{n:09}").into_bytes()
    }

    /// Copies the engine directory (minus the lock file) into a fresh
    /// directory, mimicking the on-disk image a crash would leave behind.
    pub(crate) fn crash_clone(directory: &Path) -> tempfile::TempDir {
        let clone = tempfile::TempDir::with_prefix("barreldb").unwrap();
        crate::fs_util::copy_dir(directory, clone.path(), &[LOCK_FILE_NAME]).unwrap();
        clone
    }

    #[test]
    fn put_get_roundtrip_and_restart() {
        let dir = tempfile::TempDir::with_prefix("barreldb").unwrap();
        let engine = Engine::launch(test_options(dir.path())).unwrap();
        assert!(engine.is_first_launch);

        engine.put(b"114", b"514").unwrap();
        assert_eq!(engine.get(b"114").unwrap(), b"514");
        engine.close().unwrap();
        drop(engine);

        let engine = Engine::launch(test_options(dir.path())).unwrap();
        assert!(!engine.is_first_launch);
        assert_eq!(engine.get(b"114").unwrap(), b"514");
    }

    #[test]
    fn last_write_wins_and_delete() {
        let dir = tempfile::TempDir::with_prefix("barreldb").unwrap();
        let engine = Engine::launch(test_options(dir.path())).unwrap();

        engine.put(b"114", b"514").unwrap();
        engine.put(b"114", b"114514").unwrap();
        assert_eq!(engine.get(b"114").unwrap(), b"114514");

        engine.delete(b"114").unwrap();
        assert!(matches!(engine.get(b"114"), Err(Error::KeyNotFound)));

        // The tombstone holds across restart.
        drop(engine);
        let engine = Engine::launch(test_options(dir.path())).unwrap();
        assert!(matches!(engine.get(b"114"), Err(Error::KeyNotFound)));
    }

    #[test]
    fn empty_keys_are_rejected() {
        let dir = tempfile::TempDir::with_prefix("barreldb").unwrap();
        let engine = Engine::launch(test_options(dir.path())).unwrap();

        assert!(matches!(engine.put(b"", b"value"), Err(Error::KeyIsEmpty)));
        assert!(matches!(engine.get(b""), Err(Error::KeyIsEmpty)));
        assert!(matches!(engine.delete(b""), Err(Error::KeyIsEmpty)));
    }

    #[test]
    fn get_missing_key() {
        let dir = tempfile::TempDir::with_prefix("barreldb").unwrap();
        let engine = Engine::launch(test_options(dir.path())).unwrap();
        assert!(matches!(engine.get(b"missing"), Err(Error::KeyNotFound)));
    }

    #[test]
    fn delete_missing_key_is_a_noop() {
        let dir = tempfile::TempDir::with_prefix("barreldb").unwrap();
        let engine = Engine::launch(test_options(dir.path())).unwrap();
        engine.delete(b"missing").unwrap();
        assert_eq!(engine.stat().unwrap().reclaimable_size, 0);
    }

    #[test]
    fn rotation_respects_max_file_size() {
        let dir = tempfile::TempDir::with_prefix("barreldb").unwrap();
        let options = Options { max_data_file_size: 4 * 1024, ..test_options(dir.path()) };
        let engine = Engine::launch(options.clone()).unwrap();

        for i in 0..500 {
            engine.put(&test_key(i), &test_value(i)).unwrap();
        }
        let stat = engine.stat().unwrap();
        assert!(stat.data_file_number > 1, "expected rotation to have happened");

        // No data file may exceed the configured maximum.
        for entry in fs::read_dir(dir.path()).unwrap() {
            let entry = entry.unwrap();
            if entry.file_name().to_string_lossy().ends_with(DATA_FILE_SUFFIX) {
                assert!(entry.metadata().unwrap().len() <= options.max_data_file_size as u64);
            }
        }

        // Every key is retrievable across all files, before and after a
        // restart.
        drop(engine);
        let engine = Engine::launch(options).unwrap();
        for i in 0..500 {
            assert_eq!(engine.get(&test_key(i)).unwrap(), test_value(i));
        }
    }

    #[test]
    fn recovery_without_clean_shutdown() {
        let dir = tempfile::TempDir::with_prefix("barreldb").unwrap();
        let options = Options { sync_writes: true, ..test_options(dir.path()) };
        let engine = Engine::launch(options).unwrap();
        engine.put(b"114", b"514").unwrap();
        engine.delete(b"1919").unwrap();

        // Launch from a crash image taken while the engine is still open.
        let clone = crash_clone(dir.path());
        let recovered = Engine::launch(test_options(clone.path())).unwrap();
        assert_eq!(recovered.get(b"114").unwrap(), b"514");
    }

    #[test]
    fn mmap_at_startup_recovers_and_accepts_writes() {
        let dir = tempfile::TempDir::with_prefix("barreldb").unwrap();
        let engine = Engine::launch(test_options(dir.path())).unwrap();
        for i in 0..1000 {
            engine.put(&test_key(i), &test_value(i)).unwrap();
        }
        drop(engine);

        let options = Options { mmap_at_startup: true, ..test_options(dir.path()) };
        let engine = Engine::launch(options).unwrap();
        for i in 0..1000 {
            assert_eq!(engine.get(&test_key(i)).unwrap(), test_value(i));
        }
        // The backends were switched back, so writes must succeed.
        engine.put(b"after-mmap", b"ok").unwrap();
        assert_eq!(engine.get(b"after-mmap").unwrap(), b"ok");
    }

    #[test]
    fn list_keys_and_fold() {
        let dir = tempfile::TempDir::with_prefix("barreldb").unwrap();
        let engine = Engine::launch(test_options(dir.path())).unwrap();
        for i in (0..6).rev() {
            engine.put(&test_key(i), &test_value(i)).unwrap();
        }
        engine.delete(&test_key(3)).unwrap();

        let keys = engine.list_keys();
        assert_eq!(keys, vec![test_key(0), test_key(1), test_key(2), test_key(4), test_key(5)]);

        let mut seen = Vec::new();
        engine
            .fold(|key, value| {
                seen.push((key.to_vec(), value));
                true
            })
            .unwrap();
        assert_eq!(seen.len(), 5);
        assert_eq!(seen[0], (test_key(0), test_value(0)));

        // The callback can stop the traversal early.
        let mut count = 0;
        engine
            .fold(|_, _| {
                count += 1;
                count < 2
            })
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn stat_reports_counts_and_reclaimable() {
        let dir = tempfile::TempDir::with_prefix("barreldb").unwrap();
        let engine = Engine::launch(test_options(dir.path())).unwrap();

        engine.put(b"114", b"514").unwrap();
        let stat = engine.stat().unwrap();
        assert_eq!(stat.key_number, 1);
        assert_eq!(stat.data_file_number, 1);
        assert_eq!(stat.reclaimable_size, 0);
        assert!(stat.disk_size > 0);

        // An overwrite makes exactly the first record reclaimable. The lock
        // file is zero bytes, so the earlier disk size is that record's size.
        let first_record_size = stat.disk_size;
        engine.put(b"114", b"114514").unwrap();
        let overwritten = engine.stat().unwrap();
        assert_eq!(overwritten.reclaimable_size, first_record_size);

        // A delete adds both the tombstone and the shadowed record.
        engine.delete(b"114").unwrap();
        let deleted = engine.stat().unwrap();
        assert!(deleted.reclaimable_size > overwritten.reclaimable_size);
        assert_eq!(deleted.key_number, 0);
    }

    #[test]
    fn backup_and_fork() {
        let dir = tempfile::TempDir::with_prefix("barreldb").unwrap();
        let engine = Engine::launch(test_options(dir.path())).unwrap();
        for i in 0..100 {
            engine.put(&test_key(i), &test_value(i)).unwrap();
        }

        let backup_dir = tempfile::TempDir::with_prefix("barreldb").unwrap();
        engine.backup(backup_dir.path()).unwrap();
        assert!(!backup_dir.path().join(LOCK_FILE_NAME).exists());
        let restored = Engine::launch(test_options(backup_dir.path())).unwrap();
        for i in 0..100 {
            assert_eq!(restored.get(&test_key(i)).unwrap(), test_value(i));
        }

        let fork_dir = tempfile::TempDir::with_prefix("barreldb").unwrap();
        let forked = engine.fork(fork_dir.path()).unwrap();
        assert_eq!(forked.get(&test_key(42)).unwrap(), test_value(42));
        // Both engines stay independently writable.
        forked.put(b"only-fork", b"1").unwrap();
        assert!(matches!(engine.get(b"only-fork"), Err(Error::KeyNotFound)));
    }

    #[test]
    fn directory_lock_is_exclusive() {
        let dir = tempfile::TempDir::with_prefix("barreldb").unwrap();
        let engine = Engine::launch(test_options(dir.path())).unwrap();

        assert!(matches!(
            Engine::launch(test_options(dir.path())),
            Err(Error::DatabaseInUse)
        ));

        engine.close().unwrap();
        drop(engine);
        assert!(Engine::launch(test_options(dir.path())).is_ok());
    }

    #[test]
    fn corrupted_file_name_fails_launch() {
        let dir = tempfile::TempDir::with_prefix("barreldb").unwrap();
        fs::write(dir.path().join("not-a-number.data"), b"").unwrap();
        assert!(matches!(
            Engine::launch(test_options(dir.path())),
            Err(Error::DirectoryCorrupted(_))
        ));
    }

    #[test]
    fn persistent_index_skips_replay() {
        let dir = tempfile::TempDir::with_prefix("barreldb").unwrap();
        let options = Options {
            index_variant: IndexVariant::PersistentBPlusTree,
            ..test_options(dir.path())
        };
        let engine = Engine::launch(options.clone()).unwrap();
        for i in 0..100 {
            engine.put(&test_key(i), &test_value(i)).unwrap();
        }
        engine.close().unwrap();
        drop(engine);

        let engine = Engine::launch(options).unwrap();
        assert!(engine.tran_no_file_existed);
        for i in 0..100 {
            assert_eq!(engine.get(&test_key(i)).unwrap(), test_value(i));
        }
        engine.put(b"after-restart", b"ok").unwrap();
        assert_eq!(engine.get(b"after-restart").unwrap(), b"ok");
    }

    #[test]
    fn concurrent_readers_and_writers() {
        let dir = tempfile::TempDir::with_prefix("barreldb").unwrap();
        let engine = std::sync::Arc::new(Engine::launch(test_options(dir.path())).unwrap());

        let mut handles = Vec::new();
        for t in 0..4 {
            let engine = engine.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..250 {
                    let n = t * 1000 + i;
                    engine.put(&test_key(n), &test_value(n)).unwrap();
                    assert_eq!(engine.get(&test_key(n)).unwrap(), test_value(n));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(engine.stat().unwrap().key_number, 1000);
    }

    #[test]
    fn sync_threshold_flushes_periodically() {
        let dir = tempfile::TempDir::with_prefix("barreldb").unwrap();
        let options = Options { sync_threshold: 512, ..test_options(dir.path()) };
        let engine = Engine::launch(options.clone()).unwrap();
        for i in 0..100 {
            engine.put(&test_key(i), &test_value(i)).unwrap();
        }
        drop(engine);

        let engine = Engine::launch(options).unwrap();
        for i in 0..100 {
            assert_eq!(engine.get(&test_key(i)).unwrap(), test_value(i));
        }
    }

    #[test]
    fn all_index_variants_roundtrip() {
        for variant in [
            IndexVariant::BTree,
            IndexVariant::AdaptiveRadixTree,
            IndexVariant::PersistentBPlusTree,
        ] {
            let dir = tempfile::TempDir::with_prefix("barreldb").unwrap();
            let options = Options { index_variant: variant, ..test_options(dir.path()) };
            let engine = Engine::launch(options).unwrap();
            for i in 0..50 {
                engine.put(&test_key(i), &test_value(i)).unwrap();
            }
            engine.delete(&test_key(7)).unwrap();
            for i in 0..50 {
                if i == 7 {
                    assert!(matches!(engine.get(&test_key(i)), Err(Error::KeyNotFound)));
                } else {
                    assert_eq!(engine.get(&test_key(i)).unwrap(), test_value(i), "{variant:?}");
                }
            }
        }
    }
}
