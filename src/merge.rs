//! Merge: offline compaction of superseded records.
//!
//! A merge rewrites only the live records, i.e. those whose index position
//! still points at them, into a sibling `<dir>-merge` directory, together
//! with a hint file mapping each key to its new position. Once everything
//! is synced, a `merged` marker stamps the shadow directory with the id of
//! the first file the merge did not cover. Promotion is deferred to the
//! next launch, which deletes the superseded files and moves the shadow
//! contents into place, so a crash anywhere before the marker simply
//! discards the half-built shadow directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::data::record::{
    decode_tran_key, encode_tran_key, LogRecord, RecordType, NON_TRANSACTION_SERIAL,
};
use crate::data::{
    DataFile, BPTREE_INDEX_FILE_NAME, LOCK_FILE_NAME, MERGED_FILE_NAME, TRAN_NO_FILE_NAME,
};
use crate::engine::{non_merged_file_id, Engine};
use crate::error::{Error, Result};
use crate::fs_util;
use crate::io::IoKind;
use crate::options::{IndexVariant, Options};

/// Suffix of the shadow directory, a sibling of the engine directory.
const MERGE_DIR_SUFFIX: &str = "-merge";

/// Key of the single record inside the merge-complete marker file.
const MERGED_KEY: &[u8] = b"merged";

/// Resets the merging flag when the merge ends, on every path out.
struct MergingGuard<'a>(&'a AtomicBool);

impl Drop for MergingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Engine {
    /// Rewrites the live records of every inactive data file into a shadow
    /// directory and stamps it for promotion on the next launch.
    ///
    /// Only the preamble (rotating the active file and snapshotting the
    /// merge set) holds the engine write lock; the rewrite itself runs
    /// without blocking readers or writers.
    pub fn merge(&self) -> Result<()> {
        if self.merging.swap(true, Ordering::SeqCst) {
            return Err(Error::MergeInProgress);
        }
        // The flag is ours; reset it however this merge ends.
        let _guard = MergingGuard(&self.merging);

        let (merge_ids, boundary) = {
            let mut files = self.files.write();
            if files.active.is_none() {
                // Nothing on disk, nothing to merge.
                return Ok(());
            }

            let total_size = fs_util::dir_size(&self.options.directory)?;
            let live_size =
                total_size.saturating_sub(self.reclaimable.load(Ordering::SeqCst));
            if live_size >= fs_util::available_disk_size(&self.options.directory)? {
                return Err(Error::NoDiskSpace);
            }

            let old_active = match files.active.take() {
                Some(file) => file,
                None => return Ok(()),
            };
            if let Err(error) = old_active.sync() {
                files.active = Some(old_active);
                return Err(error);
            }
            let boundary = old_active.file_id() + 1;
            let new_active = match DataFile::open(&self.options.directory, boundary, IoKind::File)
            {
                Ok(file) => file,
                Err(error) => {
                    files.active = Some(old_active);
                    return Err(error);
                }
            };
            files.inactive.insert(old_active.file_id(), old_active);
            files.active = Some(new_active);

            let merge_ids: Vec<u32> =
                files.sorted_ids().into_iter().filter(|id| *id < boundary).collect();
            (merge_ids, boundary)
        };

        let merge_dir = merge_directory(&self.options.directory);
        if merge_dir.exists() {
            fs::remove_dir_all(&merge_dir)?;
        }
        fs::create_dir_all(&merge_dir)?;
        log::info!(
            "merging {} data file(s) into {}",
            merge_ids.len(),
            merge_dir.display()
        );

        // The shadow engine receives the rewritten records. Its index is
        // never consulted, so the cheap in-memory B-tree is used regardless
        // of the live engine's variant; this also keeps index files out of
        // the shadow directory, which is promoted wholesale.
        let shadow = Engine::launch(Options {
            directory: merge_dir.clone(),
            sync_writes: false,
            index_variant: IndexVariant::BTree,
            merge_threshold: 0.0,
            ..self.options.clone()
        })?;
        let mut hint_file = DataFile::open_hint(&merge_dir)?;

        for id in merge_ids {
            let file = DataFile::open(&self.options.directory, id, IoKind::File)?;
            let mut offset = 0;
            while let Some((record, size)) = file.read_log_record(offset)? {
                let (key, _) = decode_tran_key(&record.key).ok_or(Error::InvalidCrc)?;
                // A record is live iff the index still points at it. Any
                // transaction serial it carried has long been settled.
                let live = self
                    .index
                    .get(&key)
                    .is_some_and(|position| position.file_id == id && position.offset == offset);
                if live {
                    let rewritten = LogRecord {
                        key: encode_tran_key(&key, NON_TRANSACTION_SERIAL),
                        value: record.value,
                        record_type: record.record_type,
                    };
                    let position = shadow.append_record(&rewritten)?;
                    hint_file.write_hint_record(&key, position)?;
                }
                offset += size;
            }
            log::debug!("merged data file {id:09}");
        }

        hint_file.sync()?;
        shadow.sync()?;

        // The marker commits the merge: promotion only trusts a shadow
        // directory that carries it.
        let mut merged_file = DataFile::open_merged(&merge_dir)?;
        let marker = LogRecord {
            key: MERGED_KEY.to_vec(),
            value: boundary.to_string().into_bytes(),
            record_type: RecordType::Normal,
        };
        merged_file.write(&marker.encode())?;
        merged_file.sync()?;

        shadow.close()?;
        log::info!("merge finished, boundary file id {boundary:09}; promoting on next launch");
        Ok(())
    }
}

/// The shadow directory for `directory`: a sibling named `<dir>-merge`.
fn merge_directory(directory: &Path) -> PathBuf {
    let name = directory.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    directory.with_file_name(format!("{name}{MERGE_DIR_SUFFIX}"))
}

/// Promotes a completed merge during launch: deletes the data files the
/// merge superseded, moves the shadow contents into the live directory, and
/// removes the shadow directory. A shadow directory without the `merged`
/// marker is discarded untouched.
pub(crate) fn promote_completed_merge(directory: &Path) -> Result<()> {
    let merge_dir = merge_directory(directory);
    if !merge_dir.is_dir() {
        return Ok(());
    }

    if !merge_dir.join(MERGED_FILE_NAME).is_file() {
        log::info!("discarding unfinished merge at {}", merge_dir.display());
        fs::remove_dir_all(&merge_dir)?;
        return Ok(());
    }

    let boundary = non_merged_file_id(&merge_dir)?;
    log::info!(
        "promoting merge from {}, boundary file id {boundary:09}",
        merge_dir.display()
    );

    for id in 0..boundary {
        let path = DataFile::path_for(directory, id);
        if path.is_file() {
            fs::remove_file(path)?;
        }
    }

    for entry in fs::read_dir(&merge_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        // The shadow engine's own lock and serial checkpoint stay behind,
        // as would any index file: the live ones must not be replaced.
        if [TRAN_NO_FILE_NAME, LOCK_FILE_NAME, BPTREE_INDEX_FILE_NAME]
            .iter()
            .any(|skip| name.as_os_str() == *skip)
        {
            continue;
        }
        fs::rename(entry.path(), directory.join(&name))?;
    }
    fs::remove_dir_all(&merge_dir)?;
    Ok(())
}
