//! Data files: append-only sequences of encoded log records.

use std::io;
use std::path::{Path, PathBuf};

use crate::data::record::{self, LogRecord, Position, RecordType, MAX_HEADER_SIZE};
use crate::data::{DATA_FILE_SUFFIX, HINT_FILE_NAME, MERGED_FILE_NAME, TRAN_NO_FILE_NAME};
use crate::error::{Error, Result};
use crate::io::{new_backend, IoBackend, IoKind};

/// A single append-only file of log records, identified by a monotonic
/// 32-bit id. The file is writable while active; once the engine rotates it,
/// it is only ever read.
pub struct DataFile {
    file_id: u32,
    write_offset: u64,
    path: PathBuf,
    io: Box<dyn IoBackend>,
}

impl DataFile {
    /// Opens the data file with the given id inside `directory`, creating it
    /// if it does not exist.
    pub fn open(directory: &Path, file_id: u32, kind: IoKind) -> Result<Self> {
        Self::open_at(Self::path_for(directory, file_id), file_id, kind)
    }

    /// Opens the hint file inside `directory`.
    pub fn open_hint(directory: &Path) -> Result<Self> {
        Self::open_at(directory.join(HINT_FILE_NAME), 0, IoKind::File)
    }

    /// Opens the merge-complete marker file inside `directory`.
    pub fn open_merged(directory: &Path) -> Result<Self> {
        Self::open_at(directory.join(MERGED_FILE_NAME), 0, IoKind::File)
    }

    /// Opens the transaction-serial checkpoint file inside `directory`.
    pub fn open_tran_no(directory: &Path) -> Result<Self> {
        Self::open_at(directory.join(TRAN_NO_FILE_NAME), 0, IoKind::File)
    }

    fn open_at(path: PathBuf, file_id: u32, kind: IoKind) -> Result<Self> {
        let io = new_backend(kind, &path)?;
        Ok(Self { file_id, write_offset: 0, path, io })
    }

    /// Path of the data file with the given id inside `directory`.
    pub fn path_for(directory: &Path, file_id: u32) -> PathBuf {
        directory.join(format!("{file_id:09}{DATA_FILE_SUFFIX}"))
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    pub fn write_offset(&self) -> u64 {
        self.write_offset
    }

    /// Overrides the tracked write offset. Used by recovery, which knows
    /// where the last valid record ends.
    pub fn set_write_offset(&mut self, offset: u64) {
        self.write_offset = offset;
    }

    /// Size of the file on disk.
    pub fn size(&self) -> Result<u64> {
        self.io.size()
    }

    /// Reads the log record starting at `offset`, returning it along with
    /// its encoded size. Returns `Ok(None)` at the logical end of the file:
    /// either past the last byte or at the all-zero sentinel.
    pub fn read_log_record(&self, offset: u64) -> Result<Option<(LogRecord, u64)>> {
        let file_size = self.io.size()?;
        if offset >= file_size {
            return Ok(None);
        }

        // The header is at most MAX_HEADER_SIZE bytes, or shorter when the
        // record sits near the end of the file.
        let header_cap = MAX_HEADER_SIZE.min((file_size - offset) as usize);
        let mut header_buf = vec![0u8; header_cap];
        self.read_exact(&mut header_buf, offset)?;

        let Some((header, header_len)) = record::decode_header(&header_buf) else {
            return Ok(None);
        };
        let record_type = RecordType::from_u8(header.record_type).ok_or(Error::InvalidCrc)?;

        let key_size = header.key_size as usize;
        let value_size = header.value_size as usize;
        let mut kv = vec![0u8; key_size + value_size];
        if !kv.is_empty() {
            self.read_exact(&mut kv, offset + header_len as u64)?;
        }
        let value = kv.split_off(key_size);
        let record = LogRecord { key: kv, value, record_type };

        if record.crc(&header_buf[4..header_len]) != header.crc {
            return Err(Error::InvalidCrc);
        }

        let size = (header_len + key_size + value_size) as u64;
        Ok(Some((record, size)))
    }

    /// Appends raw bytes and advances the write offset.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.io.write(buf)?;
        self.write_offset += n as u64;
        Ok(n)
    }

    /// Appends a hint record: the caller-visible key paired with the encoded
    /// position of its record in the merged data files.
    pub fn write_hint_record(&mut self, key: &[u8], position: Position) -> Result<()> {
        let record = LogRecord {
            key: key.to_vec(),
            value: position.encode(),
            record_type: RecordType::Normal,
        };
        self.write(&record.encode())?;
        Ok(())
    }

    /// Flushes the file to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.io.sync()
    }

    /// Releases the I/O backend.
    pub fn close(&mut self) -> Result<()> {
        self.io.close()
    }

    /// Closes the current I/O backend and re-opens the file with the
    /// requested one at the same path.
    pub fn switch_io_backend(&mut self, kind: IoKind) -> Result<()> {
        self.io.close()?;
        self.io = new_backend(kind, &self.path)?;
        Ok(())
    }

    fn read_exact(&self, buf: &mut [u8], mut offset: u64) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.io.read(&mut buf[filled..], offset)?;
            if n == 0 {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "record extends beyond the end of the file",
                )));
            }
            filled += n;
            offset += n as u64;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &[u8], value: &[u8], record_type: RecordType) -> LogRecord {
        LogRecord { key: key.to_vec(), value: value.to_vec(), record_type }
    }

    #[test]
    fn open_formats_file_names() {
        let dir = tempfile::TempDir::with_prefix("barreldb").unwrap();
        let file = DataFile::open(dir.path(), 114, IoKind::File).unwrap();
        assert_eq!(file.file_id(), 114);
        assert!(dir.path().join("000000114.data").exists());
    }

    #[test]
    fn sequential_write_then_scan() {
        let dir = tempfile::TempDir::with_prefix("barreldb").unwrap();
        let mut file = DataFile::open(dir.path(), 0, IoKind::File).unwrap();

        let records = [
            record(b"114", b"514", RecordType::Normal),
            record(b"191810", b"", RecordType::Normal),
            record(b"114514", b"1919810", RecordType::Tombstone),
        ];
        let mut sizes = Vec::new();
        for r in &records {
            let encoded = r.encode();
            assert_eq!(file.write(&encoded).unwrap(), encoded.len());
            sizes.push(encoded.len() as u64);
        }
        assert_eq!(file.write_offset(), sizes.iter().sum::<u64>());
        file.sync().unwrap();

        let mut offset = 0;
        for (expect, expect_size) in records.iter().zip(&sizes) {
            let (got, size) = file.read_log_record(offset).unwrap().unwrap();
            assert_eq!(&got, expect);
            assert_eq!(size, *expect_size);
            offset += size;
        }
        assert!(file.read_log_record(offset).unwrap().is_none());
    }

    #[test]
    fn scan_stops_at_zero_sentinel() {
        let dir = tempfile::TempDir::with_prefix("barreldb").unwrap();
        let mut file = DataFile::open(dir.path(), 0, IoKind::File).unwrap();

        let encoded = record(b"key", b"value", RecordType::Normal).encode();
        file.write(&encoded).unwrap();
        file.write(&[0u8; 32]).unwrap();

        let (_, size) = file.read_log_record(0).unwrap().unwrap();
        assert!(file.read_log_record(size).unwrap().is_none());
    }

    #[test]
    fn corrupted_record_fails_crc() {
        let dir = tempfile::TempDir::with_prefix("barreldb").unwrap();
        let mut file = DataFile::open(dir.path(), 0, IoKind::File).unwrap();
        file.write(&record(b"key", b"value", RecordType::Normal).encode()).unwrap();
        drop(file);

        // Flip one payload bit on disk.
        let path = dir.path().join("000000000.data");
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        std::fs::write(&path, &bytes).unwrap();

        let file = DataFile::open(dir.path(), 0, IoKind::File).unwrap();
        assert!(matches!(file.read_log_record(0), Err(Error::InvalidCrc)));
    }

    #[test]
    fn hint_records_roundtrip() {
        let dir = tempfile::TempDir::with_prefix("barreldb").unwrap();
        let mut hint = DataFile::open_hint(dir.path()).unwrap();

        let position = Position { file_id: 2, offset: 514, size: 28 };
        hint.write_hint_record(b"114", position).unwrap();
        hint.sync().unwrap();

        let (got, _) = hint.read_log_record(0).unwrap().unwrap();
        assert_eq!(got.key, b"114");
        assert_eq!(Position::decode(&got.value).unwrap(), position);
        assert!(dir.path().join(HINT_FILE_NAME).exists());
    }

    #[test]
    fn mmap_backend_reads_and_switches_back() {
        let dir = tempfile::TempDir::with_prefix("barreldb").unwrap();
        let mut file = DataFile::open(dir.path(), 0, IoKind::File).unwrap();
        let encoded = record(b"key", b"value", RecordType::Normal).encode();
        file.write(&encoded).unwrap();
        drop(file);

        let mut file = DataFile::open(dir.path(), 0, IoKind::Mmap).unwrap();
        let (got, _) = file.read_log_record(0).unwrap().unwrap();
        assert_eq!(got.value, b"value");

        // Writes require switching back to buffered file I/O first.
        file.switch_io_backend(IoKind::File).unwrap();
        file.write(&encoded).unwrap();
        assert_eq!(file.size().unwrap(), 2 * encoded.len() as u64);
    }
}
