//! Byte-level I/O backends for data files.
//!
//! Two implementations share the [`IoBackend`] contract: [`FileIo`] wraps a
//! file opened for read/write/append and is used for all normal operation,
//! while [`MmapIo`] maps the file read-only and exists solely to speed up
//! the sequential scans during recovery. A data file can switch between the
//! two; the engine swaps every memory-mapped backend back to buffered file
//! I/O before the first write.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt as _;
use std::path::Path;

use memmap2::Mmap;

use crate::error::Result;

/// Permissions for newly created data files.
const DATA_FILE_MODE: u32 = 0o644;

/// Abstract I/O over a single file.
pub trait IoBackend: Send + Sync {
    /// Reads into `buf` starting at `offset`, returning the number of bytes
    /// read. May return fewer bytes than requested at the end of the file.
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Appends `buf` to the file, returning the number of bytes written.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Flushes written data to stable storage.
    fn sync(&self) -> Result<()>;

    /// Size of the file in bytes.
    fn size(&self) -> Result<u64>;

    /// Releases the backend. The underlying file handle is closed when the
    /// backend is dropped.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Which [`IoBackend`] implementation to open a file with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoKind {
    /// Buffered file I/O, read/write/append.
    File,
    /// Read-only memory mapping. Used only for startup scans.
    Mmap,
}

/// Opens an I/O backend of the given kind at `path`, creating the file if it
/// does not exist.
pub fn new_backend(kind: IoKind, path: &Path) -> Result<Box<dyn IoBackend>> {
    match kind {
        IoKind::File => Ok(Box::new(FileIo::open(path)?)),
        IoKind::Mmap => Ok(Box::new(MmapIo::open(path)?)),
    }
}

/// Standard buffered file I/O.
pub struct FileIo {
    file: File,
}

impl FileIo {
    /// Opens `path` for reading and appending with mode 0644, creating it if
    /// missing.
    pub fn open(path: &Path) -> Result<Self> {
        let mut opts = OpenOptions::new();
        opts.create(true).read(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(DATA_FILE_MODE);
        }
        let file = opts.open(path)?;
        Ok(Self { file })
    }
}

impl IoBackend for FileIo {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        Ok(self.file.read_at(buf, offset)?)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn sync(&self) -> Result<()> {
        Ok(self.file.sync_all()?)
    }

    fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

/// Read-only memory-mapped I/O.
///
/// Mapping a zero-length file is not possible, so an empty file is
/// represented by `map = None` and reads as zero bytes.
pub struct MmapIo {
    map: Option<Mmap>,
}

impl MmapIo {
    /// Memory-maps `path` read-only, creating an empty file if missing.
    pub fn open(path: &Path) -> Result<Self> {
        let mut opts = OpenOptions::new();
        opts.create(true).read(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(DATA_FILE_MODE);
        }
        let file = opts.open(path)?;
        let map = if file.metadata()?.len() == 0 {
            None
        } else {
            // SAFETY: the mapping is read-only and data files are only ever
            // appended to, so mapped bytes are never mutated under us.
            Some(unsafe { Mmap::map(&file)? })
        };
        Ok(Self { map })
    }

    fn bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }
}

impl IoBackend for MmapIo {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let bytes = self.bytes();
        let offset = offset.min(bytes.len() as u64) as usize;
        let n = buf.len().min(bytes.len() - offset);
        buf[..n].copy_from_slice(&bytes[offset..offset + n]);
        Ok(n)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize> {
        panic!("write is not supported on a memory-mapped backend");
    }

    fn sync(&self) -> Result<()> {
        panic!("sync is not supported on a memory-mapped backend");
    }

    fn size(&self) -> Result<u64> {
        Ok(self.bytes().len() as u64)
    }
}
