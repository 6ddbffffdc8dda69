//! On-disk log record framing.
//!
//! Every record is laid out as:
//!
//! - Bytes 0..4: little-endian CRC-32 (IEEE) over everything that follows.
//! - Byte 4: record type (1 = normal, 2 = tombstone, 3 = transaction finished).
//! - Signed varint key length, then signed varint value length.
//! - Key as raw bytes, then value as raw bytes.
//!
//! The key written to disk is a composite: an unsigned varint transaction
//! serial followed by the caller-visible key. Serial 0 means the record is
//! not part of a transaction. The in-memory index always stores the decoded
//! caller-visible key, never the composite form.

use integer_encoding::VarInt;

/// Transaction serial tagging records that are not part of a transaction.
pub const NON_TRANSACTION_SERIAL: u64 = 0;

/// Maximum encoded header length: CRC, type byte, and two varint lengths of
/// at most five bytes each.
pub(crate) const MAX_HEADER_SIZE: usize = 4 + 1 + 2 * 5;

/// The kind of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    /// A live key/value pair.
    Normal = 1,
    /// Marks the key as deleted.
    Tombstone = 2,
    /// Marks every record tagged with the same transaction serial as
    /// committed.
    TxnFinished = 3,
}

impl RecordType {
    pub(crate) fn from_u8(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Normal),
            2 => Some(Self::Tombstone),
            3 => Some(Self::TxnFinished),
            _ => None,
        }
    }
}

/// The atomic on-disk unit: a key/value pair plus a record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub record_type: RecordType,
}

impl LogRecord {
    /// Encodes the record into its on-disk byte representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut header = [0u8; MAX_HEADER_SIZE];
        header[4] = self.record_type as u8;
        let mut index = 5;
        index += (self.key.len() as i64).encode_var(&mut header[index..]);
        index += (self.value.len() as i64).encode_var(&mut header[index..]);

        let mut buf = Vec::with_capacity(index + self.key.len() + self.value.len());
        buf.extend_from_slice(&header[..index]);
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let crc = crc32fast::hash(&buf[4..]);
        buf[..4].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Recomputes the CRC over the header bytes after the CRC field followed
    /// by the key and the value.
    pub(crate) fn crc(&self, header_after_crc: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(header_after_crc);
        hasher.update(&self.key);
        hasher.update(&self.value);
        hasher.finalize()
    }
}

/// A decoded record header. The type is kept as the raw byte until the CRC
/// has been validated.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RecordHeader {
    pub crc: u32,
    pub record_type: u8,
    pub key_size: u32,
    pub value_size: u32,
}

/// Decodes a record header from the front of `buf`, returning the header and
/// its encoded length. Returns `None` for buffers too short to hold a header
/// and for the all-zero end-of-file sentinel.
pub(crate) fn decode_header(buf: &[u8]) -> Option<(RecordHeader, usize)> {
    if buf.len() <= 4 {
        return None;
    }
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&buf[..4]);
    let crc = u32::from_le_bytes(crc_bytes);
    let record_type = buf[4];

    let mut index = 5;
    let (key_size, n) = i64::decode_var(&buf[index..])?;
    index += n;
    let (value_size, n) = i64::decode_var(&buf[index..])?;
    index += n;

    if crc == 0 && key_size == 0 && value_size == 0 {
        return None;
    }

    let header = RecordHeader {
        crc,
        record_type,
        key_size: key_size as u32,
        value_size: value_size as u32,
    };
    Some((header, index))
}

/// Locates a record on disk: the owning file, the byte offset of the
/// record's first byte, and its encoded size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub file_id: u32,
    pub offset: u64,
    pub size: u32,
}

impl Position {
    /// Encodes the position as three signed varints, the format used for
    /// hint-file values and the persistent index.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = [0u8; 3 * 10];
        let mut index = 0;
        index += (self.file_id as i64).encode_var(&mut buf[index..]);
        index += (self.offset as i64).encode_var(&mut buf[index..]);
        index += (self.size as i64).encode_var(&mut buf[index..]);
        buf[..index].to_vec()
    }

    /// Decodes a position encoded by [`Position::encode`].
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let mut index = 0;
        let (file_id, n) = i64::decode_var(&buf[index..])?;
        index += n;
        let (offset, n) = i64::decode_var(&buf[index..])?;
        index += n;
        let (size, _) = i64::decode_var(&buf[index..])?;
        Some(Self { file_id: file_id as u32, offset: offset as u64, size: size as u32 })
    }
}

/// Prepends the unsigned-varint transaction serial to a caller-visible key,
/// producing the composite form written to disk.
pub(crate) fn encode_tran_key(key: &[u8], serial: u64) -> Vec<u8> {
    let mut buf = vec![0u8; serial.required_space()];
    serial.encode_var(&mut buf);
    buf.extend_from_slice(key);
    buf
}

/// Splits a composite key into the caller-visible key and its transaction
/// serial. Returns `None` if the serial varint is malformed.
pub(crate) fn decode_tran_key(composite: &[u8]) -> Option<(Vec<u8>, u64)> {
    let (serial, n) = u64::decode_var(composite)?;
    Some((composite[n..].to_vec(), serial))
}
