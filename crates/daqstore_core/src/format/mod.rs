//! On-disk object format.
//!
//! A data file is a short file header followed by a stream of checksummed
//! records:
//!
//! ```text
//! | magic "DQST" (4) | version u16 (2) | layout u8 (1) | reserved (1) |
//! | record | record | ...
//!
//! record := | record_len u32 (4) | kind u8 (1) | payload (N) | crc32 (4) |
//! ```
//!
//! Integers are little-endian, `record_len` covers the whole record and the
//! CRC covers every byte before it. A record cut short at the end of the
//! file is treated as end of file.
//!
//! Two object kinds are built on records: [`table`] (fixed-width columnar
//! tables growing in row chunks) and [`tree`] (groups, datasets and
//! attributes).

pub mod attr;
pub mod table;
pub mod tree;

pub use attr::{AttrValue, Attributes};

use crate::config::LayoutKind;
use crate::error::{DatasetError, DatasetResult};
use crate::types::{RawWord, WORD_BYTES};
use bytes::{Buf, BufMut};
use daqstore_storage::StorageBackend;
use tracing::{trace, warn};

/// File magic.
pub const MAGIC: [u8; 4] = *b"DQST";

/// Current format version.
pub const FORMAT_VERSION: u16 = 1;

/// Size of the file header in bytes.
pub const FILE_HEADER_SIZE: usize = 8;

/// Bytes before a record's payload: length and kind.
pub const RECORD_PAYLOAD_OFFSET: u64 = 5;

const CRC_SIZE: usize = 4;
const MIN_RECORD_SIZE: usize = RECORD_PAYLOAD_OFFSET as usize + CRC_SIZE;

/// Record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    /// Declares a table.
    TableSchema = 1,
    /// A chunk of table rows.
    TableChunk = 2,
    /// Creates a group in the tree.
    CreateGroup = 3,
    /// Sets attributes on a tree node.
    SetAttributes = 4,
    /// Creates a dataset in the tree, contents included.
    CreateDataset = 5,
}

impl RecordKind {
    /// Decodes a kind byte.
    #[must_use]
    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::TableSchema),
            2 => Some(Self::TableChunk),
            3 => Some(Self::CreateGroup),
            4 => Some(Self::SetAttributes),
            5 => Some(Self::CreateDataset),
            _ => None,
        }
    }
}

/// One framed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// What the payload holds.
    pub kind: RecordKind,
    /// Record contents.
    pub payload: Vec<u8>,
}

impl Record {
    /// Creates a record.
    #[must_use]
    pub fn new(kind: RecordKind, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }

    /// Encoded size in bytes.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        MIN_RECORD_SIZE + self.payload.len()
    }

    /// Encodes the record with its length and checksum.
    ///
    /// # Errors
    ///
    /// Fails if the record is larger than a 32-bit length can describe.
    pub fn encode(&self) -> DatasetResult<Vec<u8>> {
        let record_len = u32::try_from(self.encoded_size()).map_err(|_| {
            DatasetError::invalid_format(format!(
                "record of {} bytes is too large",
                self.encoded_size()
            ))
        })?;
        let mut buf = Vec::with_capacity(record_len as usize);
        buf.put_u32_le(record_len);
        buf.put_u8(self.kind as u8);
        buf.put_slice(&self.payload);
        let crc = crc32fast::hash(&buf);
        buf.put_u32_le(crc);
        Ok(buf)
    }

    /// Decodes a record read from file offset `offset`.
    ///
    /// # Errors
    ///
    /// Fails on a bad length, checksum mismatch or unknown kind.
    pub fn decode(data: &[u8], offset: u64) -> DatasetResult<Self> {
        if data.len() < MIN_RECORD_SIZE {
            return Err(DatasetError::invalid_format(format!(
                "record at offset {offset} is {} bytes, shorter than a record frame",
                data.len()
            )));
        }
        let record_len = (&data[..4]).get_u32_le() as usize;
        if record_len != data.len() {
            return Err(DatasetError::invalid_format(format!(
                "record at offset {offset} declares {record_len} bytes but {} were read",
                data.len()
            )));
        }

        let body = &data[..record_len - CRC_SIZE];
        let expected = (&data[record_len - CRC_SIZE..]).get_u32_le();
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(DatasetError::ChecksumMismatch {
                offset,
                expected,
                actual,
            });
        }

        let kind = RecordKind::from_byte(data[4]).ok_or_else(|| {
            DatasetError::invalid_format(format!(
                "unknown record kind {} at offset {offset}",
                data[4]
            ))
        })?;

        Ok(Self {
            kind,
            payload: body[RECORD_PAYLOAD_OFFSET as usize..].to_vec(),
        })
    }
}

/// A data file: header plus record stream over a storage backend.
pub struct RecordFile {
    backend: Box<dyn StorageBackend>,
    layout: LayoutKind,
}

impl RecordFile {
    /// Starts a new file, discarding anything the backend held.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot be truncated or written.
    pub fn create(mut backend: Box<dyn StorageBackend>, layout: LayoutKind) -> DatasetResult<Self> {
        backend.truncate(0)?;

        let mut header = Vec::with_capacity(FILE_HEADER_SIZE);
        header.put_slice(&MAGIC);
        header.put_u16_le(FORMAT_VERSION);
        header.put_u8(layout.code());
        header.put_u8(0);
        backend.append(&header)?;

        Ok(Self { backend, layout })
    }

    /// Opens an existing file and reads its layout.
    ///
    /// # Errors
    ///
    /// Fails if the header is missing, has the wrong magic, an unsupported
    /// version or an unknown layout.
    pub fn open(backend: Box<dyn StorageBackend>) -> DatasetResult<Self> {
        let size = backend.size()?;
        if size < FILE_HEADER_SIZE as u64 {
            return Err(DatasetError::invalid_format(format!(
                "file of {size} bytes has no header"
            )));
        }

        let header = backend.read_at(0, FILE_HEADER_SIZE)?;
        if header[..4] != MAGIC {
            return Err(DatasetError::invalid_format("bad magic, not a daqstore file"));
        }
        let mut rest = &header[4..];
        let version = rest.get_u16_le();
        if version != FORMAT_VERSION {
            return Err(DatasetError::invalid_format(format!(
                "unsupported format version {version}"
            )));
        }
        let code = rest.get_u8();
        let layout = LayoutKind::from_code(code)
            .ok_or_else(|| DatasetError::invalid_format(format!("unknown layout code {code}")))?;

        Ok(Self { backend, layout })
    }

    /// Layout recorded in the header.
    #[must_use]
    pub fn layout(&self) -> LayoutKind {
        self.layout
    }

    /// Appends a record and returns its offset.
    ///
    /// # Errors
    ///
    /// Fails if the record cannot be encoded or written.
    pub fn append(&mut self, record: &Record) -> DatasetResult<u64> {
        let bytes = record.encode()?;
        let offset = self.backend.append(&bytes)?;
        trace!(offset, kind = ?record.kind, len = bytes.len(), "appended record");
        Ok(offset)
    }

    /// Reads and verifies the record at `offset`.
    ///
    /// # Errors
    ///
    /// Fails if the record is out of range or does not verify.
    pub fn read_record(&self, offset: u64) -> DatasetResult<Record> {
        let len_bytes = self.backend.read_at(offset, 4)?;
        let record_len = (&len_bytes[..]).get_u32_le() as usize;
        let data = self.backend.read_at(offset, record_len)?;
        Record::decode(&data, offset)
    }

    /// Reads raw bytes without verification.
    ///
    /// # Errors
    ///
    /// Fails if the range is out of bounds.
    pub fn read_bytes(&self, offset: u64, len: usize) -> DatasetResult<Vec<u8>> {
        Ok(self.backend.read_at(offset, len)?)
    }

    /// Visits every complete record in file order.
    ///
    /// A record cut off by the end of the file ends the scan.
    ///
    /// # Errors
    ///
    /// Fails on the first record that does not verify, or if `visit` fails.
    pub fn scan<F>(&self, mut visit: F) -> DatasetResult<()>
    where
        F: FnMut(u64, Record) -> DatasetResult<()>,
    {
        let size = self.backend.size()?;
        let mut offset = FILE_HEADER_SIZE as u64;

        while offset < size {
            if offset + 4 > size {
                warn!(offset, size, "truncated record length at end of file");
                break;
            }

            let len_bytes = self.backend.read_at(offset, 4)?;
            let record_len = (&len_bytes[..]).get_u32_le() as usize;
            if record_len < MIN_RECORD_SIZE {
                return Err(DatasetError::invalid_format(format!(
                    "record at offset {offset} declares impossible length {record_len}"
                )));
            }
            if offset + record_len as u64 > size {
                warn!(offset, record_len, size, "truncated record at end of file");
                break;
            }

            let data = self.backend.read_at(offset, record_len)?;
            visit(offset, Record::decode(&data, offset)?)?;

            offset += record_len as u64;
        }

        Ok(())
    }

    /// Flushes appended records.
    ///
    /// # Errors
    ///
    /// Fails if the backend flush fails.
    pub fn flush(&mut self) -> DatasetResult<()> {
        self.backend.flush()?;
        Ok(())
    }

    /// Flushes and syncs appended records to durable storage.
    ///
    /// # Errors
    ///
    /// Fails if the backend sync fails.
    pub fn sync(&mut self) -> DatasetResult<()> {
        self.backend.flush()?;
        self.backend.sync()?;
        Ok(())
    }

    /// Current file size in bytes.
    ///
    /// # Errors
    ///
    /// Fails if the backend size cannot be read.
    pub fn size(&self) -> DatasetResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Whether the underlying backend rejects writes.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.backend.is_read_only()
    }
}

impl std::fmt::Debug for RecordFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordFile")
            .field("layout", &self.layout)
            .field("size", &self.backend.size().ok())
            .finish()
    }
}

/// Appends words as little-endian bytes.
pub fn put_words(buf: &mut Vec<u8>, words: &[RawWord]) {
    buf.reserve(words.len() * WORD_BYTES);
    for word in words {
        buf.put_u64_le(*word);
    }
}

/// Decodes little-endian words.
///
/// # Errors
///
/// Fails if `bytes` is not a whole number of words.
pub fn get_words(mut bytes: &[u8]) -> DatasetResult<Vec<RawWord>> {
    if bytes.len() % WORD_BYTES != 0 {
        return Err(DatasetError::invalid_format(format!(
            "{} bytes is not a whole number of words",
            bytes.len()
        )));
    }
    let mut words = Vec::with_capacity(bytes.len() / WORD_BYTES);
    while bytes.has_remaining() {
        words.push(bytes.get_u64_le());
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use daqstore_storage::InMemoryBackend;

    fn image(file: RecordFile) -> Vec<u8> {
        let size = file.size().unwrap();
        file.read_bytes(0, size as usize).unwrap()
    }

    #[test]
    fn record_roundtrip() {
        let record = Record::new(RecordKind::TableChunk, vec![1, 2, 3]);
        let bytes = record.encode().unwrap();
        assert_eq!(bytes.len(), 12);
        assert_eq!(Record::decode(&bytes, 0).unwrap(), record);
    }

    #[test]
    fn corrupted_record_fails_checksum() {
        let mut bytes = Record::new(RecordKind::CreateGroup, vec![9; 16])
            .encode()
            .unwrap();
        bytes[7] ^= 0xFF;
        assert!(matches!(
            Record::decode(&bytes, 40),
            Err(DatasetError::ChecksumMismatch { offset: 40, .. })
        ));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let mut bytes = Vec::new();
        bytes.put_u32_le(9);
        bytes.put_u8(77);
        let crc = crc32fast::hash(&bytes);
        bytes.put_u32_le(crc);
        assert!(matches!(
            Record::decode(&bytes, 0),
            Err(DatasetError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn create_then_open_reads_layout() {
        let file =
            RecordFile::create(Box::new(InMemoryBackend::new()), LayoutKind::Grouped).unwrap();
        let bytes = image(file);
        assert_eq!(&bytes[..4], b"DQST");

        let reopened = RecordFile::open(Box::new(InMemoryBackend::with_data(bytes))).unwrap();
        assert_eq!(reopened.layout(), LayoutKind::Grouped);
    }

    #[test]
    fn create_discards_old_contents() {
        let backend = InMemoryBackend::with_data(vec![0xAA; 100]);
        let file = RecordFile::create(Box::new(backend), LayoutKind::Ntuple).unwrap();
        assert_eq!(file.size().unwrap(), FILE_HEADER_SIZE as u64);
    }

    #[test]
    fn open_rejects_bad_headers() {
        let bad_magic = InMemoryBackend::with_data(b"HDF5\x01\x00\x01\x00".to_vec());
        assert!(RecordFile::open(Box::new(bad_magic)).is_err());

        let bad_version = InMemoryBackend::with_data(b"DQST\x09\x00\x01\x00".to_vec());
        assert!(RecordFile::open(Box::new(bad_version)).is_err());

        let bad_layout = InMemoryBackend::with_data(b"DQST\x01\x00\x07\x00".to_vec());
        assert!(RecordFile::open(Box::new(bad_layout)).is_err());

        let short = InMemoryBackend::with_data(b"DQ".to_vec());
        assert!(RecordFile::open(Box::new(short)).is_err());
    }

    #[test]
    fn scan_visits_records_and_stops_at_truncated_tail() {
        let mut file =
            RecordFile::create(Box::new(InMemoryBackend::new()), LayoutKind::Ntuple).unwrap();
        let first = file
            .append(&Record::new(RecordKind::TableSchema, vec![1]))
            .unwrap();
        let second = file
            .append(&Record::new(RecordKind::TableChunk, vec![2, 2]))
            .unwrap();
        assert_eq!(first, FILE_HEADER_SIZE as u64);
        assert_eq!(file.read_record(second).unwrap().payload, vec![2, 2]);

        let mut bytes = image(file);
        bytes.truncate(bytes.len() - 3);
        let file = RecordFile::open(Box::new(InMemoryBackend::with_data(bytes))).unwrap();

        let mut seen = Vec::new();
        file.scan(|offset, record| {
            seen.push((offset, record.kind));
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![(first, RecordKind::TableSchema)]);
    }

    #[test]
    fn scan_fails_on_corruption() {
        let mut file =
            RecordFile::create(Box::new(InMemoryBackend::new()), LayoutKind::Ntuple).unwrap();
        file.append(&Record::new(RecordKind::TableSchema, vec![1, 2, 3]))
            .unwrap();
        let mut bytes = image(file);
        let last = bytes.len() - 6;
        bytes[last] ^= 0x01;
        let file = RecordFile::open(Box::new(InMemoryBackend::with_data(bytes))).unwrap();
        assert!(file.scan(|_, _| Ok(())).is_err());
    }

    #[test]
    fn word_helpers() {
        let mut buf = Vec::new();
        put_words(&mut buf, &[1, u64::MAX]);
        assert_eq!(buf.len(), 16);
        assert_eq!(get_words(&buf).unwrap(), vec![1, u64::MAX]);
        assert!(get_words(&buf[..5]).is_err());
    }
}
