//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// A data file held entirely in memory.
///
/// Used by unit tests and for scratch files that never touch disk.
///
/// # Example
///
/// ```rust
/// use daqstore_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// assert_eq!(backend.append(b"rows").unwrap(), 0);
/// assert_eq!(backend.size().unwrap(), 4);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend preloaded with `data`, e.g. a file image produced
    /// by an earlier writer.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Returns a copy of the stored bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let start = offset as usize;
        let end = start.saturating_add(len);

        if offset > size || end > data.len() {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[start..end].to_vec())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len();
        match usize::try_from(new_size) {
            Ok(keep) if keep <= size => {
                data.truncate(keep);
                Ok(())
            }
            _ => Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("truncate to {new_size} bytes would grow a {size}-byte file"),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const FILE_HEADER: &[u8] = b"DQST\x01\x00\x01\x00";

    #[test]
    fn starts_empty() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(backend.data().is_empty());
        assert!(!backend.is_read_only());
    }

    #[test]
    fn records_land_after_the_header() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.append(FILE_HEADER).unwrap(), 0);
        let record = [0x0c, 0, 0, 0, 2, 9, 9, 9];
        assert_eq!(backend.append(&record).unwrap(), 8);
        assert_eq!(backend.size().unwrap(), 16);
        assert_eq!(backend.read_at(8, 5).unwrap(), &record[..5]);
    }

    #[test]
    fn reads_beyond_the_image_fail() {
        let backend = InMemoryBackend::with_data(FILE_HEADER.to_vec());
        assert_eq!(backend.read_at(0, 4).unwrap(), b"DQST");
        assert!(matches!(
            backend.read_at(9, 1),
            Err(StorageError::ReadPastEnd { offset: 9, len: 1, size: 8 })
        ));
        assert!(matches!(
            backend.read_at(4, 8),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(backend.read_at(8, 0).unwrap().is_empty());
    }

    #[test]
    fn truncate_only_shrinks() {
        let mut backend = InMemoryBackend::with_data(vec![0xAB; 32]);
        backend.truncate(8).unwrap();
        assert_eq!(backend.data(), vec![0xAB; 8]);
        assert!(matches!(backend.truncate(9), Err(StorageError::Io(_))));

        backend.truncate(0).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
    }

    proptest! {
        #[test]
        fn appended_records_read_back(
            records in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..16)
        ) {
            let mut backend = InMemoryBackend::new();
            let offsets: Vec<u64> = records
                .iter()
                .map(|record| backend.append(record).unwrap())
                .collect();
            for (record, offset) in records.iter().zip(offsets) {
                prop_assert_eq!(&backend.read_at(offset, record.len()).unwrap(), record);
            }
        }
    }
}
