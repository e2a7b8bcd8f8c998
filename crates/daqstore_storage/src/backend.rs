//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level byte store holding one daqstore data file.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `flush` pushes appended data to the operating system
/// - `size` is the offset the next `append` writes to
///
/// A data file is held by exactly one reader or one writer at a time;
/// backends do no cross-process locking.
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range extends past
    /// the end of the store, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the store and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or if the backend is read-only.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Flushes pending writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the store in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates the store to `new_size` bytes.
    ///
    /// Writers use `truncate(0)` to start a fresh file.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is larger than the current size, the
    /// backend is read-only, or the truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Returns `true` if every mutating call will fail.
    fn is_read_only(&self) -> bool {
        false
    }
}
