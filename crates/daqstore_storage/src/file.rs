//! File-based storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A data file on the local file system.
///
/// Three ways to open one:
///
/// - [`FileBackend::open`] keeps existing contents and allows appends
/// - [`FileBackend::create`] creates the file or empties an existing one,
///   which is what a dataset opened for writing wants
/// - [`FileBackend::open_read_only`] rejects every mutation with
///   [`StorageError::ReadOnly`]
///
/// # Example
///
/// ```no_run
/// use daqstore_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::create(Path::new("run0001.dqst")).unwrap();
/// backend.append(b"DQST").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
    read_only: bool,
}

impl FileBackend {
    /// Opens or creates a file, keeping its contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Self::from_file(path, file, false)
    }

    /// Creates a file, truncating it if it already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Self::from_file(path, file, false)
    }

    /// Opens an existing file for reading only.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be opened.
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        Self::from_file(path, file, true)
    }

    /// Creates a file like [`FileBackend::create`], creating parent
    /// directories first.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot
    /// be created.
    pub fn create_with_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::create(path)
    }

    fn from_file(path: &Path, file: File, read_only: bool) -> StorageResult<Self> {
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
            read_only,
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_writable(&self) -> StorageResult<()> {
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.ensure_writable()?;
        if data.is_empty() {
            return Ok(*self.size.read());
        }

        let mut file = self.file.write();
        let mut size = self.size.write();

        let offset = *size;
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        *size += data.len() as u64;

        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.read_only {
            return Ok(());
        }
        self.file.write().flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.read_only {
            return Ok(());
        }
        self.file.write().sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.ensure_writable()?;
        let file = self.file.write();
        let mut size = self.size.write();

        if new_size > *size {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("truncate to {new_size} bytes would grow a {}-byte file", *size),
            )));
        }

        file.set_len(new_size)?;
        *size = new_size;

        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_new_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.dqst");

        let backend = FileBackend::create(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
        assert_eq!(backend.path(), path);
    }

    #[test]
    fn append_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.dqst");

        let mut backend = FileBackend::create(&path).unwrap();
        assert_eq!(backend.append(b"DQST\x01\x00\x02\x00").unwrap(), 0);
        assert_eq!(backend.append(b"chunk").unwrap(), 8);
        assert_eq!(backend.size().unwrap(), 13);

        assert_eq!(backend.read_at(0, 4).unwrap(), b"DQST");
        assert_eq!(backend.read_at(8, 5).unwrap(), b"chunk");
        assert!(backend.read_at(13, 0).unwrap().is_empty());
    }

    #[test]
    fn read_past_end_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.dqst");

        let mut backend = FileBackend::create(&path).unwrap();
        backend.append(b"DQST").unwrap();

        let result = backend.read_at(2, 8);
        assert!(matches!(
            result,
            Err(StorageError::ReadPastEnd { offset: 2, len: 8, size: 4 })
        ));
    }

    #[test]
    fn create_truncates_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.dqst");

        {
            let mut backend = FileBackend::create(&path).unwrap();
            backend.append(b"old contents").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::create(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
    }

    #[test]
    fn open_keeps_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.dqst");

        {
            let mut backend = FileBackend::create(&path).unwrap();
            backend.append(b"persistent").unwrap();
            backend.sync().unwrap();
        }

        let mut backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 10);
        assert_eq!(backend.append(b"!").unwrap(), 10);
    }

    #[test]
    fn read_only_rejects_mutation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.dqst");

        {
            let mut backend = FileBackend::create(&path).unwrap();
            backend.append(b"events").unwrap();
            backend.flush().unwrap();
        }

        let mut backend = FileBackend::open_read_only(&path).unwrap();
        assert!(backend.is_read_only());
        assert_eq!(backend.read_at(0, 6).unwrap(), b"events");
        assert!(matches!(backend.append(b"x"), Err(StorageError::ReadOnly)));
        assert!(matches!(backend.truncate(0), Err(StorageError::ReadOnly)));
        assert!(backend.flush().is_ok());
    }

    #[test]
    fn read_only_missing_file_fails() {
        let dir = tempdir().unwrap();
        let result = FileBackend::open_read_only(&dir.path().join("absent.dqst"));
        assert!(matches!(result, Err(StorageError::Io(_))));
    }

    #[test]
    fn create_with_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("runs").join("0001").join("run.dqst");

        let backend = FileBackend::create_with_dirs(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn truncate_to_prefix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.dqst");

        let mut backend = FileBackend::create(&path).unwrap();
        backend.append(b"DQST\x01\x00\x01\x00").unwrap();
        backend.append(&[0xFF; 6]).unwrap();
        backend.truncate(8).unwrap();
        assert_eq!(backend.size().unwrap(), 8);
        assert_eq!(backend.read_at(0, 4).unwrap(), b"DQST");
        assert!(backend.truncate(9).is_err());
    }
}
