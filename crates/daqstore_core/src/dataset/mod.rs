//! Fragment datasets: one interface over interchangeable physical layouts.
//!
//! - [`NtupleDataset`] stores fragments in a flat table of fixed-width rows
//! - [`GroupedDataset`] stores one group per event and one subgroup per type
//!   label
//!
//! [`open_dataset`] picks the backend from the configuration when writing
//! and from the file header when reading.

mod grouped;
mod naming;
mod ntuple;

pub use grouped::GroupedDataset;
pub use naming::{
    next_container_name, next_dataset_name, CONTAINER_GROUP_BASE, DEFAULT_DATASET_BASE,
};
pub use ntuple::{rows_for, NtupleDataset, FRAGMENTS_TABLE, HEADERS_TABLE};

use crate::config::{DatasetConfig, DatasetMode, LayoutKind};
use crate::error::{DatasetError, DatasetResult};
use crate::event::RawEventHeader;
use crate::format::RecordFile;
use crate::fragment::Fragment;
use crate::types::{FragmentType, SequenceId};
use daqstore_storage::{FileBackend, StorageBackend};
use std::collections::BTreeMap;
use tracing::debug;

/// Fragments of one event keyed by type code, in the order read.
pub type EventFragments = BTreeMap<FragmentType, Vec<Fragment>>;

/// Common interface of every layout.
///
/// A dataset is opened for either writing or reading; calls for the other
/// mode fail with [`DatasetError::WrongMode`]. Read cursors advance only
/// once a whole event has been decoded.
pub trait FragmentDataset: Send {
    /// Mode the dataset was opened in.
    fn mode(&self) -> DatasetMode;

    /// Physical layout.
    fn layout(&self) -> LayoutKind;

    /// Writes one fragment.
    ///
    /// # Errors
    ///
    /// Fails in read mode, for malformed containers, or on storage failure.
    fn insert_one(&mut self, fragment: &Fragment) -> DatasetResult<()>;

    /// Writes fragments in order.
    ///
    /// # Errors
    ///
    /// Stops at the first fragment that fails to write.
    fn insert_many(&mut self, fragments: &[Fragment]) -> DatasetResult<()> {
        for fragment in fragments {
            self.insert_one(fragment)?;
        }
        Ok(())
    }

    /// Writes an event header.
    ///
    /// # Errors
    ///
    /// Fails in read mode or on storage failure.
    fn insert_header(&mut self, header: &RawEventHeader) -> DatasetResult<()>;

    /// Reads the next event; an empty map means there is no more data.
    ///
    /// # Errors
    ///
    /// Fails in write mode or if the stored event cannot be decoded.
    fn read_next_event(&mut self) -> DatasetResult<EventFragments>;

    /// Looks up the header of an event. `None` is a normal outcome.
    ///
    /// # Errors
    ///
    /// Fails in write mode or on storage failure.
    fn get_event_header(
        &mut self,
        sequence_id: SequenceId,
    ) -> DatasetResult<Option<RawEventHeader>>;

    /// Lists every stored header in storage order, including headers of
    /// events without fragments. Read cursors are left untouched.
    ///
    /// # Errors
    ///
    /// Fails in write mode or if a stored header cannot be decoded.
    fn event_headers(&mut self) -> DatasetResult<Vec<RawEventHeader>>;

    /// Pushes buffered data to storage.
    ///
    /// # Errors
    ///
    /// Fails on storage failure.
    fn flush(&mut self) -> DatasetResult<()>;
}

/// Opens the dataset described by `config` on the local file system.
///
/// Write mode creates (or truncates) the file; read mode opens it
/// read-only.
///
/// # Errors
///
/// Fails for invalid configuration, unreadable files or unknown formats.
pub fn open_dataset(config: &DatasetConfig) -> DatasetResult<Box<dyn FragmentDataset>> {
    config.validate()?;
    let backend: Box<dyn StorageBackend> = match config.mode {
        DatasetMode::Write => Box::new(FileBackend::create_with_dirs(&config.file_name)?),
        DatasetMode::Read => Box::new(FileBackend::open_read_only(&config.file_name)?),
    };
    open_dataset_with_backend(config, backend)
}

/// Opens a dataset over an already opened backend.
///
/// # Errors
///
/// Fails for invalid configuration or unknown formats.
pub fn open_dataset_with_backend(
    config: &DatasetConfig,
    backend: Box<dyn StorageBackend>,
) -> DatasetResult<Box<dyn FragmentDataset>> {
    config.validate()?;
    match config.mode {
        DatasetMode::Write => {
            let file = RecordFile::create(backend, config.layout)?;
            debug!(
                file = %config.file_name.display(),
                layout = %config.layout,
                "opened dataset for writing"
            );
            match config.layout {
                LayoutKind::Ntuple => Ok(Box::new(NtupleDataset::create(file, config)?)),
                LayoutKind::Grouped => Ok(Box::new(GroupedDataset::create(file, config))),
            }
        }
        DatasetMode::Read => {
            let file = RecordFile::open(backend)?;
            let layout = file.layout();
            debug!(file = %config.file_name.display(), %layout, "opened dataset for reading");
            match layout {
                LayoutKind::Ntuple => Ok(Box::new(NtupleDataset::open(file)?)),
                LayoutKind::Grouped => Ok(Box::new(GroupedDataset::open(file, config)?)),
            }
        }
    }
}

pub(crate) fn wrong_mode(operation: &'static str, mode: DatasetMode) -> DatasetError {
    DatasetError::WrongMode {
        operation,
        mode: mode.as_str(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FragmentId;
    use tempfile::tempdir;

    #[test]
    fn layout_is_detected_when_reading() {
        let dir = tempdir().unwrap();
        for layout in [LayoutKind::Ntuple, LayoutKind::Grouped] {
            let path = dir.path().join(format!("{layout}.dqst"));
            let config = DatasetConfig::new(&path).layout(layout).words_per_row(8);
            {
                let mut ds = open_dataset(&config).unwrap();
                assert_eq!(ds.mode(), DatasetMode::Write);
                ds.insert_one(&Fragment::new(
                    FragmentType::DATA,
                    SequenceId::new(1),
                    FragmentId::new(0),
                    vec![1, 2, 3],
                ))
                .unwrap();
            }

            let read_config = DatasetConfig::new(&path).mode(DatasetMode::Read);
            let mut ds = open_dataset(&read_config).unwrap();
            assert_eq!(ds.layout(), layout);
            let event = ds.read_next_event().unwrap();
            assert_eq!(event[&FragmentType::DATA][0].payload(), &[1, 2, 3]);
        }
    }

    #[test]
    fn wrong_mode_calls_fail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("modes.dqst");
        let mut writer = open_dataset(&DatasetConfig::new(&path)).unwrap();
        assert!(matches!(
            writer.read_next_event(),
            Err(DatasetError::WrongMode { mode: "write", .. })
        ));
        assert!(writer.get_event_header(SequenceId::new(1)).is_err());
        drop(writer);

        let mut reader = open_dataset(&DatasetConfig::new(&path).mode_str("read")).unwrap();
        let header = RawEventHeader::new(1, 1, 1, SequenceId::new(1));
        assert!(matches!(
            reader.insert_header(&header),
            Err(DatasetError::WrongMode { mode: "read", .. })
        ));
    }

    #[test]
    fn reading_a_missing_file_fails() {
        let dir = tempdir().unwrap();
        let config = DatasetConfig::new(dir.path().join("absent.dqst")).mode(DatasetMode::Read);
        assert!(matches!(open_dataset(&config), Err(DatasetError::Storage(_))));
    }

    #[test]
    fn invalid_config_is_rejected_before_touching_storage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("never.dqst");
        let config = DatasetConfig::new(&path).words_per_row(0);
        assert!(matches!(
            open_dataset(&config),
            Err(DatasetError::InvalidConfig { .. })
        ));
        assert!(!path.exists());
    }

    #[test]
    fn writer_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run").join("0001").join("data.dqst");
        drop(open_dataset(&DatasetConfig::new(&path)).unwrap());
        assert!(path.exists());
    }
}
