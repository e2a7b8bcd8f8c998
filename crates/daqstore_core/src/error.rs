//! Error types for daqstore core.

use std::io;
use thiserror::Error;

/// Result type for dataset operations.
pub type DatasetResult<T> = Result<T, DatasetError>;

/// Errors that can occur while writing or reading fragment datasets.
///
/// Unknown fragment types and missing event headers are not errors: the
/// former fall back to the unidentified label, the latter are `None`.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] daqstore_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The data file is not a daqstore file or is damaged.
    #[error("invalid data file format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Checksum mismatch on a record.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// File offset of the record.
        offset: u64,
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// A fragment header or word stream is inconsistent.
    #[error("malformed fragment: {message}")]
    MalformedFragment {
        /// Description of the problem.
        message: String,
    },

    /// Container metadata disagrees with the nested fragments.
    #[error("malformed container: {message}")]
    MalformedContainer {
        /// Description of the problem.
        message: String,
    },

    /// A row of the flat table cannot continue the fragment being rebuilt.
    #[error("malformed row {row}: {message}")]
    MalformedRow {
        /// Row index in the fragments table.
        row: u64,
        /// Description of the problem.
        message: String,
    },

    /// A value does not fit the column it is written to.
    #[error("value {value} does not fit column {column}")]
    ValueOutOfRange {
        /// Column name.
        column: String,
        /// Rejected value.
        value: u64,
    },

    /// A write call on a reader or a read call on a writer.
    #[error("{operation} is not allowed on a dataset opened for {mode}")]
    WrongMode {
        /// The rejected operation.
        operation: &'static str,
        /// The dataset's mode.
        mode: &'static str,
    },

    /// Configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// Group tree metadata could not be encoded or decoded.
    #[error("metadata codec error: {message}")]
    Metadata {
        /// Description of the problem.
        message: String,
    },
}

impl DatasetError {
    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates a malformed fragment error.
    pub fn malformed_fragment(message: impl Into<String>) -> Self {
        Self::MalformedFragment {
            message: message.into(),
        }
    }

    /// Creates a malformed container error.
    pub fn malformed_container(message: impl Into<String>) -> Self {
        Self::MalformedContainer {
            message: message.into(),
        }
    }

    /// Creates a malformed row error.
    pub fn malformed_row(row: u64, message: impl Into<String>) -> Self {
        Self::MalformedRow {
            row,
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates a metadata codec error.
    pub fn metadata(message: impl Into<String>) -> Self {
        Self::Metadata {
            message: message.into(),
        }
    }
}
