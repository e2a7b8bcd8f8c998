//! # daqstore Core
//!
//! Fragment dataset codecs and event reconstruction for daqstore.
//!
//! This crate provides:
//! - The fragment model, including container fragments
//! - Type code to label resolution
//! - Two interchangeable on-disk layouts behind [`FragmentDataset`]:
//!   a flat row-chunked table and a group-per-event tree
//! - [`EventSource`] for reading a file back event by event
//!
//! ## Example
//!
//! ```rust
//! use daqstore_core::{
//!     open_dataset_with_backend, DatasetConfig, Fragment, FragmentId, FragmentType, SequenceId,
//! };
//! use daqstore_storage::InMemoryBackend;
//!
//! let config = DatasetConfig::new("example.dqst").words_per_row(4);
//! let mut dataset =
//!     open_dataset_with_backend(&config, Box::new(InMemoryBackend::new())).unwrap();
//! let fragment = Fragment::new(
//!     FragmentType::DATA,
//!     SequenceId::new(1),
//!     FragmentId::new(0),
//!     (1..=10).collect(),
//! );
//! dataset.insert_one(&fragment).unwrap();
//! dataset.flush().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod dataset;
mod error;
mod event;
pub mod format;
pub mod fragment;
pub mod names;
mod source;
mod types;

pub use config::{DatasetConfig, DatasetMode, LayoutKind, DEFAULT_CHUNK_ROWS, DEFAULT_WORDS_PER_ROW};
pub use dataset::{
    open_dataset, open_dataset_with_backend, EventFragments, FragmentDataset, GroupedDataset,
    NtupleDataset,
};
pub use error::{DatasetError, DatasetResult};
pub use event::{RawEventHeader, INVALID_TIMESTAMP};
pub use fragment::{
    ContainerFragment, ContainerFragmentLoader, ContainerMetadata, Fragment, FragmentHeader,
};
pub use names::{
    make_resolver, NameResolution, ResolverPlugin, TypeNameResolver, TypeNameTable,
    DEFAULT_UNIDENTIFIED_LABEL,
};
pub use source::{EventKind, EventSource, RawEvent, SourceStats};
pub use types::{FragmentId, FragmentKind, FragmentType, RawWord, SequenceId, WORD_BYTES};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
