//! # daqstore storage
//!
//! Byte-store backends for daqstore data files.
//!
//! A backend is an **append-mostly byte store**. It knows nothing about
//! fragments, tables or group trees; `daqstore_core` owns every byte of
//! the file format and only asks the backend to read ranges and append.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and scratch files
//! - [`FileBackend`] - OS file, opened read-write, truncated for writing,
//!   or read-only
//!
//! ## Example
//!
//! ```rust
//! use daqstore_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"DQST").unwrap();
//! assert_eq!(backend.read_at(offset, 4).unwrap(), b"DQST");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
