//! # Arbor Storage
//!
//! Byte-store backends for the Arbor journal.
//!
//! Backends are **opaque byte stores**: they append, read back and sync
//! bytes, and know nothing about journal entries, LSNs or checksums. The
//! journal in `arbor_core` owns every format decision.
//!
//! ## Design Principles
//!
//! - Backends are simple append-only byte stores (read, append, flush, sync)
//! - Files are opened through a [`BackendFactory`] so the journal can be
//!   pointed at instrumented backends in tests
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Example
//!
//! ```no_run
//! use arbor_storage::{BackendFactory, FileBackendFactory, StorageBackend};
//! use std::path::Path;
//!
//! let factory = FileBackendFactory;
//! let mut file = factory.create(Path::new("0000000001.log")).unwrap();
//! let offset = file.append(b"entry").unwrap();
//! file.sync().unwrap();
//! assert_eq!(offset, 0);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod factory;
mod file;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use factory::{BackendFactory, FileBackendFactory};
pub use file::FileBackend;
