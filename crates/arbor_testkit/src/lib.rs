//! # Arbor Testkit
//!
//! Test utilities for the Arbor transactional core.
//!
//! This crate provides:
//! - Fixtures that play the storage engine over a temporary journal
//! - An in-memory page store that loses unflushed pages on crash
//! - A backend factory that injects write, sync and create failures
//! - Recording locks and listeners
//! - Property-based workload generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use arbor_testkit::prelude::*;
//!
//! #[test]
//! fn committed_survives_crash() {
//!     let mut system = TestSystem::new();
//!     let mut txn = system.manager().begin_transaction().unwrap();
//!     // ... write, commit
//!     system.crash();
//!     system.reopen().unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod page_store;
pub mod probes;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::page_store::*;
    pub use crate::probes::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use page_store::*;
pub use probes::*;
