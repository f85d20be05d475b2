//! # Arbor Core
//!
//! Transactional core of the Arbor XML database.
//!
//! This crate provides:
//! - Write-ahead journal with checksummed entries and group commit
//! - Transactions that own their locks and notify listeners
//! - A transaction manager with system tasks and shutdown diagnostics
//! - Redo/undo recovery against any [`PageStore`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use arbor_core::{Config, Loggable, PageOp, PageNum, TransactionSystem};
//!
//! let config = Config::new().journal_dir("/var/lib/arbor/journal");
//! let (manager, report) = TransactionSystem::open(&config, &mut pages)?;
//!
//! let mut txn = manager.begin_scoped()?;
//! let op = PageOp::Create { page: PageNum::new(1) };
//! manager.journal_record(&txn, &Loggable::page(txn.id(), op.clone()))?;
//! // apply `op` to the page store
//! txn.commit()?;
//!
//! manager.shutdown()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bootstrap;
mod config;
mod error;
pub mod journal;
mod lock;
mod lsn;
mod page;
mod recovery;
pub mod txn;
mod types;

pub use bootstrap::TransactionSystem;
pub use config::Config;
pub use error::{CoreError, CoreResult};
pub use journal::{Journal, JournalReader, Loggable, RecordKind};
pub use lock::{Lock, LockMode, ResourceLock};
pub use lsn::Lsn;
pub use page::{PageOp, PageStore};
pub use recovery::{RecoveryManager, RecoveryReport};
pub use txn::{
    FnTask, SystemTask, TransactionManager, Txn, TxnCounter, TxnGuard, TxnListener, TxnState,
};
pub use types::{PageNum, SlotId, TxnId};
