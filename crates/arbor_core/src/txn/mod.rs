//! Transactions.
//!
//! A [`Txn`] is issued by the [`TransactionManager`], collects the locks its
//! caller acquires and ends by commit or abort. Only the start and end of a
//! transaction are journaled by the manager; the storage engine journals its
//! own page operations through [`TransactionManager::journal_record`].
//!
//! ## Lifecycle
//!
//! ```text
//! Started ──commit──▶ Committed ──close──▶ Closed
//!    │                                       ▲
//!    └────abort────▶ Aborted ────close───────┘
//! ```
//!
//! Closing a started transaction aborts it first. [`TxnGuard`] closes on
//! drop.

mod guard;
mod manager;
mod state;
mod system;

pub use guard::TxnGuard;
pub use manager::{TransactionManager, TxnCounter};
pub use state::{Txn, TxnListener, TxnState};
pub use system::{FnTask, SystemTask};
