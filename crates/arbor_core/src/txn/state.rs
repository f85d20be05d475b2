//! Transaction state.

use crate::error::{CoreError, CoreResult};
use crate::lock::{Lock, LockMode};
use crate::types::TxnId;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// State of a transaction.
///
/// Transitions only move forward: `Started` to `Committed` or `Aborted`, and
/// any state to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Transaction is running and can acquire locks.
    Started,
    /// Transaction has committed.
    Committed,
    /// Transaction has aborted.
    Aborted,
    /// Transaction is finished.
    Closed,
}

/// Callback notified when a transaction ends.
///
/// Listeners run synchronously on the thread that commits or aborts, after
/// the manager's internal lock has been released. They must not block and
/// must not call back into the transaction manager.
pub trait TxnListener: Send + Sync {
    /// Called once after the transaction committed.
    fn committed(&self, txn: TxnId);

    /// Called once after the transaction aborted.
    fn aborted(&self, txn: TxnId);
}

/// A single transaction.
///
/// Created by the [`TransactionManager`](crate::TransactionManager) and owned
/// by the caller.
/// Locks taken through [`Txn::acquire_lock`] are released, last acquired
/// first, when the transaction commits or aborts.
pub struct Txn {
    id: TxnId,
    state: TxnState,
    locks_held: Vec<(Arc<dyn Lock>, LockMode)>,
    listeners: Vec<Arc<dyn TxnListener>>,
    origin: Option<String>,
    journaled: bool,
}

impl Txn {
    pub(crate) fn new(id: TxnId, journaled: bool) -> Self {
        Self {
            id,
            state: TxnState::Started,
            locks_held: Vec::new(),
            listeners: Vec::new(),
            origin: None,
            journaled,
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TxnState {
        self.state
    }

    /// Checks if the transaction is still running.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.state == TxnState::Started
    }

    /// Returns false for transactions issued without a journal.
    #[must_use]
    pub fn is_journaled(&self) -> bool {
        self.journaled
    }

    /// Returns the diagnostic label, if set.
    #[must_use]
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// Sets a diagnostic label naming who started the transaction.
    pub fn set_origin(&mut self, origin: impl Into<String>) {
        self.origin = Some(origin.into());
    }

    /// Returns the number of locks currently held.
    #[must_use]
    pub fn lock_count(&self) -> usize {
        self.locks_held.len()
    }

    /// Returns the names and modes of held locks in acquisition order.
    #[must_use]
    pub fn held_locks(&self) -> Vec<(String, LockMode)> {
        self.locks_held
            .iter()
            .map(|(lock, mode)| (lock.name().to_string(), *mode))
            .collect()
    }

    /// Acquires `lock` in `mode` and records it on success.
    ///
    /// # Errors
    ///
    /// Returns the lock's error unchanged, with nothing recorded, or
    /// [`CoreError::InvalidOperation`] if the transaction is no longer
    /// running.
    pub fn acquire_lock(&mut self, lock: Arc<dyn Lock>, mode: LockMode) -> CoreResult<()> {
        self.ensure_started("acquire a lock")?;
        lock.acquire(mode)?;
        self.locks_held.push((lock, mode));
        Ok(())
    }

    /// Records a lock the caller already acquired.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the transaction is no longer
    /// running.
    pub fn register_lock(&mut self, lock: Arc<dyn Lock>, mode: LockMode) -> CoreResult<()> {
        self.ensure_started("register a lock")?;
        self.locks_held.push((lock, mode));
        Ok(())
    }

    /// Adds a listener; listeners fire in registration order.
    pub fn register_listener(&mut self, listener: Arc<dyn TxnListener>) {
        self.listeners.push(listener);
    }

    fn ensure_started(&self, action: &str) -> CoreResult<()> {
        if self.is_started() {
            Ok(())
        } else {
            Err(CoreError::invalid_operation(format!(
                "cannot {action} on {} in state {:?}",
                self.id, self.state
            )))
        }
    }

    pub(crate) fn signal_commit(&mut self) {
        if !self.is_started() {
            return;
        }
        self.state = TxnState::Committed;
        for listener in &self.listeners {
            listener.committed(self.id);
        }
    }

    pub(crate) fn signal_abort(&mut self) {
        if !self.is_started() {
            return;
        }
        self.state = TxnState::Aborted;
        for listener in &self.listeners {
            listener.aborted(self.id);
        }
    }

    /// Releases every held lock, last acquired first.
    pub(crate) fn release_all(&mut self) {
        while let Some((lock, mode)) = self.locks_held.pop() {
            debug!(txn = %self.id, lock = lock.name(), %mode, "releasing lock");
            lock.release(mode);
        }
    }

    pub(crate) fn set_closed(&mut self) {
        self.state = TxnState::Closed;
    }
}

impl fmt::Debug for Txn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Txn")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("locks_held", &self.locks_held.len())
            .field("listeners", &self.listeners.len())
            .field("origin", &self.origin)
            .finish()
    }
}
