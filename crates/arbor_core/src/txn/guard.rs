use crate::error::CoreResult;
use crate::txn::manager::TransactionManager;
use crate::txn::state::Txn;
use crate::types::TxnId;
use std::ops::{Deref, DerefMut};
use tracing::error;

/// A transaction that is closed when dropped.
///
/// Dropping a guard whose transaction is still started aborts it.
///
/// ```rust,ignore
/// let mut txn = manager.begin_scoped()?;
/// manager.journal_record(&txn, &record)?;
/// txn.commit()?;
/// ```
#[derive(Debug)]
pub struct TxnGuard<'a> {
    manager: &'a TransactionManager,
    txn: Txn,
}

impl<'a> TxnGuard<'a> {
    pub(crate) fn new(manager: &'a TransactionManager, txn: Txn) -> Self {
        Self { manager, txn }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TxnId {
        self.txn.id()
    }

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// See [`TransactionManager::commit`].
    pub fn commit(&mut self) -> CoreResult<()> {
        self.manager.commit(&mut self.txn)
    }

    /// Aborts the transaction.
    ///
    /// # Errors
    ///
    /// See [`TransactionManager::abort`].
    pub fn abort(&mut self) -> CoreResult<()> {
        self.manager.abort(&mut self.txn)
    }
}

impl Deref for TxnGuard<'_> {
    type Target = Txn;

    fn deref(&self) -> &Txn {
        &self.txn
    }
}

impl DerefMut for TxnGuard<'_> {
    fn deref_mut(&mut self) -> &mut Txn {
        &mut self.txn
    }
}

impl Drop for TxnGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.manager.close(&mut self.txn) {
            error!(txn = %self.txn.id(), error = %e, "failed to close transaction");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::txn::state::{TxnListener, TxnState};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Aborts(AtomicUsize);

    impl TxnListener for Aborts {
        fn committed(&self, _txn: TxnId) {}

        fn aborted(&self, _txn: TxnId) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn drop_aborts_open_transaction() {
        let manager = TransactionManager::without_journal(&Config::new());
        let aborts = Arc::new(Aborts::default());
        {
            let mut guard = manager.begin_scoped().unwrap();
            guard.register_listener(aborts.clone());
            assert_eq!(manager.active_count(), 1);
        }
        assert_eq!(aborts.0.load(Ordering::SeqCst), 1);
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn committed_guard_drops_quietly() {
        let manager = TransactionManager::without_journal(&Config::new());
        let aborts = Arc::new(Aborts::default());
        {
            let mut guard = manager.begin_scoped().unwrap();
            guard.register_listener(aborts.clone());
            guard.commit().unwrap();
            assert_eq!(guard.state(), TxnState::Committed);
        }
        assert_eq!(aborts.0.load(Ordering::SeqCst), 0);
    }
}
