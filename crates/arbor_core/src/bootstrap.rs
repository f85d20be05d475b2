//! Startup wiring.

use crate::config::Config;
use crate::error::CoreResult;
use crate::journal::Journal;
use crate::page::PageStore;
use crate::recovery::{RecoveryManager, RecoveryReport};
use crate::txn::TransactionManager;
use arbor_storage::{BackendFactory, FileBackendFactory};
use std::sync::Arc;
use tracing::info;

/// Builds a ready [`TransactionManager`] from a [`Config`].
///
/// ```rust,ignore
/// let (manager, report) = TransactionSystem::open(&config, &mut pages)?;
/// if report.performed {
///     // pages were repaired from the journal
/// }
/// ```
#[derive(Debug)]
pub struct TransactionSystem;

impl TransactionSystem {
    /// Opens the journal, recovers `store` and returns the manager.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the journal
    /// directory is unusable or recovery fails.
    pub fn open(
        config: &Config,
        store: &mut dyn PageStore,
    ) -> CoreResult<(TransactionManager, RecoveryReport)> {
        Self::open_with_factory(config, Arc::new(FileBackendFactory), store)
    }

    /// Same as [`TransactionSystem::open`], opening journal files through
    /// `factory`.
    ///
    /// # Errors
    ///
    /// See [`TransactionSystem::open`].
    pub fn open_with_factory(
        config: &Config,
        factory: Arc<dyn BackendFactory>,
        store: &mut dyn PageStore,
    ) -> CoreResult<(TransactionManager, RecoveryReport)> {
        config.validate()?;

        if !config.transactions_enabled {
            info!("transactions disabled, running without a journal");
            let report = RecoveryReport {
                next_txn_id: 1,
                ..RecoveryReport::default()
            };
            return Ok((TransactionManager::without_journal(config), report));
        }

        let journal = Journal::open(config, factory)?;
        let report = RecoveryManager::new(&journal, config.force_restart).run(store)?;
        let manager = TransactionManager::new(config, journal, report.next_txn_id);
        Ok((manager, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::Loggable;
    use crate::page::tests::TestStore;
    use crate::page::PageOp;
    use crate::types::PageNum;
    use tempfile::tempdir;

    #[test]
    fn open_then_reopen() {
        let dir = tempdir().unwrap();
        let config = Config::new().journal_dir(dir.path());
        let mut pages = TestStore::default();

        let (manager, report) = TransactionSystem::open(&config, &mut pages).unwrap();
        assert!(!report.performed);

        let mut txn = manager.begin_transaction().unwrap();
        let op = PageOp::Create { page: PageNum::new(9) };
        manager
            .journal_record(&txn, &Loggable::page(txn.id(), op))
            .unwrap();
        manager.commit(&mut txn).unwrap();
        let last = txn.id();
        drop(manager);

        let (manager, report) = TransactionSystem::open(&config, &mut pages).unwrap();
        assert!(report.performed);
        assert_eq!(report.redone, 1);
        assert!(pages.page_exists(PageNum::new(9)));

        let txn = manager.begin_transaction().unwrap();
        assert!(txn.id() > last);
        assert_eq!(manager.shutdown().unwrap(), 0);
    }

    #[test]
    fn disabled_transactions_skip_the_journal() {
        let dir = tempdir().unwrap();
        let config = Config::new()
            .journal_dir(dir.path().join("unused"))
            .transactions_enabled(false);
        let mut pages = TestStore::default();

        let (manager, report) = TransactionSystem::open(&config, &mut pages).unwrap();
        assert!(manager.journal().is_none());
        assert!(!report.performed);
        assert!(!dir.path().join("unused").exists());
    }

    #[test]
    fn second_open_on_locked_directory_fails() {
        let dir = tempdir().unwrap();
        let config = Config::new().journal_dir(dir.path());
        let mut pages = TestStore::default();

        let (_manager, _) = TransactionSystem::open(&config, &mut pages).unwrap();
        assert!(TransactionSystem::open(&config, &mut pages).is_err());
    }
}
