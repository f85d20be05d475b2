//! Test fixtures and engine helpers.
//!
//! [`TestSystem`] owns a temporary journal directory and a
//! [`MemoryPageStore`], and plays the storage engine: it journals each page
//! operation through the manager and applies it to the store, rolling back
//! in reverse order on abort.

use crate::generators::{PlanOutcome, SlotWrite, TxnPlan, Workload};
use crate::page_store::{MemoryPageStore, Snapshot};
use arbor_core::{
    Config, CoreResult, Loggable, Lsn, PageOp, RecoveryReport, TransactionManager,
    TransactionSystem, Txn, TxnId,
};
use arbor_storage::{BackendFactory, FileBackendFactory};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Once};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

static LOGGING: Once = Once::new();

/// Installs a `tracing` subscriber for tests, honoring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs it.
pub fn init_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Returns a fresh temporary directory and a config journaling into it.
pub fn temp_config() -> (TempDir, Config) {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let config = Config::new().journal_dir(dir.path().join("journal"));
    (dir, config)
}

/// A transaction system over a temporary directory and an in-memory store.
pub struct TestSystem {
    /// The running manager; `None` after a crash or shutdown.
    pub manager: Option<TransactionManager>,
    /// The page store.
    pub store: MemoryPageStore,
    /// Report of the last recovery.
    pub report: RecoveryReport,
    config: Config,
    factory: Arc<dyn BackendFactory>,
    _temp_dir: TempDir,
}

impl TestSystem {
    /// Opens a system with the default configuration.
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Opens a system with a configuration adjusted by `configure`.
    pub fn with_config(configure: impl FnOnce(Config) -> Config) -> Self {
        Self::with_factory(configure, Arc::new(FileBackendFactory))
    }

    /// Opens a system whose journal files come from `factory`.
    pub fn with_factory(
        configure: impl FnOnce(Config) -> Config,
        factory: Arc<dyn BackendFactory>,
    ) -> Self {
        init_logging();
        let (dir, config) = temp_config();
        let config = configure(config);
        let mut system = Self {
            manager: None,
            store: MemoryPageStore::new(),
            report: RecoveryReport::default(),
            config,
            factory,
            _temp_dir: dir,
        };
        system.reopen().expect("Failed to open transaction system");
        system
    }

    /// Returns the running manager.
    ///
    /// # Panics
    ///
    /// Panics if the system is crashed or shut down.
    pub fn manager(&self) -> &TransactionManager {
        self.manager.as_ref().expect("Transaction system is not running")
    }

    /// Returns the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Changes the configuration used by the next [`TestSystem::reopen`].
    pub fn reconfigure(&mut self, configure: impl FnOnce(Config) -> Config) {
        self.config = configure(self.config.clone());
    }

    /// Returns the journal directory.
    pub fn journal_dir(&self) -> &Path {
        &self.config.journal_dir
    }

    /// Kills the process: the manager is dropped without shutdown and the
    /// store loses every unflushed page.
    pub fn crash(&mut self) {
        self.manager = None;
        self.store.crash();
    }

    /// Shuts down cleanly and returns the uncommitted count.
    pub fn shutdown(&mut self) -> CoreResult<usize> {
        let count = match self.manager.take() {
            Some(manager) => manager.shutdown()?,
            None => 0,
        };
        self.store.flush_pages();
        Ok(count)
    }

    /// Opens the system again, running recovery.
    pub fn reopen(&mut self) -> CoreResult<&RecoveryReport> {
        self.manager = None;
        let (manager, report) = TransactionSystem::open_with_factory(
            &self.config,
            Arc::clone(&self.factory),
            &mut self.store,
        )?;
        self.manager = Some(manager);
        self.report = report;
        Ok(&self.report)
    }

    /// Journals `op` for `txn` and applies it to the store.
    pub fn apply(&mut self, txn: &Txn, op: &PageOp) -> CoreResult<Lsn> {
        let lsn = self
            .manager()
            .journal_record(txn, &Loggable::page(txn.id(), op.clone()))?
            .unwrap_or(Lsn::ZERO);
        self.store.apply(op, lsn)?;
        Ok(lsn)
    }

    /// Performs slot writes inside `txn` and returns what was applied.
    pub fn write(&mut self, txn: &Txn, writes: &[SlotWrite]) -> CoreResult<Vec<(PageOp, Lsn)>> {
        let mut applied = Vec::new();
        for write in writes {
            let ops = self
                .store
                .ops_for_write(write.page, write.slot, write.value.as_deref());
            for op in ops {
                let lsn = self.apply(txn, &op)?;
                applied.push((op, lsn));
            }
        }
        Ok(applied)
    }

    /// Undoes applied operations in reverse order and aborts `txn`.
    pub fn rollback(&mut self, txn: &mut Txn, applied: &[(PageOp, Lsn)]) -> CoreResult<()> {
        for (op, lsn) in applied.iter().rev() {
            self.store.rollback(op, *lsn)?;
        }
        self.manager().abort(txn)
    }

    /// Runs a planned transaction to its end.
    pub fn run_plan(&mut self, plan: &TxnPlan) -> CoreResult<TxnId> {
        let mut txn = self.manager().begin_transaction()?;
        let applied = self.write(&txn, &plan.writes)?;
        match plan.outcome {
            PlanOutcome::Commit => self.manager().commit(&mut txn)?,
            PlanOutcome::Abort => self.rollback(&mut txn, &applied)?,
        }
        self.manager().close(&mut txn)?;
        if plan.flush_pages_after {
            self.flush_pages()?;
        }
        Ok(txn.id())
    }

    /// Runs a workload up to the crash point, leaving its last transaction
    /// running, and returns it.
    pub fn run_workload(&mut self, workload: &Workload) -> CoreResult<Txn> {
        for plan in &workload.txns {
            self.run_plan(plan)?;
        }
        let txn = self.manager().begin_transaction()?;
        self.write(&txn, &workload.in_flight)?;
        if workload.flush_in_flight {
            self.flush_pages()?;
        }
        Ok(txn)
    }

    /// Writes dirty pages back, forcing the journal first.
    pub fn flush_pages(&mut self) -> CoreResult<()> {
        if let Some(journal) = self.manager().journal() {
            journal.flush(true)?;
        }
        self.store.flush_pages();
        Ok(())
    }
}

impl Default for TestSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes the store contents after only the committed transactions of
/// `workload` ran.
pub fn expected_after_crash(workload: &Workload) -> Snapshot {
    let mut expected: Snapshot = BTreeMap::new();
    for plan in workload
        .txns
        .iter()
        .filter(|plan| plan.outcome == PlanOutcome::Commit)
    {
        for write in &plan.writes {
            match &write.value {
                Some(value) => {
                    expected
                        .entry(write.page)
                        .or_default()
                        .insert(write.slot, value.clone());
                }
                None => {
                    if let Some(slots) = expected.get_mut(&write.page) {
                        slots.remove(&write.slot);
                    }
                }
            }
        }
    }
    expected
}
