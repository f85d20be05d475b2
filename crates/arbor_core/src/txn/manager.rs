//! Transaction manager.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::journal::{Journal, Loggable};
use crate::lsn::Lsn;
use crate::txn::guard::TxnGuard;
use crate::txn::state::Txn;
use crate::txn::system::SystemTask;
use crate::types::TxnId;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::thread::{self, ThreadId};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Per-transaction count of tracked operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxnCounter {
    operations: u64,
}

impl TxnCounter {
    /// Returns the number of tracked operations.
    #[must_use]
    pub fn operations(&self) -> u64 {
        self.operations
    }
}

struct ManagerState {
    next_txn_id: u64,
    transactions: HashMap<TxnId, TxnCounter>,
    shut_down: bool,
    uncommitted_at_shutdown: usize,
    /// Thread currently running system tasks.
    system_thread: Option<ThreadId>,
    pending_tasks: VecDeque<Box<dyn SystemTask>>,
}

impl ManagerState {
    fn allocate_id(&mut self) -> TxnId {
        let id = TxnId::new(self.next_txn_id);
        self.next_txn_id += 1;
        id
    }
}

/// Issues transactions and drives them through the journal.
///
/// The manager owns the journal and the map of registered transactions.
/// Its internal mutex guards only bookkeeping (the id counter, the map and
/// the system-task state) and is never held across journal I/O, lock
/// acquisition or listener callbacks. Callers acquire their own resources
/// first; the manager's mutex always comes last.
///
/// ## Commit Protocol
///
/// 1. Journal `TxnCommit`
/// 2. Flush, unless group commit defers it
/// 3. Mark the transaction committed and notify listeners
/// 4. Release its locks, last acquired first
/// 5. Deregister it and run queued system tasks if nothing else is active
///
/// ## Journal-free Mode
///
/// Without a journal (`transactions_enabled = false`) transactions still
/// move through their states and release their locks, but nothing is
/// written and recovery never runs.
pub struct TransactionManager {
    journal: Option<Journal>,
    group_commit: bool,
    group_commit_max_delay: Option<Duration>,
    state: Mutex<ManagerState>,
    system_done: Condvar,
}

impl TransactionManager {
    /// Creates a manager that journals through `journal`.
    ///
    /// `next_txn_id` must be greater than every id found in the journal;
    /// recovery reports it.
    #[must_use]
    pub fn new(config: &Config, journal: Journal, next_txn_id: u64) -> Self {
        Self::build(config, Some(journal), next_txn_id)
    }

    /// Creates a manager that issues journal-free transactions.
    #[must_use]
    pub fn without_journal(config: &Config) -> Self {
        Self::build(config, None, 1)
    }

    fn build(config: &Config, journal: Option<Journal>, next_txn_id: u64) -> Self {
        Self {
            journal,
            group_commit: config.group_commit,
            group_commit_max_delay: config.group_commit_max_delay,
            state: Mutex::new(ManagerState {
                next_txn_id: next_txn_id.max(1),
                transactions: HashMap::new(),
                shut_down: false,
                uncommitted_at_shutdown: 0,
                system_thread: None,
                pending_tasks: VecDeque::new(),
            }),
            system_done: Condvar::new(),
        }
    }

    /// Begins a new transaction.
    ///
    /// Blocks while another thread is running system tasks.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ShutDown`] after shutdown, or the journal error if
    /// the start record cannot be written. Nothing is registered on failure.
    pub fn begin_transaction(&self) -> CoreResult<Txn> {
        let id = {
            let mut state = self.state.lock();
            let me = thread::current().id();
            while !state.shut_down && state.system_thread.is_some_and(|t| t != me) {
                self.system_done.wait(&mut state);
            }
            if state.shut_down {
                return Err(CoreError::ShutDown);
            }
            // Registered before the start record is written so system tasks
            // cannot begin in between.
            let id = state.allocate_id();
            state.transactions.insert(id, TxnCounter::default());
            id
        };

        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(&Loggable::TxnStart { txn: id }) {
                error!(txn = %id, error = %e, "cannot begin transaction");
                self.deregister(id);
                self.process_system_tasks();
                return Err(e);
            }
        }

        debug!(txn = %id, "transaction started");
        Ok(Txn::new(id, self.journal.is_some()))
    }

    /// Begins a transaction wrapped in a guard that closes it on drop.
    ///
    /// # Errors
    ///
    /// Same as [`TransactionManager::begin_transaction`].
    pub fn begin_scoped(&self) -> CoreResult<TxnGuard<'_>> {
        Ok(TxnGuard::new(self, self.begin_transaction()?))
    }

    /// Commits a transaction. Does nothing unless it is still started.
    ///
    /// # Errors
    ///
    /// Returns the journal error if the commit record cannot be written or
    /// flushed. The transaction is then still started; abort and close it.
    pub fn commit(&self, txn: &mut Txn) -> CoreResult<()> {
        if !txn.is_started() {
            return Ok(());
        }

        if let Some(journal) = self.journal_for(txn) {
            journal.append(&Loggable::TxnCommit { txn: txn.id() })?;
            self.flush_for_commit(journal)?;
        }

        txn.signal_commit();
        txn.release_all();
        self.deregister(txn.id());
        debug!(txn = %txn.id(), "transaction committed");

        self.process_system_tasks();
        Ok(())
    }

    /// Aborts a transaction. Does nothing unless it is still started.
    ///
    /// # Errors
    ///
    /// Returns the journal error if the abort record cannot be written. The
    /// transaction is aborted and its locks released regardless.
    pub fn abort(&self, txn: &mut Txn) -> CoreResult<()> {
        if !txn.is_started() {
            return Ok(());
        }

        let result = match self.journal_for(txn) {
            Some(journal) => journal
                .append(&Loggable::TxnAbort { txn: txn.id() })
                .and_then(|_| self.flush_for_commit(journal)),
            None => Ok(()),
        };
        if let Err(e) = &result {
            error!(txn = %txn.id(), error = %e, "abort record could not be journaled");
        }

        txn.signal_abort();
        txn.release_all();
        self.deregister(txn.id());
        debug!(txn = %txn.id(), "transaction aborted");

        self.process_system_tasks();
        result
    }

    /// Closes a transaction, aborting it first if it is still started.
    ///
    /// Safe to call any number of times.
    ///
    /// # Errors
    ///
    /// Returns the error of the implicit abort. The transaction is closed
    /// regardless.
    pub fn close(&self, txn: &mut Txn) -> CoreResult<()> {
        let result = if txn.is_started() {
            warn!(
                txn = %txn.id(),
                origin = txn.origin().unwrap_or("unknown"),
                "transaction closed while still started, aborting"
            );
            self.abort(txn)
        } else {
            Ok(())
        };

        txn.set_closed();
        self.process_system_tasks();
        result
    }

    /// Journals a storage-engine record on behalf of `txn` and counts it.
    ///
    /// Returns the record's Lsn, or `None` for journal-free transactions.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the transaction is not
    /// started, the record belongs to another transaction or is a boundary or
    /// checkpoint record; otherwise the journal error.
    pub fn journal_record(&self, txn: &Txn, record: &Loggable) -> CoreResult<Option<Lsn>> {
        if !txn.is_started() {
            return Err(CoreError::invalid_operation(format!(
                "{} is {:?}, cannot journal {}",
                txn.id(),
                txn.state(),
                record.dump()
            )));
        }
        if record.txn_id() != txn.id() {
            return Err(CoreError::invalid_operation(format!(
                "record {} does not belong to {}",
                record.dump(),
                txn.id()
            )));
        }
        if record.is_txn_boundary() || matches!(record, Loggable::Checkpoint { .. }) {
            return Err(CoreError::invalid_operation(format!(
                "{} is written by the transaction manager",
                record.dump()
            )));
        }

        let lsn = match self.journal_for(txn) {
            Some(journal) => Some(journal.append(record)?),
            None => None,
        };
        self.track_operation(txn.id());
        Ok(lsn)
    }

    /// Counts one operation for a registered transaction.
    ///
    /// Unknown ids are ignored.
    pub fn track_operation(&self, txn: TxnId) {
        if let Some(counter) = self.state.lock().transactions.get_mut(&txn) {
            counter.operations += 1;
        }
    }

    /// Writes a checkpoint under a freshly allocated id.
    ///
    /// The caller guarantees that no structural operation runs concurrently.
    /// Returns `None` without a journal.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ShutDown`] after shutdown, or the journal error.
    pub fn checkpoint(&self, switch_files: bool) -> CoreResult<Option<Lsn>> {
        let Some(journal) = &self.journal else {
            return Ok(None);
        };
        let id = {
            let mut state = self.state.lock();
            if state.shut_down {
                return Err(CoreError::ShutDown);
            }
            state.allocate_id()
        };
        journal.checkpoint(id, switch_files).map(Some)
    }

    /// Queues a task to run once no transaction is active.
    ///
    /// Runs it immediately on this thread if the manager is already idle.
    pub fn trigger_system_task(&self, task: Box<dyn SystemTask>) {
        {
            let mut state = self.state.lock();
            if state.shut_down {
                warn!(task = task.name(), "ignoring system task after shutdown");
                return;
            }
            debug!(task = task.name(), "system task queued");
            state.pending_tasks.push_back(task);
        }
        self.process_system_tasks();
    }

    /// Shuts down with a final checkpoint.
    ///
    /// # Errors
    ///
    /// Same as [`TransactionManager::shutdown_with`].
    pub fn shutdown(&self) -> CoreResult<usize> {
        self.shutdown_with(true)
    }

    /// Shuts the manager and its journal down.
    ///
    /// Warns about every registered transaction that tracked operations but
    /// never ended, writes a final checkpoint only when `checkpoint_first` is
    /// set and no such transaction exists, and returns their number. Later
    /// calls return the same number without doing anything.
    ///
    /// # Errors
    ///
    /// Returns the journal error if the final write fails.
    pub fn shutdown_with(&self, checkpoint_first: bool) -> CoreResult<usize> {
        let (uncommitted, checkpoint_id, dropped_tasks) = {
            let mut state = self.state.lock();
            if state.shut_down {
                return Ok(state.uncommitted_at_shutdown);
            }
            state.shut_down = true;

            let mut uncommitted: Vec<(TxnId, u64)> = state
                .transactions
                .iter()
                .filter(|(_, counter)| counter.operations > 0)
                .map(|(id, counter)| (*id, counter.operations))
                .collect();
            uncommitted.sort_unstable();
            state.uncommitted_at_shutdown = uncommitted.len();

            let dropped = state.pending_tasks.len();
            state.pending_tasks.clear();
            (uncommitted, state.allocate_id(), dropped)
        };
        self.system_done.notify_all();

        for (id, operations) in &uncommitted {
            warn!(
                txn = %id,
                operations,
                "transaction was not committed at shutdown, recovery will run on next start"
            );
        }
        if dropped_tasks > 0 {
            warn!(count = dropped_tasks, "discarding queued system tasks at shutdown");
        }

        if let Some(journal) = &self.journal {
            journal.shutdown(checkpoint_id, checkpoint_first && uncommitted.is_empty())?;
        }

        info!(uncommitted = uncommitted.len(), "transaction manager shut down");
        Ok(uncommitted.len())
    }

    /// Returns the number of registered transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.state.lock().transactions.len()
    }

    /// Returns the number of registered transactions with tracked operations.
    #[must_use]
    pub fn uncommitted_count(&self) -> usize {
        self.state
            .lock()
            .transactions
            .values()
            .filter(|counter| counter.operations > 0)
            .count()
    }

    /// Returns the counter of a registered transaction.
    #[must_use]
    pub fn counter(&self, txn: TxnId) -> Option<TxnCounter> {
        self.state.lock().transactions.get(&txn).copied()
    }

    /// Returns the journal, or `None` in journal-free mode.
    #[must_use]
    pub fn journal(&self) -> Option<&Journal> {
        self.journal.as_ref()
    }

    /// Returns true after shutdown.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    /// Returns the number of queued system tasks.
    #[must_use]
    pub fn pending_system_tasks(&self) -> usize {
        self.state.lock().pending_tasks.len()
    }

    fn journal_for(&self, txn: &Txn) -> Option<&Journal> {
        if txn.is_journaled() {
            self.journal.as_ref()
        } else {
            None
        }
    }

    fn flush_for_commit(&self, journal: &Journal) -> CoreResult<()> {
        if !self.group_commit {
            return journal.flush(false);
        }
        if let Some(delay) = self.group_commit_max_delay {
            journal.flush_if_overdue(delay)?;
        }
        Ok(())
    }

    fn deregister(&self, txn: TxnId) {
        self.state.lock().transactions.remove(&txn);
    }

    fn process_system_tasks(&self) {
        {
            let mut state = self.state.lock();
            if state.shut_down
                || state.system_thread.is_some()
                || !state.transactions.is_empty()
                || state.pending_tasks.is_empty()
            {
                return;
            }
            state.system_thread = Some(thread::current().id());
        }

        loop {
            let batch: Vec<Box<dyn SystemTask>> =
                self.state.lock().pending_tasks.drain(..).collect();
            if batch.is_empty() {
                break;
            }
            for mut task in batch {
                self.run_system_task(task.as_mut());
            }
        }

        self.state.lock().system_thread = None;
        self.system_done.notify_all();
    }

    fn run_system_task(&self, task: &mut dyn SystemTask) {
        let mut txn = match self.begin_transaction() {
            Ok(txn) => txn,
            Err(e) => {
                warn!(task = task.name(), error = %e, "cannot start system task");
                return;
            }
        };
        txn.set_origin(format!("system task {}", task.name()));
        debug!(task = task.name(), txn = %txn.id(), "running system task");

        match task.run(self, &mut txn) {
            Ok(()) => {
                if let Err(e) = self.commit(&mut txn) {
                    warn!(task = task.name(), error = %e, "system task commit failed");
                }
            }
            Err(e) => warn!(task = task.name(), error = %e, "system task failed"),
        }
        if let Err(e) = self.close(&mut txn) {
            warn!(task = task.name(), error = %e, "system task abort failed");
        }
    }
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("journal", &self.journal)
            .field("group_commit", &self.group_commit)
            .field("group_commit_max_delay", &self.group_commit_max_delay)
            .finish_non_exhaustive()
    }
}
