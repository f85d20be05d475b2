//! Crash recovery.
//!
//! Recovery replays the newest journal file against a [`PageStore`]:
//!
//! 1. **Analysis**: read every entry, find the last checkpoint and decide the
//!    outcome of each transaction that follows it.
//! 2. **Redo**: reapply page operations of committed transactions, oldest
//!    first.
//! 3. **Undo**: reverse page operations of aborted and unfinished
//!    transactions, newest first, unless a later committed operation touched
//!    the same slot or page.
//!
//! Afterwards the store is synced, a fresh journal file is started and, if
//! anything had to be replayed, a checkpoint marks the journal clean.

use crate::error::{CoreError, CoreResult};
use crate::journal::{Journal, Loggable};
use crate::lsn::Lsn;
use crate::page::{PageOp, PageStore};
use crate::types::{PageNum, SlotId, TxnId};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Outcome of a recovery run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Whether the journal needed replaying.
    pub performed: bool,
    /// Page operations reapplied.
    pub redone: usize,
    /// Page operations reversed.
    pub undone: usize,
    /// Entries that could not be read or applied under force-restart.
    pub skipped: usize,
    /// Transactions found committed after the last checkpoint.
    pub committed: usize,
    /// Transactions found aborted or unfinished after the last checkpoint.
    pub rolled_back: usize,
    /// Lsn of the last checkpoint found in the journal.
    pub checkpoint: Option<Lsn>,
    /// First transaction id the manager may hand out.
    pub next_txn_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Committed,
    Aborted,
    InDoubt,
}

/// Latest committed Lsn per slot and per page.
#[derive(Default)]
struct CommittedTouches {
    slots: HashMap<(PageNum, SlotId), Lsn>,
    structural: HashMap<PageNum, Lsn>,
    pages: HashMap<PageNum, Lsn>,
}

impl CommittedTouches {
    fn record(&mut self, op: &PageOp, lsn: Lsn) {
        let page = op.page();
        self.pages.insert(page, lsn);
        match op.slot() {
            Some(slot) => {
                self.slots.insert((page, slot), lsn);
            }
            None => {
                self.structural.insert(page, lsn);
            }
        }
    }

    /// Returns true if a committed operation newer than `lsn` overwrote what
    /// `op` did.
    fn supersedes(&self, op: &PageOp, lsn: Lsn) -> bool {
        let page = op.page();
        let newer = |found: Option<&Lsn>| found.is_some_and(|l| *l > lsn);
        match op.slot() {
            Some(slot) => newer(self.slots.get(&(page, slot))) || newer(self.structural.get(&page)),
            None => newer(self.pages.get(&page)),
        }
    }
}

/// Replays the journal after an unclean shutdown.
#[derive(Debug)]
pub struct RecoveryManager<'a> {
    journal: &'a Journal,
    force_restart: bool,
}

impl<'a> RecoveryManager<'a> {
    /// Creates a recovery manager for `journal`.
    ///
    /// With `force_restart`, corrupt entries and failed replays are logged
    /// and skipped instead of failing recovery.
    #[must_use]
    pub fn new(journal: &'a Journal, force_restart: bool) -> Self {
        Self {
            journal,
            force_restart,
        }
    }

    /// Runs recovery and returns whether anything had to be replayed.
    ///
    /// # Errors
    ///
    /// See [`RecoveryManager::run`].
    pub fn recover(&self, store: &mut dyn PageStore) -> CoreResult<bool> {
        Ok(self.run(store)?.performed)
    }

    /// Runs recovery and returns a report.
    ///
    /// Leaves the journal with a fresh file open for writing.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Recovery`] if the journal is corrupt or a page
    /// operation cannot be replayed and force-restart is off, or the journal
    /// error if the new file or checkpoint cannot be written.
    pub fn run(&self, store: &mut dyn PageStore) -> CoreResult<RecoveryReport> {
        info!(
            dir = %self.journal.dir().display(),
            force_restart = self.force_restart,
            "recovery started"
        );

        self.journal.set_in_recovery(true);
        let replayed = self.replay(store);
        self.journal.set_in_recovery(false);
        let mut report = replayed?;

        self.journal.switch_files()?;
        if report.performed {
            let id = TxnId::new(report.next_txn_id);
            report.next_txn_id += 1;
            self.journal.checkpoint(id, false)?;
        }

        info!(
            performed = report.performed,
            redone = report.redone,
            undone = report.undone,
            skipped = report.skipped,
            committed = report.committed,
            rolled_back = report.rolled_back,
            "recovery finished"
        );
        Ok(report)
    }

    fn replay(&self, store: &mut dyn PageStore) -> CoreResult<RecoveryReport> {
        let mut report = RecoveryReport {
            next_txn_id: 1,
            ..RecoveryReport::default()
        };

        let files = self.journal.files()?;
        let Some(&newest) = files.last() else {
            debug!("no journal files found");
            return Ok(report);
        };

        let records = self.read_file(newest, &mut report)?;
        let damaged = report.skipped > 0;

        let mut max_txn = records
            .iter()
            .map(|(_, record)| record.txn_id().as_u64())
            .max()
            .unwrap_or(0);
        if records.is_empty() {
            // A clean restart leaves an empty newest file; keep ids growing.
            if let Some(&previous) = files.iter().rev().nth(1) {
                max_txn = self.highest_txn_in(previous);
            }
        }
        report.next_txn_id = max_txn + 1;

        let start = records
            .iter()
            .rposition(|(_, record)| matches!(record, Loggable::Checkpoint { .. }));
        report.checkpoint = start.map(|i| records[i].0);
        let tail = &records[start.map_or(0, |i| i + 1)..];

        if tail.is_empty() && !damaged {
            info!(file = newest, "journal is clean");
            return Ok(report);
        }
        report.performed = true;

        let outcomes = analyze(tail);
        report.committed = outcomes
            .values()
            .filter(|o| **o == Outcome::Committed)
            .count();
        report.rolled_back = outcomes.len() - report.committed;
        for (txn, outcome) in &outcomes {
            if *outcome == Outcome::InDoubt {
                debug!(%txn, "transaction unfinished at crash, rolling back");
            }
        }

        let committed = |txn: &TxnId| outcomes.get(txn) == Some(&Outcome::Committed);
        let mut touches = CommittedTouches::default();

        for (lsn, record) in tail {
            let Loggable::Page { txn, op } = record else {
                continue;
            };
            if !committed(txn) {
                continue;
            }
            touches.record(op, *lsn);
            match op.redo(store, *lsn) {
                Ok(true) => report.redone += 1,
                Ok(false) => {}
                Err(e) => self.replay_failed("redo", *lsn, record, &e, &mut report)?,
            }
        }

        for (lsn, record) in tail.iter().rev() {
            let Loggable::Page { txn, op } = record else {
                continue;
            };
            if committed(txn) {
                continue;
            }
            if touches.supersedes(op, *lsn) {
                debug!(
                    %lsn,
                    record = %record.dump(),
                    "undo skipped, overwritten by a committed transaction"
                );
                continue;
            }
            match op.undo(store, *lsn) {
                Ok(true) => report.undone += 1,
                Ok(false) => {}
                Err(e) => self.replay_failed("undo", *lsn, record, &e, &mut report)?,
            }
        }

        store.sync()?;
        Ok(report)
    }

    fn read_file(
        &self,
        number: u16,
        report: &mut RecoveryReport,
    ) -> CoreResult<Vec<(Lsn, Loggable)>> {
        let mut reader = match self.journal.reader(number) {
            Ok(reader) => reader,
            Err(e) => {
                self.corrupted(number, Lsn::new(number, 0), &e, report)?;
                return Ok(Vec::new());
            }
        };

        let mut records = Vec::new();
        loop {
            let position = reader.next_lsn();
            match reader.next() {
                Some(Ok(entry)) => records.push(entry),
                Some(Err(e)) => {
                    self.corrupted(number, position, &e, report)?;
                    break;
                }
                None => break,
            }
        }
        debug!(file = number, records = records.len(), "journal file scanned");
        Ok(records)
    }

    fn highest_txn_in(&self, number: u16) -> u64 {
        let Ok(reader) = self.journal.reader(number) else {
            return 0;
        };
        reader
            .map_while(Result::ok)
            .map(|(_, record)| record.txn_id().as_u64())
            .max()
            .unwrap_or(0)
    }

    fn corrupted(
        &self,
        number: u16,
        at: Lsn,
        error: &CoreError,
        report: &mut RecoveryReport,
    ) -> CoreResult<()> {
        if !self.force_restart {
            return Err(CoreError::recovery(format!(
                "journal file {number} is corrupt at {at}: {error}"
            )));
        }
        warn!(file = number, %at, %error, "journal corrupt, ignoring the rest of the file");
        report.skipped += 1;
        Ok(())
    }

    fn replay_failed(
        &self,
        pass: &str,
        lsn: Lsn,
        record: &Loggable,
        error: &CoreError,
        report: &mut RecoveryReport,
    ) -> CoreResult<()> {
        if !self.force_restart {
            return Err(CoreError::recovery(format!(
                "{pass} of {} at {lsn} failed: {error}",
                record.dump()
            )));
        }
        warn!(%lsn, record = %record.dump(), %error, "{pass} failed, skipping record");
        report.skipped += 1;
        Ok(())
    }
}

fn analyze(tail: &[(Lsn, Loggable)]) -> HashMap<TxnId, Outcome> {
    let mut outcomes = HashMap::new();
    for (_, record) in tail {
        match record {
            Loggable::TxnStart { txn } | Loggable::Page { txn, .. } => {
                outcomes.entry(*txn).or_insert(Outcome::InDoubt);
            }
            Loggable::TxnCommit { txn } => {
                outcomes.insert(*txn, Outcome::Committed);
            }
            Loggable::TxnAbort { txn } => {
                outcomes.insert(*txn, Outcome::Aborted);
            }
            Loggable::Checkpoint { .. } | Loggable::Opaque { .. } => {}
        }
    }
    outcomes
}
