//! Locks and listeners that record what happens to them.

use arbor_core::{CoreError, CoreResult, Lock, LockMode, TxnId, TxnListener};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Something a [`RecordingLock`] or [`RecordingListener`] observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A lock was acquired.
    Acquired(String, LockMode),
    /// A lock was released.
    Released(String, LockMode),
    /// A transaction committed.
    Committed(TxnId),
    /// A transaction aborted.
    Aborted(TxnId),
}

/// Shared, ordered list of events.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event.
    pub fn push(&self, event: Event) {
        self.0.lock().push(event);
    }

    /// Returns a copy of all events so far.
    pub fn events(&self) -> Vec<Event> {
        self.0.lock().clone()
    }

    /// Returns the names of released locks in release order.
    pub fn releases(&self) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::Released(name, _) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Removes all events.
    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// A lock that never blocks and logs every acquire and release.
#[derive(Debug)]
pub struct RecordingLock {
    name: String,
    log: EventLog,
    refuse: AtomicBool,
}

impl RecordingLock {
    /// Creates a lock that logs into `log`.
    pub fn new(name: impl Into<String>, log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            log: log.clone(),
            refuse: AtomicBool::new(false),
        })
    }

    /// Makes later acquisitions fail.
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

impl Lock for RecordingLock {
    fn acquire(&self, mode: LockMode) -> CoreResult<()> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(CoreError::lock_acquisition(&self.name, "refused by test"));
        }
        self.log.push(Event::Acquired(self.name.clone(), mode));
        Ok(())
    }

    fn release(&self, mode: LockMode) {
        self.log.push(Event::Released(self.name.clone(), mode));
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A listener that logs commit and abort notifications.
#[derive(Debug)]
pub struct RecordingListener {
    log: EventLog,
}

impl RecordingListener {
    /// Creates a listener that logs into `log`.
    pub fn new(log: &EventLog) -> Arc<Self> {
        Arc::new(Self { log: log.clone() })
    }
}

impl TxnListener for RecordingListener {
    fn committed(&self, txn: TxnId) {
        self.log.push(Event::Committed(txn));
    }

    fn aborted(&self, txn: TxnId) {
        self.log.push(Event::Aborted(txn));
    }
}
