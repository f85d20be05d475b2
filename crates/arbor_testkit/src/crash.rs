//! Fault injection for journal files.
//!
//! [`FaultyBackendFactory`] hands the journal file backends that can be told
//! to fail, which simulates I/O errors and crashes in the middle of a write.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use arbor_testkit::crash::FaultyBackendFactory;
//!
//! let factory = FaultyBackendFactory::new();
//! let (manager, _) = TransactionSystem::open_with_factory(&config, factory.handle(), &mut pages)?;
//! factory.crash_after(100);
//! ```

use arbor_storage::{
    BackendFactory, FileBackendFactory, StorageBackend, StorageError, StorageResult,
};
use parking_lot::{Condvar, Mutex};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug)]
struct Faults {
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    crashed: AtomicBool,
    fail_on_sync: AtomicBool,
    fail_on_create: AtomicBool,
    syncs: AtomicUsize,
    gate: Mutex<Gate>,
    gate_changed: Condvar,
}

/// Holds appends back while closed.
#[derive(Debug, Default)]
struct Gate {
    closed: bool,
    blocked: usize,
}

impl Faults {
    fn pass_gate(&self) {
        let mut gate = self.gate.lock();
        if !gate.closed {
            return;
        }
        gate.blocked += 1;
        self.gate_changed.notify_all();
        while gate.closed {
            self.gate_changed.wait(&mut gate);
        }
        gate.blocked -= 1;
    }
}

impl Default for Faults {
    fn default() -> Self {
        Self {
            crash_after_bytes: AtomicUsize::new(usize::MAX),
            bytes_written: AtomicUsize::new(0),
            crashed: AtomicBool::new(false),
            fail_on_sync: AtomicBool::new(false),
            fail_on_create: AtomicBool::new(false),
            syncs: AtomicUsize::new(0),
            gate: Mutex::new(Gate::default()),
            gate_changed: Condvar::new(),
        }
    }
}

fn simulated(what: &str) -> StorageError {
    debug!(fault = what, "injecting storage failure");
    StorageError::Io(io::Error::new(io::ErrorKind::Other, format!("simulated {what}")))
}

/// A backend that writes through to a real file until told to fail.
pub struct FaultyBackend {
    inner: Box<dyn StorageBackend>,
    faults: Arc<Faults>,
}

impl StorageBackend for FaultyBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        self.faults.pass_gate();
        let current = self.faults.bytes_written.fetch_add(bytes.len(), Ordering::SeqCst);
        let threshold = self.faults.crash_after_bytes.load(Ordering::SeqCst);

        if current >= threshold {
            self.faults.crashed.store(true, Ordering::SeqCst);
            return Err(simulated("crash during write"));
        }

        // Write the part that fits before the crash point.
        if current + bytes.len() > threshold {
            self.faults.crashed.store(true, Ordering::SeqCst);
            let partial = threshold - current;
            if partial > 0 {
                let _ = self.inner.append(&bytes[..partial]);
                let _ = self.inner.flush();
            }
            return Err(simulated("crash during partial write"));
        }

        self.inner.append(bytes)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.faults.fail_on_sync.load(Ordering::SeqCst) {
            self.faults.crashed.store(true, Ordering::SeqCst);
            return Err(simulated("crash during sync"));
        }
        self.faults.syncs.fetch_add(1, Ordering::SeqCst);
        self.inner.sync()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }
}

/// Opens journal files as [`FaultyBackend`]s sharing one set of switches.
///
/// Clones share the switches, so a test keeps one handle and gives another
/// to the journal.
#[derive(Debug, Clone, Default)]
pub struct FaultyBackendFactory {
    inner: FileBackendFactory,
    faults: Arc<Faults>,
}

impl FaultyBackendFactory {
    /// Creates a factory with every fault disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle to pass to the journal.
    pub fn handle(&self) -> Arc<dyn BackendFactory> {
        Arc::new(self.clone())
    }

    /// Fails every append once `bytes` more bytes have been written, writing
    /// a partial entry if an append straddles the limit.
    pub fn crash_after(&self, bytes: usize) {
        let written = self.faults.bytes_written.load(Ordering::SeqCst);
        self.faults
            .crash_after_bytes
            .store(written.saturating_add(bytes), Ordering::SeqCst);
    }

    /// Sets whether syncs fail.
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.faults.fail_on_sync.store(fail, Ordering::SeqCst);
    }

    /// Sets whether creating a new journal file fails.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.faults.fail_on_create.store(fail, Ordering::SeqCst);
    }

    /// Makes every append block until [`FaultyBackendFactory::open_gate`].
    pub fn close_gate(&self) {
        self.faults.gate.lock().closed = true;
    }

    /// Lets blocked and future appends through.
    pub fn open_gate(&self) {
        self.faults.gate.lock().closed = false;
        self.faults.gate_changed.notify_all();
    }

    /// Waits up to `timeout` for an append to block at the closed gate.
    ///
    /// Returns false on timeout.
    pub fn wait_for_blocked_append(&self, timeout: Duration) -> bool {
        let mut gate = self.faults.gate.lock();
        while gate.blocked == 0 {
            if self.faults.gate_changed.wait_for(&mut gate, timeout).timed_out() {
                return gate.blocked > 0;
            }
        }
        true
    }

    /// Disables every fault.
    pub fn reset(&self) {
        self.faults.crash_after_bytes.store(usize::MAX, Ordering::SeqCst);
        self.faults.crashed.store(false, Ordering::SeqCst);
        self.faults.fail_on_sync.store(false, Ordering::SeqCst);
        self.faults.fail_on_create.store(false, Ordering::SeqCst);
        self.open_gate();
    }

    /// Returns whether a simulated failure happened.
    pub fn has_crashed(&self) -> bool {
        self.faults.crashed.load(Ordering::SeqCst)
    }

    /// Returns the number of successful syncs.
    pub fn sync_count(&self) -> usize {
        self.faults.syncs.load(Ordering::SeqCst)
    }

    /// Returns the number of bytes appended through this factory.
    pub fn bytes_written(&self) -> usize {
        self.faults.bytes_written.load(Ordering::SeqCst)
    }
}

impl BackendFactory for FaultyBackendFactory {
    fn create(&self, path: &Path) -> StorageResult<Box<dyn StorageBackend>> {
        if self.faults.fail_on_create.load(Ordering::SeqCst) {
            self.faults.crashed.store(true, Ordering::SeqCst);
            return Err(simulated("failure creating journal file"));
        }
        Ok(Box::new(FaultyBackend {
            inner: self.inner.create(path)?,
            faults: Arc::clone(&self.faults),
        }))
    }

    fn open_read(&self, path: &Path) -> StorageResult<Box<dyn StorageBackend>> {
        self.inner.open_read(path)
    }
}
