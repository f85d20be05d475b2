//! Locks acquired through transactions.
//!
//! The storage engine owns its locks; a transaction only records which locks
//! it holds and in which mode, so it can release them in reverse acquisition
//! order when it ends. [`ResourceLock`] is a ready-made implementation for
//! collections and documents.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fmt;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::warn;

/// Mode in which a lock is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared access.
    Read,
    /// Exclusive access.
    Write,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// A lock that a transaction can acquire and release.
pub trait Lock: Send + Sync + fmt::Debug {
    /// Acquires the lock in `mode`, blocking until it is available.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockAcquisition`] if the lock cannot be acquired.
    fn acquire(&self, mode: LockMode) -> CoreResult<()>;

    /// Releases one hold of the lock in `mode`.
    fn release(&self, mode: LockMode);

    /// Returns a name for diagnostics.
    fn name(&self) -> &str;
}

#[derive(Debug, Default)]
struct LockState {
    writer: Option<ThreadId>,
    write_depth: usize,
    readers: HashMap<ThreadId, usize>,
}

impl LockState {
    fn can_read(&self, me: ThreadId) -> bool {
        self.writer.is_none_or(|w| w == me)
    }

    fn can_write(&self, me: ThreadId) -> bool {
        self.writer.is_none_or(|w| w == me) && self.readers.keys().all(|r| *r == me)
    }
}

/// A reentrant reader/writer lock with an acquisition timeout.
///
/// A thread may take the lock repeatedly in either mode as long as no other
/// thread conflicts; a sole reader may upgrade to write. Each `acquire` must
/// be matched by one `release` in the same mode.
pub struct ResourceLock {
    name: String,
    timeout: Duration,
    state: Mutex<LockState>,
    changed: Condvar,
}

impl ResourceLock {
    /// Creates a lock that gives up after `timeout`.
    pub fn new(name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            timeout,
            state: Mutex::new(LockState::default()),
            changed: Condvar::new(),
        }
    }

    /// Creates a lock using the configured acquisition timeout.
    pub fn from_config(name: impl Into<String>, config: &Config) -> Self {
        Self::new(name, config.lock_timeout)
    }

    /// Returns the acquisition timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns true if any thread holds the lock for writing.
    #[must_use]
    pub fn is_write_locked(&self) -> bool {
        self.state.lock().writer.is_some()
    }

    /// Returns the number of read holds across all threads.
    #[must_use]
    pub fn read_holds(&self) -> usize {
        self.state.lock().readers.values().sum()
    }
}

impl Lock for ResourceLock {
    fn acquire(&self, mode: LockMode) -> CoreResult<()> {
        let me = thread::current().id();
        let deadline = Instant::now() + self.timeout;
        let mut state = self.state.lock();

        loop {
            let granted = match mode {
                LockMode::Read => state.can_read(me),
                LockMode::Write => state.can_write(me),
            };
            if granted {
                break;
            }
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                let granted = match mode {
                    LockMode::Read => state.can_read(me),
                    LockMode::Write => state.can_write(me),
                };
                if granted {
                    break;
                }
                return Err(CoreError::lock_acquisition(
                    &self.name,
                    format!("{mode} lock timed out after {:?}", self.timeout),
                ));
            }
        }

        match mode {
            LockMode::Read => *state.readers.entry(me).or_insert(0) += 1,
            LockMode::Write => {
                state.writer = Some(me);
                state.write_depth += 1;
            }
        }
        Ok(())
    }

    fn release(&self, mode: LockMode) {
        let me = thread::current().id();
        let mut state = self.state.lock();

        match mode {
            LockMode::Read => {
                // Prefer the caller's own hold; a transaction may end on
                // another thread than the one that locked.
                let holder = if state.readers.contains_key(&me) {
                    Some(me)
                } else {
                    state.readers.keys().next().copied()
                };
                let Some(holder) = holder else {
                    warn!(lock = %self.name, "read release without a matching acquire");
                    return;
                };
                if let Some(count) = state.readers.get_mut(&holder) {
                    *count -= 1;
                    if *count == 0 {
                        state.readers.remove(&holder);
                    }
                }
            }
            LockMode::Write => {
                if state.write_depth == 0 {
                    warn!(lock = %self.name, "write release without a matching acquire");
                    return;
                }
                state.write_depth -= 1;
                if state.write_depth == 0 {
                    state.writer = None;
                }
            }
        }

        drop(state);
        self.changed.notify_all();
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ResourceLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLock")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
