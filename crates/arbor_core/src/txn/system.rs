//! Deferred maintenance tasks.

use crate::error::CoreResult;
use crate::txn::manager::TransactionManager;
use crate::txn::state::Txn;

/// Work that must run while no other transaction is active.
///
/// Tasks queued with [`TransactionManager::trigger_system_task`] run on the
/// thread that ends the last active transaction. Each task runs inside its
/// own transaction, which is committed when the task succeeds and aborted
/// when it fails. No other thread can begin a transaction meanwhile.
pub trait SystemTask: Send {
    /// Returns a name for diagnostics.
    fn name(&self) -> &str;

    /// Runs the task.
    ///
    /// # Errors
    ///
    /// An error aborts the task's transaction; it is logged and not
    /// propagated.
    fn run(&mut self, manager: &TransactionManager, txn: &mut Txn) -> CoreResult<()>;
}

/// A [`SystemTask`] built from a closure.
pub struct FnTask<F> {
    name: String,
    f: F,
}

impl<F> FnTask<F>
where
    F: FnMut(&TransactionManager, &mut Txn) -> CoreResult<()> + Send,
{
    /// Wraps `f` as a task called `name`.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> SystemTask for FnTask<F>
where
    F: FnMut(&TransactionManager, &mut Txn) -> CoreResult<()> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, manager: &TransactionManager, txn: &mut Txn) -> CoreResult<()> {
        (self.f)(manager, txn)
    }
}
