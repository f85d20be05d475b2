//! Transactions from many threads.

use arbor_core::{
    FnTask, Loggable, LockMode, PageNum, PageOp, ResourceLock, TransactionManager, Txn, TxnId,
};
use arbor_testkit::prelude::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

const THREADS: usize = 4;
const PER_THREAD: usize = 25;

#[test]
fn ids_are_unique_and_lsns_grow_per_thread() {
    let system = TestSystem::with_config(|config| config.group_commit(true));
    let manager = system.manager();

    let ids: Vec<TxnId> = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                scope.spawn(move || {
                    let mut ids = Vec::new();
                    let mut last = None;
                    for i in 0..PER_THREAD {
                        let mut txn = manager.begin_transaction().unwrap();
                        let op = PageOp::Create {
                            page: PageNum::new((t * PER_THREAD + i) as u64),
                        };
                        let lsn = manager
                            .journal_record(&txn, &Loggable::page(txn.id(), op))
                            .unwrap();
                        assert!(lsn > last);
                        last = lsn;
                        manager.commit(&mut txn).unwrap();
                        ids.push(txn.id());
                    }
                    ids
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), THREADS * PER_THREAD);
    assert_eq!(manager.active_count(), 0);

    let journal = manager.journal().unwrap();
    journal.flush(true).unwrap();
    let records = journal
        .reader(journal.current_file().unwrap())
        .unwrap()
        .read_all()
        .unwrap();
    let commits = records
        .iter()
        .filter(|(_, r)| matches!(r, Loggable::TxnCommit { .. }))
        .count();
    assert_eq!(commits, THREADS * PER_THREAD);
}

#[test]
fn shared_lock_serializes_writers() {
    let system = TestSystem::new();
    let manager = system.manager();
    let lock = Arc::new(ResourceLock::from_config("collection /db/a", system.config()));
    let inside = AtomicBool::new(false);

    thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                for _ in 0..10 {
                    let mut txn = manager.begin_transaction().unwrap();
                    txn.acquire_lock(lock.clone(), LockMode::Write).unwrap();
                    assert!(!inside.swap(true, Ordering::SeqCst));
                    thread::yield_now();
                    inside.store(false, Ordering::SeqCst);
                    manager.commit(&mut txn).unwrap();
                }
            });
        }
    });

    assert!(!lock.is_write_locked());
}

#[test]
fn begin_waits_while_system_tasks_run() {
    let system = TestSystem::new();
    let manager = system.manager();
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let log = EventLog::new();

    thread::scope(|scope| {
        let task_log = log.clone();
        scope.spawn(move || {
            let task = FnTask::new("rebuild", move |_: &TransactionManager, txn: &mut Txn| {
                task_log.push(Event::Committed(txn.id()));
                started_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                task_log.push(Event::Committed(txn.id()));
                Ok(())
            });
            manager.trigger_system_task(Box::new(task));
        });

        started_rx.recv().unwrap();
        let waiter_log = log.clone();
        let waiter = scope.spawn(move || {
            let mut txn = manager.begin_transaction().unwrap();
            waiter_log.push(Event::Aborted(txn.id()));
            manager.abort(&mut txn).unwrap();
        });

        thread::sleep(Duration::from_millis(50));
        assert_eq!(log.events().len(), 1);
        release_tx.send(()).unwrap();
        waiter.join().unwrap();
    });

    let events = log.events();
    assert_eq!(events.len(), 3);
    assert!(matches!(events[2], Event::Aborted(_)));
}

#[test]
fn system_tasks_wait_for_a_begin_blocked_in_the_journal() {
    let factory = FaultyBackendFactory::new();
    let system = TestSystem::with_factory(
        |config| config.group_commit(true).buffer_size(1),
        factory.handle(),
    );
    let manager = system.manager();

    // Leave a buffered commit record so the next start record has to write.
    let mut warmup = manager.begin_transaction().unwrap();
    manager.commit(&mut warmup).unwrap();
    assert_eq!(manager.active_count(), 0);

    let task_running = Arc::new(AtomicBool::new(false));
    let overlapped = AtomicBool::new(false);
    factory.close_gate();

    thread::scope(|scope| {
        let user = scope.spawn(|| {
            let mut txn = manager.begin_transaction().unwrap();
            overlapped.store(task_running.load(Ordering::SeqCst), Ordering::SeqCst);
            manager.commit(&mut txn).unwrap();
        });
        assert!(factory.wait_for_blocked_append(Duration::from_secs(5)));
        assert_eq!(manager.active_count(), 1);

        let (done_tx, done_rx) = mpsc::channel();
        let flag = Arc::clone(&task_running);
        scope.spawn(move || {
            let task = FnTask::new("rebuild", move |_: &TransactionManager, _: &mut Txn| {
                flag.store(true, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                flag.store(false, Ordering::SeqCst);
                Ok(())
            });
            manager.trigger_system_task(Box::new(task));
            done_tx.send(()).unwrap();
        });

        let queued_only = done_rx.recv_timeout(Duration::from_secs(5)).is_ok();
        let pending = manager.pending_system_tasks();
        factory.open_gate();
        assert!(queued_only);
        assert_eq!(pending, 1);
        user.join().unwrap();
    });

    assert!(!overlapped.load(Ordering::SeqCst));
    assert_eq!(manager.pending_system_tasks(), 0);
    assert_eq!(manager.active_count(), 0);
}
