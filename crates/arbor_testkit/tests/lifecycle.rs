//! Checkpoints, shutdown and journal failures.

use arbor_core::{
    CoreError, FnTask, LockMode, Loggable, PageNum, PageStore, TransactionManager, Txn, TxnState,
};
use arbor_testkit::prelude::*;

const P: PageNum = PageNum(5);

fn put(slot: u16, value: &[u8]) -> SlotWrite {
    SlotWrite {
        page: P,
        slot,
        value: Some(value.to_vec()),
    }
}

#[test]
fn size_limit_requests_checkpoint_and_rotation_removes_old_files() {
    let mut system = TestSystem::with_config(|config| {
        config.journal_size_min(256).journal_size_limit(1024)
    });

    let mut slot = 0;
    while !system.manager().journal().unwrap().checkpoint_requested() {
        let mut txn = system.manager().begin_transaction().unwrap();
        system.write(&txn, &[put(slot, &[0xab; 40])]).unwrap();
        system.manager().commit(&mut txn).unwrap();
        slot += 1;
    }

    let journal = system.manager().journal().unwrap();
    let before = journal.current_file().unwrap();
    system.manager().checkpoint(true).unwrap().unwrap();

    let journal = system.manager().journal().unwrap();
    assert!(!journal.checkpoint_requested());
    assert_eq!(journal.current_file(), Some(before + 1));
    assert_eq!(journal.files().unwrap(), vec![before + 1]);
}

#[test]
fn small_file_is_not_rotated() {
    let system = TestSystem::new();
    let journal = system.manager().journal().unwrap();
    let before = journal.current_file();

    let lsn = system.manager().checkpoint(true).unwrap().unwrap();
    assert_eq!(journal.current_file(), before);
    assert_eq!(journal.last_synced_lsn(), lsn);
}

#[test]
fn clean_shutdown_needs_no_recovery() {
    let mut system = TestSystem::new();
    let mut txn = system.manager().begin_transaction().unwrap();
    system.write(&txn, &[put(0, b"v")]).unwrap();
    system.manager().commit(&mut txn).unwrap();

    assert_eq!(system.shutdown().unwrap(), 0);
    let report = system.reopen().unwrap().clone();
    assert!(!report.performed);
    assert_eq!(system.store.read_slot(P, 0), Some(b"v".to_vec()));
}

#[test]
fn shutdown_with_uncommitted_work_skips_checkpoint() {
    let mut system = TestSystem::new();
    let txn = system.manager().begin_transaction().unwrap();
    system.write(&txn, &[put(0, b"pending")]).unwrap();
    let _idle = system.manager().begin_transaction().unwrap();

    let journal_file = {
        let journal = system.manager().journal().unwrap();
        journal.file_path(journal.current_file().unwrap())
    };
    assert_eq!(system.manager().uncommitted_count(), 1);
    assert_eq!(system.manager().shutdown().unwrap(), 1);
    assert_eq!(system.manager().shutdown().unwrap(), 1);
    assert!(matches!(
        system.manager().begin_transaction(),
        Err(CoreError::ShutDown)
    ));

    let records = arbor_core::JournalReader::new(
        1,
        Box::new(arbor_storage::FileBackend::open_read(&journal_file).unwrap()),
    )
    .unwrap()
    .read_all()
    .unwrap();
    assert!(!records
        .iter()
        .any(|(_, record)| matches!(record, Loggable::Checkpoint { .. })));

    // The next start rolls the pending transaction back.
    system.manager = None;
    let report = system.reopen().unwrap().clone();
    assert!(report.performed);
    assert_eq!(report.rolled_back, 2);
    assert_eq!(system.store.read_slot(P, 0), None);
}

#[test]
fn sync_failure_poisons_the_journal() {
    let factory = FaultyBackendFactory::new();
    let mut system = TestSystem::with_factory(|config| config, factory.handle());
    let log = EventLog::new();

    let mut txn = system.manager().begin_transaction().unwrap();
    txn.acquire_lock(RecordingLock::new("doc", &log), LockMode::Write)
        .unwrap();
    system.write(&txn, &[put(0, b"v")]).unwrap();

    factory.set_fail_on_sync(true);
    let err = system.manager().commit(&mut txn).unwrap_err();
    assert!(matches!(err, CoreError::JournalWrite { .. }));
    assert_eq!(txn.state(), TxnState::Started);

    // Abort cannot be journaled either, but the locks still go.
    factory.set_fail_on_sync(false);
    assert!(system.manager().abort(&mut txn).is_err());
    assert_eq!(txn.state(), TxnState::Aborted);
    assert_eq!(log.releases(), vec!["doc".to_string()]);
    assert_eq!(system.manager().active_count(), 0);

    assert!(system.manager().begin_transaction().is_err());
    assert!(system.manager().journal().unwrap().is_poisoned());
}

#[test]
fn failed_begin_leaves_nothing_registered() {
    let factory = FaultyBackendFactory::new();
    let system = TestSystem::with_factory(|config| config.buffer_size(16), factory.handle());
    let mut first = system.manager().begin_transaction().unwrap();
    system.manager().commit(&mut first).unwrap();

    factory.crash_after(0);
    // The first start record fits the buffer; the second forces a write.
    let held = system.manager().begin_transaction();
    let failed = system.manager().begin_transaction();
    assert!(held.is_ok());
    assert!(failed.is_err());
    assert_eq!(system.manager().active_count(), 1);
}

#[test]
fn system_task_runs_after_last_transaction_ends() {
    let system = TestSystem::new();
    let log = EventLog::new();
    let manager = system.manager();

    let mut user = manager.begin_transaction().unwrap();
    let task_log = log.clone();
    let task = FnTask::new("compact", move |_: &TransactionManager, txn: &mut Txn| {
        txn.acquire_lock(RecordingLock::new("system", &task_log), LockMode::Write)
    });
    manager.trigger_system_task(Box::new(task));
    assert_eq!(manager.pending_system_tasks(), 1);
    assert!(log.events().is_empty());

    manager.commit(&mut user).unwrap();
    manager.close(&mut user).unwrap();
    assert_eq!(manager.pending_system_tasks(), 0);
    assert_eq!(
        log.events(),
        vec![
            Event::Acquired("system".to_string(), LockMode::Write),
            Event::Released("system".to_string(), LockMode::Write),
        ]
    );
    assert_eq!(manager.active_count(), 0);
}

#[test]
fn listeners_see_commit_and_abort() {
    let system = TestSystem::new();
    let log = EventLog::new();
    let manager = system.manager();

    let mut committed = manager.begin_transaction().unwrap();
    committed.register_listener(RecordingListener::new(&log));
    let mut aborted = manager.begin_transaction().unwrap();
    aborted.register_listener(RecordingListener::new(&log));

    manager.commit(&mut committed).unwrap();
    {
        let mut guard = manager.begin_scoped().unwrap();
        guard.register_listener(RecordingListener::new(&log));
        guard.commit().unwrap();
    }
    manager.close(&mut aborted).unwrap();

    let events = log.events();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0], Event::Committed(committed.id()));
    assert!(matches!(events[1], Event::Committed(_)));
    assert_eq!(events[2], Event::Aborted(aborted.id()));
}
