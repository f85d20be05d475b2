//! Commit flush policies.

use arbor_core::{PageNum, PageStore};
use arbor_testkit::prelude::*;
use std::time::Duration;

const P: PageNum = PageNum(3);

fn commit_value(system: &mut TestSystem, slot: u16, value: &[u8]) {
    let mut txn = system.manager().begin_transaction().unwrap();
    system
        .write(
            &txn,
            &[SlotWrite {
                page: P,
                slot,
                value: Some(value.to_vec()),
            }],
        )
        .unwrap();
    system.manager().commit(&mut txn).unwrap();
}

#[test]
fn group_commit_is_durable_only_after_forced_flush() {
    let mut system = TestSystem::with_config(|config| config.group_commit(true));

    commit_value(&mut system, 0, b"unflushed");
    system.crash();
    let report = system.reopen().unwrap().clone();
    assert!(!report.performed);
    assert!(!system.store.page_exists(P));

    commit_value(&mut system, 1, b"flushed");
    system.manager().journal().unwrap().flush(true).unwrap();
    system.crash();
    system.reopen().unwrap();
    assert_eq!(system.store.read_slot(P, 1), Some(b"flushed".to_vec()));
}

#[test]
fn one_forced_flush_makes_a_group_durable() {
    let mut system = TestSystem::with_config(|config| config.group_commit(true));

    commit_value(&mut system, 0, b"first");
    commit_value(&mut system, 1, b"second");
    system.manager().journal().unwrap().flush(true).unwrap();
    system.crash();

    let report = system.reopen().unwrap().clone();
    assert!(report.performed);
    assert_eq!(report.committed, 2);
    assert_eq!(system.store.read_slot(P, 0), Some(b"first".to_vec()));
    assert_eq!(system.store.read_slot(P, 1), Some(b"second".to_vec()));
}

#[test]
fn group_commit_coalesces_syncs() {
    let factory = FaultyBackendFactory::new();
    let mut system = TestSystem::with_factory(|config| config.group_commit(true), factory.handle());
    let before = factory.sync_count();

    for i in 0..10u16 {
        commit_value(&mut system, i, b"v");
    }
    assert_eq!(factory.sync_count(), before);

    system.manager().journal().unwrap().flush(true).unwrap();
    system.manager().journal().unwrap().flush(true).unwrap();
    assert_eq!(factory.sync_count(), before + 1);
}

#[test]
fn commit_syncs_each_time_without_group_commit() {
    let factory = FaultyBackendFactory::new();
    let mut system = TestSystem::with_factory(|config| config, factory.handle());
    let before = factory.sync_count();

    for i in 0..4u16 {
        commit_value(&mut system, i, b"v");
    }
    assert_eq!(factory.sync_count(), before + 4);
}

#[test]
fn sync_on_commit_off_writes_without_syncing() {
    let factory = FaultyBackendFactory::new();
    let mut system =
        TestSystem::with_factory(|config| config.sync_on_commit(false), factory.handle());
    let before = factory.sync_count();
    let written = factory.bytes_written();

    commit_value(&mut system, 0, b"v");
    assert_eq!(factory.sync_count(), before);
    assert!(factory.bytes_written() > written);
}

#[test]
fn max_delay_bounds_group_commit() {
    let mut system = TestSystem::with_config(|config| {
        config
            .group_commit(true)
            .group_commit_max_delay(Some(Duration::ZERO))
    });

    commit_value(&mut system, 0, b"bounded");
    system.crash();
    system.reopen().unwrap();
    assert_eq!(system.store.read_slot(P, 0), Some(b"bounded".to_vec()));
}
