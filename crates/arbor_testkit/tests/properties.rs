//! Property tests over random workloads.

use arbor_core::{Config, Journal, LockMode, TransactionManager, TxnId, TxnState};
use arbor_storage::FileBackendFactory;
use arbor_testkit::prelude::*;
use proptest::prelude::*;
use std::sync::Arc;
use tempfile::tempdir;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn recovery_keeps_exactly_the_committed_work(workload in workload_strategy()) {
        let mut system = TestSystem::new();
        let _running = system.run_workload(&workload).unwrap();

        system.crash();
        system.reopen().unwrap();
        prop_assert_eq!(system.store.snapshot(), expected_after_crash(&workload));
    }

    #[test]
    fn recovery_is_idempotent(workload in workload_strategy()) {
        let mut system = TestSystem::new();
        let _running = system.run_workload(&workload).unwrap();
        system.crash();
        system.reopen().unwrap();
        let once = system.store.snapshot();

        system.crash();
        let report = system.reopen().unwrap().clone();
        prop_assert!(!report.performed);
        prop_assert_eq!(system.store.snapshot(), once);
    }

    #[test]
    fn journal_reads_back_in_lsn_order(
        records in prop::collection::vec(engine_record_strategy(TxnId::new(1)), 1..40)
    ) {
        let dir = tempdir().unwrap();
        let config = Config::new().journal_dir(dir.path()).buffer_size(256);
        let journal = Journal::open(&config, Arc::new(FileBackendFactory)).unwrap();
        let file = journal.switch_files().unwrap();

        let mut lsns = Vec::new();
        for record in &records {
            lsns.push(journal.append(record).unwrap());
        }
        journal.flush(true).unwrap();

        prop_assert!(lsns.windows(2).all(|pair| pair[0] < pair[1]));
        let read = journal.reader(file).unwrap().read_all().unwrap();
        let read_lsns: Vec<_> = read.iter().map(|(lsn, _)| *lsn).collect();
        let read_records: Vec<_> = read.into_iter().map(|(_, record)| record).collect();
        prop_assert_eq!(read_lsns, lsns);
        prop_assert_eq!(read_records, records);
    }

    #[test]
    fn locks_release_once_in_reverse(
        acquisitions in prop::collection::vec((0..6usize, any::<bool>()), 0..12),
        ending in 0..3u8,
    ) {
        let manager =
            TransactionManager::without_journal(&Config::new().transactions_enabled(false));
        let log = EventLog::new();
        let locks: Vec<_> = (0..6).map(|i| RecordingLock::new(format!("lock-{i}"), &log)).collect();

        let mut txn = manager.begin_transaction().unwrap();
        let mut expected = Vec::new();
        for (index, write) in &acquisitions {
            let mode = if *write { LockMode::Write } else { LockMode::Read };
            txn.acquire_lock(locks[*index].clone(), mode).unwrap();
            expected.push(format!("lock-{index}"));
        }
        expected.reverse();

        match ending {
            0 => manager.commit(&mut txn).unwrap(),
            1 => manager.abort(&mut txn).unwrap(),
            _ => manager.close(&mut txn).unwrap(),
        }
        let ended = txn.state();
        prop_assert!(ended != TxnState::Started);

        // Nothing after the first end releases or changes state back.
        manager.commit(&mut txn).unwrap();
        manager.abort(&mut txn).unwrap();
        manager.close(&mut txn).unwrap();
        manager.close(&mut txn).unwrap();

        prop_assert_eq!(log.releases(), expected);
        prop_assert_eq!(txn.state(), TxnState::Closed);
        prop_assert_eq!(txn.lock_count(), 0);
    }
}
