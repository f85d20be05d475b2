//! Recovery benchmarks.

use arbor_bench::store_records;
use arbor_core::{Config, TransactionSystem};
use arbor_testkit::page_store::MemoryPageStore;
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Leave `txns` committed transactions in a journal under `dir` without a
/// final checkpoint.
fn crashed_journal(dir: &Path, txns: usize) {
    let config = Config::new().journal_dir(dir).group_commit(true);
    let mut store = MemoryPageStore::new();
    let (manager, _) = TransactionSystem::open(&config, &mut store).unwrap();

    for _ in 0..txns {
        let mut txn = manager.begin_transaction().unwrap();
        for record in store_records(txn.id(), 4, 64) {
            manager.journal_record(&txn, &record).unwrap();
        }
        manager.commit(&mut txn).unwrap();
    }
    manager.journal().unwrap().flush(true).unwrap();
}

fn copy_dir(from: &Path, to: &Path) {
    fs::create_dir_all(to).unwrap();
    for entry in fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        fs::copy(entry.path(), to.join(entry.file_name())).unwrap();
    }
}

/// Benchmark opening a journal that needs redo of every transaction.
fn bench_recover(c: &mut Criterion) {
    let mut group = c.benchmark_group("recover");
    group.sample_size(10);

    for txns in [100, 1000].iter() {
        let source = TempDir::new().unwrap();
        crashed_journal(source.path(), *txns);

        group.bench_with_input(BenchmarkId::from_parameter(txns), txns, |b, _| {
            b.iter_batched(
                || {
                    let dir = TempDir::new().unwrap();
                    copy_dir(source.path(), &dir.path().join("journal"));
                    dir
                },
                |dir| {
                    let config = Config::new().journal_dir(dir.path().join("journal"));
                    let mut store = MemoryPageStore::new();
                    let (_, report) = TransactionSystem::open(&config, &mut store).unwrap();
                    assert!(report.performed);
                    dir
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_recover);
criterion_main!(benches);
