//! Benchmark utilities.

use arbor_core::{Loggable, PageNum, PageOp, TxnId};
use rand::Rng;

/// Generate random value bytes of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate page records that store `count` random values for `txn`.
pub fn store_records(txn: TxnId, count: usize, value_size: usize) -> Vec<Loggable> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let op = PageOp::Store {
                page: PageNum::new(rng.gen_range(0..64)),
                slot: rng.gen_range(0..256),
                value: random_data(value_size),
            };
            Loggable::page(txn, op)
        })
        .collect()
}
