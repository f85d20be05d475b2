//! Property-based test generators using proptest.
//!
//! Workloads are generated as slot writes rather than raw page operations;
//! [`MemoryPageStore::ops_for_write`](crate::page_store::MemoryPageStore::ops_for_write)
//! turns them into operations that fit the store at the time they run.

use arbor_core::{Loggable, PageNum, PageOp, SlotId, TxnId};
use proptest::prelude::*;

/// Number of distinct pages workloads touch.
pub const WORKLOAD_PAGES: u64 = 4;

/// Number of distinct slots per page workloads touch.
pub const WORKLOAD_SLOTS: SlotId = 4;

/// One slot write; `None` clears the slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotWrite {
    /// Target page.
    pub page: PageNum,
    /// Target slot.
    pub slot: SlotId,
    /// New value.
    pub value: Option<Vec<u8>>,
}

/// How a planned transaction ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOutcome {
    /// Commit.
    Commit,
    /// Roll back and abort.
    Abort,
}

/// A transaction to run.
#[derive(Debug, Clone)]
pub struct TxnPlan {
    /// Writes in order.
    pub writes: Vec<SlotWrite>,
    /// How the transaction ends.
    pub outcome: PlanOutcome,
    /// Whether dirty pages are written back after it ends.
    pub flush_pages_after: bool,
}

/// A sequence of transactions followed by one left running at the crash.
#[derive(Debug, Clone)]
pub struct Workload {
    /// Finished transactions in order.
    pub txns: Vec<TxnPlan>,
    /// Writes of the transaction running when the process dies.
    pub in_flight: Vec<SlotWrite>,
    /// Whether the running transaction's pages reach the store before the
    /// crash.
    pub flush_in_flight: bool,
}

/// Strategy for slot values.
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..24)
}

/// Strategy for a single slot write.
pub fn slot_write_strategy() -> impl Strategy<Value = SlotWrite> {
    (
        0..WORKLOAD_PAGES,
        0..WORKLOAD_SLOTS,
        prop::option::weighted(0.8, value_strategy()),
    )
        .prop_map(|(page, slot, value)| SlotWrite {
            page: PageNum::new(page),
            slot,
            value,
        })
}

/// Strategy for one finished transaction.
pub fn txn_plan_strategy() -> impl Strategy<Value = TxnPlan> {
    (
        prop::collection::vec(slot_write_strategy(), 1..6),
        prop::bool::weighted(0.7),
        any::<bool>(),
    )
        .prop_map(|(writes, commit, flush_pages_after)| TxnPlan {
            writes,
            outcome: if commit {
                PlanOutcome::Commit
            } else {
                PlanOutcome::Abort
            },
            flush_pages_after,
        })
}

/// Strategy for a crash workload.
pub fn workload_strategy() -> impl Strategy<Value = Workload> {
    (
        prop::collection::vec(txn_plan_strategy(), 0..8),
        prop::collection::vec(slot_write_strategy(), 0..5),
        any::<bool>(),
    )
        .prop_map(|(txns, in_flight, flush_in_flight)| Workload {
            txns,
            in_flight,
            flush_in_flight,
        })
}

/// Strategy for page operations whose values need not match any store.
pub fn page_op_strategy() -> impl Strategy<Value = PageOp> {
    let page = (0..WORKLOAD_PAGES).prop_map(PageNum::new);
    let slot = 0..WORKLOAD_SLOTS;
    prop_oneof![
        page.clone().prop_map(|page| PageOp::Create { page }),
        page.clone().prop_map(|page| PageOp::Free { page }),
        (page.clone(), slot.clone(), value_strategy())
            .prop_map(|(page, slot, value)| PageOp::Store { page, slot, value }),
        (page.clone(), slot.clone(), value_strategy(), value_strategy())
            .prop_map(|(page, slot, old, new)| PageOp::Update {
                page,
                slot,
                old,
                new
            }),
        (page, slot, value_strategy()).prop_map(|(page, slot, old)| PageOp::Remove {
            page,
            slot,
            old
        }),
    ]
}

/// Strategy for records a storage engine may journal for `txn`.
pub fn engine_record_strategy(txn: TxnId) -> impl Strategy<Value = Loggable> {
    prop_oneof![
        4 => page_op_strategy().prop_map(move |op| Loggable::page(txn, op)),
        1 => (32u8..=255, prop::collection::vec(any::<u8>(), 0..64))
            .prop_map(move |(kind, data)| Loggable::Opaque { kind, txn, data }),
    ]
}
