//! In-memory page store with crash simulation.
//!
//! [`MemoryPageStore`] keeps two copies of every page: the live copy that
//! operations change, and the durable copy that survives a simulated crash.
//! Pages become durable through [`MemoryPageStore::flush_pages`] (a page
//! cache writing back) or [`PageStore::sync`].
//!
//! The write-ahead rule is the caller's job: flush the journal before
//! flushing pages that carry journaled changes.

use arbor_core::{CoreError, CoreResult, Lsn, PageNum, PageOp, PageStore, SlotId};
use std::collections::BTreeMap;

/// Contents of one page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    /// Lsn of the last record applied to the page.
    pub lsn: Lsn,
    /// Occupied slots.
    pub slots: BTreeMap<SlotId, Vec<u8>>,
}

/// Page contents without Lsns, for comparing outcomes.
pub type Snapshot = BTreeMap<PageNum, BTreeMap<SlotId, Vec<u8>>>;

/// A page store that loses unflushed pages on [`MemoryPageStore::crash`].
#[derive(Debug, Clone, Default)]
pub struct MemoryPageStore {
    live: BTreeMap<PageNum, Page>,
    durable: BTreeMap<PageNum, Page>,
    syncs: usize,
}

impl MemoryPageStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `op` as the storage engine does during normal operation.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the operation does not fit
    /// the current page contents.
    pub fn apply(&mut self, op: &PageOp, lsn: Lsn) -> CoreResult<()> {
        let page = op.page();
        match op {
            PageOp::Create { .. } => {
                if self.page_exists(page) {
                    return Err(CoreError::invalid_operation(format!("{page} already exists")));
                }
                self.create_page(page, lsn)
            }
            PageOp::Free { .. } => {
                if self.slot_count(page) > 0 {
                    return Err(CoreError::invalid_operation(format!("{page} is not empty")));
                }
                self.free_page(page, lsn)
            }
            PageOp::Store { slot, value, .. } => self.write_slot(page, *slot, Some(value), lsn),
            PageOp::Update { slot, new, .. } => self.write_slot(page, *slot, Some(new), lsn),
            PageOp::Remove { slot, .. } => self.write_slot(page, *slot, None, lsn),
        }
    }

    /// Reverses `op` as the storage engine does when a transaction aborts.
    ///
    /// # Errors
    ///
    /// Returns the store error if the page cannot be written.
    pub fn rollback(&mut self, op: &PageOp, lsn: Lsn) -> CoreResult<()> {
        op.undo(self, lsn).map(|_| ())
    }

    /// Returns the operations that set `slot` of `page` to `value`, creating
    /// the page if needed. `None` clears the slot.
    pub fn ops_for_write(&self, page: PageNum, slot: SlotId, value: Option<&[u8]>) -> Vec<PageOp> {
        let mut ops = Vec::new();
        if !self.page_exists(page) {
            if value.is_none() {
                return ops;
            }
            ops.push(PageOp::Create { page });
        }

        match (self.read_slot(page, slot), value) {
            (None, Some(value)) => ops.push(PageOp::Store {
                page,
                slot,
                value: value.to_vec(),
            }),
            (Some(old), Some(value)) if old != value => ops.push(PageOp::Update {
                page,
                slot,
                old,
                new: value.to_vec(),
            }),
            (Some(old), None) => ops.push(PageOp::Remove { page, slot, old }),
            _ => {}
        }
        ops
    }

    /// Writes every live page back, as a page cache eviction would.
    pub fn flush_pages(&mut self) {
        self.durable = self.live.clone();
    }

    /// Writes one live page back.
    pub fn flush_page(&mut self, page: PageNum) {
        match self.live.get(&page) {
            Some(contents) => {
                self.durable.insert(page, contents.clone());
            }
            None => {
                self.durable.remove(&page);
            }
        }
    }

    /// Drops every change that was not flushed.
    pub fn crash(&mut self) {
        self.live = self.durable.clone();
    }

    /// Returns a page.
    pub fn page(&self, page: PageNum) -> Option<&Page> {
        self.live.get(&page)
    }

    /// Returns the live contents without Lsns.
    pub fn snapshot(&self) -> Snapshot {
        self.live
            .iter()
            .map(|(num, page)| (*num, page.slots.clone()))
            .collect()
    }

    /// Returns the number of syncs.
    pub fn sync_count(&self) -> usize {
        self.syncs
    }
}

impl PageStore for MemoryPageStore {
    fn page_lsn(&self, page: PageNum) -> Option<Lsn> {
        self.live.get(&page).map(|p| p.lsn)
    }

    fn page_exists(&self, page: PageNum) -> bool {
        self.live.contains_key(&page)
    }

    fn read_slot(&self, page: PageNum, slot: SlotId) -> Option<Vec<u8>> {
        self.live.get(&page)?.slots.get(&slot).cloned()
    }

    fn slot_count(&self, page: PageNum) -> usize {
        self.live.get(&page).map_or(0, |p| p.slots.len())
    }

    fn create_page(&mut self, page: PageNum, lsn: Lsn) -> CoreResult<()> {
        self.live.insert(
            page,
            Page {
                lsn,
                slots: BTreeMap::new(),
            },
        );
        Ok(())
    }

    fn free_page(&mut self, page: PageNum, _lsn: Lsn) -> CoreResult<()> {
        self.live.remove(&page);
        Ok(())
    }

    fn write_slot(
        &mut self,
        page: PageNum,
        slot: SlotId,
        value: Option<&[u8]>,
        lsn: Lsn,
    ) -> CoreResult<()> {
        let contents = self
            .live
            .get_mut(&page)
            .ok_or_else(|| CoreError::invalid_operation(format!("{page} does not exist")))?;
        contents.lsn = lsn;
        match value {
            Some(value) => {
                contents.slots.insert(slot, value.to_vec());
            }
            None => {
                contents.slots.remove(&slot);
            }
        }
        Ok(())
    }

    fn sync(&mut self) -> CoreResult<()> {
        self.flush_pages();
        self.syncs += 1;
        Ok(())
    }
}
