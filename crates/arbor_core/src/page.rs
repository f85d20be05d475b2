//! Storage-engine page operations and their replay.
//!
//! The journal protects a page store it knows only through the [`PageStore`]
//! trait. Each [`PageOp`] journaled by a transaction can be redone (reapplied)
//! or undone (reversed) against that trait during recovery.
//!
//! Redo is guarded by the page Lsn: an operation is reapplied only when the
//! page is older than the record. Undo is guarded by value: an operation is
//! reversed only when its effect is still visible, so replaying the same
//! journal twice never applies anything twice.

use crate::error::CoreResult;
use crate::lsn::Lsn;
use crate::types::{PageNum, SlotId};

/// The storage engine as seen by recovery.
pub trait PageStore: Send {
    /// Returns the Lsn of the last record applied to `page`, or `None` if the
    /// page does not exist.
    fn page_lsn(&self, page: PageNum) -> Option<Lsn>;

    /// Returns true if the page exists.
    fn page_exists(&self, page: PageNum) -> bool;

    /// Returns the value in `slot`, or `None` if the slot is empty or the
    /// page does not exist.
    fn read_slot(&self, page: PageNum, slot: SlotId) -> Option<Vec<u8>>;

    /// Returns the number of occupied slots in the page.
    fn slot_count(&self, page: PageNum) -> usize;

    /// Creates an empty page stamped with `lsn`, replacing any existing page.
    ///
    /// # Errors
    ///
    /// Returns an error if the page cannot be created.
    fn create_page(&mut self, page: PageNum, lsn: Lsn) -> CoreResult<()>;

    /// Removes a page.
    ///
    /// # Errors
    ///
    /// Returns an error if the page cannot be removed.
    fn free_page(&mut self, page: PageNum, lsn: Lsn) -> CoreResult<()>;

    /// Sets (`Some`) or clears (`None`) a slot and stamps the page with `lsn`.
    ///
    /// # Errors
    ///
    /// Returns an error if the page does not exist or cannot be written.
    fn write_slot(
        &mut self,
        page: PageNum,
        slot: SlotId,
        value: Option<&[u8]>,
        lsn: Lsn,
    ) -> CoreResult<()>;

    /// Makes every change durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be synced.
    fn sync(&mut self) -> CoreResult<()>;
}

/// A page mutation journaled by a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOp {
    /// Allocate an empty page.
    Create {
        /// Target page.
        page: PageNum,
    },
    /// Release an empty page.
    Free {
        /// Target page.
        page: PageNum,
    },
    /// Store a value into an empty slot.
    Store {
        /// Target page.
        page: PageNum,
        /// Target slot.
        slot: SlotId,
        /// Stored value.
        value: Vec<u8>,
    },
    /// Replace the value in a slot.
    Update {
        /// Target page.
        page: PageNum,
        /// Target slot.
        slot: SlotId,
        /// Value before the update.
        old: Vec<u8>,
        /// Value after the update.
        new: Vec<u8>,
    },
    /// Clear a slot.
    Remove {
        /// Target page.
        page: PageNum,
        /// Target slot.
        slot: SlotId,
        /// Value before removal.
        old: Vec<u8>,
    },
}

impl PageOp {
    /// Returns the page this operation touches.
    #[must_use]
    pub fn page(&self) -> PageNum {
        match self {
            Self::Create { page }
            | Self::Free { page }
            | Self::Store { page, .. }
            | Self::Update { page, .. }
            | Self::Remove { page, .. } => *page,
        }
    }

    /// Returns the slot this operation touches, or `None` for page-level
    /// operations.
    #[must_use]
    pub fn slot(&self) -> Option<SlotId> {
        match self {
            Self::Create { .. } | Self::Free { .. } => None,
            Self::Store { slot, .. } | Self::Update { slot, .. } | Self::Remove { slot, .. } => {
                Some(*slot)
            }
        }
    }

    /// Reapplies the operation if the page is older than `lsn`.
    ///
    /// Returns whether anything was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the write.
    pub fn redo(&self, store: &mut dyn PageStore, lsn: Lsn) -> CoreResult<bool> {
        let page = self.page();

        if let Self::Create { .. } = self {
            // An older page image means the page was freed and created again.
            if store.page_lsn(page).is_some_and(|page_lsn| page_lsn >= lsn) {
                return Ok(false);
            }
            store.create_page(page, lsn)?;
            return Ok(true);
        }

        // A missing page was freed by a later operation; nothing to redo.
        let stale = store.page_lsn(page).is_some_and(|page_lsn| page_lsn < lsn);
        if !stale {
            return Ok(false);
        }

        match self {
            Self::Free { .. } => store.free_page(page, lsn)?,
            Self::Store { slot, value, .. } => store.write_slot(page, *slot, Some(value), lsn)?,
            Self::Update { slot, new, .. } => store.write_slot(page, *slot, Some(new), lsn)?,
            Self::Remove { slot, .. } => store.write_slot(page, *slot, None, lsn)?,
            Self::Create { .. } => return Ok(false),
        }
        Ok(true)
    }

    /// Reverses the operation if its effect is still present.
    ///
    /// Returns whether anything was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the write.
    pub fn undo(&self, store: &mut dyn PageStore, lsn: Lsn) -> CoreResult<bool> {
        let page = self.page();
        match self {
            Self::Create { .. } => {
                if !store.page_exists(page) || store.slot_count(page) > 0 {
                    return Ok(false);
                }
                store.free_page(page, lsn)?;
            }
            Self::Free { .. } => {
                if store.page_exists(page) {
                    return Ok(false);
                }
                store.create_page(page, lsn)?;
            }
            Self::Store { slot, value, .. } => {
                if store.read_slot(page, *slot).as_deref() != Some(value.as_slice()) {
                    return Ok(false);
                }
                store.write_slot(page, *slot, None, lsn)?;
            }
            Self::Update { slot, old, new, .. } => {
                if store.read_slot(page, *slot).as_deref() != Some(new.as_slice()) {
                    return Ok(false);
                }
                store.write_slot(page, *slot, Some(old), lsn)?;
            }
            Self::Remove { slot, old, .. } => {
                if !store.page_exists(page) || store.read_slot(page, *slot).is_some() {
                    return Ok(false);
                }
                store.write_slot(page, *slot, Some(old), lsn)?;
            }
        }
        Ok(true)
    }
}
