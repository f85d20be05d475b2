//! Loggable records and their entry encoding.
//!
//! Every journal entry has the layout
//!
//! ```text
//! kind (u8) | txn id (u64 LE) | data length (u16 LE) | data | crc32 (u32 LE)
//! ```
//!
//! where the checksum covers the header and the data. The data length is
//! stored explicitly so a reader can step over entries of kinds it does not
//! know.

use crate::error::{CoreError, CoreResult};
use crate::lsn::Lsn;
use crate::page::PageOp;
use crate::types::{PageNum, SlotId, TxnId};
use std::fmt;

/// Magic bytes at the start of every journal file.
pub const FILE_MAGIC: [u8; 4] = *b"AXJL";

/// Current journal file format version.
pub const FILE_VERSION: u16 = 1;

/// Size of the journal file header: magic (4) + version (2).
pub const FILE_HEADER_SIZE: usize = 6;

/// Size of an entry header: kind (1) + txn id (8) + data length (2).
pub const ENTRY_HEADER_SIZE: usize = 11;

/// Size of the trailing entry checksum.
pub const CRC_SIZE: usize = 4;

/// Largest payload an entry can carry.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Kind tags of the records this crate understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    /// Transaction start.
    TxnStart = 1,
    /// Transaction commit.
    TxnCommit = 2,
    /// Transaction abort.
    TxnAbort = 3,
    /// Checkpoint marker.
    Checkpoint = 4,
    /// Page allocation.
    CreatePage = 16,
    /// Page release.
    FreePage = 17,
    /// Value stored into an empty slot.
    StoreValue = 18,
    /// Value replaced in place.
    UpdateValue = 19,
    /// Value removed from a slot.
    RemoveValue = 20,
}

impl RecordKind {
    /// Converts a byte to a record kind.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::TxnStart),
            2 => Some(Self::TxnCommit),
            3 => Some(Self::TxnAbort),
            4 => Some(Self::Checkpoint),
            16 => Some(Self::CreatePage),
            17 => Some(Self::FreePage),
            18 => Some(Self::StoreValue),
            19 => Some(Self::UpdateValue),
            20 => Some(Self::RemoveValue),
            _ => None,
        }
    }

    /// Converts the record kind to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Returns the name used in dumps.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::TxnStart => "TxnStart",
            Self::TxnCommit => "TxnCommit",
            Self::TxnAbort => "TxnAbort",
            Self::Checkpoint => "Checkpoint",
            Self::CreatePage => "CreatePage",
            Self::FreePage => "FreePage",
            Self::StoreValue => "StoreValue",
            Self::UpdateValue => "UpdateValue",
            Self::RemoveValue => "RemoveValue",
        }
    }
}

/// A record that can be written to the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Loggable {
    /// A transaction began.
    TxnStart {
        /// Owning transaction.
        txn: TxnId,
    },

    /// A transaction committed.
    TxnCommit {
        /// Owning transaction.
        txn: TxnId,
    },

    /// A transaction aborted.
    TxnAbort {
        /// Owning transaction.
        txn: TxnId,
    },

    /// Recovery starting point.
    Checkpoint {
        /// Pseudo transaction that wrote the checkpoint.
        txn: TxnId,
        /// Position of the checkpoint entry itself.
        stored_lsn: Lsn,
        /// Wall-clock time in milliseconds since the Unix epoch.
        timestamp: u64,
    },

    /// A storage-engine page mutation.
    Page {
        /// Owning transaction.
        txn: TxnId,
        /// The mutation.
        op: PageOp,
    },

    /// A record of a kind this crate does not interpret.
    ///
    /// Recovery steps over these using only the stored length.
    Opaque {
        /// Raw kind tag.
        kind: u8,
        /// Owning transaction.
        txn: TxnId,
        /// Raw payload.
        data: Vec<u8>,
    },
}

impl Loggable {
    /// Creates a page record.
    #[must_use]
    pub fn page(txn: TxnId, op: PageOp) -> Self {
        Self::Page { txn, op }
    }

    /// Returns the raw kind tag.
    #[must_use]
    pub fn kind(&self) -> u8 {
        match self {
            Self::Opaque { kind, .. } => *kind,
            _ => self.record_kind().map_or(0, RecordKind::as_byte),
        }
    }

    /// Returns the known record kind, or `None` for opaque records.
    #[must_use]
    pub fn record_kind(&self) -> Option<RecordKind> {
        match self {
            Self::TxnStart { .. } => Some(RecordKind::TxnStart),
            Self::TxnCommit { .. } => Some(RecordKind::TxnCommit),
            Self::TxnAbort { .. } => Some(RecordKind::TxnAbort),
            Self::Checkpoint { .. } => Some(RecordKind::Checkpoint),
            Self::Page { op, .. } => Some(match op {
                PageOp::Create { .. } => RecordKind::CreatePage,
                PageOp::Free { .. } => RecordKind::FreePage,
                PageOp::Store { .. } => RecordKind::StoreValue,
                PageOp::Update { .. } => RecordKind::UpdateValue,
                PageOp::Remove { .. } => RecordKind::RemoveValue,
            }),
            Self::Opaque { .. } => None,
        }
    }

    /// Returns the owning transaction id.
    #[must_use]
    pub fn txn_id(&self) -> TxnId {
        match self {
            Self::TxnStart { txn }
            | Self::TxnCommit { txn }
            | Self::TxnAbort { txn }
            | Self::Checkpoint { txn, .. }
            | Self::Page { txn, .. }
            | Self::Opaque { txn, .. } => *txn,
        }
    }

    /// Returns true for transaction start, commit and abort records.
    #[must_use]
    pub fn is_txn_boundary(&self) -> bool {
        matches!(
            self,
            Self::TxnStart { .. } | Self::TxnCommit { .. } | Self::TxnAbort { .. }
        )
    }

    /// Returns the exact number of payload bytes [`Loggable::encode_payload`]
    /// produces.
    #[must_use]
    pub fn log_size(&self) -> usize {
        match self {
            Self::TxnStart { .. } | Self::TxnCommit { .. } | Self::TxnAbort { .. } => 0,
            Self::Checkpoint { .. } => 16,
            Self::Page { op, .. } => match op {
                PageOp::Create { .. } | PageOp::Free { .. } => 8,
                PageOp::Store { value, .. } => 12 + value.len(),
                PageOp::Update { old, new, .. } => 14 + old.len() + new.len(),
                PageOp::Remove { old, .. } => 12 + old.len(),
            },
            Self::Opaque { data, .. } => data.len(),
        }
    }

    /// Returns the full size of the journal entry for this record.
    #[must_use]
    pub fn entry_size(&self) -> usize {
        ENTRY_HEADER_SIZE + self.log_size() + CRC_SIZE
    }

    /// Serializes the record payload (without the entry envelope).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RecordTooLarge`] if the payload exceeds
    /// [`MAX_PAYLOAD_SIZE`], or an invalid operation error for an opaque
    /// record that reuses a known kind tag.
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let size = self.log_size();
        if size > MAX_PAYLOAD_SIZE {
            return Err(CoreError::RecordTooLarge {
                size,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut buf = Vec::with_capacity(size);
        match self {
            Self::TxnStart { .. } | Self::TxnCommit { .. } | Self::TxnAbort { .. } => {}

            Self::Checkpoint {
                stored_lsn,
                timestamp,
                ..
            } => {
                buf.extend_from_slice(&stored_lsn.pack().to_le_bytes());
                buf.extend_from_slice(&timestamp.to_le_bytes());
            }

            Self::Page { op, .. } => match op {
                PageOp::Create { page } | PageOp::Free { page } => {
                    buf.extend_from_slice(&page.as_u64().to_le_bytes());
                }
                PageOp::Store { page, slot, value } => {
                    put_slot(&mut buf, *page, *slot);
                    put_value(&mut buf, value);
                }
                PageOp::Update {
                    page,
                    slot,
                    old,
                    new,
                } => {
                    put_slot(&mut buf, *page, *slot);
                    put_value(&mut buf, old);
                    put_value(&mut buf, new);
                }
                PageOp::Remove { page, slot, old } => {
                    put_slot(&mut buf, *page, *slot);
                    put_value(&mut buf, old);
                }
            },

            Self::Opaque { kind, data, .. } => {
                if let Some(known) = RecordKind::from_byte(*kind) {
                    return Err(CoreError::invalid_operation(format!(
                        "opaque record uses reserved kind {} ({})",
                        kind,
                        known.name()
                    )));
                }
                buf.extend_from_slice(data);
            }
        }

        debug_assert_eq!(buf.len(), size);
        Ok(buf)
    }

    /// Serializes the record as a complete journal entry, checksum included.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded.
    pub fn encode_entry(&self) -> CoreResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        // Guarded by encode_payload's size check.
        let len = payload.len() as u16;

        let mut entry = Vec::with_capacity(ENTRY_HEADER_SIZE + payload.len() + CRC_SIZE);
        entry.push(self.kind());
        entry.extend_from_slice(&self.txn_id().as_u64().to_le_bytes());
        entry.extend_from_slice(&len.to_le_bytes());
        entry.extend_from_slice(&payload);

        let crc = compute_crc32(&entry);
        entry.extend_from_slice(&crc.to_le_bytes());
        Ok(entry)
    }

    /// Deserializes a record from its kind tag, owner and payload.
    ///
    /// Unknown kinds decode to [`Loggable::Opaque`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::JournalCorruption`] if a known kind's payload is
    /// truncated or has trailing bytes.
    pub fn decode(kind: u8, txn: TxnId, payload: &[u8]) -> CoreResult<Self> {
        let Some(known) = RecordKind::from_byte(kind) else {
            return Ok(Self::Opaque {
                kind,
                txn,
                data: payload.to_vec(),
            });
        };

        let mut reader = PayloadReader::new(known, payload);
        let record = match known {
            RecordKind::TxnStart => Self::TxnStart { txn },
            RecordKind::TxnCommit => Self::TxnCommit { txn },
            RecordKind::TxnAbort => Self::TxnAbort { txn },
            RecordKind::Checkpoint => {
                let stored_lsn = Lsn::unpack(reader.read_u64()?);
                let timestamp = reader.read_u64()?;
                Self::Checkpoint {
                    txn,
                    stored_lsn,
                    timestamp,
                }
            }
            RecordKind::CreatePage => Self::page(
                txn,
                PageOp::Create {
                    page: reader.read_page()?,
                },
            ),
            RecordKind::FreePage => Self::page(
                txn,
                PageOp::Free {
                    page: reader.read_page()?,
                },
            ),
            RecordKind::StoreValue => {
                let page = reader.read_page()?;
                let slot = reader.read_u16()?;
                let value = reader.read_value()?;
                Self::page(txn, PageOp::Store { page, slot, value })
            }
            RecordKind::UpdateValue => {
                let page = reader.read_page()?;
                let slot = reader.read_u16()?;
                let old = reader.read_value()?;
                let new = reader.read_value()?;
                Self::page(
                    txn,
                    PageOp::Update {
                        page,
                        slot,
                        old,
                        new,
                    },
                )
            }
            RecordKind::RemoveValue => {
                let page = reader.read_page()?;
                let slot = reader.read_u16()?;
                let old = reader.read_value()?;
                Self::page(txn, PageOp::Remove { page, slot, old })
            }
        };

        reader.finish()?;
        Ok(record)
    }

    /// Renders the record for diagnostics.
    #[must_use]
    pub fn dump(&self) -> String {
        let txn = self.txn_id();
        match self {
            Self::TxnStart { .. } | Self::TxnCommit { .. } | Self::TxnAbort { .. } => {
                format!("{} [{txn}]", self.name())
            }
            Self::Checkpoint {
                stored_lsn,
                timestamp,
                ..
            } => format!("Checkpoint [{txn}] lsn {stored_lsn} at {timestamp}ms"),
            Self::Page { op, .. } => {
                let target = match op {
                    PageOp::Create { page } | PageOp::Free { page } => page.to_string(),
                    PageOp::Store { page, slot, value } => {
                        format!("{page} slot {slot} ({} bytes)", value.len())
                    }
                    PageOp::Update {
                        page,
                        slot,
                        old,
                        new,
                    } => format!("{page} slot {slot} ({} -> {} bytes)", old.len(), new.len()),
                    PageOp::Remove { page, slot, old } => {
                        format!("{page} slot {slot} ({} bytes)", old.len())
                    }
                };
                format!("{} [{txn}] {target}", self.name())
            }
            Self::Opaque { kind, data, .. } => {
                format!("Opaque(kind {kind}) [{txn}] {} bytes", data.len())
            }
        }
    }

    fn name(&self) -> &'static str {
        self.record_kind().map_or("Opaque", RecordKind::name)
    }
}

impl fmt::Display for Loggable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dump())
    }
}

fn put_slot(buf: &mut Vec<u8>, page: PageNum, slot: SlotId) {
    buf.extend_from_slice(&page.as_u64().to_le_bytes());
    buf.extend_from_slice(&slot.to_le_bytes());
}

fn put_value(buf: &mut Vec<u8>, value: &[u8]) {
    // The total payload fits in u16, so every value does as well.
    buf.extend_from_slice(&(value.len() as u16).to_le_bytes());
    buf.extend_from_slice(value);
}

/// Bounds-checked cursor over a record payload.
struct PayloadReader<'a> {
    kind: RecordKind,
    payload: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(kind: RecordKind, payload: &'a [u8]) -> Self {
        Self {
            kind,
            payload,
            pos: 0,
        }
    }

    fn take(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        let end = self.pos + len;
        if end > self.payload.len() {
            return Err(CoreError::journal_corruption(format!(
                "unexpected end of {} payload: need {} bytes, have {}",
                self.kind.name(),
                end,
                self.payload.len()
            )));
        }
        let bytes = &self.payload[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_u64(&mut self) -> CoreResult<u64> {
        let bytes: [u8; 8] = self
            .take(8)?
            .try_into()
            .map_err(|_| CoreError::journal_corruption("invalid u64"))?;
        Ok(u64::from_le_bytes(bytes))
    }

    fn read_u16(&mut self) -> CoreResult<u16> {
        let bytes: [u8; 2] = self
            .take(2)?
            .try_into()
            .map_err(|_| CoreError::journal_corruption("invalid u16"))?;
        Ok(u16::from_le_bytes(bytes))
    }

    fn read_page(&mut self) -> CoreResult<PageNum> {
        Ok(PageNum::new(self.read_u64()?))
    }

    fn read_value(&mut self) -> CoreResult<Vec<u8>> {
        let len = self.read_u16()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn finish(&self) -> CoreResult<()> {
        if self.pos != self.payload.len() {
            return Err(CoreError::journal_corruption(format!(
                "trailing bytes in {} record: expected {} bytes, got {}",
                self.kind.name(),
                self.pos,
                self.payload.len()
            )));
        }
        Ok(())
    }
}

/// Computes the CRC32 (IEEE) checksum of `data`.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}
