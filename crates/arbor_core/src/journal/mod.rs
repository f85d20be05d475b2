//! Write-ahead journal.
//!
//! The journal is an append-only sequence of [`Loggable`] records spread over
//! numbered files. Each record gets an [`Lsn`](crate::Lsn) when it is
//! appended; it becomes durable when the journal is flushed with `force`.
//!
//! ## Entry Format
//!
//! ```text
//! ┌──────┬────────┬────────┬──────────┬───────┐
//! │ kind │ txn id │ length │   data   │ crc32 │
//! │ (1)  │  (8)   │  (2)   │ (length) │  (4)  │
//! └──────┴────────┴────────┴──────────┴───────┘
//! ```
//!
//! Each file starts with the magic `AXJL` and a format version.
//!
//! ## Streaming Reads
//!
//! [`JournalReader`] walks one file with a bounded buffer. A truncated tail
//! ends the log cleanly; a checksum mismatch is reported as corruption.

mod reader;
mod record;
mod writer;

pub use reader::JournalReader;
pub use record::{
    compute_crc32, Loggable, RecordKind, CRC_SIZE, ENTRY_HEADER_SIZE, FILE_HEADER_SIZE,
    FILE_MAGIC, FILE_VERSION, MAX_PAYLOAD_SIZE,
};
pub use writer::{journal_file_name, Journal};
