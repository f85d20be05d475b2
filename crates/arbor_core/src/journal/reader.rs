//! Streaming journal reader.
//!
//! Reads the entries of one journal file in order with a bounded read buffer,
//! so recovery memory stays constant regardless of journal size.

use crate::error::{CoreError, CoreResult};
use crate::journal::record::{
    compute_crc32, Loggable, CRC_SIZE, ENTRY_HEADER_SIZE, FILE_HEADER_SIZE, FILE_MAGIC,
    FILE_VERSION,
};
use crate::lsn::Lsn;
use crate::types::TxnId;
use arbor_storage::StorageBackend;

/// Read buffer size for streaming iteration.
const READ_BUFFER_SIZE: usize = 64 * 1024; // 64 KB

/// An iterator over the entries of one journal file.
///
/// # Error Handling
///
/// - A file shorter than its header reads as empty
/// - A truncated entry header or payload at the tail is a clean end of log
/// - A bad file header, checksum mismatch or undecodable known kind is
///   corruption and ends the iteration with an error
/// - Unknown kinds are returned as [`Loggable::Opaque`]
pub struct JournalReader {
    backend: Box<dyn StorageBackend>,
    file: u16,
    total_size: u64,
    /// File offset of the next entry.
    position: u64,
    buffer: Vec<u8>,
    buffer_pos: usize,
    buffer_len: usize,
    finished: bool,
}

impl JournalReader {
    /// Opens a reader over `backend`, which holds journal file number `file`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::JournalCorruption`] if the file header is invalid,
    /// or a storage error if it cannot be read.
    pub fn new(file: u16, backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        let total_size = backend.size()?;
        let mut reader = Self {
            backend,
            file,
            total_size,
            position: FILE_HEADER_SIZE as u64,
            buffer: vec![0u8; READ_BUFFER_SIZE],
            buffer_pos: 0,
            buffer_len: 0,
            finished: false,
        };

        if total_size < FILE_HEADER_SIZE as u64 {
            // Crashed while creating the file.
            reader.finished = true;
            return Ok(reader);
        }

        let header = reader.backend.read_at(0, FILE_HEADER_SIZE)?;
        if header[0..4] != FILE_MAGIC {
            return Err(CoreError::journal_corruption(format!(
                "journal file {file} has an invalid magic number"
            )));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > FILE_VERSION {
            return Err(CoreError::journal_corruption(format!(
                "journal file {file} has unsupported version {version}"
            )));
        }

        Ok(reader)
    }

    /// Returns the journal file number being read.
    #[must_use]
    pub fn file(&self) -> u16 {
        self.file
    }

    /// Returns the position of the next entry.
    ///
    /// After an error this is the position of the damaged entry.
    #[must_use]
    pub fn next_lsn(&self) -> Lsn {
        Lsn::new(self.file, self.position)
    }

    /// Returns the number of bytes between the current position and the end
    /// of the file.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.total_size.saturating_sub(self.position)
    }

    /// Reads every remaining entry.
    ///
    /// # Errors
    ///
    /// Returns the first corruption or I/O error encountered.
    pub fn read_all(self) -> CoreResult<Vec<(Lsn, Loggable)>> {
        self.collect()
    }

    /// Ensures `min_bytes` starting at the current position are buffered.
    ///
    /// Returns `false` if the file ends first.
    fn ensure_buffered(&mut self, min_bytes: usize) -> CoreResult<bool> {
        let available = self.buffer_len - self.buffer_pos;
        if available >= min_bytes {
            return Ok(true);
        }

        let remaining = usize::try_from(self.remaining()).unwrap_or(usize::MAX);
        if remaining < min_bytes {
            return Ok(false);
        }

        if self.buffer_pos > 0 && available > 0 {
            self.buffer.copy_within(self.buffer_pos..self.buffer_len, 0);
        }
        self.buffer_len = available;
        self.buffer_pos = 0;

        if min_bytes > self.buffer.len() {
            self.buffer.resize(min_bytes.next_power_of_two(), 0);
        }

        let to_read = std::cmp::min(self.buffer.len() - self.buffer_len, remaining - available);
        if to_read > 0 {
            let data = self
                .backend
                .read_at(self.position + available as u64, to_read)?;
            self.buffer[self.buffer_len..self.buffer_len + data.len()].copy_from_slice(&data);
            self.buffer_len += data.len();
        }

        Ok(self.buffer_len >= min_bytes)
    }

    fn read_next(&mut self) -> CoreResult<Option<(Lsn, Loggable)>> {
        if self.finished {
            return Ok(None);
        }

        let lsn = self.next_lsn();

        if !self.ensure_buffered(ENTRY_HEADER_SIZE)? {
            self.finished = true;
            return Ok(None);
        }

        let header = &self.buffer[self.buffer_pos..self.buffer_pos + ENTRY_HEADER_SIZE];
        let kind = header[0];
        let mut txn_bytes = [0u8; 8];
        txn_bytes.copy_from_slice(&header[1..9]);
        let txn = TxnId::new(u64::from_le_bytes(txn_bytes));
        let data_len = u16::from_le_bytes([header[9], header[10]]) as usize;

        let entry_len = ENTRY_HEADER_SIZE + data_len + CRC_SIZE;
        if !self.ensure_buffered(entry_len)? {
            self.finished = true;
            return Ok(None);
        }

        let entry = &self.buffer[self.buffer_pos..self.buffer_pos + entry_len];
        let body = &entry[..ENTRY_HEADER_SIZE + data_len];
        let mut crc_bytes = [0u8; CRC_SIZE];
        crc_bytes.copy_from_slice(&entry[ENTRY_HEADER_SIZE + data_len..]);
        let expected = u32::from_le_bytes(crc_bytes);
        let actual = compute_crc32(body);
        if expected != actual {
            self.finished = true;
            return Err(CoreError::ChecksumMismatch { expected, actual });
        }

        let record = match Loggable::decode(kind, txn, &body[ENTRY_HEADER_SIZE..]) {
            Ok(record) => record,
            Err(e) => {
                self.finished = true;
                return Err(e);
            }
        };

        self.buffer_pos += entry_len;
        self.position += entry_len as u64;
        Ok(Some((lsn, record)))
    }
}

impl Iterator for JournalReader {
    type Item = CoreResult<(Lsn, Loggable)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next().transpose()
    }
}

impl std::fmt::Debug for JournalReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalReader")
            .field("file", &self.file)
            .field("position", &self.position)
            .field("total_size", &self.total_size)
            .finish_non_exhaustive()
    }
}
