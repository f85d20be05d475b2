//! Error types for Arbor core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the transactional core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] arbor_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The journal directory or configuration is unusable.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },

    /// Appending to or flushing the journal failed.
    ///
    /// Once raised, the journal refuses every further write.
    #[error("journal write failed: {message}")]
    JournalWrite {
        /// Description of the failure.
        message: String,
    },

    /// A lock could not be acquired.
    #[error("failed to acquire lock {lock}: {message}")]
    LockAcquisition {
        /// Name of the lock.
        lock: String,
        /// Why acquisition failed.
        message: String,
    },

    /// Recovery could not restore a consistent state.
    #[error("recovery failed: {message}")]
    Recovery {
        /// Description of the failure.
        message: String,
    },

    /// A journal file is corrupted or invalid.
    #[error("journal corruption: {message}")]
    JournalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// The transaction manager or journal has been shut down.
    #[error("transaction system is shut down")]
    ShutDown,

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// A record payload does not fit the entry format.
    #[error("record too large: {size} bytes exceeds maximum of {max} bytes")]
    RecordTooLarge {
        /// Encoded payload size.
        size: usize,
        /// Maximum payload size.
        max: usize,
    },
}

impl CoreError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a journal write error.
    pub fn journal_write(message: impl Into<String>) -> Self {
        Self::JournalWrite {
            message: message.into(),
        }
    }

    /// Creates a lock acquisition error.
    pub fn lock_acquisition(lock: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LockAcquisition {
            lock: lock.into(),
            message: message.into(),
        }
    }

    /// Creates a recovery error.
    pub fn recovery(message: impl Into<String>) -> Self {
        Self::Recovery {
            message: message.into(),
        }
    }

    /// Creates a journal corruption error.
    pub fn journal_corruption(message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if the error came from reading a damaged journal.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::JournalCorruption { .. } | Self::ChecksumMismatch { .. }
        )
    }
}
