//! Transaction system configuration.

use crate::error::{CoreError, CoreResult};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the journal and transaction manager.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the journal files and lock file.
    pub journal_dir: PathBuf,

    /// Whether transactions are journaled at all.
    ///
    /// When false no journal is created and the manager hands out
    /// journal-free transactions.
    pub transactions_enabled: bool,

    /// Whether commits defer their flush to the next forced flush.
    pub group_commit: bool,

    /// Upper bound on how long a group-committed record may stay unsynced.
    ///
    /// Checked on the committing thread; `None` means no bound.
    pub group_commit_max_delay: Option<Duration>,

    /// Whether a commit flush also syncs the journal file.
    pub sync_on_commit: bool,

    /// Whether recovery continues past a corrupt journal.
    pub force_restart: bool,

    /// Files smaller than this are not rotated at checkpoint.
    pub journal_size_min: u64,

    /// File size at which a checkpoint is requested.
    pub journal_size_limit: u64,

    /// Size of the in-memory write buffer.
    pub buffer_size: usize,

    /// How long a lock acquisition may wait before failing.
    pub lock_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            journal_dir: PathBuf::from("journal"),
            transactions_enabled: true,
            group_commit: false,
            group_commit_max_delay: None,
            sync_on_commit: true,
            force_restart: false,
            journal_size_min: 1024 * 1024,         // 1 MiB
            journal_size_limit: 100 * 1024 * 1024, // 100 MiB
            buffer_size: 1024 * 1024,              // 1 MiB
            lock_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the journal directory.
    #[must_use]
    pub fn journal_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.journal_dir = dir.into();
        self
    }

    /// Enables or disables journaling.
    #[must_use]
    pub const fn transactions_enabled(mut self, value: bool) -> Self {
        self.transactions_enabled = value;
        self
    }

    /// Enables or disables group commit.
    #[must_use]
    pub const fn group_commit(mut self, value: bool) -> Self {
        self.group_commit = value;
        self
    }

    /// Sets the maximum group-commit delay.
    #[must_use]
    pub const fn group_commit_max_delay(mut self, delay: Option<Duration>) -> Self {
        self.group_commit_max_delay = delay;
        self
    }

    /// Sets whether commit flushes sync the journal file.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets whether recovery continues past corruption.
    #[must_use]
    pub const fn force_restart(mut self, value: bool) -> Self {
        self.force_restart = value;
        self
    }

    /// Sets the minimum file size for rotation.
    #[must_use]
    pub const fn journal_size_min(mut self, size: u64) -> Self {
        self.journal_size_min = size;
        self
    }

    /// Sets the file size that triggers a checkpoint request.
    #[must_use]
    pub const fn journal_size_limit(mut self, size: u64) -> Self {
        self.journal_size_limit = size;
        self
    }

    /// Sets the write buffer size.
    #[must_use]
    pub const fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Sets the lock acquisition timeout.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Checks the settings for contradictions.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Configuration`] if the buffer is empty or the size
    /// limit is below the rotation minimum.
    pub fn validate(&self) -> CoreResult<()> {
        if self.buffer_size == 0 {
            return Err(CoreError::configuration("buffer_size must be non-zero"));
        }
        if self.journal_size_limit < self.journal_size_min {
            return Err(CoreError::configuration(format!(
                "journal_size_limit ({}) is below journal_size_min ({})",
                self.journal_size_limit, self.journal_size_min
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.transactions_enabled);
        assert!(!config.group_commit);
        assert!(config.sync_on_commit);
        assert!(!config.force_restart);
        assert_eq!(config.group_commit_max_delay, None);
        assert_eq!(config.journal_size_min, 1024 * 1024);
        assert_eq!(config.lock_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .journal_dir("/tmp/arbor-journal")
            .group_commit(true)
            .group_commit_max_delay(Some(Duration::from_millis(5)))
            .sync_on_commit(false)
            .buffer_size(4096);

        assert_eq!(config.journal_dir, PathBuf::from("/tmp/arbor-journal"));
        assert!(config.group_commit);
        assert_eq!(config.group_commit_max_delay, Some(Duration::from_millis(5)));
        assert!(!config.sync_on_commit);
        assert_eq!(config.buffer_size, 4096);
    }

    #[test]
    fn validate_rejects_inverted_sizes() {
        let config = Config::new().journal_size_min(10).journal_size_limit(5);
        assert!(matches!(
            config.validate(),
            Err(CoreError::Configuration { .. })
        ));

        let config = Config::new().buffer_size(0);
        assert!(config.validate().is_err());
    }
}
