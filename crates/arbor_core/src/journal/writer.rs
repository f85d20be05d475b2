//! The write-ahead journal.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::journal::reader::JournalReader;
use crate::journal::record::{Loggable, FILE_HEADER_SIZE, FILE_MAGIC, FILE_VERSION};
use crate::lsn::Lsn;
use crate::types::TxnId;
use arbor_storage::{BackendFactory, StorageBackend};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// Name of the lock file guarding the journal directory.
const LOCK_FILE: &str = "journal.lck";

/// Extension of journal files.
const FILE_EXTENSION: &str = "log";

/// Returns the file name of journal file `number`.
#[must_use]
pub fn journal_file_name(number: u16) -> String {
    format!("{number:010x}.{FILE_EXTENSION}")
}

fn parse_file_name(name: &str) -> Option<u16> {
    let stem = name.strip_suffix(".log")?;
    if stem.len() != 10 {
        return None;
    }
    u16::from_str_radix(stem, 16).ok()
}

fn list_files(dir: &Path) -> CoreResult<Vec<u16>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(number) = entry.file_name().to_str().and_then(parse_file_name) {
            files.push(number);
        }
    }
    files.sort_unstable();
    Ok(files)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[derive(Debug, Clone, Copy)]
struct JournalSettings {
    sync_on_commit: bool,
    size_min: u64,
    size_limit: u64,
    buffer_size: usize,
}

struct JournalInner {
    /// The file currently written, if any.
    file: Option<Box<dyn StorageBackend>>,
    file_number: u16,
    highest_file: Option<u16>,
    buffer: Vec<u8>,
    /// File offset at which `buffer` starts.
    buffer_offset: u64,
    last_written: Lsn,
    last_synced: Lsn,
    /// When the oldest unsynced record was appended.
    unsynced_since: Option<Instant>,
    in_recovery: bool,
    poisoned: bool,
    shut_down: bool,
    lock_file: Option<File>,
}

impl JournalInner {
    fn next_lsn(&self) -> Lsn {
        Lsn::new(self.file_number, self.buffer_offset + self.buffer.len() as u64)
    }

    fn file_size(&self) -> u64 {
        self.buffer_offset + self.buffer.len() as u64
    }

    fn check_writable(&self) -> CoreResult<()> {
        if self.shut_down {
            return Err(CoreError::ShutDown);
        }
        if self.poisoned {
            return Err(CoreError::journal_write(
                "journal is unusable after an earlier write failure",
            ));
        }
        if self.in_recovery {
            return Err(CoreError::invalid_operation(
                "journal is in recovery and refuses writes",
            ));
        }
        if self.file.is_none() {
            return Err(CoreError::invalid_operation("no journal file is open"));
        }
        Ok(())
    }

    /// Marks the journal unusable and builds the error to return.
    fn fail(&mut self, action: &str, cause: impl fmt::Display) -> CoreError {
        self.poisoned = true;
        error!(file = self.file_number, %cause, "journal {action} failed");
        CoreError::journal_write(format!("{action} failed: {cause}"))
    }

    /// Writes the buffer to the current file.
    fn write_buffer(&mut self) -> CoreResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let result = match self.file.as_mut() {
            Some(file) => file.append(&self.buffer).and_then(|_| file.flush()),
            None => return Err(CoreError::invalid_operation("no journal file is open")),
        };
        match result {
            Ok(()) => {
                self.buffer_offset += self.buffer.len() as u64;
                self.buffer.clear();
                Ok(())
            }
            Err(e) => Err(self.fail("write", e)),
        }
    }

    /// Syncs the current file; the buffer must already be written.
    fn sync_file(&mut self) -> CoreResult<()> {
        let result = match self.file.as_mut() {
            Some(file) => file.sync(),
            None => return Ok(()),
        };
        match result {
            Ok(()) => {
                self.last_synced = self.last_written;
                self.unsynced_since = None;
                Ok(())
            }
            Err(e) => Err(self.fail("sync", e)),
        }
    }
}

/// The write-ahead journal.
///
/// Records are encoded into an in-memory buffer and become visible to
/// recovery only once the buffer is written out by [`Journal::flush`], a full
/// buffer, a checkpoint or shutdown. Dropping a journal without calling
/// [`Journal::shutdown`] discards the buffer, exactly as a crash would.
///
/// # Files
///
/// ```text
/// <journal_dir>/
/// ├─ journal.lck        # exclusive lock held while the journal is open
/// ├─ 0000000001.log     # journal files, numbered in hex
/// └─ 0000000002.log
/// ```
///
/// # Failure
///
/// Any I/O error while writing poisons the journal: the failing call returns
/// [`CoreError::JournalWrite`] and so does every later write.
pub struct Journal {
    dir: PathBuf,
    factory: Arc<dyn BackendFactory>,
    settings: JournalSettings,
    inner: Mutex<JournalInner>,
    checkpoint_requested: AtomicBool,
}

impl Journal {
    /// Opens the journal directory described by `config`.
    ///
    /// Creates the directory if missing, takes the directory lock and finds
    /// the existing journal files. No file is opened for writing until
    /// [`Journal::switch_files`] is called, which recovery does.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Configuration`] if the directory cannot be
    /// created, is not a writable directory, or is locked by another journal.
    pub fn open(config: &Config, factory: Arc<dyn BackendFactory>) -> CoreResult<Self> {
        config.validate()?;
        let dir = config.journal_dir.clone();

        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| {
                CoreError::configuration(format!(
                    "cannot create journal directory {}: {e}",
                    dir.display()
                ))
            })?;
        }

        if !dir.is_dir() {
            return Err(CoreError::configuration(format!(
                "journal path is not a directory: {}",
                dir.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))
            .map_err(|e| {
                CoreError::configuration(format!(
                    "journal directory {} is not writable: {e}",
                    dir.display()
                ))
            })?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::configuration(format!(
                "journal directory {} is locked by another process",
                dir.display()
            )));
        }

        let files = list_files(&dir)?;
        let highest_file = files.last().copied();
        info!(dir = %dir.display(), files = files.len(), "journal opened");

        Ok(Self {
            dir,
            factory,
            settings: JournalSettings {
                sync_on_commit: config.sync_on_commit,
                size_min: config.journal_size_min,
                size_limit: config.journal_size_limit,
                buffer_size: config.buffer_size,
            },
            inner: Mutex::new(JournalInner {
                file: None,
                file_number: highest_file.unwrap_or(0),
                highest_file,
                buffer: Vec::with_capacity(config.buffer_size),
                buffer_offset: 0,
                last_written: Lsn::ZERO,
                last_synced: Lsn::ZERO,
                unsynced_since: None,
                in_recovery: false,
                poisoned: false,
                shut_down: false,
                lock_file: Some(lock_file),
            }),
            checkpoint_requested: AtomicBool::new(false),
        })
    }

    /// Appends a record and returns its Lsn.
    ///
    /// The record is buffered; it is durable only after a forced flush.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::JournalWrite`] on I/O failure or if the journal
    /// was poisoned earlier, [`CoreError::ShutDown`] after shutdown, and
    /// [`CoreError::InvalidOperation`] during recovery or before a file is
    /// open.
    pub fn append(&self, record: &Loggable) -> CoreResult<Lsn> {
        let entry = record.encode_entry()?;
        let mut inner = self.inner.lock();
        inner.check_writable()?;
        self.append_locked(&mut inner, &entry)
    }

    fn append_locked(&self, inner: &mut JournalInner, entry: &[u8]) -> CoreResult<Lsn> {
        if !inner.buffer.is_empty() && inner.buffer.len() + entry.len() > self.settings.buffer_size
        {
            inner.write_buffer()?;
        }

        let lsn = inner.next_lsn();
        inner.buffer.extend_from_slice(entry);
        inner.last_written = lsn;
        if inner.unsynced_since.is_none() {
            inner.unsynced_since = Some(Instant::now());
        }
        Ok(lsn)
    }

    /// Writes buffered records to the current file.
    ///
    /// The file is synced when `force` is set or the journal syncs on commit,
    /// and only if records newer than the last sync exist, so concurrent
    /// flushes coalesce into one sync.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::JournalWrite`] on I/O failure.
    pub fn flush(&self, force: bool) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.shut_down || inner.file.is_none() {
            return Ok(());
        }
        if inner.poisoned {
            return Err(CoreError::journal_write(
                "journal is unusable after an earlier write failure",
            ));
        }
        self.flush_locked(&mut inner, force)
    }

    fn flush_locked(&self, inner: &mut JournalInner, force: bool) -> CoreResult<()> {
        inner.write_buffer()?;
        if (force || self.settings.sync_on_commit) && inner.last_synced < inner.last_written {
            inner.sync_file()?;
        }

        if inner.file_size() >= self.settings.size_limit
            && !self.checkpoint_requested.swap(true, Ordering::SeqCst)
        {
            warn!(
                file = inner.file_number,
                size = inner.file_size(),
                limit = self.settings.size_limit,
                "journal file reached its size limit, requesting checkpoint"
            );
        }
        Ok(())
    }

    /// Forces a flush if the oldest unsynced record is older than `max_delay`.
    ///
    /// Returns whether a flush happened.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::JournalWrite`] on I/O failure.
    pub fn flush_if_overdue(&self, max_delay: Duration) -> CoreResult<bool> {
        let mut inner = self.inner.lock();
        let overdue = inner
            .unsynced_since
            .is_some_and(|since| since.elapsed() >= max_delay);
        if !overdue || inner.shut_down || inner.file.is_none() {
            return Ok(false);
        }
        if inner.poisoned {
            return Err(CoreError::journal_write(
                "journal is unusable after an earlier write failure",
            ));
        }
        self.flush_locked(&mut inner, true)?;
        Ok(true)
    }

    /// Writes a checkpoint record and makes the journal durable.
    ///
    /// With `switch_files`, a file larger than the configured minimum is
    /// closed, a new one is started and all older files are deleted.
    /// The caller guarantees that no transaction is active.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::JournalWrite`] on I/O failure.
    pub fn checkpoint(&self, txn: TxnId, switch_files: bool) -> CoreResult<Lsn> {
        let mut inner = self.inner.lock();
        inner.check_writable()?;

        let lsn = self.write_checkpoint_locked(&mut inner, txn)?;
        let switched = switch_files && inner.file_size() > self.settings.size_min;
        if switched {
            self.switch_locked(&mut inner)?;
            self.remove_files_before(inner.file_number);
        } else {
            self.flush_locked(&mut inner, true)?;
        }

        self.checkpoint_requested.store(false, Ordering::SeqCst);
        info!(%lsn, %txn, switched, "checkpoint written");
        Ok(lsn)
    }

    fn write_checkpoint_locked(&self, inner: &mut JournalInner, txn: TxnId) -> CoreResult<Lsn> {
        let record = Loggable::Checkpoint {
            txn,
            stored_lsn: inner.next_lsn(),
            timestamp: now_millis(),
        };
        let entry = record.encode_entry()?;
        // Flushing for room keeps the offset, so the stored Lsn stays exact.
        self.append_locked(inner, &entry)
    }

    /// Starts the next journal file.
    ///
    /// Buffered records are written and synced to the old file first. An
    /// existing file with the new name is moved aside to `*.log.bak`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::JournalWrite`] if the file cannot be created.
    pub fn switch_files(&self) -> CoreResult<u16> {
        let mut inner = self.inner.lock();
        if inner.shut_down {
            return Err(CoreError::ShutDown);
        }
        if inner.poisoned {
            return Err(CoreError::journal_write(
                "journal is unusable after an earlier write failure",
            ));
        }
        self.switch_locked(&mut inner)
    }

    fn switch_locked(&self, inner: &mut JournalInner) -> CoreResult<u16> {
        if inner.file.is_some() {
            inner.write_buffer()?;
            inner.sync_file()?;
        }

        let next = match inner.highest_file {
            Some(highest) => highest
                .checked_add(1)
                .ok_or_else(|| CoreError::configuration("journal file numbers exhausted"))?,
            None => 1,
        };

        let path = self.file_path(next);
        if path.exists() {
            let backup = path.with_extension("log.bak");
            warn!(path = %path.display(), "journal file already exists, moving it aside");
            fs::rename(&path, &backup).map_err(|e| inner.fail("rename", e))?;
        }

        let mut file = self
            .factory
            .create(&path)
            .map_err(|e| inner.fail("create", e))?;

        let mut header = Vec::with_capacity(FILE_HEADER_SIZE);
        header.extend_from_slice(&FILE_MAGIC);
        header.extend_from_slice(&FILE_VERSION.to_le_bytes());
        file.append(&header)
            .and_then(|_| file.sync())
            .map_err(|e| inner.fail("header write", e))?;

        inner.file = Some(file);
        inner.file_number = next;
        inner.highest_file = Some(next);
        inner.buffer.clear();
        inner.buffer_offset = FILE_HEADER_SIZE as u64;
        inner.last_synced = inner.last_written;
        inner.unsynced_since = None;

        debug!(file = next, "switched journal file");
        Ok(next)
    }

    fn remove_files_before(&self, current: u16) {
        let files = match list_files(&self.dir) {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "cannot list journal files for removal");
                return;
            }
        };
        for number in files.into_iter().filter(|n| *n < current) {
            let path = self.file_path(number);
            match fs::remove_file(&path) {
                Ok(()) => debug!(file = number, "removed old journal file"),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot remove old journal file")
                }
            }
        }
    }

    /// Shuts the journal down.
    ///
    /// Optionally writes a final checkpoint, then flushes, syncs, closes the
    /// current file and releases the directory lock. Calling it again has no
    /// effect.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::JournalWrite`] if the final write fails. The
    /// journal is shut down either way.
    pub fn shutdown(&self, txn: TxnId, checkpoint: bool) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.shut_down {
            return Ok(());
        }

        let result = if inner.file.is_some() && !inner.poisoned && !inner.in_recovery {
            let written = if checkpoint {
                self.write_checkpoint_locked(&mut inner, txn).map(|_| ())
            } else {
                Ok(())
            };
            written.and_then(|()| self.flush_locked(&mut inner, true))
        } else {
            Ok(())
        };

        inner.file = None;
        inner.buffer.clear();
        inner.shut_down = true;
        if let Some(lock_file) = inner.lock_file.take() {
            if let Err(e) = FileExt::unlock(&lock_file) {
                warn!(error = %e, "cannot release journal directory lock");
            }
        }

        info!(dir = %self.dir.display(), checkpoint, "journal shut down");
        result
    }

    /// Opens a reader over journal file `number`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or its header is invalid.
    pub fn reader(&self, number: u16) -> CoreResult<JournalReader> {
        let backend = self.factory.open_read(&self.file_path(number))?;
        JournalReader::new(number, backend)
    }

    /// Lists the journal file numbers present on disk, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn files(&self) -> CoreResult<Vec<u16>> {
        list_files(&self.dir)
    }

    /// Returns the path of journal file `number`.
    #[must_use]
    pub fn file_path(&self, number: u16) -> PathBuf {
        self.dir.join(journal_file_name(number))
    }

    /// Returns the journal directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the number of the file being written, if one is open.
    #[must_use]
    pub fn current_file(&self) -> Option<u16> {
        let inner = self.inner.lock();
        inner.file.as_ref().map(|_| inner.file_number)
    }

    /// Returns the Lsn of the last appended record.
    #[must_use]
    pub fn last_written_lsn(&self) -> Lsn {
        self.inner.lock().last_written
    }

    /// Returns the Lsn of the last record known to be on stable storage.
    #[must_use]
    pub fn last_synced_lsn(&self) -> Lsn {
        self.inner.lock().last_synced
    }

    /// Returns the Lsn the next appended record will get.
    #[must_use]
    pub fn current_lsn(&self) -> Lsn {
        self.inner.lock().next_lsn()
    }

    /// Returns true once the current file has reached the size limit and no
    /// checkpoint has been written since.
    #[must_use]
    pub fn checkpoint_requested(&self) -> bool {
        self.checkpoint_requested.load(Ordering::SeqCst)
    }

    /// Enables or disables the in-recovery write guard.
    pub fn set_in_recovery(&self, in_recovery: bool) {
        self.inner.lock().in_recovery = in_recovery;
    }

    /// Returns true while recovery is running.
    #[must_use]
    pub fn in_recovery(&self) -> bool {
        self.inner.lock().in_recovery
    }

    /// Returns true after [`Journal::shutdown`].
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.lock().shut_down
    }

    /// Returns true if an earlier write failure made the journal unusable.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.inner.lock().poisoned
    }
}

impl fmt::Debug for Journal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Journal")
            .field("dir", &self.dir)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageOp;
    use crate::types::PageNum;
    use arbor_storage::FileBackendFactory;
    use tempfile::{tempdir, TempDir};

    fn config(dir: &TempDir) -> Config {
        Config::new().journal_dir(dir.path().join("journal"))
    }

    fn open(config: &Config) -> Journal {
        let journal = Journal::open(config, Arc::new(FileBackendFactory)).unwrap();
        journal.switch_files().unwrap();
        journal
    }

    fn store(txn: u64, slot: u16) -> Loggable {
        Loggable::page(
            TxnId::new(txn),
            PageOp::Store {
                page: PageNum::new(1),
                slot,
                value: b"payload".to_vec(),
            },
        )
    }

    fn read_current(journal: &Journal) -> Vec<(Lsn, Loggable)> {
        let file = journal.current_file().unwrap();
        journal.reader(file).unwrap().read_all().unwrap()
    }

    #[test]
    fn file_names() {
        assert_eq!(journal_file_name(1), "0000000001.log");
        assert_eq!(journal_file_name(0xab), "00000000ab.log");
        assert_eq!(parse_file_name("00000000ab.log"), Some(0xab));
        assert_eq!(parse_file_name("00000000ab.log.bak"), None);
        assert_eq!(parse_file_name("journal.lck"), None);
    }

    #[test]
    fn open_creates_directory_and_locks_it() {
        let dir = tempdir().unwrap();
        let config = config(&dir);
        let journal = Journal::open(&config, Arc::new(FileBackendFactory)).unwrap();
        assert!(config.journal_dir.join(LOCK_FILE).exists());
        assert!(journal.files().unwrap().is_empty());

        let second = Journal::open(&config, Arc::new(FileBackendFactory));
        assert!(matches!(second, Err(CoreError::Configuration { .. })));
    }

    #[test]
    fn open_rejects_a_plain_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal");
        std::fs::write(&path, b"not a directory").unwrap();

        let result = Journal::open(&Config::new().journal_dir(&path), Arc::new(FileBackendFactory));
        assert!(matches!(result, Err(CoreError::Configuration { .. })));
    }

    #[test]
    fn append_requires_open_file() {
        let dir = tempdir().unwrap();
        let journal = Journal::open(&config(&dir), Arc::new(FileBackendFactory)).unwrap();
        let result = journal.append(&Loggable::TxnStart { txn: TxnId::new(1) });
        assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn lsns_increase_and_match_positions() {
        let dir = tempdir().unwrap();
        let journal = open(&config(&dir));

        let lsns: Vec<Lsn> = (0..20)
            .map(|i| journal.append(&store(1, i)).unwrap())
            .collect();
        assert!(lsns.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(lsns[0], Lsn::new(1, FILE_HEADER_SIZE as u64));
        assert_eq!(journal.last_written_lsn(), lsns[19]);

        journal.flush(true).unwrap();
        let read: Vec<Lsn> = read_current(&journal).into_iter().map(|(l, _)| l).collect();
        assert_eq!(read, lsns);
        assert_eq!(journal.last_synced_lsn(), lsns[19]);
    }

    #[test]
    fn unflushed_records_are_lost_on_drop() {
        let dir = tempdir().unwrap();
        let config = config(&dir);
        {
            let journal = open(&config);
            journal.append(&store(1, 0)).unwrap();
            journal.flush(true).unwrap();
            journal.append(&store(1, 1)).unwrap();
        }

        let journal = Journal::open(&config, Arc::new(FileBackendFactory)).unwrap();
        let entries = journal.reader(1).unwrap().read_all().unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn full_buffer_is_written_without_flush() {
        let dir = tempdir().unwrap();
        let entry_size = store(1, 0).entry_size();
        let journal = open(&config(&dir).buffer_size(entry_size * 2));

        for slot in 0..5 {
            journal.append(&store(1, slot)).unwrap();
        }
        // Four entries were pushed out by the full buffer; the fifth is still buffered.
        assert_eq!(read_current(&journal).len(), 4);
    }

    #[test]
    fn checkpoint_below_minimum_keeps_the_file() {
        let dir = tempdir().unwrap();
        let journal = open(&config(&dir));
        journal.append(&store(1, 0)).unwrap();

        let lsn = journal.checkpoint(TxnId::new(2), true).unwrap();
        assert_eq!(journal.current_file(), Some(1));

        let entries = read_current(&journal);
        let (last_lsn, last) = entries.last().unwrap();
        assert_eq!(*last_lsn, lsn);
        assert!(matches!(last, Loggable::Checkpoint { stored_lsn, .. } if *stored_lsn == lsn));
    }

    #[test]
    fn checkpoint_switches_and_removes_old_files() {
        let dir = tempdir().unwrap();
        let journal = open(&config(&dir).journal_size_min(0));
        journal.append(&store(1, 0)).unwrap();

        let lsn = journal.checkpoint(TxnId::new(2), true).unwrap();
        assert_eq!(lsn.file(), 1);
        assert_eq!(journal.current_file(), Some(2));
        assert_eq!(journal.files().unwrap(), vec![2]);

        let next = journal.append(&store(3, 0)).unwrap();
        assert!(next > lsn);
        assert_eq!(next, Lsn::new(2, FILE_HEADER_SIZE as u64));
    }

    #[test]
    fn size_limit_requests_checkpoint() {
        let dir = tempdir().unwrap();
        let journal = open(&config(&dir).journal_size_min(0).journal_size_limit(64));

        journal.append(&store(1, 0)).unwrap();
        journal.flush(false).unwrap();
        assert!(!journal.checkpoint_requested());

        journal.append(&store(1, 1)).unwrap();
        journal.append(&store(1, 2)).unwrap();
        journal.flush(false).unwrap();
        assert!(journal.checkpoint_requested());

        journal.checkpoint(TxnId::new(2), true).unwrap();
        assert!(!journal.checkpoint_requested());
    }

    #[test]
    fn switch_moves_existing_file_aside() {
        let dir = tempdir().unwrap();
        let journal = open(&config(&dir));
        let stale = journal.file_path(2);
        std::fs::write(&stale, b"stale").unwrap();

        assert_eq!(journal.switch_files().unwrap(), 2);
        assert!(stale.with_extension("log.bak").exists());
        assert!(read_current(&journal).is_empty());
    }

    #[test]
    fn flush_if_overdue_respects_delay() {
        let dir = tempdir().unwrap();
        let journal = open(&config(&dir).sync_on_commit(false));
        journal.append(&store(1, 0)).unwrap();

        assert!(!journal.flush_if_overdue(Duration::from_secs(3600)).unwrap());
        assert!(read_current(&journal).is_empty());

        assert!(journal.flush_if_overdue(Duration::ZERO).unwrap());
        assert_eq!(read_current(&journal).len(), 1);
        assert_eq!(journal.last_synced_lsn(), journal.last_written_lsn());
        assert!(!journal.flush_if_overdue(Duration::ZERO).unwrap());
    }

    #[test]
    fn recovery_guard_refuses_writes() {
        let dir = tempdir().unwrap();
        let journal = open(&config(&dir));
        journal.set_in_recovery(true);
        assert!(journal.append(&store(1, 0)).is_err());
        journal.set_in_recovery(false);
        assert!(journal.append(&store(1, 0)).is_ok());
    }

    #[test]
    fn shutdown_is_idempotent_and_releases_lock() {
        let dir = tempdir().unwrap();
        let config = config(&dir);
        let journal = open(&config);
        journal.append(&store(1, 0)).unwrap();

        journal.shutdown(TxnId::new(2), true).unwrap();
        journal.shutdown(TxnId::new(2), true).unwrap();
        assert!(journal.is_shut_down());
        assert!(matches!(
            journal.append(&store(1, 1)),
            Err(CoreError::ShutDown)
        ));

        let reopened = Journal::open(&config, Arc::new(FileBackendFactory)).unwrap();
        let entries = reopened.reader(1).unwrap().read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[1].1, Loggable::Checkpoint { .. }));
    }
}
