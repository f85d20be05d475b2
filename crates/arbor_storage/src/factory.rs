//! Backend factories.

use crate::backend::StorageBackend;
use crate::error::StorageResult;
use crate::file::FileBackend;
use std::fmt;
use std::path::Path;

/// Opens the backends behind journal files.
///
/// The journal never constructs files directly; it asks its factory, which
/// lets tests substitute backends that fail or lose data on demand.
pub trait BackendFactory: Send + Sync + fmt::Debug {
    /// Creates a fresh file for appending. Fails if the file already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists or cannot be created.
    fn create(&self, path: &Path) -> StorageResult<Box<dyn StorageBackend>>;

    /// Opens an existing file for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    fn open_read(&self, path: &Path) -> StorageResult<Box<dyn StorageBackend>>;
}

/// Factory producing plain [`FileBackend`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileBackendFactory;

impl BackendFactory for FileBackendFactory {
    fn create(&self, path: &Path) -> StorageResult<Box<dyn StorageBackend>> {
        Ok(Box::new(FileBackend::create_new(path)?))
    }

    fn open_read(&self, path: &Path) -> StorageResult<Box<dyn StorageBackend>> {
        Ok(Box::new(FileBackend::open_read(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn factory_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0000000000.log");
        let factory = FileBackendFactory;

        let mut writer = factory.create(&path).unwrap();
        writer.append(b"abc").unwrap();
        writer.sync().unwrap();

        let reader = factory.open_read(&path).unwrap();
        assert_eq!(reader.read_at(0, 3).unwrap(), b"abc");
    }

    #[test]
    fn factory_create_twice_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0000000000.log");
        let factory = FileBackendFactory;

        let _first = factory.create(&path).unwrap();
        assert!(factory.create(&path).is_err());
    }
}
