// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! File-backed JSON document store.
//!
//! Every record is one JSON file under the data root. Writes go through a
//! temp file and a rename so readers never observe a half-written document.
//! Two primitives carry the consistency guarantees the services rely on:
//!
//! - [`DocumentStorage::create_json`] uses create-new semantics, so a record
//!   with a deterministic id can only be created once.
//! - [`DocumentStorage::modify_json`] runs read-modify-write under the
//!   storage write lock, so concurrent updates of one document serialize.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Mutex;

use serde::{de::DeserializeOwned, Serialize};

use super::StoragePaths;

/// Error type for document storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error during file operations
    #[error("I/O error: {0}")]
    Io(io::Error),
    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),
    /// Entity already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    /// Storage not initialized
    #[error("Storage not initialized")]
    NotInitialized,
    /// Read-back mismatch during the health check
    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),
    /// Ownership check failed
    #[error("Permission denied: user {user_id} cannot access {resource}")]
    PermissionDenied { user_id: String, resource: String },
    /// Generic serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
    /// A writer panicked while holding the write lock
    #[error("Storage write lock poisoned")]
    LockPoisoned,
}

impl From<io::Error> for StorageError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(e.to_string()),
            io::ErrorKind::AlreadyExists => StorageError::AlreadyExists(e.to_string()),
            _ => StorageError::Io(e),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// JSON document store rooted at [`StoragePaths::root`].
#[derive(Debug)]
pub struct DocumentStorage {
    paths: StoragePaths,
    initialized: bool,
    write_lock: Mutex<()>,
}

impl DocumentStorage {
    /// Create a new DocumentStorage instance.
    ///
    /// Does NOT initialize the directory structure. Call `initialize()` first.
    pub fn new(paths: StoragePaths) -> Self {
        Self {
            paths,
            initialized: false,
            write_lock: Mutex::new(()),
        }
    }

    /// Get the storage paths.
    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    /// Check if storage is initialized.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Initialize the directory structure.
    ///
    /// Safe to call multiple times (idempotent).
    pub fn initialize(&mut self) -> StorageResult<()> {
        let dirs = [
            self.paths.users_dir(),
            self.paths.sessions_dir(),
            self.paths.two_factor_dir(),
            self.paths.wallets_dir(),
            self.paths.guardians_dir(),
            self.paths.recoveries_dir(),
            self.paths.notifications_dir(),
            self.paths.audit_dir(),
        ];

        for dir in dirs {
            fs::create_dir_all(&dir)?;
        }

        self.initialized = true;
        Ok(())
    }

    /// Write-read-delete probe of the data directory.
    pub fn health_check(&self) -> StorageResult<()> {
        self.ensure_initialized()?;

        let test_file = self.paths.root().join(".health_check");
        let test_data = b"health_check_data";

        fs::write(&test_file, test_data)?;
        let read_data = fs::read(&test_file)?;
        fs::remove_file(&test_file)?;

        if read_data != test_data {
            return Err(StorageError::IntegrityViolation(
                "Health check data mismatch".to_string(),
            ));
        }

        Ok(())
    }

    fn ensure_initialized(&self) -> StorageResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(StorageError::NotInitialized)
        }
    }

    // ========== JSON Documents ==========

    /// Read a JSON file and deserialize it.
    pub fn read_json<T: DeserializeOwned>(&self, path: impl AsRef<Path>) -> StorageResult<T> {
        self.ensure_initialized()?;

        let file = File::open(path.as_ref())?;
        let reader = BufReader::new(file);
        let value = serde_json::from_reader(reader)?;
        Ok(value)
    }

    /// Write a JSON file (atomic write via rename).
    pub fn write_json<T: Serialize>(&self, path: impl AsRef<Path>, value: &T) -> StorageResult<()> {
        self.ensure_initialized()?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?;
        self.write_json_locked(path.as_ref(), value)
    }

    /// Create a JSON file that must not exist yet.
    ///
    /// The document is written to a private temp file and hard-linked into
    /// place, which fails if the target exists. Returns
    /// `StorageError::AlreadyExists` when the file is already there, even if
    /// another writer created it a moment earlier.
    pub fn create_json<T: Serialize>(&self, path: impl AsRef<Path>, value: &T) -> StorageResult<()> {
        self.ensure_initialized()?;

        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        let written = (|| -> StorageResult<()> {
            let file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&temp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, value)?;
            writer.flush()?;
            Ok(())
        })();

        let linked = written.and_then(|()| {
            fs::hard_link(&temp_path, path).map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => {
                    StorageError::AlreadyExists(path.display().to_string())
                }
                _ => StorageError::from(e),
            })
        });
        if let Err(e) = fs::remove_file(&temp_path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %temp_path.display(), error = %e, "Failed to remove temp file");
            }
        }
        linked
    }

    /// Read a document, apply `f`, and write it back if `f` succeeds.
    ///
    /// The whole cycle runs under the storage write lock.
    pub fn modify_json<T, R, E, F>(&self, path: impl AsRef<Path>, f: F) -> Result<R, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<StorageError>,
        F: FnOnce(&mut T) -> Result<R, E>,
    {
        self.ensure_initialized()?;
        let path = path.as_ref();

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?;

        let mut document: T = {
            let file = File::open(path).map_err(StorageError::from)?;
            serde_json::from_reader(BufReader::new(file)).map_err(StorageError::from)?
        };

        let result = f(&mut document)?;
        self.write_json_locked(path, &document)?;
        Ok(result)
    }

    fn write_json_locked<T: Serialize>(&self, path: &Path, value: &T) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = path.with_extension("tmp");
        {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, value)?;
            writer.flush()?;
        }

        fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// Check if a file exists.
    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        File::open(path.as_ref()).is_ok()
    }

    /// Delete a file.
    pub fn delete(&self, path: impl AsRef<Path>) -> StorageResult<()> {
        self.ensure_initialized()?;
        fs::remove_file(path.as_ref())?;
        Ok(())
    }

    /// List the ids (file stems) of all files in a directory with the given extension.
    pub fn list_files(&self, dir: impl AsRef<Path>, extension: &str) -> StorageResult<Vec<String>> {
        self.ensure_initialized()?;

        let dir = dir.as_ref();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().is_none_or(|ext| ext != extension) {
                continue;
            }
            if let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }

    /// List all subdirectories in a directory.
    pub fn list_dirs(&self, dir: impl AsRef<Path>) -> StorageResult<Vec<String>> {
        self.ensure_initialized()?;

        let dir = dir.as_ref();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    /// Read every JSON document in `dir` that deserializes as `T`.
    ///
    /// Unreadable documents are skipped with a warning.
    pub fn read_all<T: DeserializeOwned>(&self, dir: impl AsRef<Path>) -> StorageResult<Vec<T>> {
        let dir = dir.as_ref();
        let ids = self.list_files(dir, "json")?;

        let mut documents = Vec::with_capacity(ids.len());
        for id in ids {
            match self.read_json(dir.join(format!("{id}.json"))) {
                Ok(document) => documents.push(document),
                Err(e) => {
                    tracing::warn!(document = %id, error = %e, "Skipping unreadable document")
                }
            }
        }
        Ok(documents)
    }

    // ========== Raw File Operations (for PEM keys, audit logs) ==========

    /// Write raw bytes to a file.
    pub fn write_raw(&self, path: impl AsRef<Path>, data: &[u8]) -> StorageResult<()> {
        self.ensure_initialized()?;

        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(data)?;
        file.flush()?;
        Ok(())
    }

    /// Append raw bytes to a file, creating it if needed.
    pub fn append_raw(&self, path: impl AsRef<Path>, data: &[u8]) -> StorageResult<()> {
        self.ensure_initialized()?;

        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(data)?;
        file.flush()?;
        Ok(())
    }

    /// Read raw bytes from a file.
    pub fn read_raw(&self, path: impl AsRef<Path>) -> StorageResult<Vec<u8>> {
        self.ensure_initialized()?;

        let mut file = File::open(path.as_ref())?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Create a directory (including parents).
    pub fn create_dir(&self, path: impl AsRef<Path>) -> StorageResult<()> {
        self.ensure_initialized()?;
        fs::create_dir_all(path.as_ref())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    fn test_storage() -> (TempDir, DocumentStorage) {
        let temp = TempDir::new().unwrap();
        let mut storage = DocumentStorage::new(StoragePaths::new(temp.path()));
        storage.initialize().expect("Failed to initialize test storage");
        (temp, storage)
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct TestData {
        id: String,
        value: i32,
    }

    #[test]
    fn initialize_creates_directories() {
        let (_temp, storage) = test_storage();

        assert!(storage.paths().users_dir().exists());
        assert!(storage.paths().wallets_dir().exists());
        assert!(storage.paths().guardians_dir().exists());
        assert!(storage.paths().recoveries_dir().exists());
        assert!(storage.paths().notifications_dir().exists());
        assert!(storage.paths().audit_dir().exists());
    }

    #[test]
    fn write_and_read_json() {
        let (_temp, storage) = test_storage();
        let data = TestData {
            id: "test-1".to_string(),
            value: 42,
        };

        let path = storage.paths().user("test-1");
        storage.write_json(&path, &data).unwrap();

        let read: TestData = storage.read_json(&path).unwrap();
        assert_eq!(read, data);
    }

    #[test]
    fn create_json_refuses_existing_file() {
        let (_temp, storage) = test_storage();
        let data = TestData {
            id: "g".to_string(),
            value: 1,
        };

        let path = storage.paths().guardian("g");
        storage.create_json(&path, &data).unwrap();
        let second = storage.create_json(&path, &data);

        assert!(matches!(second, Err(StorageError::AlreadyExists(_))));

        // The first document is intact and no temp files are left behind.
        let stored: TestData = storage.read_json(&path).unwrap();
        assert_eq!(stored, data);
        let dir = path.parent().unwrap();
        let leftovers: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn modify_json_applies_closure_and_persists() {
        let (_temp, storage) = test_storage();
        let path = storage.paths().recovery("r");
        storage
            .write_json(&path, &TestData {
                id: "r".to_string(),
                value: 1,
            })
            .unwrap();

        let new_value = storage
            .modify_json(&path, |doc: &mut TestData| {
                doc.value += 1;
                Ok::<_, StorageError>(doc.value)
            })
            .unwrap();
        assert_eq!(new_value, 2);

        let read: TestData = storage.read_json(&path).unwrap();
        assert_eq!(read.value, 2);
    }

    #[test]
    fn modify_json_does_not_write_on_error() {
        let (_temp, storage) = test_storage();
        let path = storage.paths().recovery("r");
        storage
            .write_json(&path, &TestData {
                id: "r".to_string(),
                value: 1,
            })
            .unwrap();

        let result = storage.modify_json(&path, |doc: &mut TestData| {
            doc.value = 99;
            Err::<(), _>(StorageError::SerializationError("nope".to_string()))
        });
        assert!(result.is_err());

        let read: TestData = storage.read_json(&path).unwrap();
        assert_eq!(read.value, 1);
    }

    #[test]
    fn modify_missing_document_is_not_found() {
        let (_temp, storage) = test_storage();
        let result = storage.modify_json(storage.paths().recovery("missing"), |doc: &mut TestData| {
            doc.value = 1;
            Ok::<_, StorageError>(())
        });
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn append_raw_accumulates_lines() {
        let (_temp, storage) = test_storage();
        let path = storage.paths().audit_events_file("2026-01-01");

        storage.append_raw(&path, b"one\n").unwrap();
        storage.append_raw(&path, b"two\n").unwrap();

        assert_eq!(storage.read_raw(&path).unwrap(), b"one\ntwo\n");
    }

    #[test]
    fn read_all_skips_corrupt_documents() {
        let (_temp, storage) = test_storage();
        for i in 1..=2 {
            storage
                .write_json(storage.paths().notification(&format!("n{i}")), &TestData {
                    id: format!("n{i}"),
                    value: i,
                })
                .unwrap();
        }
        storage
            .write_raw(storage.paths().notification("broken"), b"{not json")
            .unwrap();

        let docs: Vec<TestData> = storage.read_all(storage.paths().notifications_dir()).unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn health_check_works() {
        let (_temp, storage) = test_storage();
        storage.health_check().expect("Health check should pass");
    }

    #[test]
    fn uninitialized_storage_returns_error() {
        let storage = DocumentStorage::new(StoragePaths::new("/tmp/never-init"));

        let result = storage.read_json::<TestData>("/tmp/any.json");
        assert!(matches!(result, Err(StorageError::NotInitialized)));
    }
}
