//! Directory-backed persistence for registry documents.
//!
//! Each document is stored as `<bs58(doc_id)>.automerge` in the data
//! directory. Encoding the id keeps arbitrary document names safe to use as
//! file names.
//!
//! ```text
//! <data_dir>/
//! ├── <encoded-doc-id>.automerge
//! └── <encoded-doc-id>.automerge
//! ```

use std::fs;
use std::io;
use std::path::PathBuf;

use crate::engine::Engine;
use crate::sync::Registry;

/// File extension for stored documents.
const DOC_EXTENSION: &str = "automerge";

/// Storage for serialized documents, keyed by document id.
#[derive(Clone, Debug)]
pub struct DocumentStorage {
    data_dir: PathBuf,
}

impl DocumentStorage {
    /// Creates a new storage instance with a custom data directory.
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    /// Returns the full path for a document.
    pub fn doc_path(&self, doc_id: &str) -> PathBuf {
        let encoded = bs58::encode(doc_id.as_bytes()).into_string();
        self.data_dir.join(format!("{}.{}", encoded, DOC_EXTENSION))
    }

    /// Checks if a document exists on disk.
    pub fn exists(&self, doc_id: &str) -> bool {
        self.doc_path(doc_id).exists()
    }

    /// Loads a document's bytes from disk.
    ///
    /// Returns `Ok(None)` if the file doesn't exist.
    pub fn load(&self, doc_id: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.doc_path(doc_id);

        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::IoError(path, e)),
        }
    }

    /// Saves a document's bytes to disk.
    ///
    /// Creates the data directory if it doesn't exist.
    pub fn save(&self, doc_id: &str, bytes: &[u8]) -> Result<(), StorageError> {
        fs::create_dir_all(&self.data_dir)
            .map_err(|e| StorageError::IoError(self.data_dir.clone(), e))?;

        let path = self.doc_path(doc_id);
        fs::write(&path, bytes).map_err(|e| StorageError::IoError(path, e))?;

        Ok(())
    }

    /// Deletes a document from disk.
    ///
    /// Returns `Ok(true)` if the file was deleted, `Ok(false)` if it didn't exist.
    pub fn delete(&self, doc_id: &str) -> Result<bool, StorageError> {
        let path = self.doc_path(doc_id);

        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::IoError(path, e)),
        }
    }

    /// Lists the ids of all stored documents, sorted.
    ///
    /// Files whose names do not decode to a document id are skipped.
    pub fn list(&self) -> Result<Vec<String>, StorageError> {
        let entries = match fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::IoError(self.data_dir.clone(), e)),
        };

        let mut doc_ids = Vec::new();

        for entry in entries {
            let entry = entry.map_err(|e| StorageError::IoError(self.data_dir.clone(), e))?;
            let path = entry.path();

            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|s| s.to_str()) != Some(DOC_EXTENSION) {
                continue;
            }

            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let decoded = bs58::decode(stem)
                .into_vec()
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok());
            if let Some(doc_id) = decoded {
                doc_ids.push(doc_id);
            }
        }

        doc_ids.sort();
        Ok(doc_ids)
    }

    /// Writes every document of a registry to disk. Returns how many were
    /// written.
    pub fn save_registry<E: Engine>(
        &self,
        registry: &mut Registry<E>,
    ) -> Result<usize, StorageError> {
        let doc_ids: Vec<String> = registry.document_ids().map(str::to_string).collect();
        let mut saved = 0;

        for doc_id in &doc_ids {
            if let Some(bytes) = registry.export_document(doc_id) {
                self.save(doc_id, &bytes)?;
                saved += 1;
            }
        }

        tracing::debug!("Saved {} document(s) to {}", saved, self.data_dir.display());
        Ok(saved)
    }

    /// Loads every stored document into a registry, replacing documents
    /// with the same id. Returns how many were loaded.
    pub fn load_registry<E: Engine>(
        &self,
        registry: &mut Registry<E>,
    ) -> Result<usize, StorageError> {
        let mut loaded = 0;

        for doc_id in self.list()? {
            let Some(bytes) = self.load(&doc_id)? else {
                continue;
            };
            registry
                .import_document(doc_id.clone(), &bytes)
                .map_err(|e| {
                    StorageError::LoadError(self.doc_path(&doc_id), e.to_string())
                })?;
            loaded += 1;
        }

        tracing::debug!("Loaded {} document(s) from {}", loaded, self.data_dir.display());
        Ok(loaded)
    }
}

/// Errors that can occur during document storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error reading or writing a file.
    IoError(PathBuf, io::Error),
    /// A stored document could not be restored.
    LoadError(PathBuf, String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::IoError(path, e) => {
                write!(f, "I/O error for {}: {}", path.display(), e)
            }
            StorageError::LoadError(path, e) => {
                write!(f, "Failed to load document {}: {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::IoError(_, e) => Some(e),
            StorageError::LoadError(_, _) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::AutomergeEngine;
    use automerge::transaction::Transactable;
    use automerge::ROOT;
    use tempfile::TempDir;

    fn test_storage() -> (DocumentStorage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = DocumentStorage::new(temp_dir.path().to_path_buf());
        (storage, temp_dir)
    }

    #[test]
    fn test_doc_path_encodes_id() {
        let (storage, _temp) = test_storage();
        let path = storage.doc_path("../escape/attempt");

        assert_eq!(path.parent(), Some(storage.data_dir().as_path()));
        assert!(path.to_string_lossy().ends_with(".automerge"));
    }

    #[test]
    fn test_load_nonexistent_returns_none() {
        let (storage, _temp) = test_storage();
        assert!(storage.load("missing").unwrap().is_none());
        assert!(!storage.exists("missing"));
    }

    #[test]
    fn test_save_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let nested_dir = temp_dir.path().join("nested").join("data");
        let storage = DocumentStorage::new(nested_dir.clone());

        storage.save("doc", b"test data").unwrap();

        assert!(nested_dir.exists());
        assert!(storage.exists("doc"));
        assert_eq!(storage.load("doc").unwrap().unwrap(), b"test data");
    }

    #[test]
    fn test_delete() {
        let (storage, _temp) = test_storage();
        storage.save("doc", b"x").unwrap();

        assert!(storage.delete("doc").unwrap());
        assert!(!storage.delete("doc").unwrap());
        assert!(!storage.exists("doc"));
    }

    #[test]
    fn test_list_skips_foreign_files() {
        let (storage, temp) = test_storage();
        storage.save("b", b"1").unwrap();
        storage.save("a", b"2").unwrap();
        fs::write(temp.path().join("notes.txt"), b"ignored").unwrap();
        fs::write(temp.path().join("0OIl.automerge"), b"not base58").unwrap();

        assert_eq!(storage.list().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let storage = DocumentStorage::new(temp_dir.path().join("nope"));
        assert!(storage.list().unwrap().is_empty());
    }

    #[test]
    fn test_registry_roundtrip() {
        let (storage, _temp) = test_storage();

        let mut source = Registry::new(AutomergeEngine::new());
        source.create_document("notes");
        source.update_document("notes", |doc| doc.put(ROOT, "title", "hi").unwrap());
        source.create_document("empty");
        assert_eq!(storage.save_registry(&mut source).unwrap(), 2);

        let mut target = Registry::new(AutomergeEngine::new());
        assert_eq!(storage.load_registry(&mut target).unwrap(), 2);

        let json = AutomergeEngine::to_json(target.get_document("notes").unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({ "title": "hi" }));
        assert!(target.contains("empty"));
    }

    #[test]
    fn test_load_registry_reports_corrupt_document() {
        let (storage, _temp) = test_storage();
        storage.save("broken", b"not an automerge document").unwrap();

        let mut registry = Registry::new(AutomergeEngine::new());
        let err = storage.load_registry(&mut registry).unwrap_err();
        assert!(matches!(err, StorageError::LoadError(_, _)));
    }
}
