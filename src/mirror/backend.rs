//! Mirror Backend Module
//!
//! Raw string key/value media behind the local mirror: an in-process map with
//! an optional byte quota, and a JSON document on disk.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::mirror::{MAX_DOCUMENT_SIZE, MAX_KEY_LENGTH};

// == Backend Trait ==
/// Storage medium for serialized mirror documents.
///
/// Every operation may fail; the mirror above treats failures as cache misses
/// or dropped writes.
pub trait MirrorBackend: Send + Sync {
    /// Loads the document stored under `key`.
    fn load(&self, key: &str) -> Result<Option<String>>;

    /// Stores `document` under `key`, replacing any previous one.
    fn store(&self, key: &str, document: String) -> Result<()>;

    /// Removes `key`. Returns whether it existed.
    fn remove(&self, key: &str) -> Result<bool>;

    /// Lists all stored keys.
    fn keys(&self) -> Result<Vec<String>>;
}

fn check_limits(key: &str, document: &str) -> Result<()> {
    if key.len() > MAX_KEY_LENGTH {
        return Err(SyncError::Storage(format!(
            "Key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    if document.len() > MAX_DOCUMENT_SIZE {
        return Err(SyncError::Storage(format!(
            "Document exceeds maximum size of {} bytes",
            MAX_DOCUMENT_SIZE
        )));
    }
    Ok(())
}

fn poisoned() -> SyncError {
    SyncError::Storage("Storage lock poisoned".to_string())
}

// == Memory Backend ==
/// In-process storage with an optional byte quota.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<BTreeMap<String, String>>,
    /// Maximum total bytes (keys + documents), None = unbounded
    quota_bytes: Option<usize>,
    /// Simulates a storage medium that refuses all access
    unavailable: bool,
}

impl MemoryBackend {
    // == Constructors ==
    /// Creates an unbounded in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend that refuses writes past `quota_bytes`.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            quota_bytes: Some(quota_bytes),
            ..Self::default()
        }
    }

    /// Creates a backend whose every operation fails, like browser storage in
    /// private mode.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable {
            Err(SyncError::Storage("Storage unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    /// Total bytes currently stored.
    pub fn used_bytes(&self) -> usize {
        self.entries
            .lock()
            .map(|entries| entries.iter().map(|(k, v)| k.len() + v.len()).sum())
            .unwrap_or(0)
    }
}

impl MirrorBackend for MemoryBackend {
    fn load(&self, key: &str) -> Result<Option<String>> {
        self.ensure_available()?;
        let entries = self.entries.lock().map_err(|_| poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn store(&self, key: &str, document: String) -> Result<()> {
        self.ensure_available()?;
        check_limits(key, &document)?;
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;

        if let Some(quota) = self.quota_bytes {
            let used: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = key.len() + document.len();
            if used + needed > quota {
                return Err(SyncError::Storage(format!(
                    "Quota exceeded: {} of {} bytes used, {} requested",
                    used, quota, needed
                )));
            }
        }

        entries.insert(key.to_string(), document);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        self.ensure_available()?;
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        Ok(entries.remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>> {
        self.ensure_available()?;
        let entries = self.entries.lock().map_err(|_| poisoned())?;
        Ok(entries.keys().cloned().collect())
    }
}

// == File Backend ==
/// All keys kept in one JSON object document on disk.
///
/// The document is loaded once at open and rewritten atomically (temp file
/// then rename) after every mutation.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileBackend {
    // == Open ==
    /// Opens the mirror document at `path`.
    ///
    /// A missing file starts empty. A corrupt file is logged and replaced on
    /// the next write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                SyncError::Storage(format!("Cannot create {}: {}", parent.display(), e))
            })?;
        }

        let entries = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<BTreeMap<String, String>>(&raw) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Mirror file {} is corrupt, starting empty: {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(SyncError::Storage(format!(
                    "Cannot read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        debug!("Opened mirror file {} with {} keys", path.display(), entries.len());
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let raw = serde_json::to_string(entries)
            .map_err(|e| SyncError::Storage(format!("Cannot serialize mirror: {}", e)))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, raw)
            .and_then(|_| fs::rename(&tmp, &self.path))
            .map_err(|e| SyncError::Storage(format!("Cannot write {}: {}", self.path.display(), e)))
    }
}

impl MirrorBackend for FileBackend {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().map_err(|_| poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn store(&self, key: &str, document: String) -> Result<()> {
        check_limits(key, &document)?;
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        let previous = entries.insert(key.to_string(), document);

        if let Err(e) = self.persist(&entries) {
            // Keep memory and disk in agreement.
            match previous {
                Some(previous) => entries.insert(key.to_string(), previous),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        if entries.remove(key).is_none() {
            return Ok(false);
        }
        self.persist(&entries)?;
        Ok(true)
    }

    fn keys(&self) -> Result<Vec<String>> {
        let entries = self.entries.lock().map_err(|_| poisoned())?;
        Ok(entries.keys().cloned().collect())
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store_and_load() {
        let backend = MemoryBackend::new();
        backend.store("a:1", "{}".to_string()).unwrap();

        assert_eq!(backend.load("a:1").unwrap().as_deref(), Some("{}"));
        assert!(backend.load("missing").unwrap().is_none());
        assert_eq!(backend.keys().unwrap(), vec!["a:1".to_string()]);
    }

    #[test]
    fn test_memory_remove() {
        let backend = MemoryBackend::new();
        backend.store("a:1", "{}".to_string()).unwrap();

        assert!(backend.remove("a:1").unwrap());
        assert!(!backend.remove("a:1").unwrap());
        assert!(backend.keys().unwrap().is_empty());
    }

    #[test]
    fn test_memory_quota_exceeded() {
        let backend = MemoryBackend::with_quota(16);
        backend.store("k", "0123456789".to_string()).unwrap();

        let result = backend.store("other", "0123456789".to_string());
        assert!(matches!(result, Err(SyncError::Storage(_))));

        // Replacing an existing key only counts the new document
        backend.store("k", "abcdefghij".to_string()).unwrap();
        assert_eq!(backend.used_bytes(), 11);
    }

    #[test]
    fn test_memory_unavailable() {
        let backend = MemoryBackend::unavailable();
        assert!(backend.load("k").is_err());
        assert!(backend.store("k", "v".to_string()).is_err());
        assert!(backend.keys().is_err());
    }

    #[test]
    fn test_document_too_large() {
        let backend = MemoryBackend::new();
        let large = "x".repeat(MAX_DOCUMENT_SIZE + 1);
        assert!(matches!(
            backend.store("k", large),
            Err(SyncError::Storage(_))
        ));
    }

    #[test]
    fn test_file_backend_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("mirror.json");

        {
            let backend = FileBackend::open(&path).unwrap();
            backend.store("wallet-balance:u1", "{\"v\":1}".to_string()).unwrap();
            backend.store("notifications:u1", "[]".to_string()).unwrap();
            backend.remove("notifications:u1").unwrap();
        }

        let reopened = FileBackend::open(&path).unwrap();
        assert_eq!(
            reopened.load("wallet-balance:u1").unwrap().as_deref(),
            Some("{\"v\":1}")
        );
        assert!(reopened.load("notifications:u1").unwrap().is_none());
    }

    #[test]
    fn test_file_backend_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mirror.json");
        fs::write(&path, "not json").unwrap();

        let backend = FileBackend::open(&path).unwrap();
        assert!(backend.keys().unwrap().is_empty());

        backend.store("a:b", "1".to_string()).unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("a:b"));
    }
}
