//! Local Mirror Module
//!
//! Best-effort durable storage of the last known value of each resource.
//! Every persisted mutation in the crate goes through [`LocalMirror`].

use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::mirror::{CacheEntry, EntryMeta, MemoryBackend, MirrorBackend, ResourceKey};

// == Local Mirror ==
/// Namespaced, typed view over a [`MirrorBackend`].
///
/// Reads never fail and writes never propagate errors: the mirror is a cache,
/// not the source of truth.
pub struct LocalMirror {
    backend: Box<dyn MirrorBackend>,
    /// Serializes compare-and-store in `write`
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for LocalMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMirror").finish_non_exhaustive()
    }
}

impl LocalMirror {
    // == Constructors ==
    /// Creates a mirror over the given storage medium.
    pub fn new(backend: impl MirrorBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            write_lock: Mutex::new(()),
        }
    }

    /// Creates a mirror that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    // == Read ==
    /// Returns the stored entry for `key`.
    ///
    /// Returns None if nothing was written, the medium is unavailable or the
    /// stored document does not decode as `CacheEntry<T>`.
    pub fn read<T: DeserializeOwned>(&self, key: &ResourceKey) -> Option<CacheEntry<T>> {
        let document = match self.backend.load(&key.storage_key()) {
            Ok(Some(document)) => document,
            Ok(None) => return None,
            Err(e) => {
                warn!("Mirror read of {} failed: {}", key, e);
                return None;
            }
        };

        match serde_json::from_str(&document) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Mirror entry {} could not be decoded: {}", key, e);
                None
            }
        }
    }

    /// Returns only the provenance of the stored entry, whatever its value type.
    pub fn read_meta(&self, key: &ResourceKey) -> Option<EntryMeta> {
        let document = self.backend.load(&key.storage_key()).ok().flatten()?;
        serde_json::from_str(&document).ok()
    }

    // == Write ==
    /// Persists `entry` for `key` if it takes precedence over the stored entry.
    ///
    /// Returns whether the entry was accepted and stored. Rejections,
    /// serialization errors and storage errors are logged, never returned.
    pub fn write<T: Serialize>(&self, key: &ResourceKey, entry: CacheEntry<T>) -> bool {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.read_meta(key);
        let Some(entry) = entry.reconcile(current.as_ref()) else {
            debug!(
                "Mirror write to {} rejected: stored entry takes precedence",
                key
            );
            return false;
        };

        let document = match serde_json::to_string(&entry) {
            Ok(document) => document,
            Err(e) => {
                warn!("Mirror entry {} could not be serialized: {}", key, e);
                return false;
            }
        };

        match self.backend.store(&key.storage_key(), document) {
            Ok(()) => true,
            Err(e) => {
                warn!("Mirror write to {} failed: {}", key, e);
                false
            }
        }
    }

    // == Clear ==
    /// Removes the entry stored for exactly `key`.
    pub fn clear(&self, key: &ResourceKey) {
        if let Err(e) = self.backend.remove(&key.storage_key()) {
            warn!("Mirror clear of {} failed: {}", key, e);
        }
    }

    /// Removes every entry owned by `owner`. Returns the number removed.
    ///
    /// Used on sign-out; entries of other owners are untouched.
    pub fn clear_owner(&self, owner: &str) -> usize {
        let keys = match self.backend.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Mirror key listing failed: {}", e);
                return 0;
            }
        };

        let mut removed = 0;
        for storage_key in keys {
            let owned = ResourceKey::parse(&storage_key)
                .map(|key| key.owner() == owner)
                .unwrap_or(false);
            if !owned {
                continue;
            }
            match self.backend.remove(&storage_key) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!("Mirror clear of {} failed: {}", storage_key, e),
            }
        }

        debug!("Cleared {} mirror entries for owner {}", removed, owner);
        removed
    }

    // == Keys ==
    /// Lists every stored resource key. Empty if the medium is unavailable.
    pub fn keys(&self) -> Vec<ResourceKey> {
        self.backend
            .keys()
            .map(|keys| keys.iter().filter_map(|k| ResourceKey::parse(k)).collect())
            .unwrap_or_default()
    }
}
