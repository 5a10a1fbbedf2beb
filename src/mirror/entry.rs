//! Cache Entry Module
//!
//! Defines a cached value together with its provenance and update time.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// == Entry Source ==
/// Where a cached value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntrySource {
    /// Confirmed by the backend
    #[serde(rename = "server")]
    Server,
    /// Computed locally before server confirmation
    #[serde(rename = "local-optimistic")]
    LocalOptimistic,
}

// == Entry Meta ==
/// Provenance of an entry without its value.
///
/// Used to compare a candidate write against whatever is stored, whatever
/// the stored value type is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub last_updated: DateTime<Utc>,
    pub source: EntrySource,
}

// == Cache Entry ==
/// A cached value with metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    /// The cached value
    pub value: T,
    /// Time of the last accepted update
    pub last_updated: DateTime<Utc>,
    /// Provenance of the value
    pub source: EntrySource,
}

impl<T> CacheEntry<T> {
    // == Constructors ==
    /// Creates a server-confirmed entry stamped now.
    pub fn server(value: T) -> Self {
        Self::with_source(value, EntrySource::Server)
    }

    /// Creates a locally computed entry stamped now.
    pub fn optimistic(value: T) -> Self {
        Self::with_source(value, EntrySource::LocalOptimistic)
    }

    pub fn with_source(value: T, source: EntrySource) -> Self {
        Self {
            value,
            last_updated: Utc::now(),
            source,
        }
    }

    pub fn meta(&self) -> EntryMeta {
        EntryMeta {
            last_updated: self.last_updated,
            source: self.source,
        }
    }

    pub fn is_server(&self) -> bool {
        self.source == EntrySource::Server
    }

    // == Precedence ==
    /// Checks whether this entry may replace `current`.
    ///
    /// A server entry always replaces an optimistic one. In every other
    /// pairing the newer (or equally new) entry wins, so an optimistic write
    /// older than a stored server value is rejected.
    pub fn supersedes(&self, current: &EntryMeta) -> bool {
        if self.source == EntrySource::Server && current.source == EntrySource::LocalOptimistic {
            return true;
        }
        self.last_updated >= current.last_updated
    }

    // == Reconcile ==
    /// Applies the precedence rule against `current`.
    ///
    /// Returns None when the write must be dropped. An accepted entry never
    /// carries a timestamp older than the one it replaces.
    pub fn reconcile(mut self, current: Option<&EntryMeta>) -> Option<Self> {
        match current {
            None => Some(self),
            Some(current) if self.supersedes(current) => {
                if self.last_updated < current.last_updated {
                    self.last_updated = current.last_updated;
                }
                Some(self)
            }
            Some(_) => None,
        }
    }

    // == Age ==
    /// Time elapsed since the last update. Zero if the clock moved backwards.
    pub fn age(&self) -> Duration {
        let age = Utc::now() - self.last_updated;
        if age < Duration::zero() {
            Duration::zero()
        } else {
            age
        }
    }

    /// Maps the value while keeping the metadata.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheEntry<U> {
        CacheEntry {
            value: f(self.value),
            last_updated: self.last_updated,
            source: self.source,
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn entry(value: u32, secs: i64, source: EntrySource) -> CacheEntry<u32> {
        CacheEntry {
            value,
            last_updated: at(secs),
            source,
        }
    }

    #[test]
    fn test_entry_constructors() {
        let server = CacheEntry::server(5);
        assert!(server.is_server());
        assert_eq!(server.value, 5);

        let local = CacheEntry::optimistic(6);
        assert_eq!(local.source, EntrySource::LocalOptimistic);
        assert!(local.age() < Duration::seconds(5));
    }

    #[test]
    fn test_server_always_supersedes_optimistic() {
        let stale_server = entry(1, 0, EntrySource::Server);
        let newer_local = entry(2, 10, EntrySource::LocalOptimistic);
        assert!(stale_server.supersedes(&newer_local.meta()));
    }

    #[test]
    fn test_older_optimistic_never_supersedes_server() {
        let server = entry(1, 10, EntrySource::Server);
        let older_local = entry(2, 5, EntrySource::LocalOptimistic);
        assert!(!older_local.supersedes(&server.meta()));

        let newer_local = entry(3, 20, EntrySource::LocalOptimistic);
        assert!(newer_local.supersedes(&server.meta()));
    }

    #[test]
    fn test_same_source_newest_wins() {
        let old = entry(1, 0, EntrySource::Server);
        let new = entry(2, 1, EntrySource::Server);
        assert!(new.supersedes(&old.meta()));
        assert!(!old.supersedes(&new.meta()));
    }

    #[test]
    fn test_reconcile_keeps_timestamps_monotonic() {
        let current = entry(1, 30, EntrySource::LocalOptimistic);
        let server = entry(2, 10, EntrySource::Server);

        let accepted = server.reconcile(Some(&current.meta())).unwrap();
        assert_eq!(accepted.value, 2);
        assert_eq!(accepted.last_updated, at(30));
    }

    #[test]
    fn test_reconcile_rejects_older_optimistic() {
        let current = entry(1, 30, EntrySource::Server);
        let local = entry(2, 10, EntrySource::LocalOptimistic);
        assert!(local.reconcile(Some(&current.meta())).is_none());
    }

    #[test]
    fn test_entry_serialized_layout() {
        let json = serde_json::to_value(entry(7, 0, EntrySource::LocalOptimistic)).unwrap();
        assert_eq!(json["value"], 7);
        assert_eq!(json["source"], "local-optimistic");
        assert!(json["last_updated"].is_string());

        let meta: EntryMeta = serde_json::from_value(json).unwrap();
        assert_eq!(meta.source, EntrySource::LocalOptimistic);
    }
}
