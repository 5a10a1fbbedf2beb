//! Resource Key Module
//!
//! Identifies one cached remote-backed value, scoped by resource name and
//! owning principal.

use std::fmt;

use crate::error::{Result, SyncError};

/// Owner bucket used when no principal is signed in.
pub const ANONYMOUS_OWNER: &str = "anonymous";

/// Separator between resource name and owner in the storage key.
pub const KEY_SEPARATOR: char = ':';

// == Resource Key ==
/// Cache identity of a remote-backed value.
///
/// Fields are private so a key can only be built through [`ResourceKey::new`],
/// which always assigns an owner. Two keys with different owners never map to
/// the same storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    name: String,
    owner: String,
}

impl ResourceKey {
    // == Constructor ==
    /// Creates a key for `name` owned by `owner`, or by the anonymous bucket
    /// when `owner` is None or blank.
    ///
    /// Resource names must be non-empty and must not contain `:`.
    pub fn new(name: impl Into<String>, owner: Option<&str>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(SyncError::InvalidKey(
                "Resource name cannot be empty".to_string(),
            ));
        }
        if name.contains(KEY_SEPARATOR) {
            return Err(SyncError::InvalidKey(format!(
                "Resource name '{}' must not contain '{}'",
                name, KEY_SEPARATOR
            )));
        }

        let owner = owner
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .unwrap_or(ANONYMOUS_OWNER)
            .to_string();

        Ok(Self { name, owner })
    }

    // == Parse ==
    /// Parses a storage key of the form `<name>:<owner>`.
    ///
    /// Splits at the first separator; owner ids may themselves contain `:`.
    pub fn parse(storage_key: &str) -> Option<Self> {
        let (name, owner) = storage_key.split_once(KEY_SEPARATOR)?;
        if name.is_empty() || owner.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            owner: owner.to_string(),
        })
    }

    /// Resource name, e.g. `wallet-balance`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owner id, or [`ANONYMOUS_OWNER`].
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn is_anonymous(&self) -> bool {
        self.owner == ANONYMOUS_OWNER
    }

    /// Key used by the storage medium.
    pub fn storage_key(&self) -> String {
        format!("{}{}{}", self.name, KEY_SEPARATOR, self.owner)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.name, KEY_SEPARATOR, self.owner)
    }
}
