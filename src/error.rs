//! Error types for synced resources
//!
//! Provides unified error handling using thiserror. Errors are `Clone` because
//! a single fetch outcome is shared by every caller awaiting it.

use thiserror::Error;

// == Sync Error Enum ==
/// Unified error type for the sync layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Network unreachable, timeout, or non-success HTTP status
    #[error("Transport error: {0}")]
    Transport(String),

    /// Session missing, expired or rejected (401/403)
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Response body did not contain the expected fields
    #[error("Unexpected response shape: {0}")]
    Shape(String),

    /// Resource key could not be constructed
    #[error("Invalid resource key: {0}")]
    InvalidKey(String),

    /// Caller-supplied request data failed validation
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Local storage medium failure (never escapes the mirror)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal failure, e.g. a fetch task that panicked
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    // == Classification ==
    /// Returns true if this error should end the current session.
    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::Auth(_))
    }

    /// Returns true for failures that leave the last known value in place and
    /// are expected to clear up on a later refresh.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transport(_) | SyncError::Shape(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::Shape(err.to_string())
        } else {
            SyncError::Transport(err.to_string())
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the sync layer.
pub type Result<T> = std::result::Result<T, SyncError>;
