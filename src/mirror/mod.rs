//! Mirror Module
//!
//! Durable, owner-scoped storage of the last known value of each resource.

mod backend;
mod entry;
mod key;
mod store;


// Re-export public types
pub use backend::{FileBackend, MemoryBackend, MirrorBackend};
pub use entry::{CacheEntry, EntryMeta, EntrySource};
pub use key::{ResourceKey, ANONYMOUS_OWNER, KEY_SEPARATOR};
pub use store::LocalMirror;

// == Public Constants ==
/// Maximum allowed storage key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;

/// Maximum allowed serialized entry size in bytes
pub const MAX_DOCUMENT_SIZE: usize = 1024 * 1024; // 1 MB
