//! Sync Module
//!
//! Fetch deduplication, rate limiting, the synced resource abstraction built
//! on top of the mirror, and the registry that shares one resource per key.

mod coordinator;
mod registry;
mod resource;
mod stats;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use coordinator::{FetchCoordinator, FetchOptions, DEFAULT_MIN_INTERVAL};
pub use registry::ResourceRegistry;
pub use resource::{
    RefreshOptions, ResourceOptions, ResourceStatus, ResourceValue, Subscription, SyncedResource,
    WeakSyncedResource,
};
pub use stats::CoordinatorStats;
