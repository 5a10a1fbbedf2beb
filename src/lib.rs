//! Auction Sync - client-side resource cache for an auction marketplace
//!
//! Keeps remote values (wallet balance, notifications, auto-bid status) in a
//! per-user local mirror, shares in-flight fetches, rate limits refreshes,
//! applies local edits optimistically and refreshes in the background while
//! values are observed.

pub mod api;
pub mod config;
pub mod error;
pub mod mirror;
pub mod models;
pub mod sync;
pub mod tasks;

pub use api::{ApiClient, AppState, AutoBidStatus, Notifications, Session, Wallet};
pub use config::Config;
pub use error::{Result, SyncError};
pub use mirror::{LocalMirror, ResourceKey};
pub use sync::{
    FetchCoordinator, RefreshOptions, ResourceOptions, ResourceRegistry, ResourceStatus,
    SyncedResource,
};
pub use tasks::spawn_refresh_task;
