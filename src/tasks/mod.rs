//! Background Tasks Module
//!
//! Contains background tasks that run periodically while resources are observed.
//!
//! # Tasks
//! - Resource refresh: non-forced refresh of a synced resource at a fixed interval

mod refresh;

pub use refresh::spawn_refresh_task;
