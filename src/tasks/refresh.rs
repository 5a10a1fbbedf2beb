//! Resource Refresh Task
//!
//! Background task that periodically refreshes a synced resource while it has
//! observers.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::sync::{RefreshOptions, ResourceValue, WeakSyncedResource};

/// Spawns a background task that refreshes `resource` every `interval`.
///
/// The task sleeps first, then issues a non-forced refresh, so the
/// coordinator's rate limit and in-flight sharing still apply. A failed
/// refresh is logged and the next tick simply tries again. The task ends on
/// its own once the resource is dropped; otherwise the caller aborts it
/// through the returned handle.
///
/// # Example
/// ```ignore
/// let handle = spawn_refresh_task(wallet.downgrade(), Duration::from_secs(300));
/// // Later, when the last observer leaves:
/// handle.abort();
/// ```
pub fn spawn_refresh_task<T: ResourceValue>(
    resource: WeakSyncedResource<T>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Starting background refresh every {:?}", interval);

        loop {
            // Sleep for the configured interval
            tokio::time::sleep(interval).await;

            let Some(resource) = resource.upgrade() else {
                debug!("Resource dropped, background refresh ends");
                break;
            };

            match resource.refresh(RefreshOptions::default()).await {
                Ok(_) => debug!("Background refresh of {} done", resource.key()),
                Err(e) => warn!(
                    "Background refresh of {} failed, retrying next tick: {}",
                    resource.key(),
                    e
                ),
            }
        }
    })
}
