//! Resource Registry Module
//!
//! Hands out one live [`SyncedResource`] per key, so every consumer of a key
//! sees the same value, status and observers.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::{Result, SyncError};
use crate::mirror::{LocalMirror, ResourceKey};
use crate::sync::{
    FetchCoordinator, ResourceOptions, ResourceValue, SyncedResource, WeakSyncedResource,
};

/// Type-erased weak handle kept per key.
trait RegisteredResource: Send + Sync {
    fn is_alive(&self) -> bool;
    fn as_any(&self) -> &dyn Any;
}

impl<T: ResourceValue> RegisteredResource for WeakSyncedResource<T> {
    fn is_alive(&self) -> bool {
        WeakSyncedResource::is_alive(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// == Resource Registry ==
/// Shared mirror, coordinator and the live resources built on them.
///
/// Only weak handles are kept: a resource lives as long as some consumer
/// holds it, and the next request after that builds a fresh one hydrated
/// from the mirror.
pub struct ResourceRegistry {
    mirror: Arc<LocalMirror>,
    coordinator: Arc<FetchCoordinator>,
    resources: Mutex<HashMap<ResourceKey, Box<dyn RegisteredResource>>>,
}

impl std::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("live", &self.live_count())
            .finish_non_exhaustive()
    }
}

impl ResourceRegistry {
    pub fn new(mirror: Arc<LocalMirror>, coordinator: Arc<FetchCoordinator>) -> Self {
        Self {
            mirror,
            coordinator,
            resources: Mutex::new(HashMap::new()),
        }
    }

    pub fn mirror(&self) -> &Arc<LocalMirror> {
        &self.mirror
    }

    pub fn coordinator(&self) -> &Arc<FetchCoordinator> {
        &self.coordinator
    }

    /// Returns the live resource for `key`, or builds one from `options` and
    /// `fetch` when none is alive.
    ///
    /// A live resource keeps the options and fetcher it was built with.
    /// Asking for a live key with another value type is an internal error.
    pub fn resource<T, F, Fut>(
        &self,
        key: ResourceKey,
        options: ResourceOptions,
        fetch: F,
    ) -> Result<SyncedResource<T>>
    where
        T: ResourceValue,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut resources = self.resources.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(existing) = resources.get(&key).filter(|r| r.is_alive()) {
            let live = existing
                .as_any()
                .downcast_ref::<WeakSyncedResource<T>>()
                .and_then(WeakSyncedResource::upgrade);
            return match live {
                Some(resource) => {
                    debug!("Sharing live resource {}", key);
                    Ok(resource)
                }
                None => Err(SyncError::Internal(format!(
                    "Resource {} is registered with a different value type",
                    key
                ))),
            };
        }

        resources.retain(|_, resource| resource.is_alive());
        let resource = SyncedResource::new(
            key.clone(),
            Arc::clone(&self.mirror),
            Arc::clone(&self.coordinator),
            options,
            fetch,
        );
        resources.insert(key, Box::new(resource.downgrade()));
        Ok(resource)
    }

    /// Number of resources currently alive.
    pub fn live_count(&self) -> usize {
        self.resources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|r| r.is_alive())
            .count()
    }
}
