//! Synced Resource Module
//!
//! A remote-backed value that is cached in the mirror, fetched through the
//! coordinator, optimistically updated, and refreshed in the background while
//! observed.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::mirror::{CacheEntry, LocalMirror, ResourceKey};
use crate::sync::{FetchCoordinator, FetchOptions, DEFAULT_MIN_INTERVAL};
use crate::tasks::spawn_refresh_task;

/// Values a [`SyncedResource`] can hold.
pub trait ResourceValue: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> ResourceValue for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

type Fetcher<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;
type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

// == Resource Status ==
/// Lifecycle of the live value. Loading is reported separately by
/// [`SyncedResource::is_loading`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceStatus {
    /// No value known yet
    Empty,
    /// Value confirmed by the last fetch, or set locally since
    Ready,
    /// Last fetch failed, or the value comes from the mirror only
    Stale,
}

// == Options ==
/// Per-resource fetch and polling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceOptions {
    /// Minimum time between two non-forced fetches
    pub min_interval: Duration,
    /// Background refresh interval while observed, None = no polling
    pub poll_interval: Option<Duration>,
}

impl Default for ResourceOptions {
    fn default() -> Self {
        Self {
            min_interval: DEFAULT_MIN_INTERVAL,
            poll_interval: None,
        }
    }
}

/// Options for a single refresh call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshOptions {
    /// Fetch even inside the rate-limit window
    pub force: bool,
}

impl RefreshOptions {
    pub fn forced() -> Self {
        Self { force: true }
    }
}

struct LiveState<T> {
    entry: Option<CacheEntry<T>>,
    status: ResourceStatus,
    last_error: Option<SyncError>,
}

struct ObserverRegistry<T> {
    next_id: u64,
    observers: BTreeMap<u64, Observer<T>>,
    refresh_task: Option<JoinHandle<()>>,
}

struct ResourceInner<T> {
    key: ResourceKey,
    mirror: Arc<LocalMirror>,
    coordinator: Arc<FetchCoordinator>,
    fetcher: Fetcher<T>,
    options: ResourceOptions,
    state: Mutex<LiveState<T>>,
    registry: Mutex<ObserverRegistry<T>>,
}

fn lock<S>(mutex: &Mutex<S>) -> MutexGuard<'_, S> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl<T: ResourceValue> ResourceInner<T> {
    /// Stores a server value in the mirror and the live state.
    fn commit_server(&self, value: T) {
        let entry = CacheEntry::server(value);
        self.mirror.write(&self.key, entry.clone());

        let changed = {
            let mut state = lock(&self.state);
            let current = state.entry.as_ref().map(|e| e.meta());
            let accepted = entry.reconcile(current.as_ref());
            state.status = ResourceStatus::Ready;
            state.last_error = None;
            match accepted {
                Some(entry) => {
                    let value = entry.value.clone();
                    state.entry = Some(entry);
                    Some(value)
                }
                None => None,
            }
        };

        if let Some(value) = changed {
            debug!("Resource {} updated from server", self.key);
            self.notify(&value);
        }
    }

    fn record_failure(&self, error: &SyncError) {
        warn!("Refresh of {} failed: {}", self.key, error);
        let mut state = lock(&self.state);
        state.status = ResourceStatus::Stale;
        state.last_error = Some(error.clone());
    }

    /// Calls every observer with `value`, outside of all locks.
    fn notify(&self, value: &T) {
        let observers: Vec<Observer<T>> =
            lock(&self.registry).observers.values().cloned().collect();
        for observer in observers {
            observer(value);
        }
    }

    fn unsubscribe(&self, id: u64) {
        let stopped = {
            let mut registry = lock(&self.registry);
            if registry.observers.remove(&id).is_none() {
                return;
            }
            if registry.observers.is_empty() {
                if let Some(task) = registry.refresh_task.take() {
                    task.abort();
                }
                true
            } else {
                false
            }
        };

        if stopped {
            debug!("Last observer of {} left, releasing fetch state", self.key);
            self.coordinator.forget(&self.key);
        }
    }
}

/// Makes `entry` the live value. Local edits always apply; the timestamp is
/// raised if needed so it never goes backwards.
fn install_optimistic<T: Clone>(
    state: &mut LiveState<T>,
    mut entry: CacheEntry<T>,
) -> CacheEntry<T> {
    if let Some(current) = &state.entry {
        if entry.last_updated < current.last_updated {
            entry.last_updated = current.last_updated;
        }
    }
    state.entry = Some(entry.clone());
    if state.status == ResourceStatus::Empty {
        state.status = ResourceStatus::Ready;
    }
    entry
}

// == Synced Resource ==
/// Cached, fetchable, optimistically updatable remote value.
///
/// Cloning yields another handle to the same resource.
pub struct SyncedResource<T> {
    inner: Arc<ResourceInner<T>>,
}

impl<T> Clone for SyncedResource<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for SyncedResource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncedResource")
            .field("key", &self.inner.key)
            .finish_non_exhaustive()
    }
}

impl<T: ResourceValue> SyncedResource<T> {
    // == Constructor ==
    /// Creates a resource for `key`, hydrated from the mirror.
    ///
    /// `fetch` performs one remote call and returns the server value.
    pub fn new<F, Fut>(
        key: ResourceKey,
        mirror: Arc<LocalMirror>,
        coordinator: Arc<FetchCoordinator>,
        options: ResourceOptions,
        fetch: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let entry = mirror.read::<T>(&key);
        let status = if entry.is_some() {
            ResourceStatus::Stale
        } else {
            ResourceStatus::Empty
        };
        debug!("Resource {} hydrated: {:?}", key, status);

        let fetcher: Fetcher<T> = Arc::new(move || fetch().boxed());
        Self {
            inner: Arc::new(ResourceInner {
                key,
                mirror,
                coordinator,
                fetcher,
                options,
                state: Mutex::new(LiveState {
                    entry,
                    status,
                    last_error: None,
                }),
                registry: Mutex::new(ObserverRegistry {
                    next_id: 0,
                    observers: BTreeMap::new(),
                    refresh_task: None,
                }),
            }),
        }
    }

    // == Accessors ==
    pub fn key(&self) -> &ResourceKey {
        &self.inner.key
    }

    pub fn options(&self) -> ResourceOptions {
        self.inner.options
    }

    /// Best currently known value, optimistic or cached. Never blocks on the
    /// network and never fails; None only before any value is known.
    pub fn get_value(&self) -> Option<T> {
        lock(&self.inner.state).entry.as_ref().map(|e| e.value.clone())
    }

    /// Live entry with its provenance.
    pub fn entry(&self) -> Option<CacheEntry<T>> {
        lock(&self.inner.state).entry.clone()
    }

    pub fn status(&self) -> ResourceStatus {
        lock(&self.inner.state).status
    }

    /// Error of the last failed refresh, cleared by the next success.
    pub fn last_error(&self) -> Option<SyncError> {
        lock(&self.inner.state).last_error.clone()
    }

    /// True while a fetch for this resource is in flight.
    pub fn is_loading(&self) -> bool {
        self.inner.coordinator.is_in_flight(&self.inner.key)
    }

    // == Refresh ==
    /// Fetches the server value through the coordinator.
    ///
    /// On success the value is written to the mirror and becomes the live
    /// value, replacing any optimistic one. On failure the live value is left
    /// untouched and the error is returned. Inside the rate-limit window a
    /// non-forced call returns the mirrored value without a fetch.
    pub async fn refresh(&self, options: RefreshOptions) -> Result<T> {
        let inner = Arc::clone(&self.inner);
        let fetch_options = FetchOptions {
            force: options.force,
            min_interval: self.inner.options.min_interval,
        };

        self.inner
            .coordinator
            .request_fetch(
                &self.inner.key,
                move || {
                    let fetch = (inner.fetcher)();
                    async move {
                        match fetch.await {
                            Ok(value) => {
                                inner.commit_server(value.clone());
                                Ok(value)
                            }
                            Err(e) => {
                                inner.record_failure(&e);
                                Err(e)
                            }
                        }
                    }
                },
                fetch_options,
            )
            .await
    }

    // == Optimistic Update ==
    /// Computes and stores a local value immediately, before the server
    /// confirms it. `updater` receives the current value, if any.
    ///
    /// The next successful refresh supersedes the optimistic value. `updater`
    /// runs under the resource lock and must not call back into it.
    pub fn apply_optimistic(&self, updater: impl FnOnce(Option<&T>) -> T) -> T {
        let entry = {
            let mut state = lock(&self.inner.state);
            let entry = CacheEntry::optimistic(updater(state.entry.as_ref().map(|e| &e.value)));
            install_optimistic(&mut state, entry)
        };
        self.publish_optimistic(entry)
    }

    /// Like [`apply_optimistic`](Self::apply_optimistic) but only when a
    /// value is already known. Returns None, changing nothing, otherwise.
    pub fn update_optimistic(&self, updater: impl FnOnce(&T) -> T) -> Option<T> {
        let entry = {
            let mut state = lock(&self.inner.state);
            let current = state.entry.as_ref()?;
            let entry = CacheEntry::optimistic(updater(&current.value));
            install_optimistic(&mut state, entry)
        };
        Some(self.publish_optimistic(entry))
    }

    fn publish_optimistic(&self, entry: CacheEntry<T>) -> T {
        self.inner.mirror.write(&self.inner.key, entry.clone());
        debug!("Resource {} updated optimistically", self.inner.key);
        self.inner.notify(&entry.value);
        entry.value
    }

    // == Subscribe ==
    /// Registers `observer`, called synchronously on every live value change.
    ///
    /// The first observer starts background polling when a poll interval is
    /// configured and a tokio runtime is available; the last one to leave
    /// stops it.
    pub fn subscribe(&self, observer: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut registry = lock(&self.inner.registry);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.observers.insert(id, Arc::new(observer));

            if registry.refresh_task.is_none() {
                if let Some(interval) = self.inner.options.poll_interval {
                    match tokio::runtime::Handle::try_current() {
                        Ok(_) => {
                            registry.refresh_task =
                                Some(spawn_refresh_task(self.downgrade(), interval));
                        }
                        Err(_) => warn!(
                            "No async runtime, background refresh of {} disabled",
                            self.inner.key
                        ),
                    }
                }
            }
            id
        };

        let weak = Arc::downgrade(&self.inner);
        Subscription {
            release: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.unsubscribe(id);
                }
            })),
        }
    }

    pub fn observer_count(&self) -> usize {
        lock(&self.inner.registry).observers.len()
    }

    /// True while background polling runs.
    pub fn is_polling(&self) -> bool {
        lock(&self.inner.registry)
            .refresh_task
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Non-owning handle, used by the background task.
    pub fn downgrade(&self) -> WeakSyncedResource<T> {
        WeakSyncedResource {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

// == Weak Handle ==
/// Handle that does not keep a [`SyncedResource`] alive.
pub struct WeakSyncedResource<T> {
    inner: Weak<ResourceInner<T>>,
}

impl<T> WeakSyncedResource<T> {
    pub fn upgrade(&self) -> Option<SyncedResource<T>> {
        self.inner.upgrade().map(|inner| SyncedResource { inner })
    }

    /// True while some strong handle still exists.
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

// == Subscription ==
/// Observer registration. Dropping it unsubscribes.
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Stops observing. Equivalent to dropping the subscription.
    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}
