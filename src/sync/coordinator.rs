//! Fetch Coordinator Module
//!
//! Ensures at most one in-flight fetch per resource key and enforces a
//! minimum interval between non-forced fetches.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::mirror::{LocalMirror, ResourceKey};
use crate::sync::CoordinatorStats;

/// Default minimum time between two non-forced fetches of one key.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(5);

type SharedFetch<T> = Shared<BoxFuture<'static, Result<T>>>;

// == Fetch Options ==
/// Per-request fetch policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Bypass the rate-limit window
    pub force: bool,
    /// Minimum time since the last completed fetch before fetching again
    pub min_interval: Duration,
}

impl FetchOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }

    pub fn with_min_interval(min_interval: Duration) -> Self {
        Self {
            force: false,
            min_interval,
        }
    }
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            force: false,
            min_interval: DEFAULT_MIN_INTERVAL,
        }
    }
}

// == Fetch State ==
/// Per-key bookkeeping. Lives only as long as the process.
#[derive(Default)]
struct FetchState {
    /// Type-erased `SharedFetch<T>` of the fetch in flight
    in_flight: Option<Box<dyn Any + Send + Sync>>,
    /// Generation of the fetch in flight
    generation: u64,
    last_completed: Option<Instant>,
}

#[derive(Default)]
struct CoordinatorInner {
    states: HashMap<ResourceKey, FetchState>,
    stats: CoordinatorStats,
    next_generation: u64,
}

// == Fetch Coordinator ==
/// Deduplicates and rate-limits outbound fetches, one slot per key.
pub struct FetchCoordinator {
    inner: Arc<Mutex<CoordinatorInner>>,
    mirror: Arc<LocalMirror>,
}

impl std::fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn lock(inner: &Mutex<CoordinatorInner>) -> MutexGuard<'_, CoordinatorInner> {
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

impl FetchCoordinator {
    // == Constructor ==
    /// Creates a coordinator that answers rate-limited requests from `mirror`.
    pub fn new(mirror: Arc<LocalMirror>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CoordinatorInner::default())),
            mirror,
        }
    }

    // == Request Fetch ==
    /// Runs `fetch_fn` for `key` unless the request can be served otherwise.
    ///
    /// - A fetch already in flight for `key` is joined; all callers observe
    ///   its single outcome.
    /// - Without `force`, a request inside `min_interval` of the last
    ///   completed fetch returns the mirrored value, when one exists.
    /// - Otherwise the fetch is spawned and runs to completion even if every
    ///   caller stops waiting.
    ///
    /// Errors from `fetch_fn` reach every caller. Nothing is retried.
    pub async fn request_fetch<T, F, Fut>(
        &self,
        key: &ResourceKey,
        fetch_fn: F,
        options: FetchOptions,
    ) -> Result<T>
    where
        T: Clone + Send + Sync + DeserializeOwned + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let shared = {
            let mut guard = lock(&self.inner);
            let CoordinatorInner {
                states,
                stats,
                next_generation,
            } = &mut *guard;
            let state = states.entry(key.clone()).or_default();

            if let Some(in_flight) = &state.in_flight {
                let Some(shared) = in_flight.downcast_ref::<SharedFetch<T>>() else {
                    return Err(SyncError::Internal(format!(
                        "Fetch in flight for {} has a different value type",
                        key
                    )));
                };
                debug!("Joining fetch in flight for {}", key);
                stats.record_deduplicated();
                shared.clone()
            } else {
                let within_window = state
                    .last_completed
                    .map(|done| done.elapsed() < options.min_interval)
                    .unwrap_or(false);
                if !options.force && within_window {
                    if let Some(entry) = self.mirror.read::<T>(key) {
                        debug!("Fetch for {} rate limited, serving mirrored value", key);
                        stats.record_rate_limited();
                        return Ok(entry.value);
                    }
                }

                *next_generation += 1;
                let generation = *next_generation;
                let shared = spawn_fetch(
                    Arc::clone(&self.inner),
                    key.clone(),
                    generation,
                    fetch_fn(),
                );
                state.in_flight = Some(Box::new(shared.clone()));
                state.generation = generation;
                stats.record_fetch();
                debug!("Started fetch {} for {}", generation, key);
                shared
            }
        };

        shared.await
    }

    // == Introspection ==
    /// Returns true while a fetch for `key` is running.
    pub fn is_in_flight(&self, key: &ResourceKey) -> bool {
        lock(&self.inner)
            .states
            .get(key)
            .map(|state| state.in_flight.is_some())
            .unwrap_or(false)
    }

    /// Completion instant of the last fetch for `key`, successful or not.
    pub fn last_completed(&self, key: &ResourceKey) -> Option<Instant> {
        lock(&self.inner)
            .states
            .get(key)
            .and_then(|state| state.last_completed)
    }

    /// Drops the bookkeeping of `key`.
    ///
    /// A fetch still in flight keeps its slot, so later requests keep joining
    /// it; only the rate-limit history is dropped. The slot goes away on the
    /// next `forget` after completion.
    pub fn forget(&self, key: &ResourceKey) {
        let mut guard = lock(&self.inner);
        let in_flight = guard
            .states
            .get(key)
            .map(|state| state.in_flight.is_some())
            .unwrap_or(false);

        if !in_flight {
            guard.states.remove(key);
        } else if let Some(state) = guard.states.get_mut(key) {
            debug!("Fetch for {} still in flight, keeping its slot", key);
            state.last_completed = None;
        }
    }

    pub fn stats(&self) -> CoordinatorStats {
        lock(&self.inner).stats.clone()
    }
}

/// Spawns `fetch` and returns a shareable handle to its outcome.
///
/// The task clears the in-flight slot of `key` on completion, unless the slot
/// has since been forgotten or reused by a newer fetch.
fn spawn_fetch<T, Fut>(
    inner: Arc<Mutex<CoordinatorInner>>,
    key: ResourceKey,
    generation: u64,
    fetch: Fut,
) -> SharedFetch<T>
where
    T: Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let handle = tokio::spawn(async move {
        let result = fetch.await;

        let mut guard = lock(&inner);
        if result.is_err() {
            guard.stats.record_failure();
        }
        match guard.states.get_mut(&key) {
            Some(state) if state.generation == generation => {
                state.in_flight = None;
                state.last_completed = Some(Instant::now());
            }
            _ => debug!("Fetch {} for {} completed after its slot was released", generation, key),
        }
        result
    });

    async move {
        handle.await.unwrap_or_else(|e| {
            warn!("Fetch task failed: {}", e);
            Err(SyncError::Internal(format!("Fetch task failed: {}", e)))
        })
    }
    .boxed()
    .shared()
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::CacheEntry;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    fn setup() -> (Arc<LocalMirror>, FetchCoordinator, ResourceKey) {
        let mirror = Arc::new(LocalMirror::in_memory());
        let coordinator = FetchCoordinator::new(Arc::clone(&mirror));
        let key = ResourceKey::new("wallet-balance", Some("u1")).unwrap();
        (mirror, coordinator, key)
    }

    #[tokio::test]
    async fn test_single_fetch() {
        let (_, coordinator, key) = setup();

        let value = coordinator
            .request_fetch(&key, || async { Ok(7u32) }, FetchOptions::forced())
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert!(!coordinator.is_in_flight(&key));
        assert!(coordinator.last_completed(&key).is_some());
        assert_eq!(coordinator.stats().fetches, 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_fetch() {
        let (_, coordinator, key) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let (release, gate) = oneshot::channel::<()>();

        let first = {
            let calls = Arc::clone(&calls);
            coordinator.request_fetch(
                &key,
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let _ = gate.await;
                    Ok(11u32)
                },
                FetchOptions::forced(),
            )
        };
        let second = {
            let calls = Arc::clone(&calls);
            coordinator.request_fetch(
                &key,
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(99u32)
                },
                FetchOptions::forced(),
            )
        };

        let joined = async {
            tokio::task::yield_now().await;
            let _ = release.send(());
        };
        let (a, b, _) = tokio::join!(first, second, joined);

        assert_eq!(a.unwrap(), 11);
        assert_eq!(b.unwrap(), 11);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = coordinator.stats();
        assert_eq!(stats.fetches, 1);
        assert_eq!(stats.deduplicated, 1);
    }

    #[tokio::test]
    async fn test_rate_limited_request_serves_mirror() {
        let (mirror, coordinator, key) = setup();
        let calls = Arc::new(AtomicUsize::new(0));

        let fetch = |value: u32| {
            let calls = Arc::clone(&calls);
            let mirror = Arc::clone(&mirror);
            let key = key.clone();
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                mirror.write(&key, CacheEntry::server(value));
                Ok(value)
            }
        };

        let options = FetchOptions::with_min_interval(Duration::from_secs(60));
        let first = coordinator.request_fetch(&key, fetch(1), options).await;
        let second = coordinator.request_fetch(&key, fetch(2), options).await;

        assert_eq!(first.unwrap(), 1);
        assert_eq!(second.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.stats().rate_limited, 1);
    }

    #[tokio::test]
    async fn test_force_bypasses_rate_limit() {
        let (mirror, coordinator, key) = setup();
        mirror.write(&key, CacheEntry::server(1u32));

        coordinator
            .request_fetch(&key, || async { Ok(1u32) }, FetchOptions::forced())
            .await
            .unwrap();
        let value = coordinator
            .request_fetch(&key, || async { Ok(2u32) }, FetchOptions::forced())
            .await
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(coordinator.stats().fetches, 2);
    }

    #[tokio::test]
    async fn test_rate_limit_without_cached_value_fetches() {
        let (_, coordinator, key) = setup();
        let options = FetchOptions::with_min_interval(Duration::from_secs(60));

        let _ = coordinator
            .request_fetch::<u32, _, _>(
                &key,
                || async { Err(SyncError::Transport("down".into())) },
                options,
            )
            .await;
        let value = coordinator
            .request_fetch(&key, || async { Ok(3u32) }, options)
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(coordinator.stats().fetches, 2);
    }

    #[tokio::test]
    async fn test_failure_reaches_all_waiters_and_clears_slot() {
        let (_, coordinator, key) = setup();
        let (release, gate) = oneshot::channel::<()>();

        let first = coordinator.request_fetch::<u32, _, _>(
            &key,
            move || async move {
                let _ = gate.await;
                Err(SyncError::Transport("timeout".into()))
            },
            FetchOptions::forced(),
        );
        let second =
            coordinator.request_fetch(&key, || async { Ok(5u32) }, FetchOptions::forced());
        let joined = async {
            tokio::task::yield_now().await;
            let _ = release.send(());
        };
        let (a, b, _) = tokio::join!(first, second, joined);

        assert_eq!(a, Err(SyncError::Transport("timeout".into())));
        assert_eq!(b, Err(SyncError::Transport("timeout".into())));
        assert!(!coordinator.is_in_flight(&key));
        assert!(coordinator.last_completed(&key).is_some());
        assert_eq!(coordinator.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_fetch_completes_when_caller_drops() {
        let (mirror, coordinator, key) = setup();
        let (done_tx, done_rx) = oneshot::channel::<()>();

        {
            let task_mirror = Arc::clone(&mirror);
            let task_key = key.clone();
            let request = coordinator.request_fetch(
                &key,
                move || async move {
                    task_mirror.write(&task_key, CacheEntry::server(8u32));
                    let _ = done_tx.send(());
                    Ok(8u32)
                },
                FetchOptions::forced(),
            );
            // Poll once to spawn the fetch, then drop the caller.
            let _ = futures::poll!(Box::pin(request));
        }

        done_rx.await.unwrap();
        assert_eq!(mirror.read::<u32>(&key).unwrap().value, 8);
    }

    #[tokio::test]
    async fn test_mismatched_type_in_flight() {
        let (_, coordinator, key) = setup();
        let (release, gate) = oneshot::channel::<()>();

        let first = coordinator.request_fetch(
            &key,
            move || async move {
                let _ = gate.await;
                Ok(1u32)
            },
            FetchOptions::forced(),
        );
        let second = coordinator.request_fetch(
            &key,
            || async { Ok("text".to_string()) },
            FetchOptions::forced(),
        );
        let joined = async {
            tokio::task::yield_now().await;
            let _ = release.send(());
        };
        let (a, b, _) = tokio::join!(first, second, joined);

        assert_eq!(a.unwrap(), 1);
        assert!(matches!(b, Err(SyncError::Internal(_))));
    }

    #[tokio::test]
    async fn test_forget_releases_state() {
        let (_, coordinator, key) = setup();
        coordinator
            .request_fetch(&key, || async { Ok(1u32) }, FetchOptions::forced())
            .await
            .unwrap();

        coordinator.forget(&key);
        assert!(coordinator.last_completed(&key).is_none());
    }

    #[tokio::test]
    async fn test_forget_keeps_fetch_in_flight() {
        let (_, coordinator, key) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let (release, gate) = oneshot::channel::<()>();

        let first = {
            let calls = Arc::clone(&calls);
            coordinator.request_fetch(
                &key,
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let _ = gate.await;
                    Ok(1u32)
                },
                FetchOptions::forced(),
            )
        };
        let after_forget = async {
            tokio::task::yield_now().await;
            coordinator.forget(&key);
            assert!(coordinator.is_in_flight(&key));

            let calls = Arc::clone(&calls);
            let second = coordinator.request_fetch(
                &key,
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(2u32)
                },
                FetchOptions::forced(),
            );
            let open = async {
                tokio::task::yield_now().await;
                let _ = release.send(());
            };
            let (second, _) = tokio::join!(second, open);
            second
        };
        let (a, b) = tokio::join!(first, after_forget);

        assert_eq!(a.unwrap(), 1);
        assert_eq!(b.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!coordinator.is_in_flight(&key));
    }
}
