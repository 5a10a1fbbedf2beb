//! Property-Based Tests for Sync Module
//!
//! Uses proptest to check fetch deduplication, rate limiting and the
//! server-over-optimistic rule on synced resources.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use proptest::prelude::*;
use tokio::sync::Notify;

use crate::mirror::{LocalMirror, ResourceKey};
use crate::sync::{FetchCoordinator, RefreshOptions, ResourceOptions, SyncedResource};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Resource whose fetch waits on `gate` and returns `server_value`.
fn gated_resource(
    min_interval: Duration,
    server_value: i64,
    gate: Arc<Notify>,
) -> (SyncedResource<i64>, Arc<AtomicUsize>) {
    let mirror = Arc::new(LocalMirror::in_memory());
    let coordinator = Arc::new(FetchCoordinator::new(Arc::clone(&mirror)));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let resource = SyncedResource::new(
        ResourceKey::new("wallet-balance", Some("prop")).unwrap(),
        mirror,
        coordinator,
        ResourceOptions {
            min_interval,
            poll_interval: None,
        },
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let gate = Arc::clone(&gate);
            async move {
                gate.notified().await;
                Ok(server_value)
            }
        },
    );
    (resource, calls)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    // Any batch of concurrent refreshes on one key, forced or not, issues
    // exactly one network request and every caller sees its result.
    #[test]
    fn prop_concurrent_refreshes_share_one_fetch(forces in prop::collection::vec(any::<bool>(), 1..20)) {
        let rt = runtime();
        let (calls, results) = rt.block_on(async {
            let gate = Arc::new(Notify::new());
            let (resource, calls) = gated_resource(Duration::from_secs(5), 7, Arc::clone(&gate));

            let refreshes = forces
                .iter()
                .map(|&force| resource.refresh(RefreshOptions { force }));
            let release = async {
                tokio::task::yield_now().await;
                gate.notify_one();
            };
            let (results, _) = tokio::join!(join_all(refreshes), release);
            (calls.load(Ordering::SeqCst), results)
        });

        prop_assert_eq!(calls, 1);
        for result in results {
            prop_assert_eq!(result, Ok(7));
        }
    }

    // Non-forced refreshes inside the rate-limit window never reach the
    // network and return the previously fetched value.
    #[test]
    fn prop_refreshes_inside_window_are_free(extra in 1usize..10) {
        let rt = runtime();
        let (calls, values) = rt.block_on(async {
            let gate = Arc::new(Notify::new());
            gate.notify_one();
            let (resource, calls) = gated_resource(Duration::from_secs(60), 3, Arc::clone(&gate));

            let mut values = vec![resource.refresh(RefreshOptions::default()).await];
            for _ in 0..extra {
                values.push(resource.refresh(RefreshOptions::default()).await);
            }
            (calls.load(Ordering::SeqCst), values)
        });

        prop_assert_eq!(calls, 1);
        prop_assert!(values.iter().all(|v| *v == Ok(3)));
    }

    // Whatever optimistic edits happen before and during a fetch, a
    // successful refresh leaves the server value in place.
    #[test]
    fn prop_server_value_wins_over_optimistic(
        cached in -1000i64..1000,
        deltas in prop::collection::vec(-100i64..100, 0..8),
        server in -1000i64..1000,
    ) {
        let rt = runtime();
        let observed = rt.block_on(async {
            let gate = Arc::new(Notify::new());
            let (resource, _) = gated_resource(Duration::from_secs(5), server, Arc::clone(&gate));
            resource.apply_optimistic(|_| cached);

            let history = Arc::new(Mutex::new(Vec::new()));
            let _subscription = {
                let history = Arc::clone(&history);
                resource.subscribe(move |v: &i64| history.lock().unwrap().push(*v))
            };

            let edits = async {
                for d in &deltas {
                    resource.apply_optimistic(|v| v.copied().unwrap_or_default() + d);
                    tokio::task::yield_now().await;
                }
                gate.notify_one();
            };
            let (refreshed, _) = tokio::join!(resource.refresh(RefreshOptions::forced()), edits);
            let last_seen = history.lock().unwrap().last().copied();
            (refreshed, resource.get_value(), last_seen)
        });

        prop_assert_eq!(observed.0, Ok(server));
        prop_assert_eq!(observed.1, Some(server));
        prop_assert_eq!(observed.2, Some(server));
    }
}
