//! Application State
//!
//! Wires the mirror, the coordinator and the API client together and hands
//! out the resource instantiations.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::api::{ApiClient, AutoBidStatus, Notifications, Session, Wallet};
use crate::config::Config;
use crate::error::Result;
use crate::mirror::{FileBackend, LocalMirror};
use crate::sync::{FetchCoordinator, ResourceOptions, ResourceRegistry};

/// Shared handles used by every synced resource of one client.
///
/// Factories hand out views over one live resource per key, so every caller
/// sees the same value and observers. Ending the session wipes the owner's
/// entries from the mirror.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub session: Arc<Session>,
    pub client: Arc<ApiClient>,
    pub mirror: Arc<LocalMirror>,
    pub coordinator: Arc<FetchCoordinator>,
    pub registry: Arc<ResourceRegistry>,
}

impl AppState {
    /// Creates a new AppState over an existing mirror.
    pub fn new(config: Config, session: Arc<Session>, mirror: Arc<LocalMirror>) -> Result<Self> {
        let client = Arc::new(ApiClient::from_config(&config, Arc::clone(&session))?);
        let coordinator = Arc::new(FetchCoordinator::new(Arc::clone(&mirror)));
        let registry = Arc::new(ResourceRegistry::new(
            Arc::clone(&mirror),
            Arc::clone(&coordinator),
        ));

        let wipe = Arc::clone(&mirror);
        session.on_sign_out(move |owner| {
            let removed = wipe.clear_owner(owner);
            info!("Removed {} cached entries of {}", removed, owner);
        });

        Ok(Self {
            config,
            session,
            client,
            mirror,
            coordinator,
            registry,
        })
    }

    /// Creates a new AppState from configuration.
    ///
    /// The mirror is the file at `mirror_path`; when it cannot be opened the
    /// client runs on an in-memory mirror instead.
    pub fn from_config(config: Config) -> Result<Self> {
        let mirror = match FileBackend::open(&config.mirror_path) {
            Ok(backend) => LocalMirror::new(backend),
            Err(e) => {
                warn!(
                    "Mirror file {} unavailable, caching in memory only: {}",
                    config.mirror_path.display(),
                    e
                );
                LocalMirror::in_memory()
            }
        };
        let session = Arc::new(Session::from_config(&config));
        Self::new(config, session, Arc::new(mirror))
    }

    pub fn wallet(&self) -> Result<Wallet> {
        Wallet::new(
            Arc::clone(&self.client),
            &self.registry,
            self.options(self.config.wallet_poll_secs),
        )
    }

    pub fn notifications(&self) -> Result<Notifications> {
        Notifications::new(
            Arc::clone(&self.client),
            &self.registry,
            self.options(self.config.notification_poll_secs),
        )
    }

    pub fn auto_bid(&self, auction_id: &str) -> Result<AutoBidStatus> {
        AutoBidStatus::new(
            Arc::clone(&self.client),
            &self.registry,
            auction_id,
            self.options(self.config.auto_bid_poll_secs),
        )
    }

    /// Resource options with the configured rate limit; a poll interval of
    /// zero disables background refresh.
    fn options(&self, poll_secs: u64) -> ResourceOptions {
        ResourceOptions {
            min_interval: self.config.min_refresh_interval(),
            poll_interval: (poll_secs > 0).then(|| Duration::from_secs(poll_secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::{CacheEntry, ResourceKey};
    use rust_decimal_macros::dec;

    fn state(user: &str) -> AppState {
        let config = Config {
            api_token: Some("token".to_string()),
            user_id: Some(user.to_string()),
            ..Config::default()
        };
        let session = Arc::new(Session::from_config(&config));
        AppState::new(config, session, Arc::new(LocalMirror::in_memory())).unwrap()
    }

    #[tokio::test]
    async fn test_resources_are_keyed_by_owner() {
        let state = state("u7");

        let wallet = state.wallet().unwrap();
        assert_eq!(wallet.resource().key().storage_key(), "wallet-balance:u7");

        let notifications = state.notifications().unwrap();
        assert_eq!(notifications.resource().key().storage_key(), "notifications:u7");

        let auto_bid = state.auto_bid("a42").unwrap();
        assert_eq!(auto_bid.resource().key().storage_key(), "auto-bids.a42:u7");
    }

    #[tokio::test]
    async fn test_poll_intervals_follow_config() {
        let mut state = state("u1");
        state.config.wallet_poll_secs = 0;

        let wallet = state.wallet().unwrap();
        assert_eq!(wallet.resource().options().poll_interval, None);
        assert_eq!(wallet.resource().options().min_interval, Duration::from_millis(5000));

        let notifications = state.notifications().unwrap();
        assert_eq!(
            notifications.resource().options().poll_interval,
            Some(Duration::from_secs(30))
        );
    }

    #[tokio::test]
    async fn test_factories_share_one_live_resource() {
        let state = state("u1");
        let header = state.wallet().unwrap();
        let checkout = state.wallet().unwrap();

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let _subscription = {
            let seen = Arc::clone(&seen);
            checkout
                .resource()
                .subscribe(move |b: &rust_decimal::Decimal| seen.lock().unwrap().push(*b))
        };

        header.resource().apply_optimistic(|_| dec!(42));

        assert_eq!(checkout.balance(), Some(dec!(42)));
        assert_eq!(*seen.lock().unwrap(), vec![dec!(42)]);
        assert_eq!(header.resource().observer_count(), 1);
        assert_eq!(state.registry.live_count(), 1);
    }

    #[test]
    fn test_invalid_auction_id() {
        let state = state("u1");
        assert!(state.auto_bid("").is_err());
        assert!(state.auto_bid("a:1").is_err());
    }

    #[test]
    fn test_sign_out_wipes_only_own_entries() {
        let state = state("u1");
        let mine = ResourceKey::new("wallet-balance", Some("u1")).unwrap();
        let theirs = ResourceKey::new("wallet-balance", Some("u2")).unwrap();
        state.mirror.write(&mine, CacheEntry::server(dec!(10)));
        state.mirror.write(&theirs, CacheEntry::server(dec!(20)));

        state.session.sign_out();

        assert!(state.mirror.read::<rust_decimal::Decimal>(&mine).is_none());
        assert_eq!(
            state.mirror.read::<rust_decimal::Decimal>(&theirs).unwrap().value,
            dec!(20)
        );
    }
}
