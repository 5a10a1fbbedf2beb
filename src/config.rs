//! Configuration Module
//!
//! Handles loading and managing client configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Client configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the marketplace backend API
    pub api_url: String,
    /// Bearer token of the signed-in user, None = anonymous
    pub api_token: Option<String>,
    /// Identifier of the signed-in user, used to namespace cached values
    pub user_id: Option<String>,
    /// Location of the on-disk mirror document
    pub mirror_path: PathBuf,
    /// Minimum milliseconds between two non-forced fetches of one resource
    pub min_refresh_interval_ms: u64,
    /// Background refresh interval for the wallet balance, in seconds
    pub wallet_poll_secs: u64,
    /// Background refresh interval for notifications, in seconds
    pub notification_poll_secs: u64,
    /// Background refresh interval for auto-bid status, in seconds
    pub auto_bid_poll_secs: u64,
    /// HTTP request timeout in seconds
    pub request_timeout_secs: u64,
    /// Auction whose auto-bid the watcher should follow, if any
    pub watch_auction_id: Option<String>,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `API_URL` - Backend base URL (default: http://localhost:8000)
    /// - `API_TOKEN` - Bearer token (default: unset, anonymous)
    /// - `API_USER_ID` - Owner id for cached values (default: unset, anonymous)
    /// - `MIRROR_PATH` - Mirror file (default: .auction_sync/mirror.json)
    /// - `MIN_REFRESH_INTERVAL_MS` - Rate limit window (default: 5000)
    /// - `WALLET_POLL_SECS` - Wallet refresh interval (default: 300)
    /// - `NOTIFICATION_POLL_SECS` - Notification refresh interval (default: 30)
    /// - `AUTO_BID_POLL_SECS` - Auto-bid refresh interval (default: 15)
    /// - `REQUEST_TIMEOUT_SECS` - HTTP timeout (default: 10)
    /// - `WATCH_AUCTION_ID` - Auction to follow (default: unset)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_url: env::var("API_URL").unwrap_or(defaults.api_url),
            api_token: non_empty_var("API_TOKEN"),
            user_id: non_empty_var("API_USER_ID"),
            mirror_path: env::var("MIRROR_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.mirror_path),
            min_refresh_interval_ms: parsed_var("MIN_REFRESH_INTERVAL_MS")
                .unwrap_or(defaults.min_refresh_interval_ms),
            wallet_poll_secs: parsed_var("WALLET_POLL_SECS").unwrap_or(defaults.wallet_poll_secs),
            notification_poll_secs: parsed_var("NOTIFICATION_POLL_SECS")
                .unwrap_or(defaults.notification_poll_secs),
            auto_bid_poll_secs: parsed_var("AUTO_BID_POLL_SECS")
                .unwrap_or(defaults.auto_bid_poll_secs),
            request_timeout_secs: parsed_var("REQUEST_TIMEOUT_SECS")
                .unwrap_or(defaults.request_timeout_secs),
            watch_auction_id: non_empty_var("WATCH_AUCTION_ID"),
        }
    }

    /// Rate limit window as a Duration.
    pub fn min_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.min_refresh_interval_ms)
    }

    /// HTTP timeout as a Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".to_string(),
            api_token: None,
            user_id: None,
            mirror_path: PathBuf::from(".auction_sync/mirror.json"),
            min_refresh_interval_ms: 5000,
            wallet_poll_secs: 300,
            notification_poll_secs: 30,
            auto_bid_poll_secs: 15,
            request_timeout_secs: 10,
            watch_auction_id: None,
        }
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
