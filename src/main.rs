//! Auction Sync - marketplace client cache watcher
//!
//! Hydrates the wallet balance, notifications and optionally one auction's
//! auto-bid from the local mirror, keeps them fresh in the background and logs
//! every change until shut down.

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use auction_sync::api::AppState;
use auction_sync::sync::{RefreshOptions, Subscription};
use auction_sync::Config;

/// Main entry point for the watcher.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open the mirror and build the shared state
/// 4. Subscribe to each resource, which starts its background refresh
/// 5. Run one initial refresh per resource
/// 6. Wait for SIGINT/SIGTERM, then release the subscriptions
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" for this crate, can be overridden with RUST_LOG
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "auction_sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting auction sync watcher");

    let config = Config::from_env();
    info!(
        "Configuration loaded: api_url={}, mirror={}, min_refresh={}ms, wallet_poll={}s, notification_poll={}s",
        config.api_url,
        config.mirror_path.display(),
        config.min_refresh_interval_ms,
        config.wallet_poll_secs,
        config.notification_poll_secs
    );

    let watch_auction = config.watch_auction_id.clone();
    let state = AppState::from_config(config).context("Failed to initialize client state")?;
    if !state.session.is_authenticated() {
        warn!("API_TOKEN is not set, showing cached values only");
    }

    let wallet = state.wallet().context("Failed to create wallet resource")?;
    let notifications = state
        .notifications()
        .context("Failed to create notifications resource")?;
    let auto_bid = watch_auction
        .as_deref()
        .map(|auction| state.auto_bid(auction))
        .transpose()
        .context("Failed to create auto-bid resource")?;

    if let Some(balance) = wallet.balance() {
        info!("Cached wallet balance: {}", balance);
    }
    info!(
        "Cached notifications: {} ({} unread)",
        notifications.list().len(),
        notifications.unread_count()
    );

    let mut subscriptions: Vec<Subscription> = vec![
        wallet
            .resource()
            .subscribe(|balance| info!("Wallet balance: {}", balance)),
        notifications.resource().subscribe(|list| {
            let unread = list.iter().filter(|n| n.is_unread()).count();
            info!("Notifications: {} ({} unread)", list.len(), unread);
        }),
    ];
    if let Some(auto_bid) = &auto_bid {
        let auction = auto_bid.auction_id().to_string();
        subscriptions.push(auto_bid.resource().subscribe(move |bid| match bid {
            Some(bid) => info!(
                "Auto-bid on {}: max {} step {} ({})",
                auction,
                bid.max_amount,
                bid.bid_increment,
                if bid.is_active { "active" } else { "paused" }
            ),
            None => info!("No auto-bid on {}", auction),
        }));
    }

    if state.session.is_authenticated() {
        if let Err(e) = wallet.refresh(RefreshOptions::default()).await {
            warn!("Initial wallet refresh failed: {}", e);
        }
        if let Err(e) = notifications.refresh(RefreshOptions::default()).await {
            warn!("Initial notifications refresh failed: {}", e);
        }
        if let Some(auto_bid) = &auto_bid {
            if let Err(e) = auto_bid.refresh(RefreshOptions::default()).await {
                warn!("Initial auto-bid refresh failed: {}", e);
            }
        }
    }

    shutdown_signal().await;

    // Releasing the last observer stops each background refresh
    drop(subscriptions);

    let stats = state.coordinator.stats();
    info!(
        "Watcher stopped: {} fetches, {} shared, {} rate limited, {} failed",
        stats.fetches, stats.deduplicated, stats.rate_limited, stats.failures
    );
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
