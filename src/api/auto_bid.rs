//! Auto-bid status of the signed-in user on one auction.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::api::ApiClient;
use crate::error::{Result, SyncError};
use crate::mirror::ResourceKey;
use crate::models::{extract_record, parse_auto_bid, AutoBid, CreateAutoBidRequest};
use crate::sync::{RefreshOptions, ResourceOptions, ResourceRegistry, SyncedResource};

pub const AUTO_BID_RESOURCE_PREFIX: &str = "auto-bids.";
pub const AUTO_BIDS_PATH: &str = "/api/v1/auctions/autobids/";

/// Resource name for the auto-bid of `auction_id`.
pub fn auto_bid_resource(auction_id: &str) -> String {
    format!("{}{}", AUTO_BID_RESOURCE_PREFIX, auction_id)
}

/// Cached auto-bid configuration for one auction. The value is `None` once
/// the server has confirmed that no auto-bid exists.
#[derive(Debug, Clone)]
pub struct AutoBidStatus {
    client: Arc<ApiClient>,
    auction_id: String,
    status: SyncedResource<Option<AutoBid>>,
}

impl AutoBidStatus {
    pub fn new(
        client: Arc<ApiClient>,
        registry: &ResourceRegistry,
        auction_id: &str,
        options: ResourceOptions,
    ) -> Result<Self> {
        if auction_id.is_empty() {
            return Err(SyncError::InvalidKey("Auction id cannot be empty".to_string()));
        }
        let owner = client.session().owner_id();
        let key = ResourceKey::new(&auto_bid_resource(auction_id), owner.as_deref())?;

        let fetch_client = Arc::clone(&client);
        let fetch_auction = auction_id.to_string();
        let status = registry.resource(key, options, move || {
            let client = Arc::clone(&fetch_client);
            let auction_id = fetch_auction.clone();
            async move {
                let body = client
                    .get_json(AUTO_BIDS_PATH, &[("auction", auction_id.as_str())])
                    .await?;
                parse_auto_bid(&body, &auction_id)
            }
        })?;

        Ok(Self {
            client,
            auction_id: auction_id.to_string(),
            status,
        })
    }

    pub fn auction_id(&self) -> &str {
        &self.auction_id
    }

    pub fn resource(&self) -> &SyncedResource<Option<AutoBid>> {
        &self.status
    }

    /// Best known auto-bid, None when there is none or nothing is known yet.
    pub fn current(&self) -> Option<AutoBid> {
        self.status.get_value().flatten()
    }

    pub async fn refresh(&self, options: RefreshOptions) -> Result<Option<AutoBid>> {
        self.status.refresh(options).await
    }

    /// Creates an auto-bid on this auction.
    ///
    /// `current_price` and `wallet_balance` bound the maximum amount when
    /// known. The created record is shown right away and then confirmed by a
    /// forced refresh.
    pub async fn create(
        &self,
        max_amount: Decimal,
        bid_increment: Decimal,
        current_price: Option<Decimal>,
        wallet_balance: Option<Decimal>,
    ) -> Result<AutoBid> {
        let request = CreateAutoBidRequest::new(&self.auction_id, max_amount, bid_increment);
        if let Some(message) = request.validate(current_price, wallet_balance) {
            return Err(SyncError::InvalidRequest(message));
        }

        let body = self.client.post_json(AUTO_BIDS_PATH, &request).await?;
        info!("Auto-bid created on auction {}", self.auction_id);

        if let Some(created) = extract_record(&body)
            .and_then(|record| serde_json::from_value::<AutoBid>(record.clone()).ok())
        {
            self.status.apply_optimistic(|_| Some(created));
        }

        if let Err(e) = self.status.refresh(RefreshOptions::forced()).await {
            warn!("Auto-bid refresh after create failed: {}", e);
        }
        self.current().ok_or_else(|| {
            SyncError::Shape("Created auto-bid missing from the server response".to_string())
        })
    }

    /// Activates or deactivates the existing auto-bid.
    pub async fn set_active(&self, active: bool) -> Result<()> {
        let bid = self.current().ok_or_else(|| {
            SyncError::InvalidRequest(format!(
                "No auto-bid found for auction {}",
                self.auction_id
            ))
        })?;

        self.status.apply_optimistic(|_| {
            Some(AutoBid {
                is_active: active,
                ..bid.clone()
            })
        });

        let action = if active { "activate" } else { "deactivate" };
        let path = format!("{}{}/{}/", AUTO_BIDS_PATH, bid.id, action);
        match self.client.post_empty(&path).await {
            Ok(_) => {
                info!("Auto-bid {} {}d", bid.id, action);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to {} auto-bid {}: {}", action, bid.id, e);
                if let Err(refresh_error) = self.status.refresh(RefreshOptions::forced()).await {
                    warn!("Auto-bid refresh after failed {} failed: {}", action, refresh_error);
                }
                Err(e)
            }
        }
    }
}
