//! Wallet balance of the signed-in user.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::api::ApiClient;
use crate::error::{Result, SyncError};
use crate::mirror::ResourceKey;
use crate::models::{extract_balance, DepositRequest};
use crate::sync::{RefreshOptions, ResourceOptions, ResourceRegistry, SyncedResource};

pub const WALLET_RESOURCE: &str = "wallet-balance";
pub const WALLET_PATH: &str = "/api/v1/accounts/wallet/";
pub const TRANSACTIONS_PATH: &str = "/api/v1/transactions/transactions/";

/// Cached wallet balance with deposits applied optimistically.
#[derive(Debug, Clone)]
pub struct Wallet {
    client: Arc<ApiClient>,
    balance: SyncedResource<Decimal>,
}

impl Wallet {
    pub fn new(
        client: Arc<ApiClient>,
        registry: &ResourceRegistry,
        options: ResourceOptions,
    ) -> Result<Self> {
        let owner = client.session().owner_id();
        let key = ResourceKey::new(WALLET_RESOURCE, owner.as_deref())?;

        let fetch_client = Arc::clone(&client);
        let balance = registry.resource(key, options, move || {
            let client = Arc::clone(&fetch_client);
            async move {
                let body = client.get_json(WALLET_PATH, &[]).await?;
                extract_balance(&body)
            }
        })?;

        Ok(Self { client, balance })
    }

    /// Underlying synced resource, for subscribing and status.
    pub fn resource(&self) -> &SyncedResource<Decimal> {
        &self.balance
    }

    /// Best known balance, None until one has been fetched or cached.
    pub fn balance(&self) -> Option<Decimal> {
        self.balance.get_value()
    }

    pub async fn refresh(&self, options: RefreshOptions) -> Result<Decimal> {
        self.balance.refresh(options).await
    }

    /// Deposits `amount` into the wallet.
    ///
    /// The balance is bumped right away, then corrected by a forced refresh
    /// once the server has answered, whether the deposit went through or
    /// not. Returns the balance after the deposit as best known.
    pub async fn deposit(&self, amount: Decimal) -> Result<Option<Decimal>> {
        let request = DepositRequest::new(amount);
        if let Some(message) = request.validate() {
            return Err(SyncError::InvalidRequest(message));
        }

        self.balance.update_optimistic(|current| *current + request.amount);

        if let Err(e) = self.client.post_json(TRANSACTIONS_PATH, &request).await {
            warn!("Deposit of {} failed: {}", request.amount, e);
            if let Err(refresh_error) = self.balance.refresh(RefreshOptions::forced()).await {
                warn!("Balance refresh after failed deposit failed: {}", refresh_error);
            }
            return Err(e);
        }
        info!("Deposited {}", request.amount);

        match self.balance.refresh(RefreshOptions::forced()).await {
            Ok(balance) => Ok(Some(balance)),
            Err(e) => {
                warn!("Balance refresh after deposit failed: {}", e);
                Ok(self.balance.get_value())
            }
        }
    }
}
