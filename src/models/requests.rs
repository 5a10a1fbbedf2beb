//! Request bodies sent to the marketplace API
//!
//! Each request validates itself before it goes on the wire.

use rust_decimal::Decimal;
use serde::Serialize;

/// Request body for a wallet deposit (POST /api/v1/transactions/transactions/)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepositRequest {
    pub amount: Decimal,
    pub transaction_type: String,
    pub description: String,
}

impl DepositRequest {
    /// Builds a deposit of `amount`, rounded to cents.
    pub fn new(amount: Decimal) -> Self {
        Self {
            amount: amount.round_dp(2),
            transaction_type: "deposit".to_string(),
            description: "Wallet deposit".to_string(),
        }
    }

    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.amount <= Decimal::ZERO {
            return Some("Deposit amount must be greater than zero".to_string());
        }
        None
    }
}

/// Request body for creating an auto-bid (POST /api/v1/auctions/autobids/)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateAutoBidRequest {
    pub auction: String,
    pub max_amount: Decimal,
    pub bid_increment: Decimal,
}

impl CreateAutoBidRequest {
    pub fn new(auction: impl Into<String>, max_amount: Decimal, bid_increment: Decimal) -> Self {
        Self {
            auction: auction.into(),
            max_amount: max_amount.round_dp(2),
            bid_increment: bid_increment.round_dp(2),
        }
    }

    /// Checks the request against the auction's current price and the
    /// wallet balance, when known.
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(
        &self,
        current_price: Option<Decimal>,
        wallet_balance: Option<Decimal>,
    ) -> Option<String> {
        if self.auction.is_empty() {
            return Some("Auction id cannot be empty".to_string());
        }
        if self.max_amount <= Decimal::ZERO {
            return Some("Maximum amount must be greater than zero".to_string());
        }
        if self.bid_increment <= Decimal::ZERO {
            return Some("Bid increment must be greater than zero".to_string());
        }
        if let Some(price) = current_price {
            if self.max_amount <= price {
                return Some(format!(
                    "Maximum amount must be greater than the current price of {}",
                    price
                ));
            }
        }
        if let Some(balance) = wallet_balance {
            if self.max_amount > balance {
                return Some(format!(
                    "Maximum amount exceeds the wallet balance of {}",
                    balance
                ));
            }
        }
        None
    }
}
