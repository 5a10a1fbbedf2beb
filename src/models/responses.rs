//! Response models for the marketplace API
//!
//! The backend wraps payloads inconsistently (`{"data": ...}`, DRF pagination,
//! or bare values), so every extractor checks a fixed list of locations and
//! reports a shape error instead of inventing a value.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{Result, SyncError};

/// Accepts ids sent either as strings (UUIDs) or as integers.
fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

// == Wallet ==
/// Reads the wallet balance from `data.balance` or `balance`.
///
/// Numbers and decimal strings are accepted and kept at the precision the
/// server sent. A missing or unparsable balance is a shape error, never zero.
pub fn extract_balance(body: &Value) -> Result<Decimal> {
    let raw = body
        .pointer("/data/balance")
        .filter(|v| !v.is_null())
        .or_else(|| body.get("balance").filter(|v| !v.is_null()))
        .ok_or_else(|| SyncError::Shape("wallet response has no balance field".to_string()))?;

    let parsed = match raw {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    };
    parsed.ok_or_else(|| SyncError::Shape(format!("wallet balance is not a number: {}", raw)))
}

// == Lists ==
/// Finds the record list in `data`, `data.results`, `results` or the body
/// itself.
pub fn extract_list(body: &Value) -> Result<&Vec<Value>> {
    ["/data", "/data/results", "/results", ""]
        .iter()
        .find_map(|path| body.pointer(path).and_then(Value::as_array))
        .ok_or_else(|| SyncError::Shape("response has no record list".to_string()))
}

/// Finds a single record in `data` or the body itself.
pub fn extract_record(body: &Value) -> Option<&Value> {
    match body.get("data") {
        Some(data) if data.is_object() => Some(data),
        _ if body.is_object() => Some(body),
        _ => None,
    }
}

// == Notification ==
/// One notification addressed to the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub notification_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub read_at: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Notification {
    pub fn is_unread(&self) -> bool {
        !self.is_read && self.read_at.is_none()
    }

    /// Returns a copy flagged as read.
    pub fn marked_read(&self) -> Self {
        Self {
            is_read: true,
            ..self.clone()
        }
    }
}

/// Parses the notification list response.
pub fn parse_notifications(body: &Value) -> Result<Vec<Notification>> {
    extract_list(body)?
        .iter()
        .map(|record| {
            serde_json::from_value(record.clone())
                .map_err(|e| SyncError::Shape(format!("invalid notification record: {}", e)))
        })
        .collect()
}

// == Auto-bid ==
/// Auction reference, sent either as a bare id or as a nested object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuctionRef {
    Object {
        #[serde(deserialize_with = "id_string")]
        id: String,
    },
    Id(#[serde(deserialize_with = "id_string")] String),
}

impl AuctionRef {
    pub fn id(&self) -> &str {
        match self {
            AuctionRef::Object { id } | AuctionRef::Id(id) => id,
        }
    }
}

/// Automatic bidding configuration of the user on one auction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoBid {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub auction: AuctionRef,
    pub max_amount: Decimal,
    pub bid_increment: Decimal,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Parses the auto-bid list response and picks the record for `auction_id`.
///
/// Records that do not decode are skipped; a body without any list is a
/// shape error.
pub fn parse_auto_bid(body: &Value, auction_id: &str) -> Result<Option<AutoBid>> {
    Ok(extract_list(body)?
        .iter()
        .filter_map(|record| serde_json::from_value::<AutoBid>(record.clone()).ok())
        .find(|bid| bid.auction.id() == auction_id))
}
