//! API Module
//!
//! HTTP transport and the synced resources of the marketplace backend.
//!
//! # Endpoints
//! - `GET /api/v1/accounts/wallet/` - Wallet balance
//! - `POST /api/v1/transactions/transactions/` - Deposit
//! - `GET /api/v1/notifications/notifications/` - Notification list
//! - `POST /api/v1/notifications/notifications/:id/mark_read/` - Mark one read
//! - `POST /api/v1/notifications/notifications/mark_all_read/` - Mark all read
//! - `GET /api/v1/auctions/autobids/?auction=:id` - Auto-bids of one auction
//! - `POST /api/v1/auctions/autobids/` - Create an auto-bid
//! - `POST /api/v1/auctions/autobids/:id/activate/` (or `deactivate/`)

pub mod auto_bid;
pub mod client;
pub mod notifications;
pub mod state;
pub mod wallet;

pub use auto_bid::AutoBidStatus;
pub use client::{ApiClient, Session};
pub use notifications::Notifications;
pub use state::AppState;
pub use wallet::Wallet;
