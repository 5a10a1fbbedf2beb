//! Request and response models for the marketplace API
//!
//! Request bodies validate themselves; response extractors check the
//! payload locations the backend is known to use.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::{CreateAutoBidRequest, DepositRequest};
pub use responses::{
    extract_balance, extract_list, extract_record, parse_auto_bid, parse_notifications,
    AuctionRef, AutoBid, Notification,
};
