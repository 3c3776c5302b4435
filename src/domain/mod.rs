//! Domain types and DTOs
//!
//! Tenders, bids, users and notifications as stored off-chain.

pub mod bids;
pub mod notifications;
pub mod tenders;
pub mod users;

// Re-export commonly used types
pub use bids::*;
pub use tenders::*;
pub use users::*;
