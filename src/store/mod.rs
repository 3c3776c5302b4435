//! Authoritative off-chain record store.
//!
//! Every mutation is a single-document conditional update: it matches on id and, where
//! a transition is involved, on the current status. A caller that loses a race sees
//! `None`/`false` and must report a conflict rather than assume success.

pub mod postgres;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Bid, NewBid, NewTender, Tender, TenderStatus, TenderWinner, User};

pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt {entity} record {id}: {reason}")]
    Corrupt {
        entity: &'static str,
        id: Uuid,
        reason: String,
    },
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Offset/limit window for list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: i64,
    pub limit: i64,
}

impl Page {
    pub fn first(limit: i64) -> Self {
        Self { offset: 0, limit }
    }
}

/// Bounds for the reconciler's scan of unanchored records.
///
/// Only records that a repair could actually mirror are returned: bids need a bidder
/// wallet, and tenders need an owner wallet unless a deployment-wide sender exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairScan {
    /// Skip records whose first mirror may still be waiting for confirmation
    pub settled_before: DateTime<Utc>,
    pub has_default_sender: bool,
    pub limit: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BidFilter {
    pub tender_id: Option<Uuid>,
    pub bidder_id: Option<Uuid>,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Cheap connectivity check for health reporting.
    async fn ping(&self) -> bool;

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>>;

    // ---- tenders ----

    async fn insert_tender(&self, tender: NewTender) -> StoreResult<Tender>;

    async fn get_tender(&self, id: Uuid) -> StoreResult<Option<Tender>>;

    /// Newest first, with the total matching count.
    async fn list_tenders(
        &self,
        status: Option<TenderStatus>,
        page: Page,
    ) -> StoreResult<(Vec<Tender>, u64)>;

    /// Move `id` from `from` to `to`, optionally requiring `owner_id == owner`.
    /// Entering `Published` stamps `published_at` with `at`.
    async fn transition_tender(
        &self,
        id: Uuid,
        from: TenderStatus,
        to: TenderStatus,
        owner: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Tender>>;

    /// Record the ledger anchor. Only succeeds while the tender has none.
    async fn set_tender_anchor(
        &self,
        id: Uuid,
        ledger_tender_id: i64,
        tx_ref: &str,
    ) -> StoreResult<bool>;

    async fn set_tender_close_tx(&self, id: Uuid, tx_ref: &str) -> StoreResult<()>;

    /// Write the winner and move `Closed -> Evaluated` in one update.
    async fn record_evaluation(
        &self,
        id: Uuid,
        winner: &TenderWinner,
    ) -> StoreResult<Option<Tender>>;

    async fn set_evaluation_tx(&self, id: Uuid, tx_ref: &str) -> StoreResult<()>;

    /// Mirrorable non-draft tenders that never got a ledger anchor, oldest first.
    async fn tenders_without_anchor(&self, scan: RepairScan) -> StoreResult<Vec<Tender>>;

    // ---- bids ----

    /// Insert only while the tender is `Published` and `bid.submitted_at` is before its
    /// deadline. `None` means the gate was closed.
    async fn insert_bid_if_open(&self, bid: NewBid) -> StoreResult<Option<Bid>>;

    async fn get_bid(&self, id: Uuid) -> StoreResult<Option<Bid>>;

    /// Oldest first, with the total matching count.
    async fn list_bids(&self, filter: BidFilter, page: Page) -> StoreResult<(Vec<Bid>, u64)>;

    async fn count_bids(&self, tender_id: Uuid) -> StoreResult<u64>;

    async fn set_bid_anchor(&self, id: Uuid, tx_ref: &str) -> StoreResult<bool>;

    /// Mark `bid_id` as the winner of `tender_id`.
    async fn select_winning_bid(&self, bid_id: Uuid, tender_id: Uuid) -> StoreResult<bool>;

    /// Reject every other non-rejected bid of the tender, returning the ones changed.
    async fn reject_losing_bids(&self, tender_id: Uuid, winner: Uuid) -> StoreResult<Vec<Bid>>;

    /// `Pending -> Rejected` for a single bid.
    async fn reject_pending_bid(&self, id: Uuid) -> StoreResult<Option<Bid>>;

    /// Mirrorable bids with no ledger transaction whose tender is anchored, oldest first.
    async fn bids_without_anchor(&self, scan: RepairScan) -> StoreResult<Vec<Bid>>;

    /// Bids still `Pending` although their tender is already `Evaluated`.
    async fn stray_pending_bids(&self, limit: i64) -> StoreResult<Vec<Bid>>;
}
