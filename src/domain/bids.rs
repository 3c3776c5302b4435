use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hashing::Digest;

/// Bid status. `Pending` until evaluation or an administrative rejection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BidStatus {
    Pending,
    Selected,
    Rejected,
}

impl Default for BidStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl BidStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Selected => "selected",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "selected" => Some(Self::Selected),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Bid entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bid {
    pub id: Uuid,
    pub tender_id: Uuid,
    pub bidder_id: Uuid,
    pub amount: Decimal,
    pub documents: Vec<String>,
    pub digest: Digest,
    pub tx_ref: Option<String>,
    pub is_winner: bool,
    pub status: BidStatus,
    pub submitted_at: DateTime<Utc>,
}

/// Fields of a bid about to be inserted
#[derive(Debug, Clone)]
pub struct NewBid {
    pub id: Uuid,
    pub tender_id: Uuid,
    pub bidder_id: Uuid,
    pub amount: Decimal,
    pub documents: Vec<String>,
    pub digest: Digest,
    pub submitted_at: DateTime<Utc>,
}

/// JSON part of a bid submission
#[derive(Debug, Clone, Deserialize)]
pub struct CreateBidRequest {
    pub amount: Decimal,
}

/// An uploaded supporting document, held only until it is stored
#[derive(Debug, Clone)]
pub struct DocumentUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Response DTO for bid
#[derive(Debug, Clone, Serialize)]
pub struct BidResponse {
    pub id: Uuid,
    pub tender_id: Uuid,
    pub bidder_id: Uuid,
    pub amount: Decimal,
    pub documents: Vec<String>,
    pub digest: Digest,
    pub tx_ref: Option<String>,
    pub is_winner: bool,
    pub status: BidStatus,
    pub submitted_at: DateTime<Utc>,
}

impl From<Bid> for BidResponse {
    fn from(b: Bid) -> Self {
        Self {
            id: b.id,
            tender_id: b.tender_id,
            bidder_id: b.bidder_id,
            amount: b.amount,
            documents: b.documents,
            digest: b.digest,
            tx_ref: b.tx_ref,
            is_winner: b.is_winner,
            status: b.status,
            submitted_at: b.submitted_at,
        }
    }
}
