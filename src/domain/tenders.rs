use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hashing::Digest;

/// Tender status. Only ever advances: Draft -> Published -> Closed -> Evaluated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TenderStatus {
    Draft,
    Published,
    Closed,
    Evaluated,
}

impl Default for TenderStatus {
    fn default() -> Self {
        Self::Draft
    }
}

impl TenderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Closed => "closed",
            Self::Evaluated => "evaluated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "published" => Some(Self::Published),
            "closed" => Some(Self::Closed),
            "evaluated" => Some(Self::Evaluated),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Draft => 0,
            Self::Published => 1,
            Self::Closed => 2,
            Self::Evaluated => 3,
        }
    }

    /// True when `next` is the immediate successor of `self`.
    pub fn can_advance_to(&self, next: TenderStatus) -> bool {
        next.rank() == self.rank() + 1
    }
}

impl std::fmt::Display for TenderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Off-chain winner decision, written together with the `Evaluated` status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenderWinner {
    pub bid_id: Uuid,
    pub bidder_id: Uuid,
    /// Bidder's linked wallet, if any
    pub address: Option<String>,
    pub amount: Decimal,
}

/// Tender entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tender {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub budget: Decimal,
    pub deadline: DateTime<Utc>,
    pub requirements: String,
    pub status: TenderStatus,
    pub owner_id: Uuid,
    pub digest: Digest,
    pub ledger_tender_id: Option<i64>,
    pub tx_ref: Option<String>,
    pub close_tx_ref: Option<String>,
    pub winner: Option<TenderWinner>,
    pub evaluation_tx_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    /// When the tender last entered `Published`, i.e. when its mirror was first attempted
    pub published_at: Option<DateTime<Utc>>,
}

impl Tender {
    pub fn is_anchored(&self) -> bool {
        self.ledger_tender_id.is_some()
    }
}

/// Fields of a tender about to be inserted
#[derive(Debug, Clone)]
pub struct NewTender {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub budget: Decimal,
    pub deadline: DateTime<Utc>,
    pub requirements: String,
    pub status: TenderStatus,
    pub owner_id: Uuid,
    pub digest: Digest,
    pub created_at: DateTime<Utc>,
}

/// Request DTO for creating a tender
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTenderRequest {
    pub title: String,
    pub description: String,
    pub budget: Decimal,
    pub deadline: DateTime<Utc>,
    pub requirements: String,
    /// Keep the tender as a draft instead of publishing straight away
    #[serde(default)]
    pub draft: bool,
}

/// Request DTO for evaluating a tender
#[derive(Debug, Clone, Deserialize)]
pub struct EvaluateTenderRequest {
    pub winning_bid_id: Option<Uuid>,
}

/// Query params for listing tenders
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TenderQuery {
    #[serde(default)]
    pub status: Option<TenderStatus>,
}

/// Response DTO for tender
#[derive(Debug, Clone, Serialize)]
pub struct TenderResponse {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub budget: Decimal,
    pub deadline: DateTime<Utc>,
    pub requirements: String,
    pub status: TenderStatus,
    pub owner_id: Uuid,
    pub digest: Digest,
    pub ledger_tender_id: Option<i64>,
    pub tx_ref: Option<String>,
    pub close_tx_ref: Option<String>,
    pub winner_bid_id: Option<Uuid>,
    pub winner_bidder_id: Option<Uuid>,
    pub winner_address: Option<String>,
    pub winning_amount: Option<Decimal>,
    pub evaluation_tx_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl From<Tender> for TenderResponse {
    fn from(t: Tender) -> Self {
        let winner = t.winner;
        Self {
            id: t.id,
            title: t.title,
            description: t.description,
            budget: t.budget,
            deadline: t.deadline,
            requirements: t.requirements,
            status: t.status,
            owner_id: t.owner_id,
            digest: t.digest,
            ledger_tender_id: t.ledger_tender_id,
            tx_ref: t.tx_ref,
            close_tx_ref: t.close_tx_ref,
            winner_bid_id: winner.as_ref().map(|w| w.bid_id),
            winner_bidder_id: winner.as_ref().map(|w| w.bidder_id),
            winner_address: winner.as_ref().and_then(|w| w.address.clone()),
            winning_amount: winner.as_ref().map(|w| w.amount),
            evaluation_tx_ref: t.evaluation_tx_ref,
            created_at: t.created_at,
            published_at: t.published_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_advances_one_step_at_a_time() {
        assert!(TenderStatus::Draft.can_advance_to(TenderStatus::Published));
        assert!(TenderStatus::Published.can_advance_to(TenderStatus::Closed));
        assert!(TenderStatus::Closed.can_advance_to(TenderStatus::Evaluated));
        assert!(!TenderStatus::Draft.can_advance_to(TenderStatus::Closed));
        assert!(!TenderStatus::Closed.can_advance_to(TenderStatus::Published));
        assert!(!TenderStatus::Evaluated.can_advance_to(TenderStatus::Evaluated));
    }

    #[test]
    fn status_text_round_trips() {
        for s in [
            TenderStatus::Draft,
            TenderStatus::Published,
            TenderStatus::Closed,
            TenderStatus::Evaluated,
        ] {
            assert_eq!(TenderStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(TenderStatus::parse("awarded"), None);
    }
}
