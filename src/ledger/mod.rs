//! Append-only ledger capability.
//!
//! The lifecycles only see [`LedgerClient`]. Every failure mode a binding can hit
//! (transport, revert, missing deployment, timeout, undecodable response) collapses into
//! [`LedgerUnavailable`]; callers never observe a partially applied ledger write.

pub mod abi;
pub mod deployment;
pub mod memory;
pub mod rpc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hashing::Digest;

pub use memory::InMemoryLedger;
pub use rpc::RpcLedgerClient;

/// Why a ledger call could not be completed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnavailableCause {
    #[error("contract is not deployed")]
    NotDeployed,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("call rejected by contract: {0}")]
    Rejected(String),

    #[error("transaction {0} reverted")]
    Reverted(String),

    /// Sent, but no receipt was seen; the transaction may still be mined
    #[error("transaction {tx_ref} unconfirmed: {reason}")]
    Unconfirmed { tx_ref: String, reason: String },

    #[error("unexpected ledger response: {0}")]
    Decode(String),

    #[error("value cannot be sent to the ledger: {0}")]
    Encode(String),
}

impl UnavailableCause {
    /// Whether the same call may succeed if simply tried again later. A transaction
    /// that was already sent is never transient: resending it could apply it twice.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Rpc { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("ledger unavailable: {cause}")]
pub struct LedgerUnavailable {
    pub cause: UnavailableCause,
}

impl From<UnavailableCause> for LedgerUnavailable {
    fn from(cause: UnavailableCause) -> Self {
        Self { cause }
    }
}

pub type LedgerResult<T> = Result<T, LedgerUnavailable>;

/// Confirmed `createTender` transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenderReceipt {
    pub tx_ref: String,
    pub ledger_tender_id: i64,
}

/// Outcome of the contract's own bid evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEvaluation {
    pub winner_address: String,
    pub winning_amount: Decimal,
    pub tx_ref: String,
}

/// A bid as recorded on-chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnChainBid {
    pub bidder: String,
    pub amount: Decimal,
    pub bid_hash: String,
    pub submitted_at: i64,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Liveness probe. Never fails; a node that answers but has no contract deployed is
    /// still reachable.
    async fn is_reachable(&self) -> bool;

    async fn submit_tender(
        &self,
        title: &str,
        budget: Decimal,
        deadline_unix: i64,
        digest: &Digest,
        from: &str,
    ) -> LedgerResult<TenderReceipt>;

    async fn submit_bid(
        &self,
        ledger_tender_id: i64,
        amount: Decimal,
        digest: &Digest,
        from: &str,
    ) -> LedgerResult<String>;

    async fn close_tender(&self, ledger_tender_id: i64, from: &str) -> LedgerResult<String>;

    async fn evaluate_tender(
        &self,
        ledger_tender_id: i64,
        from: &str,
    ) -> LedgerResult<LedgerEvaluation>;

    async fn list_bids(&self, ledger_tender_id: i64) -> LedgerResult<Vec<OnChainBid>>;
}

/// Whole-unit value the contract stores; fractions are truncated toward zero.
pub(crate) fn whole_units(value: Decimal) -> Result<u128, UnavailableCause> {
    use rust_decimal::prelude::ToPrimitive;

    value
        .trunc()
        .to_u128()
        .ok_or_else(|| UnavailableCause::Encode(format!("{} is not a non-negative integer", value)))
}

pub(crate) fn decimal_from_units(units: u128) -> Result<Decimal, UnavailableCause> {
    use rust_decimal::prelude::FromPrimitive;

    Decimal::from_u128(units)
        .ok_or_else(|| UnavailableCause::Decode(format!("amount {} out of range", units)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn whole_units_truncates() {
        assert_eq!(whole_units(Decimal::from_str("1000.99").unwrap()).unwrap(), 1000);
        assert_eq!(whole_units(Decimal::from(7)).unwrap(), 7);
        assert!(whole_units(Decimal::from(-1)).is_err());
    }

    #[test]
    fn only_network_failures_are_transient() {
        assert!(UnavailableCause::Transport("reset".into()).is_transient());
        assert!(UnavailableCause::Rpc {
            code: -32000,
            message: "busy".into()
        }
        .is_transient());
        assert!(!UnavailableCause::Unconfirmed {
            tx_ref: "0xab".into(),
            reason: "no receipt within 60s".into()
        }
        .is_transient());
        assert!(!UnavailableCause::NotDeployed.is_transient());
        assert!(!UnavailableCause::Reverted("0xab".into()).is_transient());
        assert!(!UnavailableCause::Rejected("closed".into()).is_transient());
    }

    #[test]
    fn unavailable_wraps_cause() {
        let err: LedgerUnavailable = UnavailableCause::NotDeployed.into();
        assert_eq!(err.to_string(), "ledger unavailable: contract is not deployed");
    }
}
