//! Tender and bid state machines.
//!
//! Each operation validates the caller and current state against the record store,
//! commits the off-chain transition, then attempts the ledger mirror and writes the
//! reconciliation fields back. The off-chain write is authoritative: once it commits the
//! operation has taken effect, and a ledger failure is reported as a
//! [`LedgerOutcome::Unavailable`] on an otherwise successful result.

pub mod bids;
pub mod tenders;

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::auth::AuthContext;
use crate::domain::{Bid, Tender};
use crate::hashing::HashError;
use crate::ledger::{LedgerClient, LedgerUnavailable, TenderReceipt};
use crate::services::notifications::NotificationSink;
use crate::services::storage::StorageError;
use crate::store::{RecordStore, StoreError};

pub use bids::BidLifecycle;
pub use tenders::TenderLifecycle;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not permitted: {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error("ledger anchor required: {0}")]
    LedgerLinkage(String),

    /// Read-only ledger views have no off-chain result to fall back on.
    #[error(transparent)]
    LedgerRead(LedgerUnavailable),

    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Hash(#[from] HashError),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// What happened to the ledger mirror of an off-chain transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LedgerOutcome {
    /// Confirmed on the ledger and recorded off-chain
    Anchored {
        tx_ref: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        ledger_tender_id: Option<i64>,
    },
    /// Confirmed on the ledger but the reconciliation write failed
    Unrecorded { tx_ref: String, reason: String },
    /// Not attempted
    Skipped { reason: String },
    /// Attempted (or gated) and failed; the off-chain record stays unanchored
    Unavailable { reason: String },
}

impl LedgerOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    pub fn is_anchored(&self) -> bool {
        matches!(self, Self::Anchored { .. })
    }

    pub(crate) fn unavailable(operation: &'static str, err: &LedgerUnavailable) -> Self {
        tracing::warn!(operation, error = %err, "Ledger mirror failed");
        Self::Unavailable {
            reason: err.to_string(),
        }
    }

    pub(crate) fn unreachable(operation: &'static str) -> Self {
        tracing::warn!(operation, "Ledger unreachable, mirror not attempted");
        Self::Unavailable {
            reason: "ledger node unreachable".to_string(),
        }
    }
}

/// A tender transition together with its ledger mirror
#[derive(Debug, Clone)]
pub struct TenderOutcome {
    pub tender: Tender,
    pub ledger: LedgerOutcome,
}

/// A bid submission together with its ledger mirror
#[derive(Debug, Clone)]
pub struct BidOutcome {
    pub bid: Bid,
    pub ledger: LedgerOutcome,
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock, truncated to the microsecond precision the store keeps.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now().trunc_subsecs(6)
    }
}

/// Collaborators shared by both lifecycles
#[derive(Clone)]
pub struct LifecycleDeps {
    pub store: Arc<dyn RecordStore>,
    pub ledger: Arc<dyn LedgerClient>,
    pub notifier: Arc<dyn NotificationSink>,
    pub clock: Arc<dyn Clock>,
    /// Sender used for tender mirrors when the caller has no linked wallet
    pub default_sender: Option<String>,
}

impl LifecycleDeps {
    /// Address tender-level ledger calls are sent from.
    pub(crate) fn tender_sender(&self, wallet: Option<&str>) -> Option<String> {
        wallet
            .map(str::to_string)
            .or_else(|| self.default_sender.clone())
    }
}

pub(crate) fn require_role(
    ctx: &AuthContext,
    roles: &[crate::domain::Role],
    action: &str,
) -> LifecycleResult<()> {
    if ctx.has_role(roles) {
        Ok(())
    } else {
        Err(LifecycleError::Forbidden(format!(
            "role {} may not {}",
            ctx.role, action
        )))
    }
}

/// Decimal columns keep two fractional digits; anything finer would be silently rounded.
pub(crate) fn validate_amount(field: &str, value: rust_decimal::Decimal) -> LifecycleResult<()> {
    if value <= rust_decimal::Decimal::ZERO {
        return Err(LifecycleError::Validation(format!(
            "{} must be greater than zero",
            field
        )));
    }
    if value.normalize().scale() > 2 {
        return Err(LifecycleError::Validation(format!(
            "{} may have at most two decimal places",
            field
        )));
    }
    Ok(())
}

/// Write a confirmed tender receipt back, unless the tender already has an anchor.
pub(crate) async fn record_tender_anchor(
    store: &dyn RecordStore,
    tender: &mut Tender,
    receipt: TenderReceipt,
) -> LedgerOutcome {
    match store
        .set_tender_anchor(tender.id, receipt.ledger_tender_id, &receipt.tx_ref)
        .await
    {
        Ok(true) => {
            tracing::info!(
                tender_id = %tender.id,
                ledger_tender_id = receipt.ledger_tender_id,
                tx_ref = %receipt.tx_ref,
                "Tender anchored on ledger"
            );
            tender.ledger_tender_id = Some(receipt.ledger_tender_id);
            tender.tx_ref = Some(receipt.tx_ref.clone());
            LedgerOutcome::Anchored {
                tx_ref: receipt.tx_ref,
                ledger_tender_id: Some(receipt.ledger_tender_id),
            }
        }
        Ok(false) => {
            // Lost to a concurrent mirror; keep whatever anchor won.
            match store.get_tender(tender.id).await {
                Ok(Some(current)) => *tender = current,
                Ok(None) => {}
                Err(e) => tracing::warn!(tender_id = %tender.id, error = %e, "Reload failed"),
            }
            tracing::warn!(
                tender_id = %tender.id,
                tx_ref = %receipt.tx_ref,
                "Tender already anchored, ledger receipt discarded"
            );
            match (&tender.tx_ref, tender.ledger_tender_id) {
                (Some(tx_ref), Some(id)) => LedgerOutcome::Anchored {
                    tx_ref: tx_ref.clone(),
                    ledger_tender_id: Some(id),
                },
                _ => LedgerOutcome::Unrecorded {
                    tx_ref: receipt.tx_ref,
                    reason: "anchor was not recorded".to_string(),
                },
            }
        }
        Err(e) => {
            tracing::error!(
                tender_id = %tender.id,
                tx_ref = %receipt.tx_ref,
                error = %e,
                "Tender mirrored but anchor could not be recorded"
            );
            LedgerOutcome::Unrecorded {
                tx_ref: receipt.tx_ref,
                reason: e.to_string(),
            }
        }
    }
}

/// Write a confirmed bid transaction back, unless the bid already has one.
pub(crate) async fn record_bid_anchor(
    store: &dyn RecordStore,
    bid: &mut Bid,
    tx_ref: String,
) -> LedgerOutcome {
    match store.set_bid_anchor(bid.id, &tx_ref).await {
        Ok(recorded) => {
            if recorded {
                tracing::info!(bid_id = %bid.id, tx_ref = %tx_ref, "Bid anchored on ledger");
                bid.tx_ref = Some(tx_ref.clone());
            } else {
                tracing::warn!(bid_id = %bid.id, tx_ref = %tx_ref, "Bid already anchored");
            }
            LedgerOutcome::Anchored {
                tx_ref: bid.tx_ref.clone().unwrap_or(tx_ref),
                ledger_tender_id: None,
            }
        }
        Err(e) => {
            tracing::error!(
                bid_id = %bid.id,
                tx_ref = %tx_ref,
                error = %e,
                "Bid mirrored but anchor could not be recorded"
            );
            LedgerOutcome::Unrecorded {
                tx_ref,
                reason: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::domain::{Role, User};
    use crate::ledger::InMemoryLedger;
    use crate::services::notifications::testing::RecordingSink;
    use crate::store::memory::InMemoryStore;
    use chrono::Duration;
    use parking_lot::Mutex;
    use uuid::Uuid;

    pub const ADMIN_WALLET: &str = "0x00000000000000000000000000000000000000ad";

    /// Clock that only moves when told to.
    pub struct FixedClock(Mutex<DateTime<Utc>>);

    impl FixedClock {
        pub fn new(at: DateTime<Utc>) -> Self {
            Self(Mutex::new(at))
        }

        pub fn advance(&self, by: Duration) {
            *self.0.lock() += by;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock()
        }
    }

    /// Everything a lifecycle test needs, all in memory.
    pub struct Harness {
        pub store: Arc<InMemoryStore>,
        pub ledger: Arc<InMemoryLedger>,
        pub sink: Arc<RecordingSink>,
        pub clock: Arc<FixedClock>,
        pub deps: LifecycleDeps,
    }

    impl Harness {
        pub fn new() -> Self {
            let store = Arc::new(InMemoryStore::new());
            let ledger = Arc::new(InMemoryLedger::new());
            let sink = Arc::new(RecordingSink::default());
            let start = DateTime::parse_from_rfc3339("2024-05-01T09:00:00Z")
                .unwrap()
                .with_timezone(&Utc);
            let clock = Arc::new(FixedClock::new(start));
            let deps = LifecycleDeps {
                store: store.clone(),
                ledger: ledger.clone(),
                notifier: sink.clone(),
                clock: clock.clone(),
                default_sender: None,
            };
            Self {
                store,
                ledger,
                sink,
                clock,
                deps,
            }
        }

        pub fn now(&self) -> DateTime<Utc> {
            self.clock.now()
        }

        /// Register a user and return the context they would authenticate with.
        pub fn user(&self, role: Role, wallet: Option<&str>) -> AuthContext {
            let id = Uuid::new_v4();
            self.store.insert_user(User {
                id,
                username: format!("{}-{}", role, &id.to_string()[..8]),
                email: format!("{}@example.com", id),
                role,
                wallet_address: wallet.map(str::to_string),
                created_at: self.now(),
            });
            AuthContext::new(id, role, wallet.map(str::to_string))
        }

        pub fn admin(&self) -> AuthContext {
            self.user(Role::Admin, Some(ADMIN_WALLET))
        }

        pub fn organizer(&self) -> AuthContext {
            self.user(Role::Organizer, None)
        }

        /// Bidder with a distinct linked wallet.
        pub fn bidder(&self) -> AuthContext {
            let wallet = format!("0x{}00000000", Uuid::new_v4().simple());
            self.user(Role::Bidder, Some(&wallet))
        }

        pub fn bidder_without_wallet(&self) -> AuthContext {
            self.user(Role::Bidder, None)
        }
    }

    #[test]
    fn generated_wallets_are_address_sized() {
        let h = Harness::new();
        let ctx = h.bidder();
        assert_eq!(ctx.wallet_address.unwrap().len(), 42);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    #[test]
    fn amounts_must_be_positive_with_cents_precision() {
        assert!(validate_amount("amount", Decimal::from(900)).is_ok());
        assert!(validate_amount("amount", Decimal::from_str("900.50").unwrap()).is_ok());
        assert!(validate_amount("amount", Decimal::from_str("900.500").unwrap()).is_ok());
        assert!(matches!(
            validate_amount("amount", Decimal::ZERO),
            Err(LifecycleError::Validation(_))
        ));
        assert!(matches!(
            validate_amount("amount", Decimal::from_str("-1").unwrap()),
            Err(LifecycleError::Validation(_))
        ));
        assert!(matches!(
            validate_amount("amount", Decimal::from_str("0.001").unwrap()),
            Err(LifecycleError::Validation(_))
        ));
    }

    #[test]
    fn outcome_serializes_with_state_tag() {
        let outcome = LedgerOutcome::Anchored {
            tx_ref: "0xabc".into(),
            ledger_tender_id: Some(3),
        };
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            serde_json::json!({"state": "anchored", "tx_ref": "0xabc", "ledger_tender_id": 3})
        );
        assert_eq!(
            serde_json::to_value(LedgerOutcome::skipped("draft")).unwrap(),
            serde_json::json!({"state": "skipped", "reason": "draft"})
        );
    }
}
