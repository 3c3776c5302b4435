//! Bid lifecycle: Pending -> {Selected | Rejected}.
//!
//! Only submission and administrative rejection happen here; the evaluation outcome is
//! applied by the tender lifecycle.

use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use super::{
    record_bid_anchor, require_role, validate_amount, BidOutcome, LedgerOutcome, LifecycleDeps,
    LifecycleError, LifecycleResult,
};
use crate::auth::AuthContext;
use crate::domain::notifications::{NotificationRequest, NotificationType};
use crate::domain::{Bid, DocumentUpload, NewBid, Role, TenderStatus};
use crate::hashing::{commit, BidCommitment};
use crate::services::notifications::deliver_all;
use crate::services::storage::{document_key, FileStorage};
use crate::store::{BidFilter, Page};

#[derive(Clone)]
pub struct BidLifecycle {
    deps: LifecycleDeps,
    storage: Arc<dyn FileStorage>,
}

impl BidLifecycle {
    pub fn new(deps: LifecycleDeps, storage: Arc<dyn FileStorage>) -> Self {
        Self { deps, storage }
    }

    #[instrument(skip(self, ctx, documents), fields(user_id = %ctx.user_id, bid_id = tracing::field::Empty))]
    pub async fn submit(
        &self,
        ctx: &AuthContext,
        tender_id: Uuid,
        amount: rust_decimal::Decimal,
        documents: Vec<DocumentUpload>,
    ) -> LifecycleResult<BidOutcome> {
        require_role(ctx, &[Role::Bidder], "submit bids")?;
        validate_amount("amount", amount)?;

        let tender = self
            .deps
            .store
            .get_tender(tender_id)
            .await?
            .ok_or(LifecycleError::NotFound("tender"))?;

        if tender.status != TenderStatus::Published {
            return Err(LifecycleError::StateConflict(format!(
                "tender is {} and not accepting bids",
                tender.status
            )));
        }
        let now = self.deps.clock.now();
        if now >= tender.deadline {
            return Err(LifecycleError::StateConflict(
                "the bidding deadline has passed".into(),
            ));
        }
        // Checked before anything is written, whether or not the ledger is reachable.
        if ctx.wallet_address.is_some() && tender.ledger_tender_id.is_none() {
            return Err(LifecycleError::LedgerLinkage(
                "tender has no ledger counterpart to bid against".into(),
            ));
        }

        let bid_id = Uuid::new_v4();
        let digest = commit(&BidCommitment::new(tender_id, ctx.user_id, amount, now))?;

        let mut stored = Vec::with_capacity(documents.len());
        for (index, doc) in documents.iter().enumerate() {
            let key = document_key(tender_id, bid_id, index, &doc.filename);
            if let Err(e) = self.storage.store(&key, doc).await {
                self.discard_documents(&stored).await;
                return Err(e.into());
            }
            stored.push(key);
        }
        drop(documents);

        let inserted = self
            .deps
            .store
            .insert_bid_if_open(NewBid {
                id: bid_id,
                tender_id,
                bidder_id: ctx.user_id,
                amount,
                documents: stored.clone(),
                digest,
                submitted_at: now,
            })
            .await;

        // Documents are kept only when the bid referencing them was written.
        let mut bid = match inserted {
            Ok(Some(bid)) => bid,
            Ok(None) => {
                self.discard_documents(&stored).await;
                return Err(LifecycleError::StateConflict(
                    "tender stopped accepting bids".into(),
                ));
            }
            Err(e) => {
                self.discard_documents(&stored).await;
                return Err(e.into());
            }
        };

        tracing::Span::current().record("bid_id", tracing::field::display(bid.id));
        tracing::info!(bid_id = %bid.id, tender_id = %tender_id, digest = %bid.digest, "Bid submitted");

        let ledger = match (ctx.wallet_address.as_deref(), tender.ledger_tender_id) {
            (Some(wallet), Some(ledger_id)) => {
                if !self.deps.ledger.is_reachable().await {
                    LedgerOutcome::unreachable("submit_bid")
                } else {
                    match self
                        .deps
                        .ledger
                        .submit_bid(ledger_id, amount, &bid.digest, wallet)
                        .await
                    {
                        Ok(tx_ref) => {
                            record_bid_anchor(self.deps.store.as_ref(), &mut bid, tx_ref).await
                        }
                        Err(e) => LedgerOutcome::unavailable("submit_bid", &e),
                    }
                }
            }
            _ => LedgerOutcome::skipped("bidder has no linked wallet"),
        };

        deliver_all(
            self.deps.notifier.as_ref(),
            vec![NotificationRequest::new(
                tender.owner_id,
                NotificationType::BidSubmitted,
                format!("New bid on {}", tender.title),
                format!("A bid of {} was submitted on '{}'.", amount, tender.title),
            )
            .tender(tender_id)
            .bid(bid.id)],
        )
        .await;

        Ok(BidOutcome { bid, ledger })
    }

    async fn discard_documents(&self, keys: &[String]) {
        for key in keys {
            if let Err(e) = self.storage.remove(key).await {
                tracing::warn!(key = %key, error = %e, "Failed to remove orphaned bid document");
            }
        }
    }

    /// Administrative override of a pending bid.
    #[instrument(skip(self, ctx), fields(user_id = %ctx.user_id))]
    pub async fn reject(&self, ctx: &AuthContext, bid_id: Uuid) -> LifecycleResult<Bid> {
        require_role(ctx, &[Role::Admin], "reject bids")?;

        let Some(bid) = self.deps.store.reject_pending_bid(bid_id).await? else {
            return match self.deps.store.get_bid(bid_id).await? {
                Some(existing) => Err(LifecycleError::StateConflict(format!(
                    "bid is already {}",
                    existing.status.as_str()
                ))),
                None => Err(LifecycleError::NotFound("bid")),
            };
        };

        tracing::info!(bid_id = %bid.id, tender_id = %bid.tender_id, "Bid rejected");

        deliver_all(
            self.deps.notifier.as_ref(),
            vec![NotificationRequest::new(
                bid.bidder_id,
                NotificationType::BidRejected,
                "Bid rejected",
                "Your bid was rejected by an administrator.",
            )
            .tender(bid.tender_id)
            .bid(bid.id)],
        )
        .await;

        Ok(bid)
    }

    /// Bids of one tender. Admins and the tender owner see all of them, bidders their own.
    pub async fn list_for_tender(
        &self,
        ctx: &AuthContext,
        tender_id: Uuid,
        page: Page,
    ) -> LifecycleResult<(Vec<Bid>, u64)> {
        let tender = self
            .deps
            .store
            .get_tender(tender_id)
            .await?
            .ok_or(LifecycleError::NotFound("tender"))?;

        let bidder_id = if ctx.is_admin() || tender.owner_id == ctx.user_id {
            None
        } else {
            Some(ctx.user_id)
        };

        Ok(self
            .deps
            .store
            .list_bids(
                BidFilter {
                    tender_id: Some(tender_id),
                    bidder_id,
                },
                page,
            )
            .await?)
    }

    pub async fn my_bids(&self, ctx: &AuthContext, page: Page) -> LifecycleResult<(Vec<Bid>, u64)> {
        Ok(self
            .deps
            .store
            .list_bids(
                BidFilter {
                    tender_id: None,
                    bidder_id: Some(ctx.user_id),
                },
                page,
            )
            .await?)
    }

    pub async fn all_bids(&self, ctx: &AuthContext, page: Page) -> LifecycleResult<(Vec<Bid>, u64)> {
        require_role(ctx, &[Role::Admin], "list all bids")?;
        Ok(self.deps.store.list_bids(BidFilter::default(), page).await?)
    }
}
