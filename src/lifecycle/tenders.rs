//! Tender lifecycle: Draft -> Published -> Closed -> Evaluated.

use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use super::{
    record_tender_anchor, require_role, validate_amount, LedgerOutcome, LifecycleDeps,
    LifecycleError, LifecycleResult, TenderOutcome,
};
use crate::auth::AuthContext;
use crate::domain::notifications::{NotificationRequest, NotificationType};
use crate::domain::{
    Bid, BidStatus, CreateTenderRequest, NewTender, Role, Tender, TenderStatus, TenderWinner,
};
use crate::hashing::{commit, TenderCommitment};
use crate::ledger::{LedgerEvaluation, OnChainBid};
use crate::services::cache::{keys, RedisCache};
use crate::services::notifications::deliver_all;
use crate::store::Page;

/// Result of an off-chain evaluation
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub tender: Tender,
    pub winner: Bid,
    /// Bids moved to `Rejected` by this evaluation
    pub rejected: Vec<Bid>,
}

/// Result of asking the ledger to run its own evaluation
#[derive(Debug, Clone)]
pub struct LedgerEvaluationOutcome {
    pub tender: Tender,
    pub evaluation: Option<LedgerEvaluation>,
    pub ledger: LedgerOutcome,
}

/// On-chain bid list of an anchored tender
#[derive(Debug, Clone)]
pub struct LedgerBids {
    pub ledger_tender_id: i64,
    pub bids: Vec<OnChainBid>,
    pub cached: bool,
}

#[derive(Clone)]
pub struct TenderLifecycle {
    deps: LifecycleDeps,
    cache: Option<Arc<RedisCache>>,
}

impl TenderLifecycle {
    pub fn new(deps: LifecycleDeps, cache: Option<Arc<RedisCache>>) -> Self {
        Self { deps, cache }
    }

    async fn load(&self, id: Uuid) -> LifecycleResult<Tender> {
        self.deps
            .store
            .get_tender(id)
            .await?
            .ok_or(LifecycleError::NotFound("tender"))
    }

    /// Create a tender, published immediately unless `draft` is set.
    #[instrument(skip(self, ctx, req), fields(user_id = %ctx.user_id, tender_id = tracing::field::Empty))]
    pub async fn create(
        &self,
        ctx: &AuthContext,
        req: CreateTenderRequest,
    ) -> LifecycleResult<TenderOutcome> {
        require_role(ctx, &[Role::Admin, Role::Organizer], "create tenders")?;

        let title = req.title.trim();
        if title.is_empty() {
            return Err(LifecycleError::Validation("title is required".into()));
        }
        if req.description.trim().is_empty() {
            return Err(LifecycleError::Validation("description is required".into()));
        }
        validate_amount("budget", req.budget)?;

        let now = self.deps.clock.now();
        if req.deadline <= now {
            return Err(LifecycleError::Validation(
                "deadline must be in the future".into(),
            ));
        }

        let digest = commit(&TenderCommitment::new(
            title,
            &req.description,
            req.budget,
            req.deadline,
            &req.requirements,
            ctx.user_id,
            now,
        ))?;

        let status = if req.draft {
            TenderStatus::Draft
        } else {
            TenderStatus::Published
        };

        let tender = self
            .deps
            .store
            .insert_tender(NewTender {
                id: Uuid::new_v4(),
                title: title.to_string(),
                description: req.description,
                budget: req.budget,
                deadline: req.deadline,
                requirements: req.requirements,
                status,
                owner_id: ctx.user_id,
                digest,
                created_at: now,
            })
            .await?;

        tracing::Span::current().record("tender_id", tracing::field::display(tender.id));
        tracing::info!(tender_id = %tender.id, status = %tender.status, digest = %tender.digest, "Tender created");

        if status == TenderStatus::Draft {
            return Ok(TenderOutcome {
                tender,
                ledger: LedgerOutcome::skipped("drafts are mirrored when published"),
            });
        }

        Ok(self.mirror(ctx, tender).await)
    }

    /// Move an owned draft to `Published` and mirror it if it has no anchor yet.
    #[instrument(skip(self, ctx), fields(user_id = %ctx.user_id))]
    pub async fn publish(&self, ctx: &AuthContext, tender_id: Uuid) -> LifecycleResult<TenderOutcome> {
        require_role(ctx, &[Role::Admin, Role::Organizer], "publish tenders")?;

        let tender = self.load(tender_id).await?;
        if tender.owner_id != ctx.user_id {
            return Err(LifecycleError::Forbidden(
                "only the tender owner may publish it".into(),
            ));
        }
        if !tender.status.can_advance_to(TenderStatus::Published) {
            return Err(LifecycleError::StateConflict(format!(
                "cannot publish a {} tender",
                tender.status
            )));
        }
        if tender.deadline <= self.deps.clock.now() {
            return Err(LifecycleError::Validation(
                "deadline has already passed".into(),
            ));
        }

        let tender = self
            .deps
            .store
            .transition_tender(
                tender_id,
                TenderStatus::Draft,
                TenderStatus::Published,
                Some(ctx.user_id),
                self.deps.clock.now(),
            )
            .await?
            .ok_or_else(|| {
                LifecycleError::StateConflict("tender changed while publishing".into())
            })?;

        tracing::info!(tender_id = %tender.id, "Tender published");

        if tender.is_anchored() {
            return Ok(TenderOutcome {
                tender,
                ledger: LedgerOutcome::skipped("tender is already anchored"),
            });
        }
        Ok(self.mirror(ctx, tender).await)
    }

    async fn mirror(&self, ctx: &AuthContext, mut tender: Tender) -> TenderOutcome {
        let Some(from) = self.deps.tender_sender(ctx.wallet_address.as_deref()) else {
            return TenderOutcome {
                tender,
                ledger: LedgerOutcome::skipped("no ledger sender address configured"),
            };
        };
        if !self.deps.ledger.is_reachable().await {
            return TenderOutcome {
                tender,
                ledger: LedgerOutcome::unreachable("submit_tender"),
            };
        }

        let ledger = match self
            .deps
            .ledger
            .submit_tender(
                &tender.title,
                tender.budget,
                tender.deadline.timestamp(),
                &tender.digest,
                &from,
            )
            .await
        {
            Ok(receipt) => record_tender_anchor(self.deps.store.as_ref(), &mut tender, receipt).await,
            Err(e) => LedgerOutcome::unavailable("submit_tender", &e),
        };

        TenderOutcome { tender, ledger }
    }

    /// Stop accepting bids. The off-chain close stands whatever the ledger does.
    #[instrument(skip(self, ctx), fields(user_id = %ctx.user_id))]
    pub async fn close(&self, ctx: &AuthContext, tender_id: Uuid) -> LifecycleResult<TenderOutcome> {
        require_role(ctx, &[Role::Admin], "close tenders")?;

        let tender = self.load(tender_id).await?;
        if tender.status != TenderStatus::Published {
            return Err(LifecycleError::StateConflict(format!(
                "cannot close a {} tender",
                tender.status
            )));
        }

        let mut tender = self
            .deps
            .store
            .transition_tender(
                tender_id,
                TenderStatus::Published,
                TenderStatus::Closed,
                None,
                self.deps.clock.now(),
            )
            .await?
            .ok_or_else(|| LifecycleError::StateConflict("tender changed while closing".into()))?;

        tracing::info!(tender_id = %tender.id, "Tender closed");

        let ledger = match tender.ledger_tender_id {
            None => LedgerOutcome::skipped("tender has no ledger anchor"),
            Some(ledger_id) => match self.deps.tender_sender(ctx.wallet_address.as_deref()) {
                None => LedgerOutcome::skipped("no ledger sender address configured"),
                Some(from) => {
                    if !self.deps.ledger.is_reachable().await {
                        LedgerOutcome::unreachable("close_tender")
                    } else {
                        match self.deps.ledger.close_tender(ledger_id, &from).await {
                            Ok(tx_ref) => {
                                match self.deps.store.set_tender_close_tx(tender.id, &tx_ref).await {
                                    Ok(()) => {
                                        tender.close_tx_ref = Some(tx_ref.clone());
                                        LedgerOutcome::Anchored {
                                            tx_ref,
                                            ledger_tender_id: Some(ledger_id),
                                        }
                                    }
                                    Err(e) => {
                                        tracing::error!(tender_id = %tender.id, tx_ref = %tx_ref, error = %e, "Close mirrored but not recorded");
                                        LedgerOutcome::Unrecorded {
                                            tx_ref,
                                            reason: e.to_string(),
                                        }
                                    }
                                }
                            }
                            Err(e) => LedgerOutcome::unavailable("close_tender", &e),
                        }
                    }
                }
            },
        };

        if let (Some(cache), Some(ledger_id)) = (&self.cache, tender.ledger_tender_id) {
            if let Err(e) = cache.delete(&keys::ledger_bids(ledger_id)).await {
                tracing::warn!(tender_id = %tender.id, error = %e, "Failed to drop cached ledger bids");
            }
        }

        let bid_count = self.deps.store.count_bids(tender.id).await.unwrap_or_default();
        deliver_all(
            self.deps.notifier.as_ref(),
            vec![NotificationRequest::new(
                tender.owner_id,
                NotificationType::TenderClosed,
                format!("Tender closed: {}", tender.title),
                format!(
                    "Bidding on '{}' has closed with {} bid(s). It is ready for evaluation.",
                    tender.title, bid_count
                ),
            )
            .tender(tender.id)],
        )
        .await;

        Ok(TenderOutcome { tender, ledger })
    }

    /// Pick the winning bid off-chain and reject every other bid of the tender.
    #[instrument(skip(self, ctx), fields(user_id = %ctx.user_id))]
    pub async fn evaluate(
        &self,
        ctx: &AuthContext,
        tender_id: Uuid,
        winning_bid_id: Option<Uuid>,
    ) -> LifecycleResult<Evaluation> {
        require_role(ctx, &[Role::Admin], "evaluate tenders")?;
        let winning_bid_id = winning_bid_id
            .ok_or_else(|| LifecycleError::Validation("winning_bid_id is required".into()))?;

        let tender = self.load(tender_id).await?;
        if tender.status != TenderStatus::Closed {
            return Err(LifecycleError::StateConflict(format!(
                "cannot evaluate a {} tender",
                tender.status
            )));
        }
        if self.deps.store.count_bids(tender_id).await? == 0 {
            return Err(LifecycleError::StateConflict(
                "tender has no bids to evaluate".into(),
            ));
        }

        let bid = self
            .deps
            .store
            .get_bid(winning_bid_id)
            .await?
            .ok_or(LifecycleError::NotFound("bid"))?;
        if bid.tender_id != tender_id {
            return Err(LifecycleError::Validation(
                "bid does not belong to this tender".into(),
            ));
        }
        if bid.status == BidStatus::Rejected {
            return Err(LifecycleError::StateConflict(
                "a rejected bid cannot win".into(),
            ));
        }
        let bidder = self
            .deps
            .store
            .get_user(bid.bidder_id)
            .await?
            .ok_or(LifecycleError::NotFound("bidder"))?;

        let winner = TenderWinner {
            bid_id: bid.id,
            bidder_id: bidder.id,
            address: bidder.wallet_address.clone(),
            amount: bid.amount,
        };

        // The status-conditioned write is what stops a second evaluation.
        let tender = self
            .deps
            .store
            .record_evaluation(tender_id, &winner)
            .await?
            .ok_or_else(|| {
                LifecycleError::StateConflict("tender changed while evaluating".into())
            })?;

        if !self.deps.store.select_winning_bid(bid.id, tender_id).await? {
            tracing::error!(tender_id = %tender_id, bid_id = %bid.id, "Winning bid vanished during evaluation");
        }
        let rejected = self.deps.store.reject_losing_bids(tender_id, bid.id).await?;

        tracing::info!(
            tender_id = %tender_id,
            bid_id = %bid.id,
            amount = %bid.amount,
            rejected = rejected.len(),
            "Tender evaluated"
        );

        let mut notices = vec![
            NotificationRequest::new(
                bid.bidder_id,
                NotificationType::BidWon,
                format!("You won: {}", tender.title),
                format!(
                    "Your bid of {} on '{}' was selected.",
                    bid.amount, tender.title
                ),
            )
            .tender(tender_id)
            .bid(bid.id),
            NotificationRequest::new(
                tender.owner_id,
                NotificationType::TenderEvaluated,
                format!("Tender evaluated: {}", tender.title),
                format!(
                    "A winning bid of {} was selected for '{}'.",
                    bid.amount, tender.title
                ),
            )
            .tender(tender_id),
        ];
        notices.extend(rejected.iter().map(|loser| {
            NotificationRequest::new(
                loser.bidder_id,
                NotificationType::BidLost,
                format!("Bid not selected: {}", tender.title),
                format!("Your bid on '{}' was not selected.", tender.title),
            )
            .tender(tender_id)
            .bid(loser.id)
        }));
        deliver_all(self.deps.notifier.as_ref(), notices).await;

        let winner = Bid {
            status: BidStatus::Selected,
            is_winner: true,
            ..bid
        };
        Ok(Evaluation {
            tender,
            winner,
            rejected,
        })
    }

    /// Ask the contract to run its own evaluation. The off-chain winner is left alone.
    #[instrument(skip(self, ctx), fields(user_id = %ctx.user_id))]
    pub async fn evaluate_on_ledger(
        &self,
        ctx: &AuthContext,
        tender_id: Uuid,
    ) -> LifecycleResult<LedgerEvaluationOutcome> {
        require_role(ctx, &[Role::Admin], "run ledger evaluations")?;

        let mut tender = self.load(tender_id).await?;
        if !matches!(tender.status, TenderStatus::Closed | TenderStatus::Evaluated) {
            return Err(LifecycleError::StateConflict(format!(
                "cannot evaluate a {} tender on the ledger",
                tender.status
            )));
        }
        let ledger_id = tender.ledger_tender_id.ok_or_else(|| {
            LifecycleError::LedgerLinkage("tender was never anchored on the ledger".into())
        })?;

        let Some(from) = self.deps.tender_sender(ctx.wallet_address.as_deref()) else {
            return Ok(LedgerEvaluationOutcome {
                tender,
                evaluation: None,
                ledger: LedgerOutcome::skipped("no ledger sender address configured"),
            });
        };
        if !self.deps.ledger.is_reachable().await {
            return Ok(LedgerEvaluationOutcome {
                tender,
                evaluation: None,
                ledger: LedgerOutcome::unreachable("evaluate_tender"),
            });
        }

        match self.deps.ledger.evaluate_tender(ledger_id, &from).await {
            Ok(evaluation) => {
                let ledger = match self
                    .deps
                    .store
                    .set_evaluation_tx(tender.id, &evaluation.tx_ref)
                    .await
                {
                    Ok(()) => {
                        tender.evaluation_tx_ref = Some(evaluation.tx_ref.clone());
                        LedgerOutcome::Anchored {
                            tx_ref: evaluation.tx_ref.clone(),
                            ledger_tender_id: Some(ledger_id),
                        }
                    }
                    Err(e) => {
                        tracing::error!(tender_id = %tender.id, error = %e, "Ledger evaluation not recorded");
                        LedgerOutcome::Unrecorded {
                            tx_ref: evaluation.tx_ref.clone(),
                            reason: e.to_string(),
                        }
                    }
                };
                tracing::info!(
                    tender_id = %tender.id,
                    winner = %evaluation.winner_address,
                    amount = %evaluation.winning_amount,
                    "Ledger evaluation complete"
                );
                Ok(LedgerEvaluationOutcome {
                    tender,
                    evaluation: Some(evaluation),
                    ledger,
                })
            }
            Err(e) => Ok(LedgerEvaluationOutcome {
                tender,
                evaluation: None,
                ledger: LedgerOutcome::unavailable("evaluate_tender", &e),
            }),
        }
    }

    /// On-chain bids of an anchored tender, served from cache when fresh.
    pub async fn ledger_bids(&self, tender_id: Uuid) -> LifecycleResult<LedgerBids> {
        let tender = self.load(tender_id).await?;
        let ledger_id = tender.ledger_tender_id.ok_or_else(|| {
            LifecycleError::LedgerLinkage("tender was never anchored on the ledger".into())
        })?;

        let key = keys::ledger_bids(ledger_id);
        if let Some(cache) = &self.cache {
            if let Some(bids) = cache.get::<Vec<OnChainBid>>(&key).await {
                return Ok(LedgerBids {
                    ledger_tender_id: ledger_id,
                    bids,
                    cached: true,
                });
            }
        }

        let bids = self
            .deps
            .ledger
            .list_bids(ledger_id)
            .await
            .map_err(LifecycleError::LedgerRead)?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set(&key, &bids).await {
                tracing::warn!(key = %key, error = %e, "Failed to cache ledger bids");
            }
        }

        Ok(LedgerBids {
            ledger_tender_id: ledger_id,
            bids,
            cached: false,
        })
    }

    pub async fn get(&self, tender_id: Uuid) -> LifecycleResult<Tender> {
        self.load(tender_id).await
    }

    pub async fn list(
        &self,
        status: Option<TenderStatus>,
        page: Page,
    ) -> LifecycleResult<(Vec<Tender>, u64)> {
        Ok(self.deps.store.list_tenders(status, page).await?)
    }
}
