//! Repair pass for records left in the off-chain-only sub-state.
//!
//! A mirror that failed (or never ran because the process died) leaves a record with its
//! digest but no ledger anchor. The reconciler re-submits those digests and writes the
//! anchor back only if it is still empty. It also rejects bids that slipped past an
//! evaluation sweep.
//!
//! Records are only picked up once they are older than the settle window, so a mirror
//! still waiting for its receipt is never sent a second time.

use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::config::ReconcileSettings;
use crate::domain::{Bid, Tender, TenderStatus};
use crate::ledger::{LedgerClient, LedgerUnavailable};
use crate::lifecycle::{
    record_bid_anchor, record_tender_anchor, Clock, LedgerOutcome, LifecycleDeps,
};
use crate::store::{RecordStore, RepairScan, StoreResult};

/// Counts from one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub tenders_anchored: usize,
    pub tenders_pending: usize,
    pub bids_anchored: usize,
    pub bids_pending: usize,
    pub bids_skipped: usize,
    pub stray_bids_rejected: usize,
    pub winners_restored: usize,
}

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn RecordStore>,
    ledger: Arc<dyn LedgerClient>,
    clock: Arc<dyn Clock>,
    default_sender: Option<String>,
    batch_size: i64,
    max_elapsed: Duration,
    settle_after: Duration,
}

impl Reconciler {
    pub fn new(deps: &LifecycleDeps, settings: &ReconcileSettings) -> Self {
        Self {
            store: deps.store.clone(),
            ledger: deps.ledger.clone(),
            clock: deps.clock.clone(),
            default_sender: deps.default_sender.clone(),
            batch_size: settings.batch_size,
            max_elapsed: settings.max_elapsed,
            settle_after: settings.settle_after,
        }
    }

    fn scan(&self) -> RepairScan {
        let now = self.clock.now();
        let settled_before = chrono::Duration::from_std(self.settle_after)
            .ok()
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        RepairScan {
            settled_before,
            has_default_sender: self.default_sender.is_some(),
            limit: self.batch_size,
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(200),
            max_interval: Duration::from_secs(5),
            max_elapsed_time: Some(self.max_elapsed),
            ..ExponentialBackoff::default()
        }
    }

    /// Run `op` until it succeeds, fails permanently, or the backoff budget is spent.
    async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T, LedgerUnavailable>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, LedgerUnavailable>>,
    {
        backoff::future::retry(self.backoff(), || {
            let attempt = op();
            async move {
                attempt.await.map_err(|e| {
                    if e.cause.is_transient() {
                        tracing::debug!(error = %e, "Ledger call failed, will retry");
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            }
        })
        .await
    }

    async fn sender_for(&self, user_id: uuid::Uuid) -> StoreResult<Option<String>> {
        Ok(self
            .store
            .get_user(user_id)
            .await?
            .and_then(|u| u.wallet_address))
    }

    /// Re-submit an unanchored tender using its stored digest.
    #[instrument(skip(self, tender), fields(tender_id = %tender.id))]
    pub async fn remirror_tender(&self, tender: &mut Tender) -> StoreResult<LedgerOutcome> {
        if tender.is_anchored() {
            return Ok(LedgerOutcome::skipped("tender is already anchored"));
        }
        if tender.status == TenderStatus::Draft {
            return Ok(LedgerOutcome::skipped("drafts are mirrored when published"));
        }
        let owner_wallet = self.sender_for(tender.owner_id).await?;
        let Some(from) = owner_wallet.or_else(|| self.default_sender.clone()) else {
            return Ok(LedgerOutcome::skipped("no ledger sender address configured"));
        };
        if !self.ledger.is_reachable().await {
            return Ok(LedgerOutcome::unreachable("submit_tender"));
        }

        let ledger = self.ledger.as_ref();
        let (title, budget, deadline, digest) = (
            tender.title.clone(),
            tender.budget,
            tender.deadline.timestamp(),
            tender.digest,
        );
        let result = self
            .with_retry(|| ledger.submit_tender(&title, budget, deadline, &digest, &from))
            .await;

        Ok(match result {
            Ok(receipt) => record_tender_anchor(self.store.as_ref(), tender, receipt).await,
            Err(e) => LedgerOutcome::unavailable("submit_tender", &e),
        })
    }

    /// Re-submit an unanchored bid whose tender is anchored.
    #[instrument(skip(self, bid), fields(bid_id = %bid.id))]
    pub async fn remirror_bid(&self, bid: &mut Bid) -> StoreResult<LedgerOutcome> {
        if bid.tx_ref.is_some() {
            return Ok(LedgerOutcome::skipped("bid is already anchored"));
        }
        let ledger_id = match self.store.get_tender(bid.tender_id).await? {
            Some(Tender {
                ledger_tender_id: Some(id),
                ..
            }) => id,
            _ => return Ok(LedgerOutcome::skipped("tender has no ledger anchor")),
        };
        let Some(wallet) = self.sender_for(bid.bidder_id).await? else {
            return Ok(LedgerOutcome::skipped("bidder has no linked wallet"));
        };
        if !self.ledger.is_reachable().await {
            return Ok(LedgerOutcome::unreachable("submit_bid"));
        }

        let ledger = self.ledger.as_ref();
        let (amount, digest) = (bid.amount, bid.digest);
        let result = self
            .with_retry(|| ledger.submit_bid(ledger_id, amount, &digest, &wallet))
            .await;

        Ok(match result {
            Ok(tx_ref) => record_bid_anchor(self.store.as_ref(), bid, tx_ref).await,
            Err(e) => LedgerOutcome::unavailable("submit_bid", &e),
        })
    }

    /// Settle bids still `Pending` on evaluated tenders: the recorded winner is selected,
    /// everything else is rejected.
    #[instrument(skip(self))]
    pub async fn audit_evaluations(&self) -> StoreResult<(usize, usize)> {
        let stray = self.store.stray_pending_bids(self.batch_size).await?;
        let (mut rejected, mut restored) = (0, 0);

        for bid in stray {
            let winner = self
                .store
                .get_tender(bid.tender_id)
                .await?
                .and_then(|t| t.winner)
                .map(|w| w.bid_id);

            if winner == Some(bid.id) {
                if self.store.select_winning_bid(bid.id, bid.tender_id).await? {
                    tracing::warn!(bid_id = %bid.id, tender_id = %bid.tender_id, "Restored winning bid status");
                    restored += 1;
                }
            } else if self.store.reject_pending_bid(bid.id).await?.is_some() {
                tracing::warn!(bid_id = %bid.id, tender_id = %bid.tender_id, "Rejected bid missed by evaluation sweep");
                rejected += 1;
            }
        }

        Ok((rejected, restored))
    }

    /// One bounded batch of every repair.
    #[instrument(skip(self))]
    pub async fn run_pass(&self) -> StoreResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let scan = self.scan();

        for mut tender in self.store.tenders_without_anchor(scan).await? {
            match self.remirror_tender(&mut tender).await? {
                LedgerOutcome::Anchored { .. } => report.tenders_anchored += 1,
                _ => report.tenders_pending += 1,
            }
        }

        for mut bid in self.store.bids_without_anchor(scan).await? {
            match self.remirror_bid(&mut bid).await? {
                LedgerOutcome::Anchored { .. } => report.bids_anchored += 1,
                LedgerOutcome::Skipped { .. } => report.bids_skipped += 1,
                _ => report.bids_pending += 1,
            }
        }

        let (rejected, restored) = self.audit_evaluations().await?;
        report.stray_bids_rejected = rejected;
        report.winners_restored = restored;

        tracing::info!(?report, "Reconciliation pass complete");
        Ok(report)
    }

    /// Run a pass every `interval` until the process exits.
    pub fn spawn(self, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_pass().await {
                    tracing::error!(error = %e, "Reconciliation pass failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BidStatus, CreateTenderRequest, NewBid};
    use crate::lifecycle::testing::Harness;
    use crate::lifecycle::{BidLifecycle, TenderLifecycle};
    use crate::services::storage::testing::MemoryStorage;
    use chrono::Duration as ChronoDuration;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    const SETTLE: Duration = Duration::from_secs(60);

    fn settings(batch_size: i64) -> ReconcileSettings {
        ReconcileSettings {
            interval: Duration::ZERO,
            batch_size,
            max_elapsed: Duration::from_millis(50),
            settle_after: SETTLE,
        }
    }

    fn reconciler(h: &Harness) -> Reconciler {
        Reconciler::new(&h.deps, &settings(50))
    }

    /// Move past the settle window so everything written so far is eligible.
    fn settle(h: &Harness) {
        h.clock.advance(ChronoDuration::seconds(SETTLE.as_secs() as i64 + 1));
    }

    fn request(h: &Harness, title: &str) -> CreateTenderRequest {
        CreateTenderRequest {
            title: title.into(),
            description: "Repair test".into(),
            budget: Decimal::from(500),
            deadline: h.now() + ChronoDuration::hours(1),
            requirements: String::new(),
            draft: false,
        }
    }

    #[tokio::test]
    async fn remirrors_tender_and_bid_after_outage() {
        let h = Harness::new();
        let tenders = TenderLifecycle::new(h.deps.clone(), None);
        let admin = h.admin();

        h.ledger.set_failing(true);
        let t = tenders.create(&admin, request(&h, "Outage")).await.unwrap().tender;
        assert_eq!(t.ledger_tender_id, None);

        h.ledger.set_failing(false);
        settle(&h);
        let report = reconciler(&h).run_pass().await.unwrap();
        assert_eq!(report.tenders_anchored, 1);

        let stored = h.store.tender(t.id).unwrap();
        assert_eq!(stored.ledger_tender_id, Some(1));
        assert_eq!(stored.digest, t.digest);

        // Bid placed while the ledger is down again.
        let bids = BidLifecycle::new(h.deps.clone(), Arc::new(MemoryStorage::default()));
        h.ledger.set_failing(true);
        let b = bids
            .submit(&h.bidder(), t.id, Decimal::from(450), vec![])
            .await
            .unwrap()
            .bid;
        assert_eq!(b.tx_ref, None);

        settle(&h);
        let report = reconciler(&h).run_pass().await.unwrap();
        assert_eq!(report.bids_pending, 1);

        h.ledger.set_failing(false);
        let report = reconciler(&h).run_pass().await.unwrap();
        assert_eq!(report.bids_anchored, 1);
        assert!(h.store.bid(b.id).unwrap().tx_ref.is_some());
        assert_eq!(h.ledger.bids_for(1).len(), 1);

        let idle = reconciler(&h).run_pass().await.unwrap();
        assert_eq!(idle, ReconcileReport::default());
    }

    #[tokio::test]
    async fn records_inside_the_settle_window_are_left_alone() {
        let h = Harness::new();
        let tenders = TenderLifecycle::new(h.deps.clone(), None);

        h.ledger.set_failing(true);
        let t = tenders
            .create(&h.admin(), request(&h, "In flight"))
            .await
            .unwrap()
            .tender;
        h.ledger.set_failing(false);
        let sent = h.ledger.mutation_count();

        let report = reconciler(&h).run_pass().await.unwrap();
        assert_eq!(report, ReconcileReport::default());
        assert_eq!(h.ledger.mutation_count(), sent);

        settle(&h);
        let report = reconciler(&h).run_pass().await.unwrap();
        assert_eq!(report.tenders_anchored, 1);
        assert!(h.store.tender(t.id).unwrap().is_anchored());
    }

    #[tokio::test]
    async fn published_drafts_settle_from_their_publish_time() {
        let h = Harness::new();
        let tenders = TenderLifecycle::new(h.deps.clone(), None);
        let admin = h.admin();
        let mut req = request(&h, "Draft first");
        req.draft = true;
        let t = tenders.create(&admin, req).await.unwrap().tender;
        assert_eq!(t.published_at, None);

        settle(&h);
        h.ledger.set_failing(true);
        let published = tenders.publish(&admin, t.id).await.unwrap().tender;
        assert_eq!(published.published_at, Some(h.now()));
        h.ledger.set_failing(false);

        // Created long ago, but only just published.
        let report = reconciler(&h).run_pass().await.unwrap();
        assert_eq!(report.tenders_anchored, 0);

        settle(&h);
        let report = reconciler(&h).run_pass().await.unwrap();
        assert_eq!(report.tenders_anchored, 1);
    }

    #[tokio::test]
    async fn remirror_reuses_the_stored_digest() {
        let h = Harness::new();
        let tenders = TenderLifecycle::new(h.deps.clone(), None);
        let t = tenders
            .create(&h.admin(), request(&h, "Digest"))
            .await
            .unwrap()
            .tender;
        let anchored_id = t.ledger_tender_id;

        // Lose the anchor as if the reconciliation write never happened.
        let mut lost = h.store.tender(t.id).unwrap();
        lost.ledger_tender_id = None;
        lost.tx_ref = None;
        h.store.put_tender(lost.clone());

        let outcome = reconciler(&h).remirror_tender(&mut lost).await.unwrap();
        assert!(outcome.is_anchored());
        assert_eq!(lost.ledger_tender_id, anchored_id);
        assert_eq!(h.ledger.tender_count(), 1);
    }

    #[tokio::test]
    async fn unrecorded_anchor_is_written_by_the_next_pass() {
        let h = Harness::new();
        let tenders = TenderLifecycle::new(h.deps.clone(), None);

        h.store.set_anchors_down(true);
        let outcome = tenders
            .create(&h.admin(), request(&h, "Unrecorded"))
            .await
            .unwrap();
        assert!(matches!(outcome.ledger, LedgerOutcome::Unrecorded { .. }));
        assert_eq!(h.ledger.tender_count(), 1);
        assert_eq!(h.store.tender(outcome.tender.id).unwrap().ledger_tender_id, None);

        h.store.set_anchors_down(false);
        settle(&h);
        let report = reconciler(&h).run_pass().await.unwrap();
        assert_eq!(report.tenders_anchored, 1);

        // The ledger already held the digest, so no second tender was created.
        assert_eq!(h.ledger.tender_count(), 1);
        assert_eq!(
            h.store.tender(outcome.tender.id).unwrap().ledger_tender_id,
            Some(1)
        );
    }

    #[tokio::test]
    async fn unrecorded_bid_anchor_is_reported() {
        let h = Harness::new();
        let tenders = TenderLifecycle::new(h.deps.clone(), None);
        let t = tenders
            .create(&h.admin(), request(&h, "Bid unrecorded"))
            .await
            .unwrap()
            .tender;
        let bids = BidLifecycle::new(h.deps.clone(), Arc::new(MemoryStorage::default()));

        h.store.set_anchors_down(true);
        let outcome = bids
            .submit(&h.bidder(), t.id, Decimal::from(300), vec![])
            .await
            .unwrap();
        assert!(matches!(outcome.ledger, LedgerOutcome::Unrecorded { .. }));
        assert_eq!(h.store.bid(outcome.bid.id).unwrap().tx_ref, None);
        assert_eq!(h.ledger.bids_for(1).len(), 1);
    }

    #[tokio::test]
    async fn unmirrorable_records_do_not_starve_the_batch() {
        let h = Harness::new();
        let tenders = TenderLifecycle::new(h.deps.clone(), None);
        let bids = BidLifecycle::new(h.deps.clone(), Arc::new(MemoryStorage::default()));

        // Owners and bidders with no wallet, and no default sender to fall back on.
        for i in 0..3 {
            tenders
                .create(&h.organizer(), request(&h, &format!("Nobody {}", i)))
                .await
                .unwrap();
        }
        let anchored = tenders
            .create(&h.admin(), request(&h, "Anchored"))
            .await
            .unwrap()
            .tender;
        for _ in 0..3 {
            bids.submit(&h.bidder_without_wallet(), anchored.id, Decimal::from(10), vec![])
                .await
                .unwrap();
        }

        h.clock.advance(ChronoDuration::seconds(1));
        h.ledger.set_failing(true);
        let repairable = tenders
            .create(&h.admin(), request(&h, "Repairable"))
            .await
            .unwrap()
            .tender;
        let bid = bids
            .submit(&h.bidder(), anchored.id, Decimal::from(20), vec![])
            .await
            .unwrap()
            .bid;
        h.ledger.set_failing(false);
        settle(&h);

        let report = Reconciler::new(&h.deps, &settings(1)).run_pass().await.unwrap();
        assert_eq!(report.tenders_anchored, 1);
        assert_eq!(report.tenders_pending, 0);
        assert_eq!(report.bids_anchored, 1);
        assert_eq!(report.bids_skipped, 0);
        assert!(h.store.tender(repairable.id).unwrap().is_anchored());
        assert!(h.store.bid(bid.id).unwrap().tx_ref.is_some());
    }

    #[tokio::test]
    async fn unconfirmed_submissions_are_not_resent() {
        let h = Harness::new();
        let tenders = TenderLifecycle::new(h.deps.clone(), None);
        let t = tenders
            .create(&h.admin(), request(&h, "Unconfirmed"))
            .await
            .unwrap()
            .tender;
        let bids = BidLifecycle::new(h.deps.clone(), Arc::new(MemoryStorage::default()));
        h.ledger.set_failing(true);
        let mut bid = bids
            .submit(&h.bidder(), t.id, Decimal::from(90), vec![])
            .await
            .unwrap()
            .bid;
        h.ledger.set_failing(false);

        h.ledger.set_unconfirmed(true);
        let before = h.ledger.mutation_count();
        let outcome = reconciler(&h).remirror_bid(&mut bid).await.unwrap();
        assert!(matches!(outcome, LedgerOutcome::Unavailable { .. }));
        assert_eq!(h.ledger.mutation_count(), before + 1);
        assert_eq!(h.ledger.bids_for(1).len(), 1);
    }

    #[tokio::test]
    async fn tenders_without_any_sender_are_not_scanned() {
        let h = Harness::new();
        let tenders = TenderLifecycle::new(h.deps.clone(), None);
        tenders
            .create(&h.organizer(), request(&h, "Nobody"))
            .await
            .unwrap();

        settle(&h);
        let report = reconciler(&h).run_pass().await.unwrap();
        assert_eq!(report, ReconcileReport::default());
        assert_eq!(h.ledger.mutation_count(), 0);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let h = Harness::new();
        let tenders = TenderLifecycle::new(h.deps.clone(), None);
        h.ledger.set_deployed(false);
        let mut t = tenders
            .create(&h.admin(), request(&h, "Undeployed"))
            .await
            .unwrap()
            .tender;
        let before = h.ledger.mutation_count();

        let outcome = reconciler(&h).remirror_tender(&mut t).await.unwrap();
        assert!(matches!(outcome, LedgerOutcome::Unavailable { .. }));
        assert_eq!(h.ledger.mutation_count(), before + 1);
    }

    #[tokio::test]
    async fn audit_settles_stray_pending_bids() {
        let h = Harness::new();
        let tenders = TenderLifecycle::new(h.deps.clone(), None);
        let admin = h.admin();
        let bidder = h.bidder_without_wallet();
        let t = tenders.create(&admin, request(&h, "Sweep")).await.unwrap().tender;
        let bids = BidLifecycle::new(h.deps.clone(), Arc::new(MemoryStorage::default()));
        let winner = bids
            .submit(&bidder, t.id, Decimal::from(400), vec![])
            .await
            .unwrap()
            .bid;
        tenders.close(&admin, t.id).await.unwrap();
        tenders.evaluate(&admin, t.id, Some(winner.id)).await.unwrap();

        // A bid that landed after the sweep, and a winner whose selection write was lost.
        let late = Bid {
            id: Uuid::new_v4(),
            status: BidStatus::Pending,
            is_winner: false,
            ..winner.clone()
        };
        h.store.put_bid(late.clone());
        let mut unselected = h.store.bid(winner.id).unwrap();
        unselected.status = BidStatus::Pending;
        unselected.is_winner = false;
        h.store.put_bid(unselected);

        let (rejected, restored) = reconciler(&h).audit_evaluations().await.unwrap();
        assert_eq!((rejected, restored), (1, 1));
        assert_eq!(h.store.bid(late.id).unwrap().status, BidStatus::Rejected);
        let w = h.store.bid(winner.id).unwrap();
        assert!(w.is_winner);
        assert_eq!(w.status, BidStatus::Selected);

        assert_eq!(reconciler(&h).audit_evaluations().await.unwrap(), (0, 0));
    }

    #[tokio::test]
    async fn pending_bids_on_open_tenders_are_left_alone() {
        let h = Harness::new();
        let store = h.store.clone();
        let tenders = TenderLifecycle::new(h.deps.clone(), None);
        let t = tenders
            .create(&h.admin(), request(&h, "Open"))
            .await
            .unwrap()
            .tender;
        let bidder = h.bidder_without_wallet();
        store
            .insert_bid_if_open(NewBid {
                id: Uuid::new_v4(),
                tender_id: t.id,
                bidder_id: bidder.user_id,
                amount: Decimal::from(1),
                documents: vec![],
                digest: t.digest,
                submitted_at: h.now(),
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reconciler(&h).audit_evaluations().await.unwrap(), (0, 0));
        assert_eq!(store.bid_total(), 1);
    }
}
