//! Process-local ledger.
//!
//! Behaves like the deployed contract (sequential tender ids, lowest bid wins, closed
//! tenders reject bids) and can be switched unreachable, undeployed or failing.
//! Resubmitting a tender digest returns the original receipt.
//! Bids can also be applied while reported unconfirmed.

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use sha3::{Digest as _, Keccak256};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::{
    LedgerClient, LedgerEvaluation, LedgerResult, OnChainBid, TenderReceipt, UnavailableCause,
};
use crate::hashing::Digest;

#[derive(Debug, Clone)]
struct LedgerTender {
    digest: Digest,
    receipt: TenderReceipt,
    closed: bool,
    bids: Vec<OnChainBid>,
}

#[derive(Default)]
struct LedgerState {
    tenders: Vec<LedgerTender>,
    tx_count: u64,
    now: i64,
}

impl LedgerState {
    fn next_tx(&mut self) -> String {
        self.tx_count += 1;
        format!(
            "0x{}",
            hex::encode(Keccak256::digest(self.tx_count.to_be_bytes()))
        )
    }

    fn tender_mut(&mut self, id: i64) -> Result<&mut LedgerTender, UnavailableCause> {
        usize::try_from(id)
            .ok()
            .and_then(|i| i.checked_sub(1))
            .and_then(|i| self.tenders.get_mut(i))
            .ok_or_else(|| UnavailableCause::Rejected(format!("unknown tender {}", id)))
    }
}

pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
    reachable: AtomicBool,
    deployed: AtomicBool,
    failing: AtomicBool,
    unconfirmed: AtomicBool,
    mutations: AtomicUsize,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            reachable: AtomicBool::new(true),
            deployed: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            unconfirmed: AtomicBool::new(false),
            mutations: AtomicUsize::new(0),
        }
    }

    /// Simulate the node going away (or coming back).
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_deployed(&self, deployed: bool) {
        self.deployed.store(deployed, Ordering::SeqCst);
    }

    /// Make every mutation fail as a transport error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Apply bid submissions but report them as never confirmed.
    pub fn set_unconfirmed(&self, unconfirmed: bool) {
        self.unconfirmed.store(unconfirmed, Ordering::SeqCst);
    }

    /// Number of mutating calls that reached the ledger, successful or not.
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn tender_count(&self) -> usize {
        self.state.lock().tenders.len()
    }

    pub fn bids_for(&self, ledger_tender_id: i64) -> Vec<OnChainBid> {
        let mut state = self.state.lock();
        state
            .tender_mut(ledger_tender_id)
            .map(|t| t.bids.clone())
            .unwrap_or_default()
    }

    fn guard_mutation(&self) -> Result<(), UnavailableCause> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        if !self.reachable.load(Ordering::SeqCst) || self.failing.load(Ordering::SeqCst) {
            return Err(UnavailableCause::Transport("ledger node unreachable".into()));
        }
        if !self.deployed.load(Ordering::SeqCst) {
            return Err(UnavailableCause::NotDeployed);
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    async fn submit_tender(
        &self,
        _title: &str,
        _budget: Decimal,
        _deadline_unix: i64,
        digest: &Digest,
        _from: &str,
    ) -> LedgerResult<TenderReceipt> {
        self.guard_mutation()?;
        let mut state = self.state.lock();

        if let Some(existing) = state.tenders.iter().find(|t| t.digest == *digest) {
            return Ok(existing.receipt.clone());
        }

        let receipt = TenderReceipt {
            tx_ref: state.next_tx(),
            ledger_tender_id: state.tenders.len() as i64 + 1,
        };
        state.tenders.push(LedgerTender {
            digest: *digest,
            receipt: receipt.clone(),
            closed: false,
            bids: Vec::new(),
        });
        Ok(receipt)
    }

    async fn submit_bid(
        &self,
        ledger_tender_id: i64,
        amount: Decimal,
        digest: &Digest,
        from: &str,
    ) -> LedgerResult<String> {
        self.guard_mutation()?;
        let mut state = self.state.lock();
        state.now += 1;
        let now = state.now;

        let tender = state.tender_mut(ledger_tender_id)?;
        if tender.closed {
            return Err(UnavailableCause::Rejected(format!(
                "tender {} is closed",
                ledger_tender_id
            ))
            .into());
        }
        tender.bids.push(OnChainBid {
            bidder: from.to_lowercase(),
            amount: amount.trunc(),
            bid_hash: digest.to_hex(),
            submitted_at: now,
        });
        let tx_ref = state.next_tx();
        if self.unconfirmed.load(Ordering::SeqCst) {
            return Err(UnavailableCause::Unconfirmed {
                tx_ref,
                reason: "no receipt".into(),
            }
            .into());
        }
        Ok(tx_ref)
    }

    async fn close_tender(&self, ledger_tender_id: i64, _from: &str) -> LedgerResult<String> {
        self.guard_mutation()?;
        let mut state = self.state.lock();
        state.tender_mut(ledger_tender_id)?.closed = true;
        Ok(state.next_tx())
    }

    async fn evaluate_tender(
        &self,
        ledger_tender_id: i64,
        _from: &str,
    ) -> LedgerResult<LedgerEvaluation> {
        self.guard_mutation()?;
        let mut state = self.state.lock();

        let tender = state.tender_mut(ledger_tender_id)?;
        if !tender.closed {
            return Err(UnavailableCause::Rejected(format!(
                "tender {} is still open",
                ledger_tender_id
            ))
            .into());
        }
        let winner = tender
            .bids
            .iter()
            .min_by(|a, b| a.amount.cmp(&b.amount))
            .cloned()
            .ok_or_else(|| {
                UnavailableCause::Rejected(format!("no bids for tender {}", ledger_tender_id))
            })?;

        Ok(LedgerEvaluation {
            winner_address: winner.bidder,
            winning_amount: winner.amount,
            tx_ref: state.next_tx(),
        })
    }

    async fn list_bids(&self, ledger_tender_id: i64) -> LedgerResult<Vec<OnChainBid>> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(UnavailableCause::Transport("ledger node unreachable".into()).into());
        }
        if !self.deployed.load(Ordering::SeqCst) {
            return Err(UnavailableCause::NotDeployed.into());
        }
        let mut state = self.state.lock();
        Ok(state.tender_mut(ledger_tender_id)?.bids.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::commit;

    const ALICE: &str = "0x00000000000000000000000000000000000000a1";
    const BOB: &str = "0x00000000000000000000000000000000000000b0";

    fn digest(tag: &str) -> Digest {
        commit(&serde_json::json!({ "tag": tag })).unwrap()
    }

    #[tokio::test]
    async fn tender_ids_are_sequential_and_digest_is_idempotent() {
        let ledger = InMemoryLedger::new();
        let a = ledger
            .submit_tender("a", Decimal::from(10), 100, &digest("a"), ALICE)
            .await
            .unwrap();
        let b = ledger
            .submit_tender("b", Decimal::from(10), 100, &digest("b"), ALICE)
            .await
            .unwrap();
        assert_eq!(a.ledger_tender_id, 1);
        assert_eq!(b.ledger_tender_id, 2);

        let again = ledger
            .submit_tender("a", Decimal::from(10), 100, &digest("a"), ALICE)
            .await
            .unwrap();
        assert_eq!(again, a);
        assert_eq!(ledger.tender_count(), 2);
    }

    #[tokio::test]
    async fn lowest_bid_wins_after_close() {
        let ledger = InMemoryLedger::new();
        let t = ledger
            .submit_tender("a", Decimal::from(1000), 100, &digest("t"), ALICE)
            .await
            .unwrap();
        ledger
            .submit_bid(t.ledger_tender_id, Decimal::from(950), &digest("1"), ALICE)
            .await
            .unwrap();
        ledger
            .submit_bid(t.ledger_tender_id, Decimal::from(900), &digest("2"), BOB)
            .await
            .unwrap();

        assert!(ledger.evaluate_tender(t.ledger_tender_id, ALICE).await.is_err());

        ledger.close_tender(t.ledger_tender_id, ALICE).await.unwrap();
        let eval = ledger.evaluate_tender(t.ledger_tender_id, ALICE).await.unwrap();
        assert_eq!(eval.winner_address, BOB);
        assert_eq!(eval.winning_amount, Decimal::from(900));

        let late = ledger
            .submit_bid(t.ledger_tender_id, Decimal::from(1), &digest("3"), ALICE)
            .await;
        assert!(matches!(
            late.unwrap_err().cause,
            UnavailableCause::Rejected(_)
        ));
    }

    #[tokio::test]
    async fn switches_collapse_to_unavailable() {
        let ledger = InMemoryLedger::new();
        ledger.set_deployed(false);
        assert!(ledger.is_reachable().await);
        let err = ledger
            .submit_tender("a", Decimal::from(1), 1, &digest("x"), ALICE)
            .await
            .unwrap_err();
        assert_eq!(err.cause, UnavailableCause::NotDeployed);

        ledger.set_deployed(true);
        ledger.set_reachable(false);
        assert!(!ledger.is_reachable().await);
        assert!(ledger.close_tender(1, ALICE).await.is_err());
        assert_eq!(ledger.mutation_count(), 2);
    }
}
