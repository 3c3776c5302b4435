//! In-process record store used by the lifecycle tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use super::{BidFilter, Page, RecordStore, RepairScan, StoreError, StoreResult};
use crate::domain::{
    Bid, BidStatus, NewBid, NewTender, Tender, TenderStatus, TenderWinner, User,
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    tenders: HashMap<Uuid, Tender>,
    bids: HashMap<Uuid, Bid>,
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    down: AtomicBool,
    anchors_down: AtomicBool,
    gate_closed: AtomicBool,
}

fn window<T>(items: Vec<T>, page: Page) -> (Vec<T>, u64) {
    let total = items.len() as u64;
    let page = items
        .into_iter()
        .skip(page.offset.max(0) as usize)
        .take(page.limit.max(0) as usize)
        .collect();
    (page, total)
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, user: User) {
        self.tables.lock().users.insert(user.id, user);
    }

    /// Overwrite a tender as-is, bypassing every transition check.
    pub fn put_tender(&self, tender: Tender) {
        self.tables.lock().tenders.insert(tender.id, tender);
    }

    pub fn put_bid(&self, bid: Bid) {
        self.tables.lock().bids.insert(bid.id, bid);
    }

    /// Make every subsequent call fail as unavailable.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Fail only the ledger anchor writes, leaving every other call working.
    pub fn set_anchors_down(&self, down: bool) {
        self.anchors_down.store(down, Ordering::SeqCst);
    }

    pub fn tender(&self, id: Uuid) -> Option<Tender> {
        self.tables.lock().tenders.get(&id).cloned()
    }

    pub fn bid(&self, id: Uuid) -> Option<Bid> {
        self.tables.lock().bids.get(&id).cloned()
    }

    pub fn tender_total(&self) -> usize {
        self.tables.lock().tenders.len()
    }

    pub fn bid_total(&self) -> usize {
        self.tables.lock().bids.len()
    }

    /// Refuse bid inserts as if the tender closed after the caller's status check.
    pub fn set_gate_closed(&self, closed: bool) {
        self.gate_closed.store(closed, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is down".into()));
        }
        Ok(())
    }

    fn check_anchor_write(&self) -> StoreResult<()> {
        self.check()?;
        if self.anchors_down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("anchor write failed".into()));
        }
        Ok(())
    }

    fn has_wallet(tables: &Tables, user_id: Uuid) -> bool {
        tables
            .users
            .get(&user_id)
            .and_then(|u| u.wallet_address.as_deref())
            .map_or(false, |w| !w.is_empty())
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn ping(&self) -> bool {
        !self.down.load(Ordering::SeqCst)
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        self.check()?;
        Ok(self.tables.lock().users.get(&id).cloned())
    }

    async fn insert_tender(&self, t: NewTender) -> StoreResult<Tender> {
        self.check()?;
        let tender = Tender {
            id: t.id,
            title: t.title,
            description: t.description,
            budget: t.budget,
            deadline: t.deadline,
            requirements: t.requirements,
            status: t.status,
            owner_id: t.owner_id,
            digest: t.digest,
            ledger_tender_id: None,
            tx_ref: None,
            close_tx_ref: None,
            winner: None,
            evaluation_tx_ref: None,
            created_at: t.created_at,
            published_at: (t.status == TenderStatus::Published).then_some(t.created_at),
        };
        self.tables.lock().tenders.insert(tender.id, tender.clone());
        Ok(tender)
    }

    async fn get_tender(&self, id: Uuid) -> StoreResult<Option<Tender>> {
        self.check()?;
        Ok(self.tender(id))
    }

    async fn list_tenders(
        &self,
        status: Option<TenderStatus>,
        page: Page,
    ) -> StoreResult<(Vec<Tender>, u64)> {
        self.check()?;
        let mut items: Vec<Tender> = self
            .tables
            .lock()
            .tenders
            .values()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(window(items, page))
    }

    async fn transition_tender(
        &self,
        id: Uuid,
        from: TenderStatus,
        to: TenderStatus,
        owner: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Tender>> {
        self.check()?;
        let mut tables = self.tables.lock();
        match tables.tenders.get_mut(&id) {
            Some(t) if t.status == from && owner.map_or(true, |o| t.owner_id == o) => {
                t.status = to;
                if to == TenderStatus::Published {
                    t.published_at = Some(at);
                }
                Ok(Some(t.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn set_tender_anchor(
        &self,
        id: Uuid,
        ledger_tender_id: i64,
        tx_ref: &str,
    ) -> StoreResult<bool> {
        self.check_anchor_write()?;
        let mut tables = self.tables.lock();
        if tables
            .tenders
            .values()
            .any(|t| t.ledger_tender_id == Some(ledger_tender_id))
        {
            return Err(StoreError::Unavailable(format!(
                "duplicate ledger_tender_id {}",
                ledger_tender_id
            )));
        }
        match tables.tenders.get_mut(&id) {
            Some(t) if t.ledger_tender_id.is_none() => {
                t.ledger_tender_id = Some(ledger_tender_id);
                t.tx_ref = Some(tx_ref.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_tender_close_tx(&self, id: Uuid, tx_ref: &str) -> StoreResult<()> {
        self.check()?;
        if let Some(t) = self.tables.lock().tenders.get_mut(&id) {
            t.close_tx_ref = Some(tx_ref.to_string());
        }
        Ok(())
    }

    async fn record_evaluation(
        &self,
        id: Uuid,
        winner: &TenderWinner,
    ) -> StoreResult<Option<Tender>> {
        self.check()?;
        let mut tables = self.tables.lock();
        match tables.tenders.get_mut(&id) {
            Some(t) if t.status == TenderStatus::Closed => {
                t.status = TenderStatus::Evaluated;
                t.winner = Some(winner.clone());
                Ok(Some(t.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn set_evaluation_tx(&self, id: Uuid, tx_ref: &str) -> StoreResult<()> {
        self.check()?;
        if let Some(t) = self.tables.lock().tenders.get_mut(&id) {
            t.evaluation_tx_ref = Some(tx_ref.to_string());
        }
        Ok(())
    }

    async fn tenders_without_anchor(&self, scan: RepairScan) -> StoreResult<Vec<Tender>> {
        self.check()?;
        let tables = self.tables.lock();
        let mut items: Vec<Tender> = tables
            .tenders
            .values()
            .filter(|t| t.ledger_tender_id.is_none() && t.status != TenderStatus::Draft)
            .filter(|t| t.published_at.map_or(false, |p| p < scan.settled_before))
            .filter(|t| scan.has_default_sender || Self::has_wallet(&tables, t.owner_id))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.published_at.cmp(&b.published_at));
        items.truncate(scan.limit.max(0) as usize);
        Ok(items)
    }

    async fn insert_bid_if_open(&self, b: NewBid) -> StoreResult<Option<Bid>> {
        self.check()?;
        let mut tables = self.tables.lock();
        let open = !self.gate_closed.load(Ordering::SeqCst)
            && tables.tenders.get(&b.tender_id).map_or(false, |t| {
                t.status == TenderStatus::Published && t.deadline > b.submitted_at
            });
        if !open {
            return Ok(None);
        }
        let bid = Bid {
            id: b.id,
            tender_id: b.tender_id,
            bidder_id: b.bidder_id,
            amount: b.amount,
            documents: b.documents,
            digest: b.digest,
            tx_ref: None,
            is_winner: false,
            status: BidStatus::Pending,
            submitted_at: b.submitted_at,
        };
        tables.bids.insert(bid.id, bid.clone());
        Ok(Some(bid))
    }

    async fn get_bid(&self, id: Uuid) -> StoreResult<Option<Bid>> {
        self.check()?;
        Ok(self.bid(id))
    }

    async fn list_bids(&self, filter: BidFilter, page: Page) -> StoreResult<(Vec<Bid>, u64)> {
        self.check()?;
        let mut items: Vec<Bid> = self
            .tables
            .lock()
            .bids
            .values()
            .filter(|b| filter.tender_id.map_or(true, |t| b.tender_id == t))
            .filter(|b| filter.bidder_id.map_or(true, |u| b.bidder_id == u))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        Ok(window(items, page))
    }

    async fn count_bids(&self, tender_id: Uuid) -> StoreResult<u64> {
        self.check()?;
        Ok(self
            .tables
            .lock()
            .bids
            .values()
            .filter(|b| b.tender_id == tender_id)
            .count() as u64)
    }

    async fn set_bid_anchor(&self, id: Uuid, tx_ref: &str) -> StoreResult<bool> {
        self.check_anchor_write()?;
        match self.tables.lock().bids.get_mut(&id) {
            Some(b) if b.tx_ref.is_none() => {
                b.tx_ref = Some(tx_ref.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn select_winning_bid(&self, bid_id: Uuid, tender_id: Uuid) -> StoreResult<bool> {
        self.check()?;
        let mut tables = self.tables.lock();
        if tables
            .bids
            .values()
            .any(|b| b.tender_id == tender_id && b.is_winner && b.id != bid_id)
        {
            return Err(StoreError::Unavailable(format!(
                "tender {} already has a winning bid",
                tender_id
            )));
        }
        match tables.bids.get_mut(&bid_id) {
            Some(b) if b.tender_id == tender_id => {
                b.is_winner = true;
                b.status = BidStatus::Selected;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reject_losing_bids(&self, tender_id: Uuid, winner: Uuid) -> StoreResult<Vec<Bid>> {
        self.check()?;
        let mut changed = Vec::new();
        for b in self.tables.lock().bids.values_mut() {
            if b.tender_id == tender_id && b.id != winner && b.status != BidStatus::Rejected {
                b.status = BidStatus::Rejected;
                b.is_winner = false;
                changed.push(b.clone());
            }
        }
        Ok(changed)
    }

    async fn reject_pending_bid(&self, id: Uuid) -> StoreResult<Option<Bid>> {
        self.check()?;
        match self.tables.lock().bids.get_mut(&id) {
            Some(b) if b.status == BidStatus::Pending => {
                b.status = BidStatus::Rejected;
                Ok(Some(b.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn bids_without_anchor(&self, scan: RepairScan) -> StoreResult<Vec<Bid>> {
        self.check()?;
        let tables = self.tables.lock();
        let mut items: Vec<Bid> = tables
            .bids
            .values()
            .filter(|b| b.tx_ref.is_none() && b.submitted_at < scan.settled_before)
            .filter(|b| Self::has_wallet(&tables, b.bidder_id))
            .filter(|b| {
                tables
                    .tenders
                    .get(&b.tender_id)
                    .map_or(false, |t| t.ledger_tender_id.is_some())
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        items.truncate(scan.limit.max(0) as usize);
        Ok(items)
    }

    async fn stray_pending_bids(&self, limit: i64) -> StoreResult<Vec<Bid>> {
        self.check()?;
        let tables = self.tables.lock();
        let mut items: Vec<Bid> = tables
            .bids
            .values()
            .filter(|b| b.status == BidStatus::Pending)
            .filter(|b| {
                tables
                    .tenders
                    .get(&b.tender_id)
                    .map_or(false, |t| t.status == TenderStatus::Evaluated)
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        items.truncate(limit.max(0) as usize);
        Ok(items)
    }
}
