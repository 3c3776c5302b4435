//! PostgreSQL record store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use super::{BidFilter, Page, RecordStore, RepairScan, StoreError, StoreResult};
use crate::domain::{
    Bid, BidStatus, NewBid, NewTender, Role, Tender, TenderStatus, TenderWinner, User,
};

const TENDER_COLUMNS: &str = "id, title, description, budget, deadline, requirements, status, \
     owner_id, digest, ledger_tender_id, tx_ref, close_tx_ref, winner_bid_id, winner_bidder_id, \
     winner_address, winning_amount, evaluation_tx_ref, created_at, published_at";

const BID_COLUMNS: &str =
    "id, tender_id, bidder_id, amount, documents, digest, tx_ref, is_winner, status, submitted_at";

/// Database row for tender
#[derive(Debug, sqlx::FromRow)]
struct TenderRow {
    id: Uuid,
    title: String,
    description: String,
    budget: Decimal,
    deadline: DateTime<Utc>,
    requirements: String,
    status: String,
    owner_id: Uuid,
    digest: String,
    ledger_tender_id: Option<i64>,
    tx_ref: Option<String>,
    close_tx_ref: Option<String>,
    winner_bid_id: Option<Uuid>,
    winner_bidder_id: Option<Uuid>,
    winner_address: Option<String>,
    winning_amount: Option<Decimal>,
    evaluation_tx_ref: Option<String>,
    created_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
}

impl TryFrom<TenderRow> for Tender {
    type Error = StoreError;

    fn try_from(row: TenderRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StoreError::Corrupt {
            entity: "tender",
            id: row.id,
            reason,
        };

        let status = TenderStatus::parse(&row.status)
            .ok_or_else(|| corrupt(format!("unknown status {}", row.status)))?;
        let digest = row.digest.parse().map_err(|e| corrupt(format!("{}", e)))?;

        let winner = match (row.winner_bid_id, row.winner_bidder_id, row.winning_amount) {
            (Some(bid_id), Some(bidder_id), Some(amount)) => Some(TenderWinner {
                bid_id,
                bidder_id,
                address: row.winner_address,
                amount,
            }),
            _ => None,
        };

        Ok(Tender {
            id: row.id,
            title: row.title,
            description: row.description,
            budget: row.budget,
            deadline: row.deadline,
            requirements: row.requirements,
            status,
            owner_id: row.owner_id,
            digest,
            ledger_tender_id: row.ledger_tender_id,
            tx_ref: row.tx_ref,
            close_tx_ref: row.close_tx_ref,
            winner,
            evaluation_tx_ref: row.evaluation_tx_ref,
            created_at: row.created_at,
            published_at: row.published_at,
        })
    }
}

/// Database row for bid
#[derive(Debug, sqlx::FromRow)]
struct BidRow {
    id: Uuid,
    tender_id: Uuid,
    bidder_id: Uuid,
    amount: Decimal,
    documents: Vec<String>,
    digest: String,
    tx_ref: Option<String>,
    is_winner: bool,
    status: String,
    submitted_at: DateTime<Utc>,
}

impl TryFrom<BidRow> for Bid {
    type Error = StoreError;

    fn try_from(row: BidRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StoreError::Corrupt {
            entity: "bid",
            id: row.id,
            reason,
        };

        let status = BidStatus::parse(&row.status)
            .ok_or_else(|| corrupt(format!("unknown status {}", row.status)))?;
        let digest = row.digest.parse().map_err(|e| corrupt(format!("{}", e)))?;

        Ok(Bid {
            id: row.id,
            tender_id: row.tender_id,
            bidder_id: row.bidder_id,
            amount: row.amount,
            documents: row.documents,
            digest,
            tx_ref: row.tx_ref,
            is_winner: row.is_winner,
            status,
            submitted_at: row.submitted_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    email: String,
    role: String,
    wallet_address: Option<String>,
    created_at: DateTime<Utc>,
}

fn tenders(rows: Vec<TenderRow>) -> StoreResult<Vec<Tender>> {
    rows.into_iter().map(Tender::try_from).collect()
}

fn bids(rows: Vec<BidRow>) -> StoreResult<Vec<Bid>> {
    rows.into_iter().map(Bid::try_from).collect()
}

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn ping(&self) -> bool {
        crate::db::health_check(&self.db).await
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, email, role, wallet_address, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        row.map(|r| {
            let role = Role::parse(&r.role).ok_or_else(|| StoreError::Corrupt {
                entity: "user",
                id: r.id,
                reason: format!("unknown role {}", r.role),
            })?;
            Ok(User {
                id: r.id,
                username: r.username,
                email: r.email,
                role,
                wallet_address: r.wallet_address.filter(|w| !w.is_empty()),
                created_at: r.created_at,
            })
        })
        .transpose()
    }

    async fn insert_tender(&self, t: NewTender) -> StoreResult<Tender> {
        let row = sqlx::query_as::<_, TenderRow>(&format!(
            r#"
            INSERT INTO tenders (id, title, description, budget, deadline, requirements, status, owner_id, digest, created_at, published_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, CASE WHEN $7 = 'published' THEN $10 END)
            RETURNING {TENDER_COLUMNS}
            "#
        ))
        .bind(t.id)
        .bind(&t.title)
        .bind(&t.description)
        .bind(t.budget)
        .bind(t.deadline)
        .bind(&t.requirements)
        .bind(t.status.as_str())
        .bind(t.owner_id)
        .bind(t.digest.to_hex())
        .bind(t.created_at)
        .fetch_one(&self.db)
        .await?;

        row.try_into()
    }

    async fn get_tender(&self, id: Uuid) -> StoreResult<Option<Tender>> {
        sqlx::query_as::<_, TenderRow>(&format!(
            "SELECT {TENDER_COLUMNS} FROM tenders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .map(Tender::try_from)
        .transpose()
    }

    async fn list_tenders(
        &self,
        status: Option<TenderStatus>,
        page: Page,
    ) -> StoreResult<(Vec<Tender>, u64)> {
        let status = status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tenders WHERE ($1::text IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(&self.db)
        .await?;

        let rows = sqlx::query_as::<_, TenderRow>(&format!(
            r#"
            SELECT {TENDER_COLUMNS} FROM tenders
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(status)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.db)
        .await?;

        Ok((tenders(rows)?, total as u64))
    }

    async fn transition_tender(
        &self,
        id: Uuid,
        from: TenderStatus,
        to: TenderStatus,
        owner: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Tender>> {
        sqlx::query_as::<_, TenderRow>(&format!(
            r#"
            UPDATE tenders
            SET status = $3,
                published_at = CASE WHEN $3 = 'published' THEN $5 ELSE published_at END
            WHERE id = $1 AND status = $2 AND ($4::uuid IS NULL OR owner_id = $4)
            RETURNING {TENDER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(owner)
        .bind(at)
        .fetch_optional(&self.db)
        .await?
        .map(Tender::try_from)
        .transpose()
    }

    async fn set_tender_anchor(
        &self,
        id: Uuid,
        ledger_tender_id: i64,
        tx_ref: &str,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tenders SET ledger_tender_id = $2, tx_ref = $3
            WHERE id = $1 AND ledger_tender_id IS NULL
            "#,
        )
        .bind(id)
        .bind(ledger_tender_id)
        .bind(tx_ref)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_tender_close_tx(&self, id: Uuid, tx_ref: &str) -> StoreResult<()> {
        sqlx::query("UPDATE tenders SET close_tx_ref = $2 WHERE id = $1")
            .bind(id)
            .bind(tx_ref)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn record_evaluation(
        &self,
        id: Uuid,
        winner: &TenderWinner,
    ) -> StoreResult<Option<Tender>> {
        sqlx::query_as::<_, TenderRow>(&format!(
            r#"
            UPDATE tenders
            SET status = 'evaluated', winner_bid_id = $2, winner_bidder_id = $3,
                winner_address = $4, winning_amount = $5
            WHERE id = $1 AND status = 'closed'
            RETURNING {TENDER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(winner.bid_id)
        .bind(winner.bidder_id)
        .bind(&winner.address)
        .bind(winner.amount)
        .fetch_optional(&self.db)
        .await?
        .map(Tender::try_from)
        .transpose()
    }

    async fn set_evaluation_tx(&self, id: Uuid, tx_ref: &str) -> StoreResult<()> {
        sqlx::query("UPDATE tenders SET evaluation_tx_ref = $2 WHERE id = $1")
            .bind(id)
            .bind(tx_ref)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn tenders_without_anchor(&self, scan: RepairScan) -> StoreResult<Vec<Tender>> {
        let rows = sqlx::query_as::<_, TenderRow>(&format!(
            r#"
            SELECT {TENDER_COLUMNS} FROM tenders
            WHERE ledger_tender_id IS NULL AND status <> 'draft'
            AND published_at < $1
            AND ($2 OR EXISTS (
                SELECT 1 FROM users u
                WHERE u.id = tenders.owner_id AND COALESCE(u.wallet_address, '') <> ''
            ))
            ORDER BY published_at ASC
            LIMIT $3
            "#
        ))
        .bind(scan.settled_before)
        .bind(scan.has_default_sender)
        .bind(scan.limit)
        .fetch_all(&self.db)
        .await?;

        tenders(rows)
    }

    async fn insert_bid_if_open(&self, b: NewBid) -> StoreResult<Option<Bid>> {
        // FOR SHARE makes a concurrent close/evaluate wait for this insert to commit,
        // and re-checks the gate if the tender row changed underneath us.
        sqlx::query_as::<_, BidRow>(&format!(
            r#"
            INSERT INTO bids (id, tender_id, bidder_id, amount, documents, digest, status, is_winner, submitted_at)
            SELECT $1, $2, $3, $4, $5, $6, 'pending', FALSE, $7
            WHERE EXISTS (
                SELECT 1 FROM tenders
                WHERE id = $2 AND status = 'published' AND deadline > $7
                FOR SHARE
            )
            RETURNING {BID_COLUMNS}
            "#
        ))
        .bind(b.id)
        .bind(b.tender_id)
        .bind(b.bidder_id)
        .bind(b.amount)
        .bind(&b.documents)
        .bind(b.digest.to_hex())
        .bind(b.submitted_at)
        .fetch_optional(&self.db)
        .await?
        .map(Bid::try_from)
        .transpose()
    }

    async fn get_bid(&self, id: Uuid) -> StoreResult<Option<Bid>> {
        sqlx::query_as::<_, BidRow>(&format!("SELECT {BID_COLUMNS} FROM bids WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .map(Bid::try_from)
            .transpose()
    }

    async fn list_bids(&self, filter: BidFilter, page: Page) -> StoreResult<(Vec<Bid>, u64)> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM bids
            WHERE ($1::uuid IS NULL OR tender_id = $1)
            AND ($2::uuid IS NULL OR bidder_id = $2)
            "#,
        )
        .bind(filter.tender_id)
        .bind(filter.bidder_id)
        .fetch_one(&self.db)
        .await?;

        let rows = sqlx::query_as::<_, BidRow>(&format!(
            r#"
            SELECT {BID_COLUMNS} FROM bids
            WHERE ($1::uuid IS NULL OR tender_id = $1)
            AND ($2::uuid IS NULL OR bidder_id = $2)
            ORDER BY submitted_at ASC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(filter.tender_id)
        .bind(filter.bidder_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.db)
        .await?;

        Ok((bids(rows)?, total as u64))
    }

    async fn count_bids(&self, tender_id: Uuid) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bids WHERE tender_id = $1")
            .bind(tender_id)
            .fetch_one(&self.db)
            .await?;
        Ok(count as u64)
    }

    async fn set_bid_anchor(&self, id: Uuid, tx_ref: &str) -> StoreResult<bool> {
        let result =
            sqlx::query("UPDATE bids SET tx_ref = $2 WHERE id = $1 AND tx_ref IS NULL")
                .bind(id)
                .bind(tx_ref)
                .execute(&self.db)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn select_winning_bid(&self, bid_id: Uuid, tender_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE bids SET is_winner = TRUE, status = 'selected'
            WHERE id = $1 AND tender_id = $2
            "#,
        )
        .bind(bid_id)
        .bind(tender_id)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn reject_losing_bids(&self, tender_id: Uuid, winner: Uuid) -> StoreResult<Vec<Bid>> {
        let rows = sqlx::query_as::<_, BidRow>(&format!(
            r#"
            UPDATE bids SET status = 'rejected', is_winner = FALSE
            WHERE tender_id = $1 AND id <> $2 AND status <> 'rejected'
            RETURNING {BID_COLUMNS}
            "#
        ))
        .bind(tender_id)
        .bind(winner)
        .fetch_all(&self.db)
        .await?;

        bids(rows)
    }

    async fn reject_pending_bid(&self, id: Uuid) -> StoreResult<Option<Bid>> {
        sqlx::query_as::<_, BidRow>(&format!(
            r#"
            UPDATE bids SET status = 'rejected'
            WHERE id = $1 AND status = 'pending'
            RETURNING {BID_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .map(Bid::try_from)
        .transpose()
    }

    async fn bids_without_anchor(&self, scan: RepairScan) -> StoreResult<Vec<Bid>> {
        let rows = sqlx::query_as::<_, BidRow>(
            r#"
            SELECT b.id, b.tender_id, b.bidder_id, b.amount, b.documents, b.digest, b.tx_ref,
                   b.is_winner, b.status, b.submitted_at
            FROM bids b
            JOIN tenders t ON t.id = b.tender_id
            JOIN users u ON u.id = b.bidder_id
            WHERE b.tx_ref IS NULL AND t.ledger_tender_id IS NOT NULL
            AND COALESCE(u.wallet_address, '') <> ''
            AND b.submitted_at < $1
            ORDER BY b.submitted_at ASC
            LIMIT $2
            "#,
        )
        .bind(scan.settled_before)
        .bind(scan.limit)
        .fetch_all(&self.db)
        .await?;

        bids(rows)
    }

    async fn stray_pending_bids(&self, limit: i64) -> StoreResult<Vec<Bid>> {
        let rows = sqlx::query_as::<_, BidRow>(
            r#"
            SELECT b.id, b.tender_id, b.bidder_id, b.amount, b.documents, b.digest, b.tx_ref,
                   b.is_winner, b.status, b.submitted_at
            FROM bids b
            JOIN tenders t ON t.id = b.tender_id
            WHERE b.status = 'pending' AND t.status = 'evaluated'
            ORDER BY b.submitted_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        bids(rows)
    }
}
