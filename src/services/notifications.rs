//! Notification service
//!
//! Lifecycle transitions hand their notifications to a [`NotificationSink`]. Delivery is
//! best effort: a failed notification is logged and never undoes the transition.

use async_trait::async_trait;
use futures::future::join_all;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::notifications::{Notification, NotificationRequest};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("notification sink unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, request: &NotificationRequest) -> Result<(), NotifyError>;
}

/// Deliver every request concurrently, logging each failure.
pub async fn deliver_all(sink: &dyn NotificationSink, requests: Vec<NotificationRequest>) {
    if requests.is_empty() {
        return;
    }

    let results = join_all(requests.iter().map(|r| sink.notify(r))).await;

    for (request, result) in requests.iter().zip(results) {
        if let Err(e) = result {
            tracing::warn!(
                user_id = %request.user_id,
                notification_type = %request.notification_type,
                error = %e,
                "Notification delivery failed"
            );
        }
    }
}

/// Notifications stored in the `notifications` table
#[derive(Clone)]
pub struct PgNotifications {
    db: PgPool,
}

impl PgNotifications {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Newest first, with the total matching count.
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        unread_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Notification>, u64), sqlx::Error> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM notifications
            WHERE user_id = $1
            AND ($2::bool = false OR is_read = false)
            "#,
        )
        .bind(user_id)
        .bind(unread_only)
        .fetch_one(&self.db)
        .await?;

        let rows = sqlx::query_as::<_, Notification>(
            r#"
            SELECT id, user_id, type, title, message, is_read, related_tender_id, related_bid_id, created_at
            FROM notifications
            WHERE user_id = $1
            AND ($2::bool = false OR is_read = false)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(user_id)
        .bind(unread_only)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        Ok((rows, total as u64))
    }

    pub async fn unread_count(&self, user_id: Uuid) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND is_read = false",
        )
        .bind(user_id)
        .fetch_one(&self.db)
        .await
    }

    /// Returns false when the notification does not exist or belongs to someone else.
    pub async fn mark_read(&self, id: Uuid, user_id: Uuid) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE notifications SET is_read = true WHERE id = $1 AND user_id = $2")
                .bind(id)
                .bind(user_id)
                .execute(&self.db)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_all_read(&self, user_id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = true WHERE user_id = $1 AND is_read = false",
        )
        .bind(user_id)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl NotificationSink for PgNotifications {
    async fn notify(&self, request: &NotificationRequest) -> Result<(), NotifyError> {
        let id = Uuid::new_v4();
        let type_str = request.notification_type.to_string();

        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, type, title, message, related_tender_id, related_bid_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(id)
        .bind(request.user_id)
        .bind(&type_str)
        .bind(&request.title)
        .bind(&request.message)
        .bind(request.related_tender_id)
        .bind(request.related_bid_id)
        .execute(&self.db)
        .await?;

        tracing::info!(
            user_id = %request.user_id,
            notification_type = %type_str,
            notification_id = %id,
            "Notification created"
        );

        Ok(())
    }
}
