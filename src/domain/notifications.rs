//! Notification domain types
//!
//! Notifications produced by tender and bid transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Notification type enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    TenderPublished,
    TenderClosed,
    TenderEvaluated,
    BidSubmitted,
    BidWon,
    BidLost,
    BidRejected,
    System,
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_string(self).unwrap_or_default();
        write!(f, "{}", s.trim_matches('"'))
    }
}

impl From<String> for NotificationType {
    fn from(s: String) -> Self {
        serde_json::from_str(&format!("\"{}\"", s)).unwrap_or(NotificationType::System)
    }
}

/// A notification the lifecycle wants delivered
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRequest {
    pub user_id: Uuid,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub related_tender_id: Option<Uuid>,
    pub related_bid_id: Option<Uuid>,
}

impl NotificationRequest {
    pub fn new(
        user_id: Uuid,
        notification_type: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            notification_type,
            title: title.into(),
            message: message.into(),
            related_tender_id: None,
            related_bid_id: None,
        }
    }

    pub fn tender(mut self, tender_id: Uuid) -> Self {
        self.related_tender_id = Some(tender_id);
        self
    }

    pub fn bid(mut self, bid_id: Uuid) -> Self {
        self.related_bid_id = Some(bid_id);
        self
    }
}

/// Notification entity
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    #[sqlx(rename = "type")]
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub related_tender_id: Option<Uuid>,
    pub related_bid_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Response DTO for notification
#[derive(Debug, Clone, Serialize)]
pub struct NotificationResponse {
    pub id: Uuid,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub related_tender_id: Option<Uuid>,
    pub related_bid_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<Notification> for NotificationResponse {
    fn from(n: Notification) -> Self {
        Self {
            id: n.id,
            notification_type: NotificationType::from(n.notification_type),
            title: n.title,
            message: n.message,
            is_read: n.is_read,
            related_tender_id: n.related_tender_id,
            related_bid_id: n.related_bid_id,
            created_at: n.created_at,
        }
    }
}

/// Unread count response
#[derive(Debug, Clone, Serialize)]
pub struct UnreadCountResponse {
    pub count: i64,
}
