//! Notification routes
//!
//! Endpoints for in-app notifications: list, mark read, delete.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::{MessageResponse, NoContent, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::domain::notifications::{NotificationResponse, UnreadCountResponse};
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize, Default)]
pub struct NotificationListQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    #[serde(default)]
    pub unread_only: bool,
}

/// GET /notifications
///
/// List notifications for the current user, newest first.
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Query(query): Query<NotificationListQuery>,
) -> ApiResult<Paginated<NotificationResponse>> {
    let params = PaginationParams {
        page: query.page,
        per_page: query.per_page,
    };
    let window = params.window();

    let (rows, total) = state
        .notifications
        .list_for_user(auth.user_id, query.unread_only, window.limit, window.offset)
        .await?;

    let data = rows.into_iter().map(NotificationResponse::from).collect();
    Ok(Paginated::new(data, &params, total))
}

/// GET /notifications/unread-count
pub async fn get_unread_count(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
) -> ApiResult<Json<UnreadCountResponse>> {
    let count = state.notifications.unread_count(auth.user_id).await?;
    Ok(Json(UnreadCountResponse { count }))
}

/// PUT /notifications/:notification_id/read
pub async fn mark_notification_read(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(notification_id): Path<Uuid>,
) -> ApiResult<MessageResponse> {
    if !state
        .notifications
        .mark_read(notification_id, auth.user_id)
        .await?
    {
        return Err(ApiError::not_found("Notification not found"));
    }

    Ok(MessageResponse::new("Notification marked as read"))
}

/// PUT /notifications/read-all
pub async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
) -> ApiResult<MessageResponse> {
    let updated = state.notifications.mark_all_read(auth.user_id).await?;

    Ok(MessageResponse::with_code(
        format!("{} notifications marked as read", updated),
        "NOTIFICATIONS_READ",
    ))
}

/// DELETE /notifications/:notification_id
pub async fn delete_notification(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(notification_id): Path<Uuid>,
) -> ApiResult<NoContent> {
    if !state
        .notifications
        .delete(notification_id, auth.user_id)
        .await?
    {
        return Err(ApiError::not_found("Notification not found"));
    }

    Ok(NoContent)
}
