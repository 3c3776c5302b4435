use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::domain::Role;
use crate::error::{ApiError, ApiResult};

#[derive(Serialize)]
pub struct MeResponse {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub wallet_address: Option<String>,
    /// Whether this caller's bids can be mirrored to the ledger
    pub ledger_linked: bool,
}

/// Get current authenticated user info
pub async fn get_me(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
) -> ApiResult<Json<MeResponse>> {
    let user = state
        .store
        .get_user(auth.user_id)
        .await
        .map_err(|e| ApiError::ServiceUnavailable(e.to_string()))?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(MeResponse {
        user_id: user.id,
        username: user.username,
        email: user.email,
        role: user.role,
        ledger_linked: auth.wallet_address.is_some(),
        wallet_address: auth.wallet_address.clone(),
    }))
}
