//! Admin routes
//!
//! Operational endpoints that only administrators may call.

use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use crate::api::DataResponse;
use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::error::{ApiError, ApiResult, ErrorResponse};
use crate::reconcile::ReconcileReport;

/// Extractor that requires an authenticated admin.
#[derive(Debug, Clone)]
pub struct RequireAdmin(pub RequireAuth);

pub enum AdminAuthError {
    NotAuthenticated(Response),
    NotAdmin,
}

impl IntoResponse for AdminAuthError {
    fn into_response(self) -> Response {
        match self {
            AdminAuthError::NotAuthenticated(response) => response,
            AdminAuthError::NotAdmin => {
                let body = ErrorResponse {
                    code: "FORBIDDEN".to_string(),
                    message: "Admin privileges required".to_string(),
                    request_id: None,
                };
                (StatusCode::FORBIDDEN, Json(body)).into_response()
            }
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireAdmin {
    type Rejection = AdminAuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        // First, require authentication
        let auth = RequireAuth::from_request_parts(parts, state)
            .await
            .map_err(|e| AdminAuthError::NotAuthenticated(e.into_response()))?;

        if !auth.is_admin() {
            tracing::warn!(user_id = %auth.user_id, "Non-admin user attempted to access admin route");
            return Err(AdminAuthError::NotAdmin);
        }

        Ok(RequireAdmin(auth))
    }
}

/// POST /admin/reconcile
///
/// Run one reconciliation pass now and report what it repaired.
pub async fn run_reconciliation(
    State(state): State<Arc<AppState>>,
    RequireAdmin(auth): RequireAdmin,
) -> ApiResult<DataResponse<ReconcileReport>> {
    tracing::info!(user_id = %auth.user_id, "Manual reconciliation requested");

    let report = state
        .reconciler
        .run_pass()
        .await
        .map_err(|e| ApiError::ServiceUnavailable(e.to_string()))?;

    Ok(DataResponse::new(report))
}
