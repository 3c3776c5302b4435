use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub services: ServiceHealth,
}

#[derive(Serialize)]
pub struct ServiceHealth {
    pub database: String,
    pub redis: String,
    pub ledger: String,
}

/// Health check endpoint - public
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let redis_check = async {
        match &state.cache {
            Some(cache) => Some(cache.health_check().await.is_ok()),
            None => None,
        }
    };

    // Check all services in parallel
    let (db_ok, redis_ok, ledger_ok) = tokio::join!(
        state.store.ping(),
        redis_check,
        state.ledger.is_reachable(),
    );

    let redis_status = match redis_ok {
        Some(true) => "ok",
        Some(false) => "error",
        None => "disabled",
    };

    // The record store is authoritative; the ledger and cache only degrade service
    let status = if !db_ok {
        "unhealthy"
    } else if ledger_ok && redis_ok != Some(false) {
        "healthy"
    } else {
        "degraded"
    };

    let status_code = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            services: ServiceHealth {
                database: if db_ok { "ok" } else { "error" }.to_string(),
                redis: redis_status.to_string(),
                ledger: if ledger_ok { "ok" } else { "unreachable" }.to_string(),
            },
        }),
    )
}
