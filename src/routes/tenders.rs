//! Tender routes
//!
//! Creation, the status transitions, and the two evaluation paths. Every mutation
//! answers with the updated tender and what happened to its ledger mirror.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::{Created, DataResponse, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::domain::{
    BidResponse, CreateTenderRequest, EvaluateTenderRequest, TenderResponse, TenderStatus,
};
use crate::error::ApiResult;
use crate::ledger::{LedgerEvaluation, OnChainBid};
use crate::lifecycle::{LedgerOutcome, TenderOutcome};

#[derive(Debug, Deserialize, Default)]
pub struct TenderListQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub status: Option<TenderStatus>,
}

#[derive(Debug, Serialize)]
pub struct TenderTransitionResponse {
    pub tender: TenderResponse,
    pub ledger: LedgerOutcome,
}

impl From<TenderOutcome> for TenderTransitionResponse {
    fn from(outcome: TenderOutcome) -> Self {
        Self {
            tender: outcome.tender.into(),
            ledger: outcome.ledger,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EvaluationResponse {
    pub tender: TenderResponse,
    pub winner: BidResponse,
    pub rejected_bid_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct LedgerEvaluationResponse {
    pub tender: TenderResponse,
    pub evaluation: Option<LedgerEvaluation>,
    pub ledger: LedgerOutcome,
}

#[derive(Debug, Serialize)]
pub struct LedgerBidsResponse {
    pub ledger_tender_id: i64,
    pub bids: Vec<OnChainBid>,
    pub cached: bool,
}

/// POST /tenders
pub async fn create_tender(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Json(req): Json<CreateTenderRequest>,
) -> ApiResult<Created<DataResponse<TenderTransitionResponse>>> {
    tracing::info!(
        user_id = %auth.user_id,
        title = %req.title,
        draft = req.draft,
        "Creating tender"
    );

    let outcome = state.tenders.create(&auth, req).await?;
    Ok(Created(DataResponse::new(outcome.into())))
}

/// GET /tenders - public
pub async fn list_tenders(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TenderListQuery>,
) -> ApiResult<Paginated<TenderResponse>> {
    let params = PaginationParams {
        page: query.page,
        per_page: query.per_page,
    };

    let (tenders, total) = state.tenders.list(query.status, params.window()).await?;
    let data = tenders.into_iter().map(TenderResponse::from).collect();

    Ok(Paginated::new(data, &params, total))
}

/// GET /tenders/:tender_id - public
pub async fn get_tender(
    State(state): State<Arc<AppState>>,
    Path(tender_id): Path<Uuid>,
) -> ApiResult<DataResponse<TenderResponse>> {
    let tender = state.tenders.get(tender_id).await?;
    Ok(DataResponse::new(tender.into()))
}

/// PUT /tenders/:tender_id/publish
pub async fn publish_tender(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(tender_id): Path<Uuid>,
) -> ApiResult<DataResponse<TenderTransitionResponse>> {
    let outcome = state.tenders.publish(&auth, tender_id).await?;
    Ok(DataResponse::new(outcome.into()))
}

/// PUT /tenders/:tender_id/close
pub async fn close_tender(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(tender_id): Path<Uuid>,
) -> ApiResult<DataResponse<TenderTransitionResponse>> {
    let outcome = state.tenders.close(&auth, tender_id).await?;
    Ok(DataResponse::new(outcome.into()))
}

/// PUT /tenders/:tender_id/evaluate
///
/// Picks the lowest pending bid unless the body names one.
pub async fn evaluate_tender(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(tender_id): Path<Uuid>,
    body: Option<Json<EvaluateTenderRequest>>,
) -> ApiResult<DataResponse<EvaluationResponse>> {
    let winning_bid_id = body.and_then(|Json(req)| req.winning_bid_id);

    let evaluation = state
        .tenders
        .evaluate(&auth, tender_id, winning_bid_id)
        .await?;

    Ok(DataResponse::new(EvaluationResponse {
        tender: evaluation.tender.into(),
        winner: evaluation.winner.into(),
        rejected_bid_ids: evaluation.rejected.iter().map(|b| b.id).collect(),
    }))
}

/// PUT /tenders/:tender_id/ledger-evaluate
pub async fn evaluate_tender_on_ledger(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(tender_id): Path<Uuid>,
) -> ApiResult<DataResponse<LedgerEvaluationResponse>> {
    let outcome = state.tenders.evaluate_on_ledger(&auth, tender_id).await?;

    Ok(DataResponse::new(LedgerEvaluationResponse {
        tender: outcome.tender.into(),
        evaluation: outcome.evaluation,
        ledger: outcome.ledger,
    }))
}

/// GET /tenders/:tender_id/ledger-bids
pub async fn get_ledger_bids(
    State(state): State<Arc<AppState>>,
    _auth: RequireAuth,
    Path(tender_id): Path<Uuid>,
) -> ApiResult<DataResponse<LedgerBidsResponse>> {
    let view = state.tenders.ledger_bids(tender_id).await?;

    Ok(DataResponse::new(LedgerBidsResponse {
        ledger_tender_id: view.ledger_tender_id,
        bids: view.bids,
        cached: view.cached,
    }))
}
