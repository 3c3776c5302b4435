//! Bid routes
//!
//! Submission takes `multipart/form-data`: a `bid_data` part holding the JSON
//! `{"amount": ...}` and any number of `documents` file parts.

use axum::extract::{Multipart, Path, Query, State};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::{Created, DataResponse, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::domain::{BidResponse, CreateBidRequest, DocumentUpload};
use crate::error::{ApiError, ApiResult};
use crate::lifecycle::{BidOutcome, LedgerOutcome};

const BID_DATA_FIELD: &str = "bid_data";
const DOCUMENTS_FIELD: &str = "documents";

#[derive(Debug, Serialize)]
pub struct BidSubmissionResponse {
    pub bid: BidResponse,
    pub ledger: LedgerOutcome,
}

impl From<BidOutcome> for BidSubmissionResponse {
    fn from(outcome: BidOutcome) -> Self {
        Self {
            bid: outcome.bid.into(),
            ledger: outcome.ledger,
        }
    }
}

/// Split a submission form into its bid data and uploaded documents
async fn read_submission(
    mut multipart: Multipart,
) -> ApiResult<(CreateBidRequest, Vec<DocumentUpload>)> {
    let mut bid_data = None;
    let mut documents = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            BID_DATA_FIELD => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Unreadable bid_data: {}", e)))?;
                let req: CreateBidRequest = serde_json::from_str(&text)
                    .map_err(|e| ApiError::Validation(format!("Invalid bid_data: {}", e)))?;
                bid_data = Some(req);
            }
            DOCUMENTS_FIELD => {
                let filename = field.file_name().unwrap_or("document").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Unreadable document: {}", e)))?;
                documents.push(DocumentUpload {
                    filename,
                    bytes: bytes.to_vec(),
                });
            }
            other => {
                tracing::debug!(field = other, "Ignoring unknown multipart field");
            }
        }
    }

    let bid_data = bid_data
        .ok_or_else(|| ApiError::Validation(format!("Missing `{}` part", BID_DATA_FIELD)))?;
    Ok((bid_data, documents))
}

/// POST /bids/:tender_id
pub async fn submit_bid(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(tender_id): Path<Uuid>,
    multipart: Multipart,
) -> ApiResult<Created<DataResponse<BidSubmissionResponse>>> {
    let (req, documents) = read_submission(multipart).await?;

    tracing::info!(
        user_id = %auth.user_id,
        tender_id = %tender_id,
        documents = documents.len(),
        "Submitting bid"
    );

    let outcome = state
        .bids
        .submit(&auth, tender_id, req.amount, documents)
        .await?;

    Ok(Created(DataResponse::new(outcome.into())))
}

/// GET /bids/tender/:tender_id
pub async fn list_tender_bids(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(tender_id): Path<Uuid>,
    Query(params): Query<PaginationParams>,
) -> ApiResult<Paginated<BidResponse>> {
    let (bids, total) = state
        .bids
        .list_for_tender(&auth, tender_id, params.window())
        .await?;

    Ok(Paginated::new(
        bids.into_iter().map(BidResponse::from).collect(),
        &params,
        total,
    ))
}

/// GET /bids/my-bids
pub async fn list_my_bids(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Query(params): Query<PaginationParams>,
) -> ApiResult<Paginated<BidResponse>> {
    let (bids, total) = state.bids.my_bids(&auth, params.window()).await?;

    Ok(Paginated::new(
        bids.into_iter().map(BidResponse::from).collect(),
        &params,
        total,
    ))
}

/// GET /bids/all
pub async fn list_all_bids(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Query(params): Query<PaginationParams>,
) -> ApiResult<Paginated<BidResponse>> {
    let (bids, total) = state.bids.all_bids(&auth, params.window()).await?;

    Ok(Paginated::new(
        bids.into_iter().map(BidResponse::from).collect(),
        &params,
        total,
    ))
}

/// PUT /bids/:bid_id/reject
pub async fn reject_bid(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(bid_id): Path<Uuid>,
) -> ApiResult<DataResponse<BidResponse>> {
    let bid = state.bids.reject(&auth, bid_id).await?;
    Ok(DataResponse::new(bid.into()))
}
