pub mod admin;
pub mod bids;
pub mod health;
pub mod me;
pub mod notifications;
pub mod tenders;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;

use crate::app::AppState;

/// Build the API router with all routes
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        // Public routes
        .route("/health", get(health::health_check))
        // Protected routes
        .route("/me", get(me::get_me))
        // Tenders (reads are public)
        .route(
            "/tenders",
            post(tenders::create_tender).get(tenders::list_tenders),
        )
        .route("/tenders/:tender_id", get(tenders::get_tender))
        .route("/tenders/:tender_id/publish", put(tenders::publish_tender))
        .route("/tenders/:tender_id/close", put(tenders::close_tender))
        .route("/tenders/:tender_id/evaluate", put(tenders::evaluate_tender))
        .route(
            "/tenders/:tender_id/ledger-evaluate",
            put(tenders::evaluate_tender_on_ledger),
        )
        .route(
            "/tenders/:tender_id/ledger-bids",
            get(tenders::get_ledger_bids),
        )
        // Bids (`:id` is the tender on submit and the bid on reject)
        .route("/bids/:id", post(bids::submit_bid))
        .route("/bids/:id/reject", put(bids::reject_bid))
        .route("/bids/tender/:tender_id", get(bids::list_tender_bids))
        .route("/bids/my-bids", get(bids::list_my_bids))
        .route("/bids/all", get(bids::list_all_bids))
        // Notifications
        .route("/notifications", get(notifications::list_notifications))
        .route(
            "/notifications/unread-count",
            get(notifications::get_unread_count),
        )
        .route(
            "/notifications/read-all",
            put(notifications::mark_all_read),
        )
        .route(
            "/notifications/:notification_id",
            delete(notifications::delete_notification),
        )
        .route(
            "/notifications/:notification_id/read",
            put(notifications::mark_notification_read),
        )
        // Admin
        .route("/admin/reconcile", post(admin::run_reconciliation))
}
