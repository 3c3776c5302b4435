use axum::{extract::DefaultBodyLimit, http::HeaderValue, Router};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::auth::TokenVerifier;
use crate::config::Settings;
use crate::ledger::LedgerClient;
use crate::lifecycle::{BidLifecycle, LifecycleDeps, SystemClock, TenderLifecycle};
use crate::middleware::{request_id_layer, X_REQUEST_ID};
use crate::reconcile::Reconciler;
use crate::routes;
use crate::services::{LocalFileStorage, PgNotifications, RedisCache};
use crate::store::{PgStore, RecordStore};

/// Upper bound for a request body, bid documents included
const MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

/// Shared application state
pub struct AppState {
    pub settings: Settings,
    pub store: Arc<dyn RecordStore>,
    pub ledger: Arc<dyn LedgerClient>,
    pub notifications: PgNotifications,
    /// Absent when Redis could not be reached at startup
    pub cache: Option<Arc<RedisCache>>,
    pub tokens: TokenVerifier,
    pub tenders: TenderLifecycle,
    pub bids: BidLifecycle,
    pub reconciler: Reconciler,
}

impl AppState {
    pub fn new(
        db: PgPool,
        settings: Settings,
        ledger: Arc<dyn LedgerClient>,
        cache: Option<RedisCache>,
    ) -> Arc<Self> {
        let store: Arc<dyn RecordStore> = Arc::new(PgStore::new(db.clone()));
        let notifications = PgNotifications::new(db);
        let cache = cache.map(Arc::new);

        let deps = LifecycleDeps {
            store: store.clone(),
            ledger: ledger.clone(),
            notifier: Arc::new(notifications.clone()),
            clock: Arc::new(SystemClock),
            default_sender: settings.ledger.default_sender.clone(),
        };

        let reconciler = Reconciler::new(&deps, &settings.reconcile);
        let tenders = TenderLifecycle::new(deps.clone(), cache.clone());
        let bids = BidLifecycle::new(
            deps,
            Arc::new(LocalFileStorage::new(settings.upload_dir.clone())),
        );
        let tokens = TokenVerifier::new(&settings.jwt_secret, settings.jwt_issuer.as_deref());

        Arc::new(Self {
            settings,
            store,
            ledger,
            notifications,
            cache,
            tokens,
            tenders,
            bids,
            reconciler,
        })
    }
}

/// Build the complete application with all middleware
pub fn create_app(state: Arc<AppState>) -> Router {
    // Build CORS layer
    let cors = build_cors_layer(&state.settings);

    // Build trace layer (use DEBUG for spans to reduce overhead at INFO level)
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG));

    // Request ID layers
    let (set_request_id, propagate_request_id) = request_id_layer();

    // Build router (routes at root level, no /api prefix)
    Router::new()
        .merge(routes::api_router())
        // Middleware stack (applied bottom-up)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(propagate_request_id)
        .layer(trace_layer)
        .layer(set_request_id)
        .layer(cors)
        .with_state(state)
}

fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<HeaderValue> = settings
        .cors_allow_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    // In dev mode, use longer preflight cache to reduce OPTIONS requests
    let max_age = if settings.env.is_dev() {
        // Cache preflight for 24 hours in development
        std::time::Duration::from_secs(86400)
    } else {
        // 1 hour in production
        std::time::Duration::from_secs(3600)
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(AllowMethods::list([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::PATCH,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::list([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::HeaderName::from_static(X_REQUEST_ID),
            // Allow cache-related headers for better performance
            axum::http::header::CACHE_CONTROL,
            axum::http::header::IF_NONE_MATCH,
            axum::http::header::IF_MODIFIED_SINCE,
        ]))
        .allow_credentials(true)
        .max_age(max_age)
}
