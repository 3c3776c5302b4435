mod api;
mod app;
mod auth;
mod config;
mod db;
mod domain;
mod error;
mod hashing;
mod ledger;
mod lifecycle;
mod logging;
mod middleware;
mod reconcile;
mod routes;
mod services;
mod store;

use anyhow::Result;
use std::sync::Arc;

use config::LedgerMode;
use ledger::{deployment, InMemoryLedger, LedgerClient, RpcLedgerClient};
use services::RedisCache;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = config::Settings::from_env()?;

    // Initialize logging
    logging::init_logging(&settings.env);

    tracing::info!(
        env = ?settings.env,
        server_addr = %settings.server_addr,
        ledger_mode = ?settings.ledger.mode,
        "Starting tender ledger backend"
    );

    // Create database pool and bring the schema up to date
    let pool = db::create_pool(&settings).await?;
    db::migrate(&pool).await?;

    // Redis only backs the ledger read view, so a missing cache is not fatal
    let cache = match RedisCache::new(&settings.redis_url, settings.redis_cache_ttl_seconds).await
    {
        Ok(cache) => {
            tracing::info!("Redis cache initialized");
            Some(cache)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Redis unavailable - ledger bid views will not be cached");
            None
        }
    };

    // Ledger binding
    let ledger: Arc<dyn LedgerClient> = match settings.ledger.mode {
        LedgerMode::Rpc => {
            let deployment = deployment::load(&settings.ledger.deployment_file);
            Arc::new(RpcLedgerClient::new(&settings.ledger, deployment)?)
        }
        LedgerMode::Memory => {
            tracing::warn!("Using in-process ledger - anchors do not survive a restart");
            Arc::new(InMemoryLedger::new())
        }
    };

    // Check ledger reachability in the background (non-blocking)
    tokio::spawn({
        let ledger = ledger.clone();
        async move {
            if ledger.is_reachable().await {
                tracing::info!("Ledger node is reachable");
            } else {
                tracing::warn!("Ledger node unreachable - transitions will stay off-chain until it recovers");
            }
        }
    });

    // Create application state
    let state = app::AppState::new(pool, settings.clone(), ledger, cache);

    // Background repair of unanchored records
    if !settings.reconcile.interval.is_zero() {
        tracing::info!(interval = ?settings.reconcile.interval, "Starting reconciler");
        state.reconciler.clone().spawn(settings.reconcile.interval);
    }

    // Build application
    let app = app::create_app(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&settings.server_addr).await?;
    tracing::info!("Listening on {}", settings.server_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
