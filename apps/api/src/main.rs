mod accounts;
mod config;
mod db;
mod errors;
mod ledger;
mod lifecycle;
mod matching;
mod models;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::ledger::PgTokenLedger;
use crate::lifecycle::PgJobStore;
use crate::matching::cache::PgMatchCache;
use crate::matching::orchestrator::BatchPolicy;
use crate::matching::runs::RunRegistry;
use crate::matching::scorer::ClaudeMatchScorer;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails fast on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Hirewire API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;

    // Storage-backed components share the pool
    let ledger = Arc::new(PgTokenLedger::new(db.clone()));
    let jobs = Arc::new(PgJobStore::new(db.clone()));
    let match_cache = Arc::new(PgMatchCache::new(db.clone()));

    // Match scoring client
    let scorer = Arc::new(ClaudeMatchScorer::new(config.anthropic_api_key.clone()));
    info!(
        "Match scorer initialized (model: {})",
        matching::scorer::MODEL
    );

    let policy = BatchPolicy {
        batch_size: config.match_batch_size,
        batch_delay: config.match_batch_delay,
        score_timeout: config.match_score_timeout,
    };
    info!(
        "Batch policy: size={}, delay={}ms, timeout={}ms",
        policy.batch_size,
        policy.batch_delay.as_millis(),
        policy.score_timeout.as_millis()
    );

    // Build app state
    let state = AppState {
        db,
        ledger,
        jobs,
        match_cache,
        scorer,
        runs: RunRegistry::new(),
        policy,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS in production

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
