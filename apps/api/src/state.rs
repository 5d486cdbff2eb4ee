use std::sync::Arc;

use sqlx::PgPool;

use crate::ledger::TokenLedger;
use crate::lifecycle::JobStore;
use crate::matching::cache::MatchCache;
use crate::matching::orchestrator::BatchPolicy;
use crate::matching::runs::RunRegistry;
use crate::matching::scorer::MatchScorer;

/// Shared application state injected into all route handlers via Axum
/// extractors.
///
/// The ledger, job store, cache, and scorer sit behind trait objects so
/// backends can be swapped without touching the lifecycle or orchestrator
/// control flow.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub ledger: Arc<dyn TokenLedger>,
    pub jobs: Arc<dyn JobStore>,
    pub match_cache: Arc<dyn MatchCache>,
    pub scorer: Arc<dyn MatchScorer>,
    /// Handles for async batch runs. In-process only — a restart loses
    /// run visibility, never match data.
    pub runs: RunRegistry,
    pub policy: BatchPolicy,
}
