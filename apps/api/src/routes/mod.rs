pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::accounts;
use crate::errors::AppError;
use crate::lifecycle::handlers as lifecycle_handlers;
use crate::matching::handlers as matching_handlers;
use crate::state::AppState;

async fn not_implemented() -> Result<(), AppError> {
    Err(AppError::NotImplemented)
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Token accounts
        .route("/api/v1/accounts", post(accounts::handle_create_account))
        .route("/api/v1/accounts/:id", get(accounts::handle_get_account))
        .route(
            "/api/v1/accounts/:id/tokens/grant",
            post(accounts::handle_grant_tokens),
        )
        // Job lifecycle
        .route("/api/v1/jobs", post(lifecycle_handlers::handle_create_job))
        .route("/api/v1/jobs/:id", get(lifecycle_handlers::handle_get_job))
        .route(
            "/api/v1/jobs/:id/publish",
            post(lifecycle_handlers::handle_publish),
        )
        .route(
            "/api/v1/jobs/:id/pause",
            post(lifecycle_handlers::handle_pause),
        )
        .route(
            "/api/v1/jobs/:id/resume",
            post(lifecycle_handlers::handle_resume),
        )
        .route(
            "/api/v1/jobs/:id/inactivate",
            post(lifecycle_handlers::handle_inactivate),
        )
        // Batch matching
        .route(
            "/api/v1/jobs/:id/matches/run",
            post(matching_handlers::handle_run_matches),
        )
        .route(
            "/api/v1/jobs/:id/matches/runs/:run_id",
            get(matching_handlers::handle_get_run),
        )
        .route(
            "/api/v1/jobs/:id/matches",
            get(matching_handlers::handle_list_matches),
        )
        // Ranking/recommendation feed (owned by the consumer side)
        .route("/api/v1/jobs/:id/recommendations", get(not_implemented))
        .with_state(state)
}
