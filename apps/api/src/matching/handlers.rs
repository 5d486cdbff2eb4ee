//! Axum route handlers for the batch matching API.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::errors::AppError;
use crate::matching::orchestrator::run_matches;
use crate::matching::runs::RunState;
use crate::models::job::{JobPostingRow, JobStatus};
use crate::models::matches::MatchEntryRow;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RunModeQuery {
    pub mode: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RunStartedResponse {
    pub run_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct MatchListResponse {
    pub job_id: Uuid,
    pub matches: Vec<MatchEntryRow>,
}

/// POST /api/v1/jobs/:id/matches/run
///
/// Scores the eligible candidate pool against the job. Synchronous by
/// default (responds with the run summary); `?mode=async` registers a run
/// handle, spawns the batch in the background, and responds 202 so the
/// caller can poll.
pub async fn handle_run_matches(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Query(params): Query<RunModeQuery>,
) -> Result<Response, AppError> {
    let job = load_matchable_job(&state, job_id).await?;

    if params.mode.as_deref() == Some("async") {
        let run_id = state.runs.start(job_id);
        let registry = state.runs.clone();
        let pool = state.db.clone();
        let scorer = state.scorer.clone();
        let cache = state.match_cache.clone();
        let policy = state.policy.clone();

        tokio::spawn(async move {
            match run_matches(&pool, job, scorer, cache, policy).await {
                Ok(summary) => registry.complete(run_id, summary),
                Err(err) => {
                    error!(job = %job_id, run = %run_id, error = %err, "batch match run failed");
                    registry.fail(run_id, err.to_string());
                }
            }
        });

        return Ok((StatusCode::ACCEPTED, Json(RunStartedResponse { run_id })).into_response());
    }

    let summary = run_matches(
        &state.db,
        job,
        state.scorer.clone(),
        state.match_cache.clone(),
        state.policy.clone(),
    )
    .await?;
    Ok(Json(summary).into_response())
}

/// GET /api/v1/jobs/:id/matches/runs/:run_id
pub async fn handle_get_run(
    State(state): State<AppState>,
    Path((job_id, run_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<RunState>, AppError> {
    let run = state
        .runs
        .get(job_id, run_id)
        .ok_or_else(|| AppError::NotFound(format!("Run {run_id} not found for job {job_id}")))?;
    Ok(Json(run))
}

/// GET /api/v1/jobs/:id/matches
///
/// Cache read path for ranking consumers, ordered by score descending.
pub async fn handle_list_matches(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<MatchListResponse>, AppError> {
    // 404 for a missing job, empty list for a job that was never matched.
    state
        .jobs
        .load(job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job {job_id} not found")))?;

    let matches = state.match_cache.list_by_job(job_id).await?;
    Ok(Json(MatchListResponse { job_id, matches }))
}

/// Loads the job and rejects runs against postings that are not visible
/// to candidates (never published, or already retired).
async fn load_matchable_job(state: &AppState, job_id: Uuid) -> Result<JobPostingRow, AppError> {
    let job = state
        .jobs
        .load(job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job {job_id} not found")))?;

    match job.status {
        JobStatus::Published | JobStatus::Paused => Ok(job),
        JobStatus::Draft | JobStatus::Inactive => Err(AppError::Validation(format!(
            "matches cannot be run for a job in status '{}'",
            job.status
        ))),
    }
}
