//! Axum route handlers for the job lifecycle API.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::lifecycle;
use crate::models::job::JobPostingRow;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub account_id: Uuid,
    pub title: String,
    pub description: String,
    pub requirements: String,
    pub token_cost: i64,
}

/// POST /api/v1/jobs
///
/// Creates a Draft posting. Publication (and the token charge) is a
/// separate, explicit step.
pub async fn handle_create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<JobPostingRow>), AppError> {
    if request.title.trim().is_empty() {
        return Err(AppError::Validation("title cannot be empty".to_string()));
    }
    if request.requirements.trim().is_empty() {
        return Err(AppError::Validation(
            "requirements cannot be empty".to_string(),
        ));
    }
    if request.token_cost < 0 {
        return Err(AppError::Validation(
            "token_cost cannot be negative".to_string(),
        ));
    }

    let job: JobPostingRow = sqlx::query_as(
        r#"
        INSERT INTO job_postings (id, account_id, title, description, requirements, status, token_cost)
        VALUES ($1, $2, $3, $4, $5, 'draft', $6)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(request.account_id)
    .bind(&request.title)
    .bind(&request.description)
    .bind(&request.requirements)
    .bind(request.token_cost)
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /api/v1/jobs/:id
pub async fn handle_get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobPostingRow>, AppError> {
    let job = state
        .jobs
        .load(job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job {job_id} not found")))?;
    Ok(Json(job))
}

/// POST /api/v1/jobs/:id/publish
///
/// Charges the one-time publication cost (if not already collected) and
/// moves the posting to Published — atomically, or not at all.
pub async fn handle_publish(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobPostingRow>, AppError> {
    let job = lifecycle::publish(state.jobs.as_ref(), state.ledger.as_ref(), job_id).await?;
    Ok(Json(job))
}

/// POST /api/v1/jobs/:id/pause
pub async fn handle_pause(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobPostingRow>, AppError> {
    let job = lifecycle::pause(state.jobs.as_ref(), job_id).await?;
    Ok(Json(job))
}

/// POST /api/v1/jobs/:id/resume
pub async fn handle_resume(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobPostingRow>, AppError> {
    let job = lifecycle::resume(state.jobs.as_ref(), job_id).await?;
    Ok(Json(job))
}

/// POST /api/v1/jobs/:id/inactivate
pub async fn handle_inactivate(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobPostingRow>, AppError> {
    let job = lifecycle::inactivate(state.jobs.as_ref(), job_id).await?;
    Ok(Json(job))
}
