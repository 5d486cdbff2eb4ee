use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One cached match result, unique per (job, candidate).
/// Written by the batch orchestrator, read by ranking consumers.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MatchEntryRow {
    pub job_id: Uuid,
    pub candidate_id: Uuid,
    pub score: i32,
    pub strengths: Vec<String>,
    pub gaps: Vec<String>,
    pub updated_at: DateTime<Utc>,
}
