use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A candidate profile as seen by the matching core.
///
/// Owned by the profile subsystem — read-only here. `status` stays a
/// plain string because this core only ever filters on `'published'`
/// and must not constrain what the owning subsystem stores.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CandidateProfileRow {
    pub id: Uuid,
    pub full_name: String,
    pub headline: String,
    pub skills: Vec<String>,
    pub experience_years: i32,
    pub summary: String,
    pub status: String,
    pub updated_at: DateTime<Utc>,
}
