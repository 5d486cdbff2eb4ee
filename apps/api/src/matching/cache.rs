//! Match Cache — durable, idempotent storage of scoring results.
//!
//! One entry per (job, candidate); writers upsert, last writer wins.
//! Every write is validated first — the cache never stores a score
//! outside [0,100] or a malformed explanation, so downstream ranking
//! consumers can trust what they read. Entries are never deleted here;
//! staleness is resolved by re-running the batch.

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::matching::scorer::MatchScore;
use crate::models::matches::MatchEntryRow;

pub const MIN_SCORE: i32 = 0;
pub const MAX_SCORE: i32 = 100;

#[derive(Debug, Error)]
pub enum CacheError {
    /// Defensive validation failure — a malformed scoring result that
    /// must not reach the cache. The candidate is treated as failed.
    #[error("invalid match score: {0}")]
    InvalidScore(String),

    #[error("match store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::Unavailable(e.to_string())
    }
}

#[async_trait]
pub trait MatchCache: Send + Sync {
    /// Writes or overwrites the single entry for (job, candidate).
    /// Concurrent upserts for different pairs never conflict.
    async fn upsert(
        &self,
        job_id: Uuid,
        candidate_id: Uuid,
        result: &MatchScore,
    ) -> Result<(), CacheError>;

    /// Read path for ranking consumers: all entries for the job, ordered
    /// by score descending (fresher entry wins a tie).
    async fn list_by_job(&self, job_id: Uuid) -> Result<Vec<MatchEntryRow>, CacheError>;
}

/// Rejects anything the ranking consumers could choke on.
fn validate(result: &MatchScore) -> Result<(), CacheError> {
    if result.score < MIN_SCORE || result.score > MAX_SCORE {
        return Err(CacheError::InvalidScore(format!(
            "score {} outside [{MIN_SCORE},{MAX_SCORE}]",
            result.score
        )));
    }
    if result
        .strengths
        .iter()
        .chain(result.gaps.iter())
        .any(|item| item.trim().is_empty())
    {
        return Err(CacheError::InvalidScore(
            "explanation contains blank entries".to_string(),
        ));
    }
    Ok(())
}

pub struct PgMatchCache {
    pool: PgPool,
}

impl PgMatchCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MatchCache for PgMatchCache {
    async fn upsert(
        &self,
        job_id: Uuid,
        candidate_id: Uuid,
        result: &MatchScore,
    ) -> Result<(), CacheError> {
        validate(result)?;

        sqlx::query(
            r#"
            INSERT INTO job_matches (job_id, candidate_id, score, strengths, gaps, updated_at)
            VALUES ($1, $2, $3, $4, $5, now())
            ON CONFLICT (job_id, candidate_id)
            DO UPDATE SET score = EXCLUDED.score,
                          strengths = EXCLUDED.strengths,
                          gaps = EXCLUDED.gaps,
                          updated_at = now()
            "#,
        )
        .bind(job_id)
        .bind(candidate_id)
        .bind(result.score)
        .bind(&result.strengths)
        .bind(&result.gaps)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_by_job(&self, job_id: Uuid) -> Result<Vec<MatchEntryRow>, CacheError> {
        Ok(sqlx::query_as::<_, MatchEntryRow>(
            r#"
            SELECT * FROM job_matches
            WHERE job_id = $1
            ORDER BY score DESC, updated_at DESC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?)
    }
}

/// In-memory cache mirroring `PgMatchCache` semantics, for orchestrator
/// tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryMatchCache {
    inner: std::sync::Mutex<std::collections::HashMap<(Uuid, Uuid), MatchEntryRow>>,
}

#[cfg(test)]
impl MemoryMatchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

#[cfg(test)]
#[async_trait]
impl MatchCache for MemoryMatchCache {
    async fn upsert(
        &self,
        job_id: Uuid,
        candidate_id: Uuid,
        result: &MatchScore,
    ) -> Result<(), CacheError> {
        validate(result)?;
        self.inner.lock().unwrap().insert(
            (job_id, candidate_id),
            MatchEntryRow {
                job_id,
                candidate_id,
                score: result.score,
                strengths: result.strengths.clone(),
                gaps: result.gaps.clone(),
                updated_at: chrono::Utc::now(),
            },
        );
        Ok(())
    }

    async fn list_by_job(&self, job_id: Uuid) -> Result<Vec<MatchEntryRow>, CacheError> {
        let mut entries: Vec<MatchEntryRow> = self
            .inner
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
        });
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(value: i32) -> MatchScore {
        MatchScore {
            score: value,
            strengths: vec!["solid Rust background".to_string()],
            gaps: vec!["no on-call experience".to_string()],
        }
    }

    #[tokio::test]
    async fn test_upsert_rejects_score_above_100() {
        let cache = MemoryMatchCache::new();
        let err = cache
            .upsert(Uuid::new_v4(), Uuid::new_v4(), &score(101))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidScore(_)));
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_upsert_rejects_negative_score() {
        let cache = MemoryMatchCache::new();
        let err = cache
            .upsert(Uuid::new_v4(), Uuid::new_v4(), &score(-1))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidScore(_)));
    }

    #[tokio::test]
    async fn test_upsert_rejects_blank_explanation_entries() {
        let cache = MemoryMatchCache::new();
        let malformed = MatchScore {
            score: 50,
            strengths: vec!["  ".to_string()],
            gaps: vec![],
        };
        let err = cache
            .upsert(Uuid::new_v4(), Uuid::new_v4(), &malformed)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidScore(_)));
    }

    #[tokio::test]
    async fn test_upsert_accepts_boundary_scores() {
        let cache = MemoryMatchCache::new();
        let job = Uuid::new_v4();
        cache.upsert(job, Uuid::new_v4(), &score(0)).await.unwrap();
        cache
            .upsert(job, Uuid::new_v4(), &score(100))
            .await
            .unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_not_duplicates() {
        let cache = MemoryMatchCache::new();
        let job = Uuid::new_v4();
        let candidate = Uuid::new_v4();

        cache.upsert(job, candidate, &score(40)).await.unwrap();
        cache.upsert(job, candidate, &score(85)).await.unwrap();

        let entries = cache.list_by_job(job).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].score, 85);
    }

    #[tokio::test]
    async fn test_list_by_job_orders_by_score_descending() {
        let cache = MemoryMatchCache::new();
        let job = Uuid::new_v4();

        for value in [55, 91, 12, 78] {
            cache
                .upsert(job, Uuid::new_v4(), &score(value))
                .await
                .unwrap();
        }

        let scores: Vec<i32> = cache
            .list_by_job(job)
            .await
            .unwrap()
            .iter()
            .map(|e| e.score)
            .collect();
        assert_eq!(scores, vec![91, 78, 55, 12]);
    }

    #[tokio::test]
    async fn test_list_by_job_is_scoped_to_the_job() {
        let cache = MemoryMatchCache::new();
        let job_a = Uuid::new_v4();
        let job_b = Uuid::new_v4();

        cache.upsert(job_a, Uuid::new_v4(), &score(60)).await.unwrap();
        cache.upsert(job_b, Uuid::new_v4(), &score(70)).await.unwrap();

        assert_eq!(cache.list_by_job(job_a).await.unwrap().len(), 1);
        assert_eq!(cache.list_by_job(job_b).await.unwrap().len(), 1);
    }
}
