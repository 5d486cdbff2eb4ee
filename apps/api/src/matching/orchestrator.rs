//! Batch Match Orchestrator — scores a job against the eligible candidate
//! pool in bounded-concurrency batches.
//!
//! The pool is partitioned into fixed-size batches; within a batch every
//! scoring call runs concurrently, across batches strictly sequentially,
//! with a pacing delay in between to respect the backend's rate limits.
//! Each success is written through to the cache the moment it lands, so an
//! interrupted run keeps everything scored so far and a re-run simply
//! overwrites with fresher results. A candidate that fails — backend
//! error, invalid payload, timeout — is logged, counted, and skipped; it
//! never aborts the batch or the run.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sqlx::PgPool;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::errors::AppError;
use crate::matching::cache::MatchCache;
use crate::matching::scorer::MatchScorer;
use crate::models::candidate::CandidateProfileRow;
use crate::models::job::JobPostingRow;

/// Tunables for a batch run. Injected from config so tests can shrink the
/// delays and drive them on a paused clock.
#[derive(Debug, Clone)]
pub struct BatchPolicy {
    /// Candidates per batch — also the maximum in-flight concurrency.
    pub batch_size: usize,
    /// Pause between consecutive batches.
    pub batch_delay: Duration,
    /// Per-candidate scoring deadline. A timed-out call is a candidate
    /// failure, not a run failure.
    pub score_timeout: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_delay: Duration::from_millis(1000),
            score_timeout: Duration::from_millis(30_000),
        }
    }
}

/// Final accounting for one run. `considered == scored + failed` always.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatchRunSummary {
    pub candidates_considered: usize,
    pub candidates_scored: usize,
    pub candidates_failed: usize,
}

/// The eligible pool: published profiles only.
pub async fn load_eligible_candidates(
    pool: &PgPool,
) -> Result<Vec<CandidateProfileRow>, sqlx::Error> {
    sqlx::query_as::<_, CandidateProfileRow>(
        "SELECT * FROM candidate_profiles WHERE status = 'published' ORDER BY updated_at DESC",
    )
    .fetch_all(pool)
    .await
}

/// Loads the pool and scores it. The job row is loaded once by the caller;
/// requirements do not change mid-run.
pub async fn run_matches(
    pool: &PgPool,
    job: JobPostingRow,
    scorer: Arc<dyn MatchScorer>,
    cache: Arc<dyn MatchCache>,
    policy: BatchPolicy,
) -> Result<MatchRunSummary, AppError> {
    let candidates = load_eligible_candidates(pool).await?;
    Ok(score_pool(Arc::new(job), candidates, scorer, cache, policy).await)
}

/// Scores every candidate in `candidates` against `job`, writing each
/// success through to the cache as it completes.
pub async fn score_pool(
    job: Arc<JobPostingRow>,
    candidates: Vec<CandidateProfileRow>,
    scorer: Arc<dyn MatchScorer>,
    cache: Arc<dyn MatchCache>,
    policy: BatchPolicy,
) -> MatchRunSummary {
    let batch_size = policy.batch_size.max(1);
    let candidates_considered = candidates.len();
    let total_batches = candidates_considered.div_ceil(batch_size);

    info!(
        job = %job.id,
        candidates = candidates_considered,
        batches = total_batches,
        batch_size,
        "starting batch match run"
    );

    let mut candidates_scored = 0usize;
    let mut candidates_failed = 0usize;

    for (batch_index, batch) in candidates.chunks(batch_size).enumerate() {
        let mut tasks = JoinSet::new();

        for candidate in batch {
            let job = job.clone();
            let candidate = candidate.clone();
            let scorer = scorer.clone();
            let cache = cache.clone();
            let deadline = policy.score_timeout;

            tasks.spawn(async move {
                score_one(job, candidate, scorer, cache, deadline).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => candidates_scored += 1,
                Ok(false) => candidates_failed += 1,
                Err(join_err) => {
                    warn!(error = %join_err, "scoring task aborted");
                    candidates_failed += 1;
                }
            }
        }

        if batch_index + 1 < total_batches {
            tokio::time::sleep(policy.batch_delay).await;
        }
    }

    let summary = MatchRunSummary {
        candidates_considered,
        candidates_scored,
        candidates_failed,
    };
    info!(
        job = %job.id,
        scored = summary.candidates_scored,
        failed = summary.candidates_failed,
        "batch match run finished"
    );
    summary
}

/// Scores one candidate and writes the result through. Returns whether the
/// candidate ended up cached.
async fn score_one(
    job: Arc<JobPostingRow>,
    candidate: CandidateProfileRow,
    scorer: Arc<dyn MatchScorer>,
    cache: Arc<dyn MatchCache>,
    deadline: Duration,
) -> bool {
    let result = match tokio::time::timeout(deadline, scorer.score_match(&job, &candidate)).await {
        Err(_) => {
            warn!(job = %job.id, candidate = %candidate.id, "match scoring timed out");
            return false;
        }
        Ok(Err(err)) => {
            warn!(job = %job.id, candidate = %candidate.id, error = %err, "match scoring failed");
            return false;
        }
        Ok(Ok(result)) => result,
    };

    match cache.upsert(job.id, candidate.id, &result).await {
        Ok(()) => true,
        Err(err) => {
            warn!(
                job = %job.id,
                candidate = %candidate.id,
                error = %err,
                "discarding match result"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::matching::cache::MemoryMatchCache;
    use crate::matching::scorer::{MatchScore, ScoringError};
    use crate::models::job::JobStatus;

    /// Deterministic scorer: per-candidate outcomes are scripted up front,
    /// and concurrency is measured as it runs.
    #[derive(Default)]
    struct ScriptedScorer {
        delay: Duration,
        fail: HashSet<Uuid>,
        hang: HashSet<Uuid>,
        invalid: HashSet<Uuid>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedScorer {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl MatchScorer for ScriptedScorer {
        async fn score_match(
            &self,
            _job: &JobPostingRow,
            candidate: &CandidateProfileRow,
        ) -> Result<MatchScore, ScoringError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if self.hang.contains(&candidate.id) {
                std::future::pending::<()>().await;
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);

            if self.fail.contains(&candidate.id) {
                return Err(ScoringError::Unavailable("backend outage".to_string()));
            }
            if self.invalid.contains(&candidate.id) {
                return Ok(MatchScore {
                    score: 150,
                    strengths: vec!["out of range".to_string()],
                    gaps: vec![],
                });
            }
            Ok(MatchScore {
                score: 80,
                strengths: vec!["scripted strength".to_string()],
                gaps: vec!["scripted gap".to_string()],
            })
        }
    }

    fn published_job() -> Arc<JobPostingRow> {
        Arc::new(JobPostingRow {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            title: "Platform Engineer".to_string(),
            description: "Own the ingestion pipeline.".to_string(),
            requirements: "Rust, Postgres".to_string(),
            status: JobStatus::Published,
            token_cost: 5,
            charged_at: Some(Utc::now()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
    }

    fn make_candidates(n: usize) -> Vec<CandidateProfileRow> {
        (0..n)
            .map(|i| CandidateProfileRow {
                id: Uuid::new_v4(),
                full_name: format!("Candidate {i}"),
                headline: "Engineer".to_string(),
                skills: vec!["rust".to_string()],
                experience_years: 3,
                summary: "Worked on services.".to_string(),
                status: "published".to_string(),
                updated_at: Utc::now(),
            })
            .collect()
    }

    fn policy(batch_size: usize, delay_ms: u64, timeout_ms: u64) -> BatchPolicy {
        BatchPolicy {
            batch_size,
            batch_delay: Duration::from_millis(delay_ms),
            score_timeout: Duration::from_millis(timeout_ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_of_23_runs_three_batches() {
        let scorer = Arc::new(ScriptedScorer::with_delay(Duration::from_millis(300)));
        let cache = Arc::new(MemoryMatchCache::new());
        let started = tokio::time::Instant::now();

        let summary = score_pool(
            published_job(),
            make_candidates(23),
            scorer.clone(),
            cache.clone(),
            policy(10, 1000, 30_000),
        )
        .await;

        assert_eq!(summary.candidates_considered, 23);
        assert_eq!(summary.candidates_scored, 23);
        assert_eq!(summary.candidates_failed, 0);
        assert_eq!(cache.len(), 23);
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 23);

        // Three concurrent batches (300ms each) with two 1000ms pauses:
        // anything longer means in-batch calls ran sequentially, anything
        // shorter means the pacing delay was skipped.
        assert_eq!(started.elapsed(), Duration::from_millis(3 * 300 + 2 * 1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_concurrency_is_bounded_by_batch_size() {
        let scorer = Arc::new(ScriptedScorer::with_delay(Duration::from_millis(200)));
        let cache = Arc::new(MemoryMatchCache::new());

        score_pool(
            published_job(),
            make_candidates(23),
            scorer.clone(),
            cache,
            policy(10, 100, 30_000),
        )
        .await;

        assert_eq!(scorer.max_in_flight.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_counted_not_propagated() {
        let candidates = make_candidates(23);
        let fail: HashSet<Uuid> = candidates.iter().take(4).map(|c| c.id).collect();
        let scorer = Arc::new(ScriptedScorer {
            fail,
            ..ScriptedScorer::default()
        });
        let cache = Arc::new(MemoryMatchCache::new());

        let summary = score_pool(
            published_job(),
            candidates,
            scorer,
            cache.clone(),
            policy(10, 100, 30_000),
        )
        .await;

        assert_eq!(summary.candidates_scored, 19);
        assert_eq!(summary.candidates_failed, 4);
        assert_eq!(cache.len(), 19);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_a_candidate_failure_not_a_run_failure() {
        let scorer = Arc::new(ScriptedScorer::with_delay(Duration::from_secs(10)));
        let cache = Arc::new(MemoryMatchCache::new());

        let summary = score_pool(
            published_job(),
            make_candidates(5),
            scorer,
            cache.clone(),
            policy(10, 100, 1000),
        )
        .await;

        assert_eq!(summary.candidates_considered, 5);
        assert_eq!(summary.candidates_failed, 5);
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_score_is_rejected_and_counted_failed() {
        let candidates = make_candidates(3);
        let invalid: HashSet<Uuid> = candidates.iter().take(1).map(|c| c.id).collect();
        let scorer = Arc::new(ScriptedScorer {
            invalid,
            ..ScriptedScorer::default()
        });
        let cache = Arc::new(MemoryMatchCache::new());

        let summary = score_pool(
            published_job(),
            candidates,
            scorer,
            cache.clone(),
            policy(10, 100, 30_000),
        )
        .await;

        assert_eq!(summary.candidates_scored, 2);
        assert_eq!(summary.candidates_failed, 1);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerun_overwrites_instead_of_duplicating() {
        let job = published_job();
        let candidates = make_candidates(12);
        let cache = Arc::new(MemoryMatchCache::new());

        for _ in 0..2 {
            let scorer = Arc::new(ScriptedScorer::default());
            score_pool(
                job.clone(),
                candidates.clone(),
                scorer,
                cache.clone(),
                policy(10, 100, 30_000),
            )
            .await;
        }

        assert_eq!(cache.len(), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_pool_returns_zero_summary() {
        let scorer = Arc::new(ScriptedScorer::default());
        let cache = Arc::new(MemoryMatchCache::new());
        let started = tokio::time::Instant::now();

        let summary = score_pool(
            published_job(),
            Vec::new(),
            scorer.clone(),
            cache,
            policy(10, 1000, 30_000),
        )
        .await;

        assert_eq!(summary.candidates_considered, 0);
        assert_eq!(summary.candidates_scored, 0);
        assert_eq!(summary.candidates_failed, 0);
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 0);
        // No batches, no pacing delay.
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_interrupted_run_keeps_completed_batches() {
        let candidates = make_candidates(15);
        let hang: HashSet<Uuid> = candidates.iter().skip(10).map(|c| c.id).collect();
        let scorer = Arc::new(ScriptedScorer {
            hang,
            ..ScriptedScorer::default()
        });
        let cache = Arc::new(MemoryMatchCache::new());

        let run = tokio::spawn(score_pool(
            published_job(),
            candidates,
            scorer,
            cache.clone(),
            policy(10, 0, 60_000),
        ));

        // First batch writes through; the second hangs on the backend.
        tokio::time::sleep(Duration::from_millis(100)).await;
        run.abort();

        assert_eq!(cache.len(), 10);
    }
}
