//! Job Lifecycle — the publication state machine for job postings.
//!
//! States: Draft → Published ⇄ Paused, any non-terminal → Inactive.
//! Publishing collects the one-time token charge; the charge and the
//! status change are all-or-nothing: a failed status commit after a
//! successful debit is compensated by reversing the debit before the
//! error reaches the caller.

pub mod handlers;

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use crate::errors::AppError;
use crate::ledger::{DebitOutcome, TokenLedger};
use crate::models::job::{JobPostingRow, JobStatus};

/// The closed transition table. Anything not listed here is rejected.
/// `resume` shares the Paused → Published edge with `publish`; the
/// operations differ only in their charging behavior.
fn transition_allowed(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;
    matches!(
        (from, to),
        (Draft, Published)
            | (Paused, Published)
            | (Published, Paused)
            | (Draft, Inactive)
            | (Published, Inactive)
            | (Paused, Inactive)
    )
}

/// Dedup key for the one-time publication charge. Derived from the job id
/// so a retried publish call replays instead of double-charging.
pub fn publish_charge_key(job_id: Uuid) -> String {
    format!("{job_id}:publish")
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job store unavailable: {0}")]
    Unavailable(String),

    /// The posting's status changed under us — the compare-and-set on the
    /// prior status matched no row.
    #[error("job {0} was modified concurrently")]
    Conflict(Uuid),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Persistence seam for job postings.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load(&self, job_id: Uuid) -> Result<Option<JobPostingRow>, StoreError>;

    /// Compare-and-set transition: moves the posting from `from` to `to`
    /// only if its status still equals `from`. Transitions into
    /// `Published` stamp `charged_at` if it is not already set; it is
    /// never cleared afterwards.
    async fn commit_transition(
        &self,
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<JobPostingRow, StoreError>;
}

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn load(&self, job_id: Uuid) -> Result<Option<JobPostingRow>, StoreError> {
        Ok(
            sqlx::query_as::<_, JobPostingRow>("SELECT * FROM job_postings WHERE id = $1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn commit_transition(
        &self,
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<JobPostingRow, StoreError> {
        let updated: Option<JobPostingRow> = sqlx::query_as(
            r#"
            UPDATE job_postings
            SET status = $1,
                charged_at = CASE WHEN $2 THEN COALESCE(charged_at, now()) ELSE charged_at END,
                updated_at = now()
            WHERE id = $3 AND status = $4
            RETURNING *
            "#,
        )
        .bind(to)
        .bind(to == JobStatus::Published)
        .bind(job_id)
        .bind(from)
        .fetch_optional(&self.pool)
        .await?;

        updated.ok_or(StoreError::Conflict(job_id))
    }
}

/// Publishes a job, collecting the one-time token charge if it has not
/// been collected yet.
///
/// Order matters: debit first, then commit the status change. If the
/// commit fails after a successful debit, the debit is reversed before
/// the error is returned — "charged implies published" holds on every
/// exit path. A publish of an already-published, already-charged job is
/// an idempotent replay returning the current state.
pub async fn publish(
    jobs: &dyn JobStore,
    ledger: &dyn TokenLedger,
    job_id: Uuid,
) -> Result<JobPostingRow, AppError> {
    let job = load_job(jobs, job_id).await?;

    if job.status == JobStatus::Published && (job.charged_at.is_some() || job.token_cost == 0) {
        info!(job = %job_id, "publish replay — already published and charged");
        return Ok(job);
    }

    if !transition_allowed(job.status, JobStatus::Published) {
        return Err(AppError::InvalidStateTransition {
            op: "publish",
            from: job.status,
        });
    }

    let must_charge = job.charged_at.is_none() && job.token_cost > 0;
    let charge_key = publish_charge_key(job_id);

    if must_charge {
        match ledger.debit(job.account_id, job.token_cost, &charge_key).await? {
            DebitOutcome::Applied => {}
            DebitOutcome::Insufficient => return Err(AppError::InsufficientTokens),
        }
    }

    match jobs
        .commit_transition(job_id, job.status, JobStatus::Published)
        .await
    {
        Ok(updated) => {
            info!(
                job = %job_id,
                account = %job.account_id,
                cost = job.token_cost,
                charged = must_charge,
                "job published"
            );
            Ok(updated)
        }
        Err(commit_err) => {
            if must_charge {
                if let Err(reverse_err) = ledger.reverse_debit(&charge_key).await {
                    // The charge is now visible without a published job;
                    // this needs operator attention, not a silent retry.
                    error!(
                        job = %job_id,
                        account = %job.account_id,
                        error = %reverse_err,
                        "failed to reverse publish charge after commit failure"
                    );
                    return Err(reverse_err.into());
                }
                info!(job = %job_id, "publish charge reversed after commit failure");
            }
            Err(match commit_err {
                StoreError::Conflict(_) => AppError::InvalidStateTransition {
                    op: "publish",
                    from: job.status,
                },
                other => other.into(),
            })
        }
    }
}

/// Published → Paused. No ledger interaction.
pub async fn pause(jobs: &dyn JobStore, job_id: Uuid) -> Result<JobPostingRow, AppError> {
    let job = load_job(jobs, job_id).await?;
    if !transition_allowed(job.status, JobStatus::Paused) {
        return Err(AppError::InvalidStateTransition {
            op: "pause",
            from: job.status,
        });
    }
    let updated = jobs
        .commit_transition(job_id, JobStatus::Published, JobStatus::Paused)
        .await?;
    info!(job = %job_id, "job paused");
    Ok(updated)
}

/// Paused → Published. Never charges: `charged_at` was stamped by the
/// original publish, which is exactly what makes pause/resume free.
pub async fn resume(jobs: &dyn JobStore, job_id: Uuid) -> Result<JobPostingRow, AppError> {
    let job = load_job(jobs, job_id).await?;
    if job.status != JobStatus::Paused {
        return Err(AppError::InvalidStateTransition {
            op: "resume",
            from: job.status,
        });
    }
    let updated = jobs
        .commit_transition(job_id, JobStatus::Paused, JobStatus::Published)
        .await?;
    info!(job = %job_id, "job resumed");
    Ok(updated)
}

/// Any non-terminal state → Inactive. Terminal; no refund for unused
/// publication time — tokens are consumed at publish, not pro-rated.
pub async fn inactivate(jobs: &dyn JobStore, job_id: Uuid) -> Result<JobPostingRow, AppError> {
    let job = load_job(jobs, job_id).await?;
    if !transition_allowed(job.status, JobStatus::Inactive) {
        return Err(AppError::InvalidStateTransition {
            op: "inactivate",
            from: job.status,
        });
    }
    let updated = jobs
        .commit_transition(job_id, job.status, JobStatus::Inactive)
        .await?;
    info!(job = %job_id, "job inactivated");
    Ok(updated)
}

async fn load_job(jobs: &dyn JobStore, job_id: Uuid) -> Result<JobPostingRow, AppError> {
    jobs.load(job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job {job_id} not found")))
}

/// In-memory job store mirroring `PgJobStore` semantics, for lifecycle
/// tests.
#[cfg(test)]
pub struct MemoryJobStore {
    inner: std::sync::Mutex<std::collections::HashMap<Uuid, JobPostingRow>>,
    fail_commits: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl MemoryJobStore {
    pub fn new() -> Self {
        Self {
            inner: std::sync::Mutex::new(std::collections::HashMap::new()),
            fail_commits: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn insert(&self, job: JobPostingRow) {
        self.inner.lock().unwrap().insert(job.id, job);
    }

    /// Makes every `commit_transition` fail with `Unavailable`, to
    /// exercise the charge-reversal path.
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
#[async_trait]
impl JobStore for MemoryJobStore {
    async fn load(&self, job_id: Uuid) -> Result<Option<JobPostingRow>, StoreError> {
        Ok(self.inner.lock().unwrap().get(&job_id).cloned())
    }

    async fn commit_transition(
        &self,
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<JobPostingRow, StoreError> {
        if self.fail_commits.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(StoreError::Unavailable("job store offline".to_string()));
        }
        let mut jobs = self.inner.lock().unwrap();
        let job = jobs
            .get_mut(&job_id)
            .ok_or(StoreError::Conflict(job_id))?;
        if job.status != from {
            return Err(StoreError::Conflict(job_id));
        }
        job.status = to;
        if to == JobStatus::Published && job.charged_at.is_none() {
            job.charged_at = Some(chrono::Utc::now());
        }
        job.updated_at = chrono::Utc::now();
        Ok(job.clone())
    }
}
