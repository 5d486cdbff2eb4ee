//! In-process registry of batch match runs, backing the async trigger
//! mode (`POST .../matches/run?mode=async` + polling).
//!
//! Losing this state on restart only loses visibility into a run's
//! progress — never match data, because the orchestrator writes every
//! success through to the cache as it lands.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::matching::orchestrator::MatchRunSummary;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunState {
    Running {
        started_at: DateTime<Utc>,
    },
    Completed {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        summary: MatchRunSummary,
    },
    Failed {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        message: String,
    },
}

#[derive(Debug, Clone)]
struct RunRecord {
    job_id: Uuid,
    state: RunState,
}

/// Shared handle map. Cloning shares the underlying registry.
#[derive(Clone, Default)]
pub struct RunRegistry {
    inner: Arc<RwLock<HashMap<Uuid, RunRecord>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new run for `job_id` and returns its handle.
    pub fn start(&self, job_id: Uuid) -> Uuid {
        let run_id = Uuid::new_v4();
        self.inner.write().unwrap().insert(
            run_id,
            RunRecord {
                job_id,
                state: RunState::Running {
                    started_at: Utc::now(),
                },
            },
        );
        run_id
    }

    pub fn complete(&self, run_id: Uuid, summary: MatchRunSummary) {
        self.finish(run_id, |started_at| RunState::Completed {
            started_at,
            finished_at: Utc::now(),
            summary,
        });
    }

    pub fn fail(&self, run_id: Uuid, message: String) {
        self.finish(run_id, |started_at| RunState::Failed {
            started_at,
            finished_at: Utc::now(),
            message,
        });
    }

    /// Looks up a run, scoped to the job it was started for.
    pub fn get(&self, job_id: Uuid, run_id: Uuid) -> Option<RunState> {
        let runs = self.inner.read().unwrap();
        runs.get(&run_id)
            .filter(|record| record.job_id == job_id)
            .map(|record| record.state.clone())
    }

    fn finish(&self, run_id: Uuid, make_state: impl FnOnce(DateTime<Utc>) -> RunState) {
        let mut runs = self.inner.write().unwrap();
        if let Some(record) = runs.get_mut(&run_id) {
            let started_at = match record.state {
                RunState::Running { started_at } => started_at,
                RunState::Completed { started_at, .. } | RunState::Failed { started_at, .. } => {
                    started_at
                }
            };
            record.state = make_state(started_at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_then_complete() {
        let registry = RunRegistry::new();
        let job_id = Uuid::new_v4();

        let run_id = registry.start(job_id);
        assert!(matches!(
            registry.get(job_id, run_id),
            Some(RunState::Running { .. })
        ));

        registry.complete(
            run_id,
            MatchRunSummary {
                candidates_considered: 23,
                candidates_scored: 19,
                candidates_failed: 4,
            },
        );
        match registry.get(job_id, run_id) {
            Some(RunState::Completed { summary, .. }) => {
                assert_eq!(summary.candidates_scored, 19);
            }
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[test]
    fn test_failed_run_keeps_message() {
        let registry = RunRegistry::new();
        let job_id = Uuid::new_v4();

        let run_id = registry.start(job_id);
        registry.fail(run_id, "candidate pool unavailable".to_string());

        match registry.get(job_id, run_id) {
            Some(RunState::Failed { message, .. }) => {
                assert_eq!(message, "candidate pool unavailable");
            }
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[test]
    fn test_get_is_scoped_to_the_job() {
        let registry = RunRegistry::new();
        let run_id = registry.start(Uuid::new_v4());

        assert!(registry.get(Uuid::new_v4(), run_id).is_none());
    }
}
