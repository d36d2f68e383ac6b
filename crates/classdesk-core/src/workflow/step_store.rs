//! Durable step store for memoized step outcomes.
//!
//! Wraps `WorkflowRepository` to provide a higher-level API over step
//! records keyed by (run id, step name). A step body runs at most once per
//! run: once its record is committed, re-entry returns the stored outcome.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use classdesk_types::workflow::{StepFailure, StepOutcome, StepRecord};
use serde_json::Value;
use uuid::Uuid;

use crate::repository::workflow::WorkflowRepository;

// ---------------------------------------------------------------------------
// StepStore
// ---------------------------------------------------------------------------

/// Memoization layer over the workflow repository.
///
/// Generic over `R: WorkflowRepository` so it works with any storage backend
/// (SQLite, in-memory). Records are insert-if-absent, which keeps concurrent
/// re-entries of the same run from overwriting each other's outcome.
pub struct StepStore<R: WorkflowRepository> {
    repo: Arc<R>,
}

impl<R: WorkflowRepository> Clone for StepStore<R> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
        }
    }
}

impl<R: WorkflowRepository> StepStore<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Stored outcome of a step, if it already committed.
    pub async fn lookup(
        &self,
        run_id: Uuid,
        step_name: &str,
    ) -> Result<Option<StepOutcome>, StepStoreError> {
        let record = self
            .repo
            .get_step(&run_id, step_name)
            .await
            .map_err(|e| StepStoreError::Repository(e.to_string()))?;
        Ok(record.map(|r| r.outcome))
    }

    /// Commit a successful step outcome.
    ///
    /// If another execution already committed the step, its outcome wins and
    /// is returned instead of `value`.
    pub async fn record_success(
        &self,
        run_id: Uuid,
        step_name: &str,
        value: Value,
    ) -> Result<StepOutcome, StepStoreError> {
        let record = StepRecord::success(run_id, step_name, value);
        self.commit(record).await
    }

    /// Commit a non-retriable step failure.
    pub async fn record_failure(
        &self,
        run_id: Uuid,
        step_name: &str,
        failure: &StepFailure,
    ) -> Result<StepOutcome, StepStoreError> {
        let record = StepRecord::failure(run_id, step_name, failure);
        self.commit(record).await
    }

    async fn commit(&self, record: StepRecord) -> Result<StepOutcome, StepStoreError> {
        let written = self
            .repo
            .save_step(&record)
            .await
            .map_err(|e| StepStoreError::Repository(e.to_string()))?;

        if written {
            tracing::debug!(
                run_id = %record.run_id,
                step = %record.step_name,
                "memoized step"
            );
            return Ok(record.outcome);
        }

        // Lost the race against a concurrent re-entry: return its outcome.
        self.lookup(record.run_id, &record.step_name)
            .await?
            .ok_or_else(|| {
                StepStoreError::Repository(format!(
                    "step '{}' reported present but not found",
                    record.step_name
                ))
            })
    }

    // -----------------------------------------------------------------------
    // Sleep directives
    // -----------------------------------------------------------------------

    /// Wake-up instant of a sleep step, scheduling it on first sight.
    ///
    /// The record is written before the sleep begins so that a resumed run
    /// only sleeps for the time that remains.
    pub async fn schedule_wake(
        &self,
        run_id: Uuid,
        step_name: &str,
        wake_at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, StepStoreError> {
        let outcome = match self.lookup(run_id, step_name).await? {
            Some(outcome) => outcome,
            None => {
                self.record_success(run_id, step_name, serde_json::json!({ "wake_at": wake_at }))
                    .await?
            }
        };

        match outcome {
            StepOutcome::Success { value } => value
                .get("wake_at")
                .cloned()
                .and_then(|v| serde_json::from_value::<DateTime<Utc>>(v).ok())
                .ok_or_else(|| StepStoreError::Corrupt {
                    step: step_name.to_string(),
                    reason: "sleep record has no wake_at".to_string(),
                }),
            StepOutcome::Failure { .. } => Err(StepStoreError::Corrupt {
                step: step_name.to_string(),
                reason: "sleep record holds a failure".to_string(),
            }),
        }
    }

    /// Names of all committed steps of a run, in completion order.
    pub async fn completed_steps(&self, run_id: Uuid) -> Result<Vec<String>, StepStoreError> {
        let records = self
            .repo
            .list_steps(&run_id)
            .await
            .map_err(|e| StepStoreError::Repository(e.to_string()))?;
        Ok(records
            .into_iter()
            .filter(|r| !r.is_internal())
            .map(|r| r.step_name)
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from step store operations.
#[derive(Debug, thiserror::Error)]
pub enum StepStoreError {
    #[error("step store error: {0}")]
    Repository(String),

    #[error("corrupt record for step '{step}': {reason}")]
    Corrupt { step: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryWorkflowRepository;
    use classdesk_types::error::ErrorCategory;

    fn store() -> StepStore<InMemoryWorkflowRepository> {
        StepStore::new(Arc::new(InMemoryWorkflowRepository::new()))
    }

    #[tokio::test]
    async fn lookup_misses_until_recorded() {
        let store = store();
        let run_id = Uuid::now_v7();
        assert!(store.lookup(run_id, "fetch").await.unwrap().is_none());

        store
            .record_success(run_id, "fetch", serde_json::json!({"rows": 3}))
            .await
            .unwrap();

        let outcome = store.lookup(run_id, "fetch").await.unwrap().unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Success {
                value: serde_json::json!({"rows": 3})
            }
        );
    }

    #[tokio::test]
    async fn first_commit_wins() {
        let store = store();
        let run_id = Uuid::now_v7();
        store
            .record_success(run_id, "send", serde_json::json!(1))
            .await
            .unwrap();
        let second = store
            .record_success(run_id, "send", serde_json::json!(2))
            .await
            .unwrap();
        assert_eq!(
            second,
            StepOutcome::Success {
                value: serde_json::json!(1)
            }
        );
    }

    #[tokio::test]
    async fn failures_are_memoized_with_category() {
        let store = store();
        let run_id = Uuid::now_v7();
        let failure = StepFailure::fatal("submission missing", ErrorCategory::ValidationError);
        store.record_failure(run_id, "load", &failure).await.unwrap();

        match store.lookup(run_id, "load").await.unwrap() {
            Some(StepOutcome::Failure { category, .. }) => {
                assert_eq!(category, ErrorCategory::ValidationError)
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn schedule_wake_keeps_first_instant() {
        let store = store();
        let run_id = Uuid::now_v7();
        let first = Utc::now() + chrono::Duration::seconds(120);
        let later = first + chrono::Duration::seconds(300);

        assert_eq!(store.schedule_wake(run_id, "debounce", first).await.unwrap(), first);
        assert_eq!(store.schedule_wake(run_id, "debounce", later).await.unwrap(), first);
    }

    #[tokio::test]
    async fn completed_steps_hide_internal_records() {
        let store = store();
        let run_id = Uuid::now_v7();
        store.record_success(run_id, "a", Value::Null).await.unwrap();
        store
            .record_success(run_id, classdesk_types::workflow::EXHAUSTED_STEP, Value::Null)
            .await
            .unwrap();
        store.record_success(run_id, "b", Value::Null).await.unwrap();

        assert_eq!(store.completed_steps(run_id).await.unwrap(), vec!["a", "b"]);
    }
}
