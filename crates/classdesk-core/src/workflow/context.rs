//! Step context handed to workflow bodies.
//!
//! Every step goes through the same gate, in order: cancellation check,
//! step-store lookup, then the body under the step timeout. Successful
//! outcomes (and non-retriable failures) are memoized so a retried or resumed
//! run re-enters at the first step without a record.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use classdesk_types::error::{ErrorCategory, RepositoryError};
use classdesk_types::workflow::{CancellationPolicy, StepFailure, StepOutcome, WorkflowRun};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::cancellation::CancellationMatcher;
use super::step_store::{StepStore, StepStoreError};
use crate::repository::workflow::WorkflowRepository;

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Error escaping a step (and therefore the workflow body).
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// The step body returned a failure.
    #[error("step '{step}' failed: {failure}")]
    Failed { step: String, failure: StepFailure },

    /// The step body exceeded the step timeout.
    #[error("step '{step}' timed out after {timeout:?}")]
    TimedOut { step: String, timeout: Duration },

    /// A newer run for the same correlation key took over.
    #[error("run superseded at step '{step}'")]
    Superseded { step: String },

    #[error(transparent)]
    Store(#[from] StepStoreError),

    /// Step output could not be stored or restored.
    #[error("step '{step}' output codec error: {reason}")]
    Codec { step: String, reason: String },
}

impl StepError {
    /// Whether another attempt could succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            StepError::Failed { failure, .. } => failure.retriable,
            StepError::TimedOut { .. } | StepError::Store(_) => true,
            StepError::Superseded { .. } | StepError::Codec { .. } => false,
        }
    }

    /// Taxonomy category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            StepError::Failed { failure, .. } => failure.category,
            StepError::TimedOut { .. } => ErrorCategory::ApiTimeout,
            StepError::Codec { .. } => ErrorCategory::InvalidResponse,
            StepError::Superseded { .. } | StepError::Store(_) => ErrorCategory::Other,
        }
    }
}

impl From<RepositoryError> for StepError {
    fn from(err: RepositoryError) -> Self {
        StepError::Store(StepStoreError::Repository(err.to_string()))
    }
}

// ---------------------------------------------------------------------------
// StepContext
// ---------------------------------------------------------------------------

/// Execution context of one attempt of one run.
pub struct StepContext<R: WorkflowRepository> {
    run: WorkflowRun,
    steps: StepStore<R>,
    matcher: Arc<CancellationMatcher<R>>,
    policy: CancellationPolicy,
    step_timeout: Duration,
    /// Fires when this run is superseded while suspended in a sleep.
    wake: CancellationToken,
}

impl<R: WorkflowRepository> StepContext<R> {
    pub fn new(
        run: WorkflowRun,
        steps: StepStore<R>,
        matcher: Arc<CancellationMatcher<R>>,
        policy: CancellationPolicy,
        step_timeout: Duration,
        wake: CancellationToken,
    ) -> Self {
        Self {
            run,
            steps,
            matcher,
            policy,
            step_timeout,
            wake,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run.id
    }

    pub fn attempt(&self) -> u32 {
        self.run.attempt
    }

    pub fn correlation_key(&self) -> &str {
        &self.run.correlation_key
    }

    pub fn workflow_name(&self) -> &str {
        &self.run.workflow_name
    }

    /// Stop if a newer run superseded this one.
    async fn ensure_current(&self, step: &str) -> Result<(), StepError> {
        if self.policy == CancellationPolicy::None {
            return Ok(());
        }
        let current = self
            .matcher
            .is_current(&self.run.workflow_name, &self.run.correlation_key, self.run.id)
            .await?;
        if current {
            Ok(())
        } else {
            tracing::info!(
                run_id = %self.run.id,
                step,
                correlation_key = %self.run.correlation_key,
                "run superseded, stopping before step"
            );
            Err(StepError::Superseded {
                step: step.to_string(),
            })
        }
    }

    /// Execute a named step at most once per run.
    ///
    /// On re-entry with a committed record the stored value is returned and
    /// `body` is not invoked. Retriable failures are not memoized.
    pub async fn run<T, F, Fut>(&self, name: &str, body: F) -> Result<T, StepError>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, StepFailure>> + Send,
    {
        self.ensure_current(name).await?;

        if let Some(outcome) = self.steps.lookup(self.run.id, name).await? {
            tracing::debug!(run_id = %self.run.id, step = name, "step already committed, skipping body");
            return self.restore(name, outcome);
        }

        let result = tokio::time::timeout(self.step_timeout, body()).await;

        match result {
            Ok(Ok(value)) => {
                let json = serde_json::to_value(&value).map_err(|e| StepError::Codec {
                    step: name.to_string(),
                    reason: e.to_string(),
                })?;
                let stored = self.steps.record_success(self.run.id, name, json).await?;
                // Another execution may have committed first; its value wins.
                self.restore(name, stored)
            }
            Ok(Err(failure)) if !failure.retriable => {
                self.steps
                    .record_failure(self.run.id, name, &failure)
                    .await?;
                Err(StepError::Failed {
                    step: name.to_string(),
                    failure,
                })
            }
            Ok(Err(failure)) => Err(StepError::Failed {
                step: name.to_string(),
                failure,
            }),
            Err(_) => Err(StepError::TimedOut {
                step: name.to_string(),
                timeout: self.step_timeout,
            }),
        }
    }

    fn restore<T: DeserializeOwned>(&self, name: &str, outcome: StepOutcome) -> Result<T, StepError> {
        match outcome {
            StepOutcome::Success { value } => {
                serde_json::from_value(value).map_err(|e| StepError::Codec {
                    step: name.to_string(),
                    reason: e.to_string(),
                })
            }
            StepOutcome::Failure { message, category } => Err(StepError::Failed {
                step: name.to_string(),
                failure: StepFailure::fatal(message, category),
            }),
        }
    }

    /// Suspend the run for `duration` without holding a thread.
    ///
    /// The wake-up instant is memoized, so a resumed run only sleeps for what
    /// remains. Cancellation is checked before the sleep and again after it,
    /// and a superseded run is woken early.
    pub async fn sleep(&self, name: &str, duration: Duration) -> Result<(), StepError> {
        self.ensure_current(name).await?;

        let span = chrono::Duration::from_std(duration).map_err(|e| StepError::Codec {
            step: name.to_string(),
            reason: e.to_string(),
        })?;
        let wake_at = self
            .steps
            .schedule_wake(self.run.id, name, Utc::now() + span)
            .await?;

        let remaining = (wake_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        if !remaining.is_zero() {
            tracing::debug!(
                run_id = %self.run.id,
                step = name,
                remaining_ms = remaining.as_millis() as u64,
                "sleeping"
            );
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                _ = self.wake.cancelled() => {
                    tracing::debug!(run_id = %self.run.id, step = name, "woken early by a newer run");
                }
            }
        }

        self.ensure_current(name).await
    }
}
