//! Workflow executor: run creation and single-attempt execution.
//!
//! For a delivered event the executor resolves the run (deduplicating
//! redeliveries by event ID), then interprets the workflow body for one
//! attempt. Retrying and terminal bookkeeping live in
//! [`super::retry::RetryController`].

use std::sync::Arc;
use std::time::Duration;

use classdesk_types::error::RepositoryError;
use classdesk_types::event::Event;
use classdesk_types::workflow::{CancellationPolicy, WorkflowRun};
use serde_json::Value;
use uuid::Uuid;

use super::cancellation::CancellationMatcher;
use super::context::{StepContext, StepError};
use super::definition::WorkflowDyn;
use super::step_store::{StepStore, StepStoreError};
use crate::repository::workflow::WorkflowRepository;

/// How a delivered event maps onto a run.
#[derive(Debug)]
pub enum PreparedRun {
    /// First delivery: a new run was created.
    Fresh(WorkflowRun),
    /// Redelivery of an event whose run is still `running` (crash or
    /// failed delivery): continue it under the same run ID.
    Resumed(WorkflowRun),
    /// Redelivery of an event whose run already reached a terminal state.
    Finished(WorkflowRun),
}

/// Result of one attempt that did not error.
#[derive(Debug)]
pub enum AttemptOutcome {
    Completed(Value),
    /// A newer run took over before `step`.
    Cancelled { step: String },
}

/// Sequential interpreter of workflow bodies.
pub struct WorkflowExecutor<R: WorkflowRepository> {
    repo: Arc<R>,
    steps: StepStore<R>,
    matcher: Arc<CancellationMatcher<R>>,
    step_timeout: Duration,
}

impl<R: WorkflowRepository + 'static> WorkflowExecutor<R> {
    pub fn new(repo: Arc<R>, matcher: Arc<CancellationMatcher<R>>, step_timeout: Duration) -> Self {
        Self {
            steps: StepStore::new(Arc::clone(&repo)),
            repo,
            matcher,
            step_timeout,
        }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub fn steps(&self) -> &StepStore<R> {
        &self.steps
    }

    /// Resolve the run for an event, creating it on first delivery.
    ///
    /// Supersede-policy workflows take their run ID from the cancellation
    /// matcher, which makes every older run of the same key stale.
    pub async fn prepare_run(
        &self,
        workflow: &dyn WorkflowDyn<R>,
        event: &Event,
    ) -> Result<PreparedRun, ExecutorError> {
        if let Some(run) = self.repo.find_run_by_event(&event.id, workflow.name()).await? {
            return Ok(if run.status.is_terminal() {
                PreparedRun::Finished(run)
            } else {
                PreparedRun::Resumed(run)
            });
        }

        let run_id = match workflow.cancellation() {
            CancellationPolicy::SupersedeSameKey => {
                self.matcher
                    .register(workflow.name(), &event.correlation_key)
                    .await?
            }
            CancellationPolicy::None => Uuid::now_v7(),
        };

        let run = WorkflowRun::new(
            run_id,
            workflow.name(),
            event.id,
            &event.name,
            &event.correlation_key,
            event.payload.clone(),
        );
        self.repo.create_run(&run).await?;

        tracing::info!(
            run_id = %run.id,
            workflow = workflow.name(),
            correlation_key = %run.correlation_key,
            "created workflow run"
        );

        Ok(PreparedRun::Fresh(run))
    }

    /// Execute one attempt of `run`.
    ///
    /// Supersession surfaces as [`AttemptOutcome::Cancelled`]; every other
    /// error is returned for the retry controller to judge.
    pub async fn execute_attempt(
        &self,
        workflow: &dyn WorkflowDyn<R>,
        run: &WorkflowRun,
        event: &Event,
    ) -> Result<AttemptOutcome, StepError> {
        let wake = self.matcher.track(run.id);
        let ctx = StepContext::new(
            run.clone(),
            self.steps.clone(),
            Arc::clone(&self.matcher),
            workflow.cancellation(),
            self.step_timeout,
            wake,
        );

        let result = workflow.run_boxed(&ctx, event).await;
        self.matcher.untrack(run.id);

        match result {
            Ok(value) => Ok(AttemptOutcome::Completed(value)),
            Err(StepError::Superseded { step }) => Ok(AttemptOutcome::Cancelled { step }),
            Err(err) => Err(err),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that prevent the engine from driving a run to a terminal state.
///
/// The triggering event stays pending and is redelivered later.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    StepStore(#[from] StepStoreError),

    #[error("failure handler of run {run_id} failed: {message}")]
    FailureHandler { run_id: Uuid, message: String },
}
