//! Retry controller: bounded re-entry of failing runs and one failure
//! handler invocation on exhaustion.
//!
//! Each re-entry starts the body from the top; memoization makes it resume
//! at the first step without a record. Intermediate failures are never
//! written to domain entities. Only the failure handler does that, after the
//! last attempt.

use std::sync::Arc;
use std::time::Duration;

use classdesk_types::config::EngineConfig;
use classdesk_types::error::ErrorCategory;
use classdesk_types::event::Event;
use classdesk_types::workflow::{
    EXHAUSTED_STEP, ON_FAILURE_STEP, RunStatus, StepFailure, StepOutcome, WorkflowRun,
};

use super::context::StepError;
use super::definition::{RunFailure, WorkflowDyn};
use super::executor::{AttemptOutcome, ExecutorError, WorkflowExecutor};
use crate::repository::workflow::WorkflowRepository;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Stateless retry decisions.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each further one.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: config.retry_backoff(),
        }
    }

    /// Whether a failed `attempt` (1-based) should be followed by another.
    pub fn should_retry(&self, attempt: u32, error: &StepError) -> bool {
        error.is_retriable() && attempt < self.max_attempts
    }

    /// Delay after failed `attempt`: `backoff * 2^(attempt - 1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff.saturating_mul(1u32 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

// ---------------------------------------------------------------------------
// RetryController
// ---------------------------------------------------------------------------

/// Drives a run through attempts until it reaches a terminal state.
pub struct RetryController<R: WorkflowRepository> {
    executor: Arc<WorkflowExecutor<R>>,
    policy: RetryPolicy,
}

impl<R: WorkflowRepository + 'static> RetryController<R> {
    pub fn new(executor: Arc<WorkflowExecutor<R>>, policy: RetryPolicy) -> Self {
        Self { executor, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run attempts until completion, cancellation or exhaustion.
    pub async fn drive(
        &self,
        workflow: &dyn WorkflowDyn<R>,
        mut run: WorkflowRun,
        event: &Event,
    ) -> Result<RunStatus, ExecutorError> {
        let steps = self.executor.steps();
        let repo = self.executor.repo();

        // Exhausted before a crash: go straight to the failure path.
        if let Some(StepOutcome::Failure { message, category }) =
            steps.lookup(run.id, EXHAUSTED_STEP).await?
        {
            return self.fail(workflow, &run, event, message, category).await;
        }

        let mut attempt = run.attempt.max(1);
        loop {
            tracing::debug!(run_id = %run.id, workflow = workflow.name(), attempt, "starting attempt");

            let err = match self.executor.execute_attempt(workflow, &run, event).await {
                Ok(AttemptOutcome::Completed(_)) => {
                    repo.finish_run(&run.id, RunStatus::Completed, None).await?;
                    tracing::info!(run_id = %run.id, workflow = workflow.name(), attempt, "run completed");
                    return Ok(RunStatus::Completed);
                }
                Ok(AttemptOutcome::Cancelled { step }) => {
                    let reason = format!("superseded by a newer run before step '{step}'");
                    repo.finish_run(&run.id, RunStatus::Cancelled, Some(&reason))
                        .await?;
                    return Ok(RunStatus::Cancelled);
                }
                Err(err) => err,
            };

            if self.policy.should_retry(attempt, &err) {
                let delay = self.policy.delay_after(attempt);
                tracing::warn!(
                    run_id = %run.id,
                    workflow = workflow.name(),
                    attempt,
                    max_attempts = self.policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                repo.set_attempt(&run.id, attempt).await?;
                run.attempt = attempt;
                continue;
            }

            tracing::error!(
                run_id = %run.id,
                workflow = workflow.name(),
                attempt,
                category = %err.category(),
                error = %err,
                "run exhausted its attempts"
            );

            let exhausted = StepFailure::fatal(err.to_string(), err.category());
            let (message, category) = match steps
                .record_failure(run.id, EXHAUSTED_STEP, &exhausted)
                .await?
            {
                StepOutcome::Failure { message, category } => (message, category),
                StepOutcome::Success { .. } => (exhausted.message, exhausted.category),
            };
            return self.fail(workflow, &run, event, message, category).await;
        }
    }

    /// Invoke the failure handler at most once and mark the run failed.
    async fn fail(
        &self,
        workflow: &dyn WorkflowDyn<R>,
        run: &WorkflowRun,
        event: &Event,
        message: String,
        category: ErrorCategory,
    ) -> Result<RunStatus, ExecutorError> {
        let steps = self.executor.steps();

        if steps.lookup(run.id, ON_FAILURE_STEP).await?.is_none() {
            let failure = RunFailure {
                run: run.clone(),
                event: event.clone(),
                message: message.clone(),
                category,
                attempts: run.attempt,
            };
            workflow
                .on_failure_boxed(&failure)
                .await
                .map_err(|e| ExecutorError::FailureHandler {
                    run_id: run.id,
                    message: e.to_string(),
                })?;
            steps
                .record_success(
                    run.id,
                    ON_FAILURE_STEP,
                    serde_json::json!({ "category": category }),
                )
                .await?;
        }

        self.executor
            .repo()
            .finish_run(&run.id, RunStatus::Failed, Some(&message))
            .await?;
        Ok(RunStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryWorkflowRepository;
    use crate::workflow::cancellation::CancellationMatcher;
    use crate::workflow::context::StepContext;
    use crate::workflow::definition::Workflow;
    use crate::workflow::executor::PreparedRun;
    use serde_json::Value;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails `failures` times on its second step, then succeeds.
    struct Flaky {
        failures: u32,
        fatal: bool,
        first_step_calls: Arc<AtomicU32>,
        second_step_calls: Arc<AtomicU32>,
        handler_calls: Arc<AtomicU32>,
        handler_fails: bool,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                fatal: false,
                first_step_calls: Arc::default(),
                second_step_calls: Arc::default(),
                handler_calls: Arc::default(),
                handler_fails: false,
            }
        }
    }

    impl Workflow for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn trigger(&self) -> &'static str {
            "test/flaky"
        }

        async fn run<R: WorkflowRepository + 'static>(
            &self,
            ctx: &StepContext<R>,
            _event: &Event,
        ) -> Result<Value, StepError> {
            ctx.run("first", || async {
                self.first_step_calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await?;

            ctx.run("second", || async {
                let call = self.second_step_calls.fetch_add(1, Ordering::SeqCst);
                if call < self.failures {
                    if self.fatal {
                        return Err(StepFailure::fatal("bad input", ErrorCategory::ValidationError));
                    }
                    return Err(StepFailure::new("request timed out"));
                }
                Ok(Value::from(call))
            })
            .await
        }

        async fn on_failure(&self, failure: &RunFailure) -> Result<(), StepFailure> {
            self.handler_calls.fetch_add(1, Ordering::SeqCst);
            assert!(!failure.message.is_empty());
            if self.handler_fails {
                return Err(StepFailure::new("handler store unavailable"));
            }
            Ok(())
        }
    }

    struct Setup {
        repo: Arc<InMemoryWorkflowRepository>,
        executor: Arc<WorkflowExecutor<InMemoryWorkflowRepository>>,
        controller: RetryController<InMemoryWorkflowRepository>,
    }

    fn setup() -> Setup {
        let repo = Arc::new(InMemoryWorkflowRepository::new());
        let matcher = Arc::new(CancellationMatcher::new(Arc::clone(&repo)));
        let executor = Arc::new(WorkflowExecutor::new(
            Arc::clone(&repo),
            matcher,
            Duration::from_secs(5),
        ));
        let controller = RetryController::new(
            Arc::clone(&executor),
            RetryPolicy {
                max_attempts: 3,
                backoff: Duration::ZERO,
            },
        );
        Setup {
            repo,
            executor,
            controller,
        }
    }

    async fn start(setup: &Setup, wf: &Flaky) -> (WorkflowRun, Event) {
        let event = Event::new("test/flaky", serde_json::json!({}), "k");
        match setup.executor.prepare_run(wf, &event).await.unwrap() {
            PreparedRun::Fresh(run) => (run, event),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(2000));
    }

    #[test]
    fn default_policy_allows_three_attempts() {
        assert_eq!(RetryPolicy::default().max_attempts, 3);
    }

    #[tokio::test]
    async fn transient_failure_recovers_and_skips_committed_steps() {
        let s = setup();
        let wf = Flaky::new(1);
        let (run, event) = start(&s, &wf).await;

        let status = s.controller.drive(&wf, run.clone(), &event).await.unwrap();

        assert_eq!(status, RunStatus::Completed);
        assert_eq!(wf.first_step_calls.load(Ordering::SeqCst), 1);
        assert_eq!(wf.second_step_calls.load(Ordering::SeqCst), 2);
        assert_eq!(wf.handler_calls.load(Ordering::SeqCst), 0);
        let stored = s.repo.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.attempt, 2);
        assert_eq!(stored.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn always_failing_step_exhausts_after_three_attempts() {
        let s = setup();
        let wf = Flaky::new(u32::MAX);
        let (run, event) = start(&s, &wf).await;

        let status = s.controller.drive(&wf, run.clone(), &event).await.unwrap();

        assert_eq!(status, RunStatus::Failed);
        assert_eq!(wf.second_step_calls.load(Ordering::SeqCst), 3);
        assert_eq!(wf.handler_calls.load(Ordering::SeqCst), 1);

        let stored = s.repo.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert!(stored.error.unwrap().contains("timed out"));

        // Redriving a failed run never re-invokes the handler.
        s.controller.drive(&wf, stored_running(&run), &event).await.unwrap();
        assert_eq!(wf.handler_calls.load(Ordering::SeqCst), 1);
    }

    fn stored_running(run: &WorkflowRun) -> WorkflowRun {
        let mut run = run.clone();
        run.attempt = 3;
        run
    }

    #[tokio::test]
    async fn fatal_failure_skips_remaining_attempts() {
        let s = setup();
        let mut wf = Flaky::new(u32::MAX);
        wf.fatal = true;
        let (run, event) = start(&s, &wf).await;

        let status = s.controller.drive(&wf, run, &event).await.unwrap();

        assert_eq!(status, RunStatus::Failed);
        assert_eq!(wf.second_step_calls.load(Ordering::SeqCst), 1);
        assert_eq!(wf.handler_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_handler_is_retried_on_redelivery() {
        let s = setup();
        let mut wf = Flaky::new(u32::MAX);
        wf.handler_fails = true;
        let (run, event) = start(&s, &wf).await;

        let err = s.controller.drive(&wf, run.clone(), &event).await.unwrap_err();
        assert!(matches!(err, ExecutorError::FailureHandler { .. }));
        let stored = s.repo.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Running);

        wf.handler_fails = false;
        let status = s.controller.drive(&wf, stored, &event).await.unwrap();
        assert_eq!(status, RunStatus::Failed);
        // Exhaustion was memoized: the failing step did not run again.
        assert_eq!(wf.second_step_calls.load(Ordering::SeqCst), 3);
        assert_eq!(wf.handler_calls.load(Ordering::SeqCst), 2);
    }
}
