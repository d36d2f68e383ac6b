//! Workflow engine: wires the bus, executor and retry controller together.
//!
//! Each registered workflow becomes the subscriber of its trigger event.
//! Delivery resolves the run, drives it to a terminal state and only then
//! marks the event processed. Anything short of that leaves the event
//! pending for redelivery by the worker loop.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use classdesk_types::config::EngineConfig;
use classdesk_types::event::{Event, EventPayload};
use classdesk_types::workflow::WorkflowRun;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info_span};
use uuid::Uuid;

use super::cancellation::CancellationMatcher;
use super::definition::{Workflow, WorkflowDyn};
use super::executor::{PreparedRun, WorkflowExecutor};
use super::retry::{RetryController, RetryPolicy};
use crate::event::bus::{BusError, EventBus, EventSubscriber};
use crate::repository::workflow::WorkflowRepository;
use classdesk_types::error::RepositoryError;

pub struct WorkflowEngine<R: WorkflowRepository + 'static> {
    repo: Arc<R>,
    bus: Arc<EventBus<R>>,
    executor: Arc<WorkflowExecutor<R>>,
    retry: Arc<RetryController<R>>,
    poll_interval: Duration,
}

impl<R: WorkflowRepository + 'static> WorkflowEngine<R> {
    pub fn new(repo: Arc<R>, config: &EngineConfig) -> Self {
        let matcher = Arc::new(CancellationMatcher::new(Arc::clone(&repo)));
        let executor = Arc::new(WorkflowExecutor::new(
            Arc::clone(&repo),
            matcher,
            config.step_timeout(),
        ));
        let retry = Arc::new(RetryController::new(
            Arc::clone(&executor),
            RetryPolicy::from_config(config),
        ));

        Self {
            bus: Arc::new(EventBus::new(Arc::clone(&repo))),
            repo,
            executor,
            retry,
            poll_interval: config.poll_interval(),
        }
    }

    pub fn repo(&self) -> &Arc<R> {
        &self.repo
    }

    pub fn bus(&self) -> &Arc<EventBus<R>> {
        &self.bus
    }

    /// Subscribe `workflow` to its trigger event.
    pub fn register<W: Workflow>(&self, workflow: W) -> Result<(), BusError> {
        let trigger = Workflow::trigger(&workflow);
        let name = Workflow::name(&workflow);
        let subscriber = WorkflowSubscriber {
            workflow: Arc::new(workflow),
            executor: Arc::clone(&self.executor),
            retry: Arc::clone(&self.retry),
            repo: Arc::clone(&self.repo),
        };
        self.bus.subscribe(trigger, Arc::new(subscriber))?;
        tracing::debug!(workflow = name, trigger, "registered workflow");
        Ok(())
    }

    pub async fn publish(
        &self,
        name: &str,
        payload: serde_json::Value,
        correlation_key: &str,
    ) -> Result<Event, BusError> {
        self.bus.publish(name, payload, correlation_key).await
    }

    pub async fn publish_payload<P: EventPayload>(&self, payload: &P) -> Result<Event, BusError> {
        self.bus.publish_payload(payload).await
    }

    /// Redeliver every pending event, resuming interrupted runs.
    pub async fn recover(&self) -> Result<usize, BusError> {
        let running = self.repo.list_running_runs().await?;
        if !running.is_empty() {
            tracing::info!(runs = running.len(), "resuming interrupted runs");
        }
        self.bus.redeliver_pending().await
    }

    /// Wait for all in-flight deliveries.
    pub async fn drain(&self) {
        self.bus.drain().await;
    }

    /// Process events until `shutdown` fires.
    ///
    /// Pending events (including those recorded by other processes) are
    /// polled every `poll_interval`. On shutdown, in-flight deliveries are
    /// awaited before returning.
    pub async fn run_worker(&self, shutdown: CancellationToken) -> Result<(), BusError> {
        let recovered = self.recover().await?;
        tracing::info!(
            recovered,
            poll_interval_secs = self.poll_interval.as_secs(),
            "workflow worker started"
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; recovery already covered it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.bus.redeliver_pending().await {
                        tracing::warn!(error = %e, "failed to poll pending events");
                    }
                }
            }
        }

        tracing::info!(in_flight = self.bus.in_flight(), "worker shutting down, draining deliveries");
        self.bus.drain().await;
        Ok(())
    }

    /// Latest run for a correlation key.
    pub async fn latest_run(&self, correlation_key: &str) -> Result<Option<WorkflowRun>, RepositoryError> {
        Ok(self
            .repo
            .list_runs_by_key(correlation_key, 1)
            .await?
            .into_iter()
            .next())
    }

    pub async fn get_run(&self, run_id: &Uuid) -> Result<Option<WorkflowRun>, RepositoryError> {
        self.repo.get_run(run_id).await
    }
}

// ---------------------------------------------------------------------------
// Subscriber
// ---------------------------------------------------------------------------

struct WorkflowSubscriber<R: WorkflowRepository + 'static> {
    workflow: Arc<dyn WorkflowDyn<R>>,
    executor: Arc<WorkflowExecutor<R>>,
    retry: Arc<RetryController<R>>,
    repo: Arc<R>,
}

impl<R: WorkflowRepository + 'static> WorkflowSubscriber<R> {
    async fn handle(&self, event: Event) {
        let workflow = self.workflow.as_ref();

        let run = match self.executor.prepare_run(workflow, &event).await {
            Ok(PreparedRun::Finished(run)) => {
                tracing::debug!(run_id = %run.id, status = %run.status, "event already handled");
                self.acknowledge(&event).await;
                return;
            }
            Ok(PreparedRun::Fresh(run)) => run,
            Ok(PreparedRun::Resumed(run)) => {
                tracing::info!(run_id = %run.id, attempt = run.attempt, "resuming run");
                run
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to prepare run, event stays pending");
                return;
            }
        };

        let run_id = run.id;
        match self.retry.drive(workflow, run, &event).await {
            Ok(status) => {
                tracing::debug!(run_id = %run_id, %status, "run finished");
                self.acknowledge(&event).await;
            }
            Err(e) => {
                tracing::error!(run_id = %run_id, error = %e, "run interrupted, event stays pending");
            }
        }
    }

    async fn acknowledge(&self, event: &Event) {
        if let Err(e) = self.repo.mark_event_processed(&event.id).await {
            tracing::warn!(event_id = %event.id, error = %e, "failed to mark event processed");
        }
    }
}

impl<R: WorkflowRepository + 'static> EventSubscriber for WorkflowSubscriber<R> {
    fn deliver(self: Arc<Self>, event: Event) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let span = info_span!(
            "workflow_run",
            workflow = self.workflow.name(),
            event_id = %event.id,
            correlation_key = %event.correlation_key,
        );
        Box::pin(async move { self.handle(event).await }.instrument(span))
    }
}
