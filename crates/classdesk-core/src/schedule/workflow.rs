//! Session notification workflows.
//!
//! `notify-schedule-change` debounces bursts of edits to one session: each
//! new event supersedes the pending run for the same session, and only the
//! run that survives the debounce window reads the session's current state
//! and notifies the class. `notify-session-cancelled` sends right away.

use std::sync::Arc;
use std::time::Duration;

use classdesk_types::event::{Event, EventPayload, SessionCancelled, SessionScheduleChanged, names};
use classdesk_types::notification::Recipient;
use classdesk_types::schedule::SessionSnapshot;
use classdesk_types::workflow::{CancellationPolicy, StepFailure};
use serde_json::Value;
use uuid::Uuid;

use super::message;
use crate::notify::mailer::Mailer;
use crate::repository::directory::SessionDirectory;
use crate::repository::workflow::WorkflowRepository;
use crate::workflow::batch::{BatchItem, BatchProcessor, BatchProgress};
use crate::workflow::context::{StepContext, StepError};
use crate::workflow::definition::Workflow;

impl BatchItem for Recipient {
    fn key(&self) -> String {
        self.email.clone()
    }
}

fn decode<P: EventPayload>(event: &Event) -> Result<P, StepError> {
    event.decode().map_err(|e| StepError::Codec {
        step: "decode-payload".to_string(),
        reason: e.to_string(),
    })
}

async fn log_progress(run_id: Uuid, progress: BatchProgress) -> Result<(), StepFailure> {
    tracing::debug!(
        %run_id,
        batch = progress.batch,
        batches = progress.batches,
        sent = progress.succeeded,
        failed = progress.failed,
        "notification batch sent"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Schedule changed
// ---------------------------------------------------------------------------

pub struct ScheduleChangedWorkflow<S: SessionDirectory, N: Mailer> {
    sessions: Arc<S>,
    mailer: Arc<N>,
    debounce: Duration,
    batch: BatchProcessor,
}

impl<S: SessionDirectory, N: Mailer> ScheduleChangedWorkflow<S, N> {
    pub fn new(sessions: Arc<S>, mailer: Arc<N>, debounce: Duration, batch: BatchProcessor) -> Self {
        Self {
            sessions,
            mailer,
            debounce,
            batch,
        }
    }
}

impl<S, N> Workflow for ScheduleChangedWorkflow<S, N>
where
    S: SessionDirectory + 'static,
    N: Mailer + 'static,
{
    fn name(&self) -> &'static str {
        "notify-schedule-change"
    }

    fn trigger(&self) -> &'static str {
        names::SESSION_SCHEDULE_CHANGED
    }

    fn cancellation(&self) -> CancellationPolicy {
        CancellationPolicy::SupersedeSameKey
    }

    async fn run<R: WorkflowRepository + 'static>(
        &self,
        ctx: &StepContext<R>,
        event: &Event,
    ) -> Result<Value, StepError> {
        let payload: SessionScheduleChanged = decode(event)?;

        ctx.sleep("debounce", self.debounce).await?;

        let sessions = &self.sessions;
        let session: Option<SessionSnapshot> = ctx
            .run("load-session", || async {
                Ok(sessions.get_session(&payload.session_id).await?)
            })
            .await?;

        let Some(session) = session else {
            tracing::info!(session_id = %payload.session_id, "session no longer exists, skipping notification");
            return Ok(serde_json::json!({ "skipped": "session_not_found" }));
        };

        if !session.differs_from(
            payload.previous_start,
            payload.previous_end,
            payload.previous_room.as_deref(),
        ) {
            tracing::info!(session_id = %payload.session_id, "schedule reverted, nothing to notify");
            return Ok(serde_json::json!({ "skipped": "no_effective_change" }));
        }

        let recipients: Vec<Recipient> = ctx
            .run("load-recipients", || async {
                Ok(sessions.list_class_recipients(&session.class_id).await?)
            })
            .await?;

        let run_id = ctx.run_id();
        let mailer = &self.mailer;
        let session = &session;
        let summary = self
            .batch
            .process(
                ctx,
                "notify",
                &recipients,
                |recipient| {
                    let email = message::schedule_changed(
                        run_id,
                        recipient,
                        session,
                        payload.previous_start,
                        payload.previous_end,
                    );
                    async move { Ok(mailer.send(&email).await?) }
                },
                |progress| log_progress(run_id, progress),
            )
            .await?;

        tracing::info!(
            session_id = %payload.session_id,
            sent = summary.succeeded,
            failed = summary.failed,
            "schedule change notified"
        );
        Ok(serde_json::json!({ "sent": summary.succeeded, "failed": summary.failed }))
    }
}

// ---------------------------------------------------------------------------
// Session cancelled
// ---------------------------------------------------------------------------

pub struct SessionCancelledWorkflow<S: SessionDirectory, N: Mailer> {
    sessions: Arc<S>,
    mailer: Arc<N>,
    batch: BatchProcessor,
}

impl<S: SessionDirectory, N: Mailer> SessionCancelledWorkflow<S, N> {
    pub fn new(sessions: Arc<S>, mailer: Arc<N>, batch: BatchProcessor) -> Self {
        Self {
            sessions,
            mailer,
            batch,
        }
    }
}

impl<S, N> Workflow for SessionCancelledWorkflow<S, N>
where
    S: SessionDirectory + 'static,
    N: Mailer + 'static,
{
    fn name(&self) -> &'static str {
        "notify-session-cancelled"
    }

    fn trigger(&self) -> &'static str {
        names::SESSION_CANCELLED
    }

    async fn run<R: WorkflowRepository + 'static>(
        &self,
        ctx: &StepContext<R>,
        event: &Event,
    ) -> Result<Value, StepError> {
        let payload: SessionCancelled = decode(event)?;
        let sessions = &self.sessions;

        let recipients: Vec<Recipient> = ctx
            .run("load-recipients", || async {
                Ok(sessions.list_class_recipients(&payload.class_id).await?)
            })
            .await?;

        let run_id = ctx.run_id();
        let mailer = &self.mailer;
        let payload = &payload;
        let summary = self
            .batch
            .process(
                ctx,
                "notify",
                &recipients,
                |recipient| {
                    let email = message::session_cancelled(run_id, recipient, payload);
                    async move { Ok(mailer.send(&email).await?) }
                },
                |progress| log_progress(run_id, progress),
            )
            .await?;

        tracing::info!(
            session_id = %payload.session_id,
            is_bulk = payload.is_bulk,
            sent = summary.succeeded,
            failed = summary.failed,
            "session cancellation notified"
        );
        Ok(serde_json::json!({ "sent": summary.succeeded, "failed": summary.failed }))
    }
}
