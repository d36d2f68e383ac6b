//! Grading service: the request-path entry points of AI grading.
//!
//! Triggering upserts the single grading job of the submission and publishes
//! the analysis event; the workflow does the rest in the background. Callers
//! poll [`GradingService::status`] until the view is terminal.

use std::sync::Arc;

use classdesk_types::error::RepositoryError;
use classdesk_types::event::AnalyzeSubmission;
use classdesk_types::grading::{GradingAnalysis, GradingJob};
use classdesk_types::workflow::RunStatusView;
use uuid::Uuid;

use crate::event::bus::{BusError, EventBus};
use crate::repository::grading::GradingRepository;
use crate::repository::workflow::WorkflowRepository;

#[derive(Debug, thiserror::Error)]
pub enum GradingError {
    #[error("submission not found: {0}")]
    SubmissionNotFound(Uuid),

    #[error("no grading job for submission {0}")]
    JobNotFound(Uuid),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

pub struct GradingService<G: GradingRepository, R: WorkflowRepository + 'static> {
    repo: Arc<G>,
    bus: Arc<EventBus<R>>,
}

impl<G: GradingRepository, R: WorkflowRepository + 'static> GradingService<G, R> {
    pub fn new(repo: Arc<G>, bus: Arc<EventBus<R>>) -> Self {
        Self { repo, bus }
    }

    /// Reset (or create) the submission's job to `pending` and request
    /// analysis.
    pub async fn trigger_analysis(
        &self,
        submission_id: &Uuid,
        center_id: &Uuid,
    ) -> Result<GradingJob, GradingError> {
        if self.repo.get_submission(submission_id).await?.is_none() {
            return Err(GradingError::SubmissionNotFound(*submission_id));
        }

        let job = self
            .repo
            .upsert_job_for_submission(submission_id, center_id)
            .await?;

        let event = self
            .bus
            .publish_payload(&AnalyzeSubmission {
                job_id: job.id,
                submission_id: *submission_id,
                center_id: *center_id,
            })
            .await?;

        tracing::info!(
            job_id = %job.id,
            %submission_id,
            event_id = %event.id,
            "grading analysis requested"
        );
        Ok(job)
    }

    /// Polling view of the submission's grading job.
    pub async fn status(&self, submission_id: &Uuid) -> Result<RunStatusView, GradingError> {
        self.job(submission_id).await.map(|job| job.status_view())
    }

    pub async fn job(&self, submission_id: &Uuid) -> Result<GradingJob, GradingError> {
        self.repo
            .get_job_by_submission(submission_id)
            .await?
            .ok_or(GradingError::JobNotFound(*submission_id))
    }

    pub async fn analysis(&self, submission_id: &Uuid) -> Result<Option<GradingAnalysis>, GradingError> {
        Ok(self.repo.get_analysis(submission_id).await?)
    }
}
