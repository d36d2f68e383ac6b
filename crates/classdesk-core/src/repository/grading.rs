//! Grading repository trait: grading jobs, submissions and analysis results.

use classdesk_types::error::{ErrorCategory, RepositoryError};
use classdesk_types::grading::{
    GradingAnalysis, GradingJob, GradingJobStatus, Submission, SubmissionStatus,
};
use uuid::Uuid;

/// Storage interface for the grading state machine.
///
/// Jobs are unique per submission; all writes are upserts keyed by job or
/// submission ID so re-executed steps converge on the same rows.
pub trait GradingRepository: Send + Sync {
    /// Create the job of a submission, or reset the existing one to `pending`
    /// (clearing error fields). Never creates a second row for a submission.
    ///
    /// The captured pre-analysis status is cleared only when the existing job
    /// is terminal; a pending or processing job keeps it.
    fn upsert_job_for_submission(
        &self,
        submission_id: &Uuid,
        center_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<GradingJob, RepositoryError>> + Send;

    fn get_job(
        &self,
        job_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<GradingJob>, RepositoryError>> + Send;

    fn get_job_by_submission(
        &self,
        submission_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<GradingJob>, RepositoryError>> + Send;

    /// Set job status and error fields. Sets `completed_at` on terminal states.
    fn update_job_status(
        &self,
        job_id: &Uuid,
        status: GradingJobStatus,
        error: Option<&str>,
        category: Option<ErrorCategory>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Record the pre-analysis submission status unless one is already kept.
    fn capture_previous_status(
        &self,
        job_id: &Uuid,
        status: SubmissionStatus,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_submission(
        &self,
        submission_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Submission>, RepositoryError>> + Send;

    fn set_submission_status(
        &self,
        submission_id: &Uuid,
        status: SubmissionStatus,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Upsert the analysis of a submission.
    fn save_analysis(
        &self,
        submission_id: &Uuid,
        job_id: &Uuid,
        analysis: &GradingAnalysis,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_analysis(
        &self,
        submission_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<GradingAnalysis>, RepositoryError>> + Send;
}
