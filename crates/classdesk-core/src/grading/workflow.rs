//! `analyze-submission` workflow: AI review of a student submission.
//!
//! Steps:
//! 1. `mark-processing`: job to `processing`, submission to `analyzing`,
//!    pre-analysis submission status captured for revert
//! 2. `load-submission`: build the analysis request
//! 3. `analyze`: analyzer call, JSON parse and contract validation in one
//!    step, so a retry calls the analyzer again
//! 4. `save-results`: persist the analysis, submission to `reviewed`, job to
//!    `completed`
//!
//! Only the failure handler marks the job `failed`; it also restores the
//! submission status captured in step 1.

use std::sync::Arc;

use classdesk_types::error::ErrorCategory;
use classdesk_types::event::{AnalyzeSubmission, Event, names};
use classdesk_types::grading::{
    AnalysisRequest, GradingAnalysis, GradingJobStatus, SubmissionStatus,
};
use classdesk_types::workflow::StepFailure;
use serde_json::Value;

use super::analyzer::{GradingAnalyzer, parse_analysis};
use crate::repository::grading::GradingRepository;
use crate::repository::workflow::WorkflowRepository;
use crate::workflow::context::{StepContext, StepError};
use crate::workflow::definition::{RunFailure, Workflow};

pub struct AnalyzeSubmissionWorkflow<G: GradingRepository, A: GradingAnalyzer> {
    repo: Arc<G>,
    analyzer: Arc<A>,
}

impl<G: GradingRepository, A: GradingAnalyzer> AnalyzeSubmissionWorkflow<G, A> {
    pub fn new(repo: Arc<G>, analyzer: Arc<A>) -> Self {
        Self { repo, analyzer }
    }
}

fn decode(event: &Event) -> Result<AnalyzeSubmission, StepError> {
    event.decode().map_err(|e| StepError::Codec {
        step: "decode-payload".to_string(),
        reason: e.to_string(),
    })
}

impl<G, A> Workflow for AnalyzeSubmissionWorkflow<G, A>
where
    G: GradingRepository + 'static,
    A: GradingAnalyzer + 'static,
{
    fn name(&self) -> &'static str {
        "analyze-submission"
    }

    fn trigger(&self) -> &'static str {
        names::ANALYZE_SUBMISSION
    }

    async fn run<R: WorkflowRepository + 'static>(
        &self,
        ctx: &StepContext<R>,
        event: &Event,
    ) -> Result<Value, StepError> {
        let payload = decode(event)?;
        let repo = &self.repo;

        ctx.run("mark-processing", || async {
            let submission = repo
                .get_submission(&payload.submission_id)
                .await?
                .ok_or_else(|| {
                    StepFailure::fatal(
                        format!("submission {} not found", payload.submission_id),
                        ErrorCategory::ValidationError,
                    )
                })?;
            // `analyzing` belongs to an overlapping run, never a pre-analysis state.
            if submission.status != SubmissionStatus::Analyzing {
                repo.capture_previous_status(&payload.job_id, submission.status)
                    .await?;
            }
            repo.update_job_status(&payload.job_id, GradingJobStatus::Processing, None, None)
                .await?;
            repo.set_submission_status(&payload.submission_id, SubmissionStatus::Analyzing)
                .await?;
            Ok(())
        })
        .await?;

        let request: AnalysisRequest = ctx
            .run("load-submission", || async {
                let submission = repo
                    .get_submission(&payload.submission_id)
                    .await?
                    .ok_or_else(|| {
                        StepFailure::fatal(
                            format!("submission {} not found", payload.submission_id),
                            ErrorCategory::ValidationError,
                        )
                    })?;
                if submission.content.trim().is_empty() {
                    return Err(StepFailure::fatal(
                        "validation failed: submission content is empty",
                        ErrorCategory::ValidationError,
                    ));
                }
                Ok(AnalysisRequest {
                    submission_id: submission.id,
                    exercise_title: submission.exercise_title,
                    content: submission.content,
                })
            })
            .await?;

        let analysis: GradingAnalysis = ctx
            .run("analyze", || async {
                tracing::debug!(
                    submission_id = %request.submission_id,
                    analyzer = self.analyzer.name(),
                    "requesting analysis"
                );
                let raw = self.analyzer.analyze(&request).await?;
                parse_analysis(&raw)
            })
            .await?;

        ctx.run("save-results", || async {
            repo.save_analysis(&payload.submission_id, &payload.job_id, &analysis)
                .await?;
            repo.set_submission_status(&payload.submission_id, SubmissionStatus::Reviewed)
                .await?;
            repo.update_job_status(&payload.job_id, GradingJobStatus::Completed, None, None)
                .await?;
            Ok(())
        })
        .await?;

        tracing::info!(
            job_id = %payload.job_id,
            submission_id = %payload.submission_id,
            score = analysis.score,
            "submission analyzed"
        );

        Ok(serde_json::json!({
            "jobId": payload.job_id,
            "score": analysis.score,
        }))
    }

    async fn on_failure(&self, failure: &RunFailure) -> Result<(), StepFailure> {
        let payload: AnalyzeSubmission = failure
            .event
            .decode()
            .map_err(|e| StepFailure::fatal(e.to_string(), ErrorCategory::InvalidResponse))?;

        let Some(job) = self.repo.get_job(&payload.job_id).await? else {
            tracing::warn!(job_id = %payload.job_id, "grading job vanished before failure handling");
            return Ok(());
        };

        if job.status != GradingJobStatus::Failed {
            self.repo
                .update_job_status(
                    &job.id,
                    GradingJobStatus::Failed,
                    Some(&failure.message),
                    Some(failure.category),
                )
                .await?;
        }

        if let Some(submission) = self.repo.get_submission(&payload.submission_id).await? {
            if submission.status == SubmissionStatus::Analyzing {
                let restored = job
                    .previous_submission_status
                    .filter(|status| *status != SubmissionStatus::Analyzing)
                    .unwrap_or(SubmissionStatus::Submitted);
                self.repo
                    .set_submission_status(&submission.id, restored)
                    .await?;
            }
        }

        tracing::warn!(
            job_id = %job.id,
            submission_id = %payload.submission_id,
            category = %failure.category,
            attempts = failure.attempts,
            error = %failure.message,
            "grading failed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::bus::EventBus;
    use crate::grading::analyzer::AnalyzerError;
    use crate::grading::service::GradingService;
    use crate::store::{InMemoryDomainStore, InMemoryWorkflowRepository};
    use crate::workflow::engine::WorkflowEngine;
    use classdesk_types::config::EngineConfig;
    use classdesk_types::grading::Submission;
    use classdesk_types::workflow::RunStatus;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    /// Replays queued replies, then repeats `fallback`.
    struct ScriptedAnalyzer {
        replies: Mutex<VecDeque<Result<String, AnalyzerError>>>,
        fallback: Result<String, AnalyzerError>,
        calls: AtomicU32,
        delay: Duration,
    }

    impl ScriptedAnalyzer {
        fn always(reply: Result<String, AnalyzerError>) -> Self {
            Self {
                replies: Mutex::new(VecDeque::new()),
                fallback: reply,
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
            }
        }

        /// Hold every call for `delay` before replying.
        fn slowed(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn then(self, first: Result<String, AnalyzerError>) -> Self {
            self.replies.lock().unwrap().push_back(first);
            self
        }
    }

    impl GradingAnalyzer for ScriptedAnalyzer {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn analyze(&self, _request: &AnalysisRequest) -> Result<String, AnalyzerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self.replies.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.fallback.clone())
        }
    }

    const GOOD_REPLY: &str = r#"{"score": 88, "feedback": "Well argued", "strengths": ["structure"], "improvements": ["citations"]}"#;

    struct Setup {
        engine: WorkflowEngine<InMemoryWorkflowRepository>,
        domain: Arc<InMemoryDomainStore>,
        analyzer: Arc<ScriptedAnalyzer>,
        service: GradingService<InMemoryDomainStore, InMemoryWorkflowRepository>,
        submission_id: Uuid,
        center_id: Uuid,
    }

    fn setup(analyzer: ScriptedAnalyzer) -> Setup {
        let config = EngineConfig {
            retry_backoff_ms: 0,
            ..EngineConfig::default()
        };
        let engine = WorkflowEngine::new(Arc::new(InMemoryWorkflowRepository::new()), &config);
        let domain = Arc::new(InMemoryDomainStore::new());
        let analyzer = Arc::new(analyzer);
        engine
            .register(AnalyzeSubmissionWorkflow::new(
                Arc::clone(&domain),
                Arc::clone(&analyzer),
            ))
            .unwrap();

        let center_id = Uuid::now_v7();
        let submission_id = Uuid::now_v7();
        domain.insert_submission(Submission {
            id: submission_id,
            center_id,
            student_id: Uuid::now_v7(),
            exercise_title: "Essay on the water cycle".into(),
            content: "Water evaporates, condenses and precipitates.".into(),
            status: SubmissionStatus::Submitted,
        });

        let bus: Arc<EventBus<InMemoryWorkflowRepository>> = Arc::clone(engine.bus());
        let service = GradingService::new(Arc::clone(&domain), bus);
        Setup {
            engine,
            domain,
            analyzer,
            service,
            submission_id,
            center_id,
        }
    }

    #[tokio::test]
    async fn successful_analysis_completes_job() {
        let s = setup(ScriptedAnalyzer::always(Ok(GOOD_REPLY.to_string())));

        s.service
            .trigger_analysis(&s.submission_id, &s.center_id)
            .await
            .unwrap();
        s.engine.drain().await;

        let view = s.service.status(&s.submission_id).await.unwrap();
        assert_eq!(view.status, "completed");
        assert!(view.terminal);

        let submission = s.domain.get_submission(&s.submission_id).await.unwrap().unwrap();
        assert_eq!(submission.status, SubmissionStatus::Reviewed);
        let analysis = s.domain.get_analysis(&s.submission_id).await.unwrap().unwrap();
        assert_eq!(analysis.score, 88.0);
        assert_eq!(s.analyzer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_timeout_is_retried_without_failing_job() {
        let s = setup(
            ScriptedAnalyzer::always(Ok(GOOD_REPLY.to_string())).then(Err(AnalyzerError::Timeout)),
        );

        s.service
            .trigger_analysis(&s.submission_id, &s.center_id)
            .await
            .unwrap();
        s.engine.drain().await;

        let job = s.domain.get_job_by_submission(&s.submission_id).await.unwrap().unwrap();
        assert_eq!(job.status, GradingJobStatus::Completed);
        assert!(job.error.is_none());
        assert_eq!(s.analyzer.calls.load(Ordering::SeqCst), 2);

        let run = s.engine.latest_run(&s.submission_id.to_string()).await.unwrap().unwrap();
        assert_eq!(run.attempt, 2);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_job_and_revert_submission() {
        let s = setup(ScriptedAnalyzer::always(Err(AnalyzerError::Timeout)));

        s.service
            .trigger_analysis(&s.submission_id, &s.center_id)
            .await
            .unwrap();
        s.engine.drain().await;

        assert_eq!(s.analyzer.calls.load(Ordering::SeqCst), 3);

        let job = s.domain.get_job_by_submission(&s.submission_id).await.unwrap().unwrap();
        assert_eq!(job.status, GradingJobStatus::Failed);
        assert_eq!(job.error_category, Some(ErrorCategory::ApiTimeout));
        assert!(job.completed_at.is_some());

        let submission = s.domain.get_submission(&s.submission_id).await.unwrap().unwrap();
        assert_eq!(submission.status, SubmissionStatus::Submitted);

        let run = s.engine.latest_run(&s.submission_id.to_string()).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.attempt, 3);
    }

    #[tokio::test]
    async fn malformed_reply_fails_as_invalid_response() {
        let s = setup(ScriptedAnalyzer::always(Ok("Sorry, no grade today.".to_string())));

        s.service
            .trigger_analysis(&s.submission_id, &s.center_id)
            .await
            .unwrap();
        s.engine.drain().await;

        let view = s.service.status(&s.submission_id).await.unwrap();
        assert_eq!(view.status, "failed");
        assert_eq!(view.error_category, Some(ErrorCategory::InvalidResponse));
    }

    #[tokio::test]
    async fn retrigger_reuses_the_single_job_row() {
        let s = setup(ScriptedAnalyzer::always(Err(AnalyzerError::Timeout)));

        s.service
            .trigger_analysis(&s.submission_id, &s.center_id)
            .await
            .unwrap();
        s.engine.drain().await;
        let first = s.domain.get_job_by_submission(&s.submission_id).await.unwrap().unwrap();
        assert_eq!(first.status, GradingJobStatus::Failed);

        let second = s
            .service
            .trigger_analysis(&s.submission_id, &s.center_id)
            .await
            .unwrap();
        s.engine.drain().await;

        assert_eq!(second.id, first.id);
        assert_eq!(s.domain.job_count_for(&s.submission_id), 1);
        let runs = s
            .engine
            .repo()
            .list_runs_by_key(&s.submission_id.to_string(), 10)
            .await
            .unwrap();
        assert_eq!(runs.len(), 2);
    }

    async fn wait_for_status(s: &Setup, status: SubmissionStatus) {
        for _ in 0..200 {
            let current = s.domain.get_submission(&s.submission_id).await.unwrap().unwrap();
            if current.status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("submission never reached {status:?}");
    }

    #[tokio::test]
    async fn retrigger_during_failing_run_still_reverts_submission() {
        let s = setup(
            ScriptedAnalyzer::always(Err(AnalyzerError::Timeout))
                .slowed(Duration::from_millis(50)),
        );

        let first = s
            .service
            .trigger_analysis(&s.submission_id, &s.center_id)
            .await
            .unwrap();
        wait_for_status(&s, SubmissionStatus::Analyzing).await;

        let second = s
            .service
            .trigger_analysis(&s.submission_id, &s.center_id)
            .await
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.previous_submission_status, Some(SubmissionStatus::Submitted));
        s.engine.drain().await;

        assert_eq!(s.domain.job_count_for(&s.submission_id), 1);
        let job = s.domain.get_job_by_submission(&s.submission_id).await.unwrap().unwrap();
        assert_eq!(job.status, GradingJobStatus::Failed);
        assert_eq!(job.previous_submission_status, Some(SubmissionStatus::Submitted));

        let submission = s.domain.get_submission(&s.submission_id).await.unwrap().unwrap();
        assert_eq!(submission.status, SubmissionStatus::Submitted);
    }

    #[tokio::test]
    async fn double_trigger_before_completion_keeps_one_job() {
        let s = setup(
            ScriptedAnalyzer::always(Ok(GOOD_REPLY.to_string())).slowed(Duration::from_millis(20)),
        );

        let (a, b) = tokio::join!(
            s.service.trigger_analysis(&s.submission_id, &s.center_id),
            s.service.trigger_analysis(&s.submission_id, &s.center_id),
        );
        assert_eq!(a.unwrap().id, b.unwrap().id);
        s.engine.drain().await;

        assert_eq!(s.domain.job_count_for(&s.submission_id), 1);
        let job = s.domain.get_job_by_submission(&s.submission_id).await.unwrap().unwrap();
        assert_eq!(job.status, GradingJobStatus::Completed);
        let submission = s.domain.get_submission(&s.submission_id).await.unwrap().unwrap();
        assert_eq!(submission.status, SubmissionStatus::Reviewed);
        assert_eq!(s.analyzer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn double_trigger_that_fails_reverts_submission() {
        let s = setup(
            ScriptedAnalyzer::always(Err(AnalyzerError::Timeout))
                .slowed(Duration::from_millis(20)),
        );
        s.domain
            .set_submission_status(&s.submission_id, SubmissionStatus::Graded)
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            s.service.trigger_analysis(&s.submission_id, &s.center_id),
            s.service.trigger_analysis(&s.submission_id, &s.center_id),
        );
        assert_eq!(a.unwrap().id, b.unwrap().id);
        s.engine.drain().await;

        assert_eq!(s.domain.job_count_for(&s.submission_id), 1);
        let job = s.domain.get_job_by_submission(&s.submission_id).await.unwrap().unwrap();
        assert_eq!(job.status, GradingJobStatus::Failed);
        let submission = s.domain.get_submission(&s.submission_id).await.unwrap().unwrap();
        assert_eq!(submission.status, SubmissionStatus::Graded);
    }

    #[tokio::test]
    async fn missing_submission_fails_without_retrying() {
        let s = setup(ScriptedAnalyzer::always(Ok(GOOD_REPLY.to_string())));
        let job = s
            .domain
            .upsert_job_for_submission(&Uuid::now_v7(), &s.center_id)
            .await
            .unwrap();

        s.engine
            .publish_payload(&AnalyzeSubmission {
                job_id: job.id,
                submission_id: job.submission_id,
                center_id: s.center_id,
            })
            .await
            .unwrap();
        s.engine.drain().await;

        let job = s.domain.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, GradingJobStatus::Failed);
        assert_eq!(job.error_category, Some(ErrorCategory::ValidationError));
        assert_eq!(s.analyzer.calls.load(Ordering::SeqCst), 0);
        let run = s.engine.latest_run(&job.submission_id.to_string()).await.unwrap().unwrap();
        assert_eq!(run.attempt, 1);
    }
}
