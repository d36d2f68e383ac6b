//! SQLite grading repository implementation.
//!
//! Grading jobs are keyed one-per-submission: re-triggering an analysis
//! resets the existing row instead of inserting a second one.

use chrono::Utc;
use classdesk_core::repository::grading::GradingRepository;
use classdesk_types::error::{ErrorCategory, RepositoryError};
use classdesk_types::grading::{
    GradingAnalysis, GradingJob, GradingJobStatus, Submission, SubmissionStatus,
};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_enum, parse_uuid, query_error};

/// SQLite-backed implementation of `GradingRepository`.
pub struct SqliteGradingRepository {
    pool: DatabasePool,
}

impl SqliteGradingRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a submission row.
    pub async fn save_submission(&self, submission: &Submission) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO submissions (id, center_id, student_id, exercise_title, content, status)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT (id) DO UPDATE SET
                 exercise_title = excluded.exercise_title,
                 content = excluded.content,
                 status = excluded.status"#,
        )
        .bind(submission.id.to_string())
        .bind(submission.center_id.to_string())
        .bind(submission.student_id.to_string())
        .bind(&submission.exercise_title)
        .bind(&submission.content)
        .bind(submission.status.as_str())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn fetch_job(&self, column: &str, id: &Uuid) -> Result<Option<GradingJob>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT * FROM grading_jobs WHERE {column} = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        row.map(|r| JobRow::from_row(&r).map_err(query_error)?.into_job())
            .transpose()
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct JobRow {
    id: String,
    submission_id: String,
    center_id: String,
    status: String,
    error: Option<String>,
    error_category: Option<String>,
    previous_submission_status: Option<String>,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            submission_id: row.try_get("submission_id")?,
            center_id: row.try_get("center_id")?,
            status: row.try_get("status")?,
            error: row.try_get("error")?,
            error_category: row.try_get("error_category")?,
            previous_submission_status: row.try_get("previous_submission_status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_job(self) -> Result<GradingJob, RepositoryError> {
        Ok(GradingJob {
            id: parse_uuid(&self.id)?,
            submission_id: parse_uuid(&self.submission_id)?,
            center_id: parse_uuid(&self.center_id)?,
            status: parse_enum::<GradingJobStatus>(&self.status)?,
            error: self.error,
            error_category: self
                .error_category
                .as_deref()
                .map(parse_enum::<ErrorCategory>)
                .transpose()?,
            previous_submission_status: self
                .previous_submission_status
                .as_deref()
                .map(parse_enum::<SubmissionStatus>)
                .transpose()?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

fn submission_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Submission, RepositoryError> {
    let get = |column: &str| -> Result<String, RepositoryError> {
        row.try_get::<String, _>(column).map_err(query_error)
    };
    Ok(Submission {
        id: parse_uuid(&get("id")?)?,
        center_id: parse_uuid(&get("center_id")?)?,
        student_id: parse_uuid(&get("student_id")?)?,
        exercise_title: get("exercise_title")?,
        content: get("content")?,
        status: parse_enum::<SubmissionStatus>(&get("status")?)?,
    })
}

fn string_list(raw: &str) -> Result<Vec<String>, RepositoryError> {
    serde_json::from_str(raw).map_err(|e| RepositoryError::Query(format!("invalid list column: {e}")))
}

// ---------------------------------------------------------------------------
// GradingRepository impl
// ---------------------------------------------------------------------------

impl GradingRepository for SqliteGradingRepository {
    async fn upsert_job_for_submission(
        &self,
        submission_id: &Uuid,
        center_id: &Uuid,
    ) -> Result<GradingJob, RepositoryError> {
        let fresh = GradingJob::new(*submission_id, *center_id);
        let now = format_datetime(&fresh.created_at);

        sqlx::query(
            r#"INSERT INTO grading_jobs (id, submission_id, center_id, status, created_at, updated_at)
               VALUES (?, ?, ?, 'pending', ?, ?)
               ON CONFLICT (submission_id) DO UPDATE SET
                 status = 'pending',
                 error = NULL,
                 error_category = NULL,
                 previous_submission_status = CASE
                   WHEN grading_jobs.status IN ('completed', 'failed') THEN NULL
                   ELSE grading_jobs.previous_submission_status
                 END,
                 completed_at = NULL,
                 updated_at = excluded.updated_at"#,
        )
        .bind(fresh.id.to_string())
        .bind(submission_id.to_string())
        .bind(center_id.to_string())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        self.fetch_job("submission_id", submission_id)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    async fn get_job(&self, job_id: &Uuid) -> Result<Option<GradingJob>, RepositoryError> {
        self.fetch_job("id", job_id).await
    }

    async fn get_job_by_submission(
        &self,
        submission_id: &Uuid,
    ) -> Result<Option<GradingJob>, RepositoryError> {
        self.fetch_job("submission_id", submission_id).await
    }

    async fn update_job_status(
        &self,
        job_id: &Uuid,
        status: GradingJobStatus,
        error: Option<&str>,
        category: Option<ErrorCategory>,
    ) -> Result<(), RepositoryError> {
        let now = format_datetime(&Utc::now());
        let completed_at = status.is_terminal().then(|| now.clone());

        let result = sqlx::query(
            r#"UPDATE grading_jobs
               SET status = ?, error = ?, error_category = ?, updated_at = ?, completed_at = ?
               WHERE id = ?"#,
        )
        .bind(status.as_str())
        .bind(error)
        .bind(category.map(|c| c.as_str()))
        .bind(&now)
        .bind(completed_at)
        .bind(job_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn capture_previous_status(
        &self,
        job_id: &Uuid,
        status: SubmissionStatus,
    ) -> Result<(), RepositoryError> {
        // Only the first capture of a job cycle sticks.
        let result = sqlx::query(
            "UPDATE grading_jobs SET previous_submission_status = COALESCE(previous_submission_status, ?) WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(job_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn get_submission(
        &self,
        submission_id: &Uuid,
    ) -> Result<Option<Submission>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, center_id, student_id, exercise_title, content, status FROM submissions WHERE id = ?",
        )
        .bind(submission_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        row.as_ref().map(submission_from_row).transpose()
    }

    async fn set_submission_status(
        &self,
        submission_id: &Uuid,
        status: SubmissionStatus,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE submissions SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(submission_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn save_analysis(
        &self,
        submission_id: &Uuid,
        job_id: &Uuid,
        analysis: &GradingAnalysis,
    ) -> Result<(), RepositoryError> {
        let strengths = serde_json::to_string(&analysis.strengths)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let improvements = serde_json::to_string(&analysis.improvements)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO grading_analyses
               (submission_id, job_id, score, feedback, strengths, improvements, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (submission_id) DO UPDATE SET
                 job_id = excluded.job_id,
                 score = excluded.score,
                 feedback = excluded.feedback,
                 strengths = excluded.strengths,
                 improvements = excluded.improvements,
                 created_at = excluded.created_at"#,
        )
        .bind(submission_id.to_string())
        .bind(job_id.to_string())
        .bind(analysis.score)
        .bind(&analysis.feedback)
        .bind(&strengths)
        .bind(&improvements)
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn get_analysis(
        &self,
        submission_id: &Uuid,
    ) -> Result<Option<GradingAnalysis>, RepositoryError> {
        let row = sqlx::query(
            "SELECT score, feedback, strengths, improvements FROM grading_analyses WHERE submission_id = ?",
        )
        .bind(submission_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let strengths: String = row.try_get("strengths").map_err(query_error)?;
        let improvements: String = row.try_get("improvements").map_err(query_error)?;

        Ok(Some(GradingAnalysis {
            score: row.try_get("score").map_err(query_error)?,
            feedback: row.try_get("feedback").map_err(query_error)?,
            strengths: string_list(&strengths)?,
            improvements: string_list(&improvements)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        DatabasePool::new(&url).await.unwrap()
    }

    async fn test_repo() -> SqliteGradingRepository {
        SqliteGradingRepository::new(test_pool().await)
    }

    async fn seeded(repo: &SqliteGradingRepository) -> Submission {
        let submission = Submission {
            id: Uuid::now_v7(),
            center_id: Uuid::now_v7(),
            student_id: Uuid::now_v7(),
            exercise_title: "Essay on photosynthesis".into(),
            content: "Plants convert light into chemical energy.".into(),
            status: SubmissionStatus::Submitted,
        };
        repo.save_submission(&submission).await.unwrap();
        submission
    }

    #[tokio::test]
    async fn retrigger_resets_the_single_job_row() {
        let repo = test_repo().await;
        let submission = seeded(&repo).await;

        let first = repo
            .upsert_job_for_submission(&submission.id, &submission.center_id)
            .await
            .unwrap();
        repo.capture_previous_status(&first.id, SubmissionStatus::Submitted)
            .await
            .unwrap();
        repo.update_job_status(
            &first.id,
            GradingJobStatus::Failed,
            Some("HTTP 429"),
            Some(ErrorCategory::RateLimit),
        )
        .await
        .unwrap();

        let failed = repo.get_job(&first.id).await.unwrap().unwrap();
        assert_eq!(failed.error_category, Some(ErrorCategory::RateLimit));
        assert!(failed.completed_at.is_some());

        let second = repo
            .upsert_job_for_submission(&submission.id, &submission.center_id)
            .await
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.status, GradingJobStatus::Pending);
        assert!(second.error.is_none());
        assert!(second.error_category.is_none());
        assert!(second.previous_submission_status.is_none());
        assert!(second.completed_at.is_none());
    }

    #[tokio::test]
    async fn previous_status_is_captured_once() {
        let repo = test_repo().await;
        let submission = seeded(&repo).await;
        let job = repo
            .upsert_job_for_submission(&submission.id, &submission.center_id)
            .await
            .unwrap();

        repo.capture_previous_status(&job.id, SubmissionStatus::Reviewed)
            .await
            .unwrap();
        repo.capture_previous_status(&job.id, SubmissionStatus::Analyzing)
            .await
            .unwrap();

        let job = repo.get_job_by_submission(&submission.id).await.unwrap().unwrap();
        assert_eq!(job.previous_submission_status, Some(SubmissionStatus::Reviewed));
    }

    #[tokio::test]
    async fn submission_status_and_analysis_roundtrip() {
        let repo = test_repo().await;
        let submission = seeded(&repo).await;
        let job = repo
            .upsert_job_for_submission(&submission.id, &submission.center_id)
            .await
            .unwrap();

        repo.set_submission_status(&submission.id, SubmissionStatus::Analyzing)
            .await
            .unwrap();
        assert_eq!(
            repo.get_submission(&submission.id).await.unwrap().unwrap().status,
            SubmissionStatus::Analyzing
        );

        let analysis = GradingAnalysis {
            score: 84.5,
            feedback: "Accurate and well structured".into(),
            strengths: vec!["clear thesis".into()],
            improvements: vec!["cite sources".into(), "expand conclusion".into()],
        };
        repo.save_analysis(&submission.id, &job.id, &analysis).await.unwrap();
        assert_eq!(repo.get_analysis(&submission.id).await.unwrap(), Some(analysis));

        let missing = repo
            .set_submission_status(&Uuid::now_v7(), SubmissionStatus::Reviewed)
            .await;
        assert!(matches!(missing, Err(RepositoryError::NotFound)));
    }

    #[tokio::test]
    async fn upsert_while_processing_keeps_captured_status() {
        let repo = test_repo().await;
        let submission = seeded(&repo).await;
        let job = repo
            .upsert_job_for_submission(&submission.id, &submission.center_id)
            .await
            .unwrap();
        repo.capture_previous_status(&job.id, SubmissionStatus::Submitted)
            .await
            .unwrap();
        repo.update_job_status(&job.id, GradingJobStatus::Processing, None, None)
            .await
            .unwrap();

        let again = repo
            .upsert_job_for_submission(&submission.id, &submission.center_id)
            .await
            .unwrap();
        assert_eq!(again.id, job.id);
        assert_eq!(again.status, GradingJobStatus::Pending);
        assert_eq!(again.previous_submission_status, Some(SubmissionStatus::Submitted));
    }

    mod concurrent {
        use super::*;
        use crate::sqlite::workflow::SqliteWorkflowRepository;
        use classdesk_core::grading::{
            AnalyzeSubmissionWorkflow, AnalyzerError, GradingAnalyzer, GradingService,
        };
        use classdesk_core::workflow::engine::WorkflowEngine;
        use classdesk_types::config::EngineConfig;
        use classdesk_types::grading::AnalysisRequest;
        use std::sync::Arc;
        use std::time::Duration;

        struct SlowTimeout;

        impl GradingAnalyzer for SlowTimeout {
            fn name(&self) -> &str {
                "slow-timeout"
            }

            async fn analyze(&self, _request: &AnalysisRequest) -> Result<String, AnalyzerError> {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Err(AnalyzerError::Timeout)
            }
        }

        #[tokio::test]
        async fn double_trigger_shares_one_job_and_reverts_submission() {
            let pool = test_pool().await;
            let grading = Arc::new(SqliteGradingRepository::new(pool.clone()));
            let runs = Arc::new(SqliteWorkflowRepository::new(pool.clone()));
            let config = EngineConfig {
                retry_backoff_ms: 0,
                ..EngineConfig::default()
            };
            let engine = WorkflowEngine::new(runs, &config);
            engine
                .register(AnalyzeSubmissionWorkflow::new(
                    Arc::clone(&grading),
                    Arc::new(SlowTimeout),
                ))
                .unwrap();
            let service: GradingService<_, SqliteWorkflowRepository> =
                GradingService::new(Arc::clone(&grading), Arc::clone(engine.bus()));

            let submission = seeded(&grading).await;
            let (a, b) = tokio::join!(
                service.trigger_analysis(&submission.id, &submission.center_id),
                service.trigger_analysis(&submission.id, &submission.center_id),
            );
            assert_eq!(a.unwrap().id, b.unwrap().id);
            engine.drain().await;

            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM grading_jobs WHERE submission_id = ?")
                    .bind(submission.id.to_string())
                    .fetch_one(&pool.reader)
                    .await
                    .unwrap();
            assert_eq!(count, 1);

            let job = grading.get_job_by_submission(&submission.id).await.unwrap().unwrap();
            assert_eq!(job.status, GradingJobStatus::Failed);
            assert_eq!(job.error_category, Some(ErrorCategory::ApiTimeout));
            assert_eq!(job.previous_submission_status, Some(SubmissionStatus::Submitted));

            let stored = grading.get_submission(&submission.id).await.unwrap().unwrap();
            assert_eq!(stored.status, SubmissionStatus::Submitted);
        }
    }
}
