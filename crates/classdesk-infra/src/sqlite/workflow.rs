//! SQLite workflow repository implementation.
//!
//! Implements `WorkflowRepository` from `classdesk-core` using sqlx with split
//! read/write pools. Runs, memoized step outcomes, cancellation tokens and
//! the durable event log all live in the same database, so a worker in
//! another process resumes exactly where this one stopped.

use chrono::Utc;
use classdesk_core::repository::workflow::WorkflowRepository;
use classdesk_types::error::RepositoryError;
use classdesk_types::event::Event;
use classdesk_types::workflow::{RunStatus, StepOutcome, StepRecord, WorkflowRun};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_enum, parse_uuid, query_error};

/// SQLite-backed implementation of `WorkflowRepository`.
pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    async fn run_exists(&self, run_id: &Uuid) -> Result<bool, RepositoryError> {
        let row = sqlx::query("SELECT 1 FROM workflow_runs WHERE id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;
        Ok(row.is_some())
    }

    async fn fetch_runs(
        &self,
        sql: &str,
        bind: Option<&str>,
        limit: i64,
    ) -> Result<Vec<WorkflowRun>, RepositoryError> {
        let mut query = sqlx::query(sql);
        if let Some(value) = bind {
            query = query.bind(value.to_string());
        }
        let rows = query
            .bind(limit)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in &rows {
            runs.push(RunRow::from_row(row).map_err(query_error)?.into_run()?);
        }
        Ok(runs)
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct RunRow {
    id: String,
    workflow_name: String,
    event_id: String,
    event_name: String,
    correlation_key: String,
    payload: String,
    status: String,
    attempt: i64,
    error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RunRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_name: row.try_get("workflow_name")?,
            event_id: row.try_get("event_id")?,
            event_name: row.try_get("event_name")?,
            correlation_key: row.try_get("correlation_key")?,
            payload: row.try_get("payload")?,
            status: row.try_get("status")?,
            attempt: row.try_get("attempt")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_run(self) -> Result<WorkflowRun, RepositoryError> {
        let payload = serde_json::from_str(&self.payload)
            .map_err(|e| RepositoryError::Query(format!("invalid run payload: {e}")))?;

        Ok(WorkflowRun {
            id: parse_uuid(&self.id)?,
            workflow_name: self.workflow_name,
            event_id: parse_uuid(&self.event_id)?,
            event_name: self.event_name,
            correlation_key: self.correlation_key,
            payload,
            status: parse_enum::<RunStatus>(&self.status)?,
            attempt: self.attempt as u32,
            error: self.error,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

struct StepRow {
    run_id: String,
    step_name: String,
    outcome: String,
    completed_at: String,
}

impl StepRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            run_id: row.try_get("run_id")?,
            step_name: row.try_get("step_name")?,
            outcome: row.try_get("outcome")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_record(self) -> Result<StepRecord, RepositoryError> {
        let outcome: StepOutcome = serde_json::from_str(&self.outcome)
            .map_err(|e| RepositoryError::Query(format!("invalid step outcome: {e}")))?;

        Ok(StepRecord {
            run_id: parse_uuid(&self.run_id)?,
            step_name: self.step_name,
            outcome,
            completed_at: parse_datetime(&self.completed_at)?,
        })
    }
}

struct EventRow {
    id: String,
    name: String,
    correlation_key: String,
    payload: String,
    received_at: String,
}

impl EventRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            correlation_key: row.try_get("correlation_key")?,
            payload: row.try_get("payload")?,
            received_at: row.try_get("received_at")?,
        })
    }

    fn into_event(self) -> Result<Event, RepositoryError> {
        let payload = serde_json::from_str(&self.payload)
            .map_err(|e| RepositoryError::Query(format!("invalid event payload: {e}")))?;

        Ok(Event {
            id: parse_uuid(&self.id)?,
            name: self.name,
            correlation_key: self.correlation_key,
            payload,
            received_at: parse_datetime(&self.received_at)?,
        })
    }
}

const RUN_COLUMNS: &str = "id, workflow_name, event_id, event_name, correlation_key, payload, \
                           status, attempt, error, created_at, updated_at";

// ---------------------------------------------------------------------------
// WorkflowRepository impl
// ---------------------------------------------------------------------------

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn create_run(&self, run: &WorkflowRun) -> Result<(), RepositoryError> {
        let payload = serde_json::to_string(&run.payload)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO workflow_runs
               (id, workflow_name, event_id, event_name, correlation_key, payload,
                status, attempt, error, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(run.id.to_string())
        .bind(&run.workflow_name)
        .bind(run.event_id.to_string())
        .bind(&run.event_name)
        .bind(&run.correlation_key)
        .bind(&payload)
        .bind(run.status.as_str())
        .bind(run.attempt as i64)
        .bind(&run.error)
        .bind(format_datetime(&run.created_at))
        .bind(format_datetime(&run.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db) if db.is_unique_violation() => {
                RepositoryError::Conflict(format!("run for event {} exists", run.event_id))
            }
            _ => query_error(e),
        })?;

        Ok(())
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<WorkflowRun>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {RUN_COLUMNS} FROM workflow_runs WHERE id = ?"))
            .bind(run_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        row.map(|r| RunRow::from_row(&r).map_err(query_error)?.into_run())
            .transpose()
    }

    async fn find_run_by_event(
        &self,
        event_id: &Uuid,
        workflow_name: &str,
    ) -> Result<Option<WorkflowRun>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM workflow_runs WHERE event_id = ? AND workflow_name = ?"
        ))
        .bind(event_id.to_string())
        .bind(workflow_name)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        row.map(|r| RunRow::from_row(&r).map_err(query_error)?.into_run())
            .transpose()
    }

    async fn finish_run(
        &self,
        run_id: &Uuid,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE workflow_runs SET status = ?, error = ?, updated_at = ? WHERE id = ? AND status = 'running'",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(format_datetime(&Utc::now()))
        .bind(run_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        if self.run_exists(run_id).await? {
            Ok(false)
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    async fn set_attempt(&self, run_id: &Uuid, attempt: u32) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE workflow_runs SET attempt = ?, updated_at = ? WHERE id = ?")
            .bind(attempt as i64)
            .bind(format_datetime(&Utc::now()))
            .bind(run_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_runs_by_key(
        &self,
        correlation_key: &str,
        limit: u32,
    ) -> Result<Vec<WorkflowRun>, RepositoryError> {
        // UUIDv7 text sorts by creation time.
        self.fetch_runs(
            &format!(
                "SELECT {RUN_COLUMNS} FROM workflow_runs WHERE correlation_key = ? ORDER BY id DESC LIMIT ?"
            ),
            Some(correlation_key),
            limit as i64,
        )
        .await
    }

    async fn list_recent_runs(&self, limit: u32) -> Result<Vec<WorkflowRun>, RepositoryError> {
        self.fetch_runs(
            &format!("SELECT {RUN_COLUMNS} FROM workflow_runs ORDER BY id DESC LIMIT ?"),
            None,
            limit as i64,
        )
        .await
    }

    async fn list_running_runs(&self) -> Result<Vec<WorkflowRun>, RepositoryError> {
        self.fetch_runs(
            &format!(
                "SELECT {RUN_COLUMNS} FROM workflow_runs WHERE status = 'running' ORDER BY id ASC LIMIT ?"
            ),
            None,
            -1,
        )
        .await
    }

    async fn get_step(
        &self,
        run_id: &Uuid,
        step_name: &str,
    ) -> Result<Option<StepRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT run_id, step_name, outcome, completed_at FROM workflow_steps WHERE run_id = ? AND step_name = ?",
        )
        .bind(run_id.to_string())
        .bind(step_name)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        row.map(|r| StepRow::from_row(&r).map_err(query_error)?.into_record())
            .transpose()
    }

    async fn save_step(&self, record: &StepRecord) -> Result<bool, RepositoryError> {
        let outcome = serde_json::to_string(&record.outcome)
            .map_err(|e| RepositoryError::Query(format!("serialize step outcome: {e}")))?;

        // First write wins; step records are never overwritten.
        let result = sqlx::query(
            r#"INSERT INTO workflow_steps (run_id, step_name, outcome, completed_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT (run_id, step_name) DO NOTHING"#,
        )
        .bind(record.run_id.to_string())
        .bind(&record.step_name)
        .bind(&outcome)
        .bind(format_datetime(&record.completed_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_steps(&self, run_id: &Uuid) -> Result<Vec<StepRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT run_id, step_name, outcome, completed_at FROM workflow_steps WHERE run_id = ? ORDER BY seq ASC",
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let mut steps = Vec::with_capacity(rows.len());
        for row in &rows {
            steps.push(StepRow::from_row(row).map_err(query_error)?.into_record()?);
        }
        Ok(steps)
    }

    async fn swap_token(&self, scope: &str, run_id: &Uuid) -> Result<Option<Uuid>, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        let previous: Option<String> =
            sqlx::query_scalar("SELECT run_id FROM cancellation_tokens WHERE scope = ?")
                .bind(scope)
                .fetch_optional(&mut *tx)
                .await
                .map_err(query_error)?;

        sqlx::query(
            r#"INSERT INTO cancellation_tokens (scope, run_id, updated_at)
               VALUES (?, ?, ?)
               ON CONFLICT (scope) DO UPDATE SET run_id = excluded.run_id, updated_at = excluded.updated_at"#,
        )
        .bind(scope)
        .bind(run_id.to_string())
        .bind(format_datetime(&Utc::now()))
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        tx.commit().await.map_err(query_error)?;

        previous.as_deref().map(parse_uuid).transpose()
    }

    async fn get_token(&self, scope: &str) -> Result<Option<Uuid>, RepositoryError> {
        let token: Option<String> =
            sqlx::query_scalar("SELECT run_id FROM cancellation_tokens WHERE scope = ?")
                .bind(scope)
                .fetch_optional(&self.pool.reader)
                .await
                .map_err(query_error)?;

        token.as_deref().map(parse_uuid).transpose()
    }

    async fn record_event(&self, event: &Event) -> Result<bool, RepositoryError> {
        let payload = serde_json::to_string(&event.payload)
            .map_err(|e| RepositoryError::Query(format!("serialize event payload: {e}")))?;

        let result = sqlx::query(
            r#"INSERT INTO workflow_events (id, name, correlation_key, payload, received_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT (id) DO NOTHING"#,
        )
        .bind(event.id.to_string())
        .bind(&event.name)
        .bind(&event.correlation_key)
        .bind(&payload)
        .bind(format_datetime(&event.received_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_event(&self, event_id: &Uuid) -> Result<Option<Event>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, correlation_key, payload, received_at FROM workflow_events WHERE id = ?",
        )
        .bind(event_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        row.map(|r| EventRow::from_row(&r).map_err(query_error)?.into_event())
            .transpose()
    }

    async fn mark_event_processed(&self, event_id: &Uuid) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE workflow_events SET processed_at = COALESCE(processed_at, ?) WHERE id = ?",
        )
        .bind(format_datetime(&Utc::now()))
        .bind(event_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_pending_events(&self) -> Result<Vec<Event>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, correlation_key, payload, received_at FROM workflow_events WHERE processed_at IS NULL ORDER BY seq ASC",
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let mut events = Vec::with_capacity(rows.len());
        for row in &rows {
            events.push(EventRow::from_row(row).map_err(query_error)?.into_event()?);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use classdesk_types::error::ErrorCategory;
    use classdesk_types::workflow::StepFailure;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        DatabasePool::new(&url).await.unwrap()
    }

    fn run(key: &str) -> WorkflowRun {
        WorkflowRun::new(
            Uuid::now_v7(),
            "process-import",
            Uuid::now_v7(),
            "csv-import/process-batch",
            key,
            serde_json::json!({"importLogId": key}),
        )
    }

    #[tokio::test]
    async fn create_and_get_run() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let r = run("imp-1");
        repo.create_run(&r).await.unwrap();

        let loaded = repo.get_run(&r.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Running);
        assert_eq!(loaded.attempt, 1);
        assert_eq!(loaded.payload["importLogId"], "imp-1");

        let by_event = repo
            .find_run_by_event(&r.event_id, "process-import")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_event.id, r.id);
        assert!(repo
            .find_run_by_event(&r.event_id, "other")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn one_run_per_event_and_workflow() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let r = run("imp-1");
        repo.create_run(&r).await.unwrap();

        let mut duplicate = r.clone();
        duplicate.id = Uuid::now_v7();
        let err = repo.create_run(&duplicate).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn terminal_runs_are_immutable() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let r = run("imp-1");
        repo.create_run(&r).await.unwrap();
        repo.set_attempt(&r.id, 3).await.unwrap();

        assert!(repo
            .finish_run(&r.id, RunStatus::Failed, Some("all rows failed"))
            .await
            .unwrap());
        assert!(!repo.finish_run(&r.id, RunStatus::Completed, None).await.unwrap());

        let loaded = repo.get_run(&r.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Failed);
        assert_eq!(loaded.attempt, 3);
        assert_eq!(loaded.error.as_deref(), Some("all rows failed"));

        let missing = repo.finish_run(&Uuid::now_v7(), RunStatus::Completed, None).await;
        assert!(matches!(missing, Err(RepositoryError::NotFound)));
    }

    #[tokio::test]
    async fn runs_listed_newest_first_and_running_oldest_first() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let older = run("s1");
        let newer = run("s1");
        let other = run("s2");
        for r in [&older, &newer, &other] {
            repo.create_run(r).await.unwrap();
        }
        repo.finish_run(&other.id, RunStatus::Completed, None).await.unwrap();

        let by_key = repo.list_runs_by_key("s1", 10).await.unwrap();
        assert_eq!(by_key.len(), 2);
        assert_eq!(by_key[0].id, newer.id);

        assert_eq!(repo.list_recent_runs(1).await.unwrap()[0].id, other.id);

        let running: Vec<Uuid> = repo
            .list_running_runs()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(running, vec![older.id, newer.id]);
    }

    #[tokio::test]
    async fn step_records_are_write_once() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let run_id = Uuid::now_v7();

        let first = StepRecord::success(run_id, "load-rows", serde_json::json!([1, 2, 3]));
        let second = StepRecord::success(run_id, "load-rows", serde_json::json!([]));
        assert!(repo.save_step(&first).await.unwrap());
        assert!(!repo.save_step(&second).await.unwrap());

        let failure = StepFailure::fatal("import missing", ErrorCategory::ValidationError);
        repo.save_step(&StepRecord::failure(run_id, "mark-processing", &failure))
            .await
            .unwrap();

        let stored = repo.get_step(&run_id, "load-rows").await.unwrap().unwrap();
        assert_eq!(
            stored.outcome,
            StepOutcome::Success {
                value: serde_json::json!([1, 2, 3])
            }
        );

        let names: Vec<String> = repo
            .list_steps(&run_id)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.step_name)
            .collect();
        assert_eq!(names, vec!["load-rows", "mark-processing"]);
    }

    #[tokio::test]
    async fn swap_token_returns_previous_holder() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();

        assert_eq!(repo.swap_token("notify:s1", &a).await.unwrap(), None);
        assert_eq!(repo.swap_token("notify:s1", &b).await.unwrap(), Some(a));
        assert_eq!(repo.get_token("notify:s1").await.unwrap(), Some(b));
        assert_eq!(repo.get_token("notify:s2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn event_log_tracks_pending_events() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let first = Event::new("a", serde_json::json!({"n": 1}), "k1");
        let second = Event::new("b", serde_json::json!({"n": 2}), "k2");

        assert!(repo.record_event(&first).await.unwrap());
        assert!(!repo.record_event(&first).await.unwrap());
        repo.record_event(&second).await.unwrap();

        let pending = repo.list_pending_events().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, first.id);

        repo.mark_event_processed(&first.id).await.unwrap();
        // Marking twice is harmless.
        repo.mark_event_processed(&first.id).await.unwrap();

        let pending = repo.list_pending_events().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second.id);
        assert_eq!(pending[0].payload["n"], 2);

        let loaded = repo.get_event(&first.id).await.unwrap().unwrap();
        assert_eq!(loaded.correlation_key, "k1");
    }
}
