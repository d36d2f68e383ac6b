//! SQLite CSV import repository implementation.
//!
//! An import log and its staged rows are written in one transaction.
//! Counters on the log are always recomputed from the row statuses, never
//! incremented, so a re-processed batch cannot double count.

use chrono::Utc;
use classdesk_core::repository::import::ImportRepository;
use classdesk_types::error::{ErrorCategory, RepositoryError};
use classdesk_types::import::{CsvImportLog, CsvImportRowLog, ImportCounters, ImportStatus, RowStatus};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_enum, parse_uuid, query_error};

/// SQLite-backed implementation of `ImportRepository`.
pub struct SqliteImportRepository {
    pool: DatabasePool,
}

impl SqliteImportRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct LogRow {
    id: String,
    center_id: String,
    requested_by: String,
    file_name: String,
    status: String,
    total_rows: i64,
    valid_rows: i64,
    imported_count: i64,
    failed_count: i64,
    error: Option<String>,
    error_category: Option<String>,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl LogRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            center_id: row.try_get("center_id")?,
            requested_by: row.try_get("requested_by")?,
            file_name: row.try_get("file_name")?,
            status: row.try_get("status")?,
            total_rows: row.try_get("total_rows")?,
            valid_rows: row.try_get("valid_rows")?,
            imported_count: row.try_get("imported_count")?,
            failed_count: row.try_get("failed_count")?,
            error: row.try_get("error")?,
            error_category: row.try_get("error_category")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_log(self) -> Result<CsvImportLog, RepositoryError> {
        Ok(CsvImportLog {
            id: parse_uuid(&self.id)?,
            center_id: parse_uuid(&self.center_id)?,
            requested_by: parse_uuid(&self.requested_by)?,
            file_name: self.file_name,
            status: parse_enum::<ImportStatus>(&self.status)?,
            total_rows: self.total_rows as u32,
            valid_rows: self.valid_rows as u32,
            imported_count: self.imported_count as u32,
            failed_count: self.failed_count as u32,
            error: self.error,
            error_category: self
                .error_category
                .as_deref()
                .map(parse_enum::<ErrorCategory>)
                .transpose()?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

struct RowLogRow {
    id: String,
    import_log_id: String,
    row_number: i64,
    name: String,
    email: String,
    role: String,
    status: String,
    error: Option<String>,
    user_id: Option<String>,
    updated_at: String,
}

impl RowLogRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            import_log_id: row.try_get("import_log_id")?,
            row_number: row.try_get("row_number")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            role: row.try_get("role")?,
            status: row.try_get("status")?,
            error: row.try_get("error")?,
            user_id: row.try_get("user_id")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_row_log(self) -> Result<CsvImportRowLog, RepositoryError> {
        Ok(CsvImportRowLog {
            id: parse_uuid(&self.id)?,
            import_log_id: parse_uuid(&self.import_log_id)?,
            row_number: self.row_number as u32,
            name: self.name,
            email: self.email,
            role: self.role,
            status: parse_enum::<RowStatus>(&self.status)?,
            error: self.error,
            user_id: self.user_id.as_deref().map(parse_uuid).transpose()?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// ImportRepository impl
// ---------------------------------------------------------------------------

impl ImportRepository for SqliteImportRepository {
    async fn create_import(
        &self,
        log: &CsvImportLog,
        rows: &[CsvImportRowLog],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        sqlx::query(
            r#"INSERT INTO csv_import_logs
               (id, center_id, requested_by, file_name, status, total_rows, valid_rows,
                imported_count, failed_count, error, error_category, created_at, updated_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(log.id.to_string())
        .bind(log.center_id.to_string())
        .bind(log.requested_by.to_string())
        .bind(&log.file_name)
        .bind(log.status.as_str())
        .bind(log.total_rows as i64)
        .bind(log.valid_rows as i64)
        .bind(log.imported_count as i64)
        .bind(log.failed_count as i64)
        .bind(&log.error)
        .bind(log.error_category.map(|c| c.as_str()))
        .bind(format_datetime(&log.created_at))
        .bind(format_datetime(&log.updated_at))
        .bind(log.completed_at.as_ref().map(format_datetime))
        .execute(&mut *tx)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db) if db.is_unique_violation() => {
                RepositoryError::Conflict(format!("import {} exists", log.id))
            }
            _ => query_error(e),
        })?;

        for row in rows {
            sqlx::query(
                r#"INSERT INTO csv_import_rows
                   (id, import_log_id, row_number, name, email, role, status, error, user_id, updated_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(row.id.to_string())
            .bind(row.import_log_id.to_string())
            .bind(row.row_number as i64)
            .bind(&row.name)
            .bind(&row.email)
            .bind(&row.role)
            .bind(row.status.as_str())
            .bind(&row.error)
            .bind(row.user_id.map(|u| u.to_string()))
            .bind(format_datetime(&row.updated_at))
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;
        }

        tx.commit().await.map_err(query_error)?;
        Ok(())
    }

    async fn get_import(&self, import_id: &Uuid) -> Result<Option<CsvImportLog>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM csv_import_logs WHERE id = ?")
            .bind(import_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        row.map(|r| LogRow::from_row(&r).map_err(query_error)?.into_log())
            .transpose()
    }

    async fn update_import_status(
        &self,
        import_id: &Uuid,
        status: ImportStatus,
        error: Option<&str>,
        category: Option<ErrorCategory>,
    ) -> Result<(), RepositoryError> {
        let now = format_datetime(&Utc::now());
        let completed_at = status.is_terminal().then(|| now.clone());

        let result = sqlx::query(
            r#"UPDATE csv_import_logs
               SET status = ?, error = ?, error_category = ?, updated_at = ?, completed_at = ?
               WHERE id = ?"#,
        )
        .bind(status.as_str())
        .bind(error)
        .bind(category.map(|c| c.as_str()))
        .bind(&now)
        .bind(completed_at)
        .bind(import_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_rows(&self, import_id: &Uuid) -> Result<Vec<CsvImportRowLog>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM csv_import_rows WHERE import_log_id = ? ORDER BY row_number ASC",
        )
        .bind(import_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let mut result = Vec::with_capacity(rows.len());
        for row in &rows {
            result.push(RowLogRow::from_row(row).map_err(query_error)?.into_row_log()?);
        }
        Ok(result)
    }

    async fn update_row_status(
        &self,
        row_id: &Uuid,
        status: RowStatus,
        error: Option<&str>,
        user_id: Option<Uuid>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE csv_import_rows SET status = ?, error = ?, user_id = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(user_id.map(|u| u.to_string()))
        .bind(format_datetime(&Utc::now()))
        .bind(row_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn refresh_counters(&self, import_id: &Uuid) -> Result<ImportCounters, RepositoryError> {
        let row = sqlx::query(
            r#"UPDATE csv_import_logs SET
                 imported_count = (SELECT COUNT(*) FROM csv_import_rows
                                   WHERE import_log_id = csv_import_logs.id AND status = 'IMPORTED'),
                 failed_count = (SELECT COUNT(*) FROM csv_import_rows
                                 WHERE import_log_id = csv_import_logs.id AND status = 'FAILED'),
                 updated_at = ?
               WHERE id = ?
               RETURNING imported_count, failed_count"#,
        )
        .bind(format_datetime(&Utc::now()))
        .bind(import_id.to_string())
        .fetch_optional(&self.pool.writer)
        .await
        .map_err(query_error)?
        .ok_or(RepositoryError::NotFound)?;

        let imported: i64 = row.try_get("imported_count").map_err(query_error)?;
        let failed: i64 = row.try_get("failed_count").map_err(query_error)?;
        Ok(ImportCounters {
            imported: imported as u32,
            failed: failed as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_repo() -> SqliteImportRepository {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        SqliteImportRepository::new(DatabasePool::new(&url).await.unwrap())
    }

    fn staged(rows: u32) -> (CsvImportLog, Vec<CsvImportRowLog>) {
        let now = Utc::now();
        let log = CsvImportLog {
            id: Uuid::now_v7(),
            center_id: Uuid::now_v7(),
            requested_by: Uuid::now_v7(),
            file_name: "students.csv".into(),
            status: ImportStatus::Pending,
            total_rows: rows,
            valid_rows: rows,
            imported_count: 0,
            failed_count: 0,
            error: None,
            error_category: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        let row_logs = (1..=rows)
            .map(|n| CsvImportRowLog {
                id: Uuid::now_v7(),
                import_log_id: log.id,
                row_number: n,
                name: format!("Student {n}"),
                email: format!("student{n}@example.com"),
                role: "student".into(),
                status: RowStatus::Valid,
                error: None,
                user_id: None,
                updated_at: now,
            })
            .collect();
        (log, row_logs)
    }

    #[tokio::test]
    async fn create_import_stores_log_and_rows() {
        let repo = test_repo().await;
        let (log, rows) = staged(3);
        repo.create_import(&log, &rows).await.unwrap();

        let loaded = repo.get_import(&log.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ImportStatus::Pending);
        assert_eq!(loaded.total_rows, 3);

        let loaded_rows = repo.list_rows(&log.id).await.unwrap();
        let numbers: Vec<u32> = loaded_rows.iter().map(|r| r.row_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(loaded_rows[1].email, "student2@example.com");

        let err = repo.create_import(&log, &[]).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn counters_are_recomputed_from_rows() {
        let repo = test_repo().await;
        let (log, rows) = staged(4);
        repo.create_import(&log, &rows).await.unwrap();

        let user = Uuid::now_v7();
        repo.update_row_status(&rows[0].id, RowStatus::Imported, None, Some(user))
            .await
            .unwrap();
        repo.update_row_status(&rows[1].id, RowStatus::Imported, None, Some(Uuid::now_v7()))
            .await
            .unwrap();
        repo.update_row_status(&rows[2].id, RowStatus::Failed, Some("email is reserved"), None)
            .await
            .unwrap();

        // Refreshing twice yields the same counts.
        repo.refresh_counters(&log.id).await.unwrap();
        let counters = repo.refresh_counters(&log.id).await.unwrap();
        assert_eq!(counters, ImportCounters { imported: 2, failed: 1 });

        let loaded = repo.get_import(&log.id).await.unwrap().unwrap();
        assert_eq!(loaded.imported_count, 2);
        assert_eq!(loaded.failed_count, 1);

        let first = &repo.list_rows(&log.id).await.unwrap()[0];
        assert_eq!(first.user_id, Some(user));
    }

    #[tokio::test]
    async fn terminal_status_sets_completion_time() {
        let repo = test_repo().await;
        let (log, rows) = staged(1);
        repo.create_import(&log, &rows).await.unwrap();

        repo.update_import_status(&log.id, ImportStatus::Processing, None, None)
            .await
            .unwrap();
        assert!(repo.get_import(&log.id).await.unwrap().unwrap().completed_at.is_none());

        repo.update_import_status(
            &log.id,
            ImportStatus::Failed,
            Some("all 1 rows failed to import"),
            Some(ErrorCategory::Other),
        )
        .await
        .unwrap();
        let loaded = repo.get_import(&log.id).await.unwrap().unwrap();
        assert!(loaded.completed_at.is_some());
        assert_eq!(loaded.error_category, Some(ErrorCategory::Other));
        assert!(loaded.status_view().terminal);

        let missing = repo.refresh_counters(&Uuid::now_v7()).await;
        assert!(matches!(missing, Err(RepositoryError::NotFound)));
    }
}
