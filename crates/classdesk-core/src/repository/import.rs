//! CSV import repository trait: import logs and row logs.

use classdesk_types::error::{ErrorCategory, RepositoryError};
use classdesk_types::import::{CsvImportLog, CsvImportRowLog, ImportCounters, ImportStatus, RowStatus};
use uuid::Uuid;

/// Storage interface for the import and row-log state machines.
pub trait ImportRepository: Send + Sync {
    /// Insert an import log together with its validated rows.
    fn create_import(
        &self,
        log: &CsvImportLog,
        rows: &[CsvImportRowLog],
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_import(
        &self,
        import_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<CsvImportLog>, RepositoryError>> + Send;

    /// Set import status and error fields. Sets `completed_at` on terminal
    /// states and clears it otherwise.
    fn update_import_status(
        &self,
        import_id: &Uuid,
        status: ImportStatus,
        error: Option<&str>,
        category: Option<ErrorCategory>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// All rows of an import ordered by row number.
    fn list_rows(
        &self,
        import_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<CsvImportRowLog>, RepositoryError>> + Send;

    /// Set the workflow outcome of a row.
    fn update_row_status(
        &self,
        row_id: &Uuid,
        status: RowStatus,
        error: Option<&str>,
        user_id: Option<Uuid>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Recount `IMPORTED` / `FAILED` rows and persist them on the import log.
    fn refresh_counters(
        &self,
        import_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<ImportCounters, RepositoryError>> + Send;
}
