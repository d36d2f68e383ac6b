//! Import service: staging, starting and retrying CSV imports.
//!
//! Staging validates every uploaded row and persists the import log with one
//! row log per row. Only `VALID` rows are ever provisioned; the others keep
//! their validation reason for display.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use classdesk_types::error::RepositoryError;
use classdesk_types::event::{Event, ProcessImport};
use classdesk_types::import::{
    CsvImportLog, CsvImportRowLog, CsvRowInput, ImportStatus, MemberRole, RowStatus,
};
use classdesk_types::workflow::RunStatusView;
use uuid::Uuid;

use crate::event::bus::{BusError, EventBus};
use crate::repository::directory::MemberDirectory;
use crate::repository::import::ImportRepository;
use crate::repository::workflow::WorkflowRepository;

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("import not found: {0}")]
    NotFound(Uuid),

    #[error("the file contains no data rows")]
    EmptyFile,

    #[error("import {0} is already processing")]
    AlreadyRunning(Uuid),

    #[error("import {0} has no rows to process")]
    NothingToProcess(Uuid),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Syntactic email check: one `@`, non-empty local part, dotted domain.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

/// Format-level validation of one row. Duplicate checks happen separately.
fn validate_format(row: &CsvRowInput) -> Result<(), String> {
    if row.name.trim().is_empty() {
        return Err("name is required".to_string());
    }
    if !is_valid_email(row.email.trim()) {
        return Err(format!("invalid email: '{}'", row.email.trim()));
    }
    row.role.parse::<MemberRole>().map(|_| ())
}

pub struct ImportService<I: ImportRepository, M: MemberDirectory, R: WorkflowRepository + 'static> {
    imports: Arc<I>,
    members: Arc<M>,
    bus: Arc<EventBus<R>>,
}

impl<I, M, R> ImportService<I, M, R>
where
    I: ImportRepository,
    M: MemberDirectory,
    R: WorkflowRepository + 'static,
{
    pub fn new(imports: Arc<I>, members: Arc<M>, bus: Arc<EventBus<R>>) -> Self {
        Self {
            imports,
            members,
            bus,
        }
    }

    /// Validate uploaded rows and persist a `PENDING` import.
    ///
    /// Rows are classified in file order: format errors first, then
    /// duplicates within the file (case-insensitive email, every occurrence
    /// after the first), then members that already exist in the center.
    pub async fn stage(
        &self,
        center_id: &Uuid,
        requested_by: &Uuid,
        file_name: &str,
        rows: Vec<CsvRowInput>,
    ) -> Result<CsvImportLog, ImportError> {
        if rows.is_empty() {
            return Err(ImportError::EmptyFile);
        }

        let import_id = Uuid::now_v7();
        let now = Utc::now();
        let mut seen = HashSet::new();
        let mut row_logs = Vec::with_capacity(rows.len());

        for row in rows {
            let email = row.email.trim().to_lowercase();
            let (status, error) = match validate_format(&row) {
                Err(reason) => (RowStatus::Error, Some(reason)),
                Ok(()) if !seen.insert(email.clone()) => (
                    RowStatus::DuplicateInCsv,
                    Some(format!("{email} appears earlier in the file")),
                ),
                Ok(()) => match self.members.find_member_by_email(center_id, &email).await? {
                    Some(_) => (
                        RowStatus::DuplicateInCenter,
                        Some(format!("{email} is already a member of this center")),
                    ),
                    None => (RowStatus::Valid, None),
                },
            };

            row_logs.push(CsvImportRowLog {
                id: Uuid::now_v7(),
                import_log_id: import_id,
                row_number: row.row_number,
                name: row.name.trim().to_string(),
                email,
                role: row.role.trim().to_lowercase(),
                status,
                error,
                user_id: None,
                updated_at: now,
            });
        }

        let valid_rows = row_logs
            .iter()
            .filter(|r| r.status == RowStatus::Valid)
            .count() as u32;
        let log = CsvImportLog {
            id: import_id,
            center_id: *center_id,
            requested_by: *requested_by,
            file_name: file_name.to_string(),
            status: ImportStatus::Pending,
            total_rows: row_logs.len() as u32,
            valid_rows,
            imported_count: 0,
            failed_count: 0,
            error: None,
            error_category: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        self.imports.create_import(&log, &row_logs).await?;
        tracing::info!(
            %import_id,
            file_name,
            total_rows = log.total_rows,
            valid_rows,
            "import staged"
        );
        Ok(log)
    }

    /// Start provisioning `row_ids`, or every `VALID` row when `None`.
    pub async fn start(
        &self,
        import_id: &Uuid,
        row_ids: Option<Vec<Uuid>>,
        requesting_user_id: &Uuid,
    ) -> Result<Event, ImportError> {
        let log = self.log(import_id).await?;
        if log.status == ImportStatus::Processing {
            return Err(ImportError::AlreadyRunning(*import_id));
        }

        let rows = self.imports.list_rows(import_id).await?;
        let selected: Vec<Uuid> = rows
            .iter()
            .filter(|r| r.status == RowStatus::Valid)
            .filter(|r| row_ids.as_ref().is_none_or(|ids| ids.contains(&r.id)))
            .map(|r| r.id)
            .collect();
        if selected.is_empty() {
            return Err(ImportError::NothingToProcess(*import_id));
        }

        self.publish(&log, selected, requesting_user_id, false).await
    }

    /// Re-run every `FAILED` row of a finished import.
    pub async fn retry_failed(
        &self,
        import_id: &Uuid,
        requesting_user_id: &Uuid,
    ) -> Result<Event, ImportError> {
        let log = self.log(import_id).await?;
        if log.status == ImportStatus::Processing {
            return Err(ImportError::AlreadyRunning(*import_id));
        }

        let failed: Vec<Uuid> = self
            .imports
            .list_rows(import_id)
            .await?
            .into_iter()
            .filter(|r| r.status == RowStatus::Failed)
            .map(|r| r.id)
            .collect();
        if failed.is_empty() {
            return Err(ImportError::NothingToProcess(*import_id));
        }

        self.imports
            .update_import_status(import_id, ImportStatus::Pending, None, None)
            .await?;
        self.publish(&log, failed, requesting_user_id, true).await
    }

    async fn publish(
        &self,
        log: &CsvImportLog,
        selected_row_ids: Vec<Uuid>,
        requesting_user_id: &Uuid,
        is_retry: bool,
    ) -> Result<Event, ImportError> {
        let rows = selected_row_ids.len();
        let event = self
            .bus
            .publish_payload(&ProcessImport {
                import_log_id: log.id,
                selected_row_ids,
                center_id: log.center_id,
                requesting_user_id: *requesting_user_id,
                is_retry,
            })
            .await?;
        tracing::info!(import_id = %log.id, rows, is_retry, event_id = %event.id, "import requested");
        Ok(event)
    }

    pub async fn log(&self, import_id: &Uuid) -> Result<CsvImportLog, ImportError> {
        self.imports
            .get_import(import_id)
            .await?
            .ok_or(ImportError::NotFound(*import_id))
    }

    /// Polling view of the import.
    pub async fn status(&self, import_id: &Uuid) -> Result<RunStatusView, ImportError> {
        Ok(self.log(import_id).await?.status_view())
    }

    pub async fn rows(&self, import_id: &Uuid) -> Result<Vec<CsvImportRowLog>, ImportError> {
        self.log(import_id).await?;
        Ok(self.imports.list_rows(import_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryDomainStore, InMemoryWorkflowRepository};
    use classdesk_types::import::Member;

    type Service = ImportService<InMemoryDomainStore, InMemoryDomainStore, InMemoryWorkflowRepository>;

    fn service() -> (Service, Arc<InMemoryDomainStore>, Arc<InMemoryWorkflowRepository>) {
        let domain = Arc::new(InMemoryDomainStore::new());
        let repo = Arc::new(InMemoryWorkflowRepository::new());
        let bus = Arc::new(EventBus::new(Arc::clone(&repo)));
        (
            ImportService::new(Arc::clone(&domain), Arc::clone(&domain), bus),
            domain,
            repo,
        )
    }

    fn row(n: u32, name: &str, email: &str, role: &str) -> CsvRowInput {
        CsvRowInput {
            row_number: n,
            name: name.into(),
            email: email.into(),
            role: role.into(),
        }
    }

    #[test]
    fn email_syntax() {
        assert!(is_valid_email("ada@example.com"));
        assert!(!is_valid_email("ada.example.com"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("ada@example"));
        assert!(!is_valid_email("ada@@example.com"));
        assert!(!is_valid_email("ada lovelace@example.com"));
    }

    #[tokio::test]
    async fn stage_classifies_every_row() {
        let (service, domain, _) = service();
        let center = Uuid::now_v7();
        domain.insert_member(Member {
            user_id: Uuid::now_v7(),
            center_id: center,
            name: "Existing".into(),
            email: "existing@example.com".into(),
            role: MemberRole::Teacher,
        });

        let log = service
            .stage(
                &center,
                &Uuid::now_v7(),
                "members.csv",
                vec![
                    row(1, "Ada", "ada@example.com", "student"),
                    row(2, "Ada Again", "ADA@example.com", "student"),
                    row(3, "Old Timer", "Existing@Example.com", "teacher"),
                    row(4, "", "blank@example.com", "student"),
                    row(5, "Bad Mail", "not-an-email", "student"),
                    row(6, "Bad Role", "role@example.com", "principal"),
                    row(7, "Grace", "grace@example.com", " Teacher "),
                ],
            )
            .await
            .unwrap();

        assert_eq!(log.total_rows, 7);
        assert_eq!(log.valid_rows, 2);
        assert_eq!(log.status, ImportStatus::Pending);

        let statuses: Vec<RowStatus> = service
            .rows(&log.id)
            .await
            .unwrap()
            .iter()
            .map(|r| r.status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                RowStatus::Valid,
                RowStatus::DuplicateInCsv,
                RowStatus::DuplicateInCenter,
                RowStatus::Error,
                RowStatus::Error,
                RowStatus::Error,
                RowStatus::Valid,
            ]
        );
    }

    #[tokio::test]
    async fn empty_file_is_rejected() {
        let (service, _, _) = service();
        let err = service
            .stage(&Uuid::now_v7(), &Uuid::now_v7(), "empty.csv", Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::EmptyFile));
    }

    #[tokio::test]
    async fn start_publishes_only_valid_rows() {
        let (service, _, repo) = service();
        let center = Uuid::now_v7();
        let user = Uuid::now_v7();
        let log = service
            .stage(
                &center,
                &user,
                "members.csv",
                vec![
                    row(1, "Ada", "ada@example.com", "student"),
                    row(2, "Dup", "ada@example.com", "student"),
                ],
            )
            .await
            .unwrap();

        let event = service.start(&log.id, None, &user).await.unwrap();
        let payload: ProcessImport = event.decode().unwrap();
        assert_eq!(payload.selected_row_ids.len(), 1);
        assert!(!payload.is_retry);
        assert_eq!(repo.list_pending_events().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn retry_without_failed_rows_is_rejected() {
        let (service, _, _) = service();
        let user = Uuid::now_v7();
        let log = service
            .stage(
                &Uuid::now_v7(),
                &user,
                "members.csv",
                vec![row(1, "Ada", "ada@example.com", "student")],
            )
            .await
            .unwrap();

        let err = service.retry_failed(&log.id, &user).await.unwrap_err();
        assert!(matches!(err, ImportError::NothingToProcess(_)));
    }
}
