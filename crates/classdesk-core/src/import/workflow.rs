//! `process-import` workflow: provisions members from validated CSV rows.
//!
//! Steps: `mark-processing`, `load-rows`, batched provisioning
//! (`import-batch-{n}` / `import-delay-{n}`), `finalize`,
//! `notify-requester`. Counters on the import log are refreshed inside each
//! batch step, so an interrupted import shows its progress and a resumed one
//! only provisions the remaining rows.

use std::sync::Arc;

use classdesk_types::error::ErrorCategory;
use classdesk_types::event::{Event, ProcessImport, names};
use classdesk_types::import::{
    CsvImportRowLog, ImportCounters, ImportStatus, MemberRole, NewMember, RowStatus,
};
use classdesk_types::notification::EmailMessage;
use classdesk_types::workflow::StepFailure;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::notify::mailer::Mailer;
use crate::repository::directory::MemberDirectory;
use crate::repository::import::ImportRepository;
use crate::repository::workflow::WorkflowRepository;
use crate::workflow::batch::{BatchItem, BatchProcessor};
use crate::workflow::context::{StepContext, StepError};
use crate::workflow::definition::{RunFailure, Workflow};

impl BatchItem for CsvImportRowLog {
    fn key(&self) -> String {
        format!("row-{}", self.row_number)
    }
}

/// Outcome of the `finalize` step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Finalized {
    status: ImportStatus,
    counters: ImportCounters,
}

pub struct ProcessImportWorkflow<I: ImportRepository, M: MemberDirectory, N: Mailer> {
    imports: Arc<I>,
    members: Arc<M>,
    mailer: Arc<N>,
    batch: BatchProcessor,
}

impl<I: ImportRepository, M: MemberDirectory, N: Mailer> ProcessImportWorkflow<I, M, N> {
    pub fn new(imports: Arc<I>, members: Arc<M>, mailer: Arc<N>, batch: BatchProcessor) -> Self {
        Self {
            imports,
            members,
            mailer,
            batch,
        }
    }

    /// Provision one row and record its outcome on the row log.
    async fn import_row(&self, center_id: &Uuid, row: &CsvImportRowLog) -> Result<(), StepFailure> {
        let outcome = async {
            let role: MemberRole = row
                .role
                .parse()
                .map_err(|e: String| StepFailure::fatal(e, ErrorCategory::ValidationError))?;
            let member = self
                .members
                .provision_member(
                    center_id,
                    &NewMember {
                        name: row.name.trim().to_string(),
                        email: row.email.trim().to_lowercase(),
                        role,
                    },
                )
                .await
                .map_err(|e| StepFailure::new(e.to_string()))?;
            Ok::<_, StepFailure>(member)
        }
        .await;

        match outcome {
            Ok(member) => {
                self.imports
                    .update_row_status(&row.id, RowStatus::Imported, None, Some(member.user_id))
                    .await?;
                Ok(())
            }
            Err(failure) => {
                self.imports
                    .update_row_status(&row.id, RowStatus::Failed, Some(&failure.message), None)
                    .await?;
                Err(failure)
            }
        }
    }
}

fn summary_email(run_id: Uuid, to: &str, file_name: &str, done: &Finalized) -> EmailMessage {
    let subject = match done.status {
        ImportStatus::Completed => format!("Import of {file_name} completed"),
        ImportStatus::Partial => format!("Import of {file_name} partially completed"),
        _ => format!("Import of {file_name} failed"),
    };
    let body = format!(
        "Your member import has finished.\n\nImported: {}\nFailed: {}\n\nFailed rows keep their reason and can be retried from the import page.",
        done.counters.imported, done.counters.failed
    );
    EmailMessage::new(to, subject, body, format!("{run_id}:notify-requester"))
}

impl<I, M, N> Workflow for ProcessImportWorkflow<I, M, N>
where
    I: ImportRepository + 'static,
    M: MemberDirectory + 'static,
    N: Mailer + 'static,
{
    fn name(&self) -> &'static str {
        "process-import"
    }

    fn trigger(&self) -> &'static str {
        names::PROCESS_IMPORT
    }

    async fn run<R: WorkflowRepository + 'static>(
        &self,
        ctx: &StepContext<R>,
        event: &Event,
    ) -> Result<Value, StepError> {
        let payload: ProcessImport = event.decode().map_err(|e| StepError::Codec {
            step: "decode-payload".to_string(),
            reason: e.to_string(),
        })?;
        let imports = &self.imports;
        let import_id = payload.import_log_id;

        let file_name: String = ctx
            .run("mark-processing", || async {
                let log = imports.get_import(&import_id).await?.ok_or_else(|| {
                    StepFailure::fatal(
                        format!("import {import_id} not found"),
                        ErrorCategory::ValidationError,
                    )
                })?;
                imports
                    .update_import_status(&import_id, ImportStatus::Processing, None, None)
                    .await?;
                Ok(log.file_name)
            })
            .await?;

        let rows: Vec<CsvImportRowLog> = ctx
            .run("load-rows", || async {
                let rows = imports.list_rows(&import_id).await?;
                Ok(rows
                    .into_iter()
                    .filter(|row| {
                        payload.selected_row_ids.is_empty()
                            || payload.selected_row_ids.contains(&row.id)
                    })
                    .filter(|row| match row.status {
                        RowStatus::Valid => true,
                        RowStatus::Failed => payload.is_retry,
                        _ => false,
                    })
                    .collect())
            })
            .await?;

        tracing::info!(
            %import_id,
            rows = rows.len(),
            batches = self.batch.batch_count(rows.len()),
            is_retry = payload.is_retry,
            "importing rows"
        );

        let center_id = payload.center_id;
        let summary = self
            .batch
            .process(
                ctx,
                "import",
                &rows,
                |row| {
                    let row = row.clone();
                    async move { self.import_row(&center_id, &row).await }
                },
                |progress| async move {
                    let counters = imports.refresh_counters(&import_id).await?;
                    tracing::info!(
                        %import_id,
                        batch = progress.batch,
                        batches = progress.batches,
                        imported = counters.imported,
                        failed = counters.failed,
                        "import progress"
                    );
                    Ok(())
                },
            )
            .await?;

        let finalized: Finalized = ctx
            .run("finalize", || async {
                let counters = imports.refresh_counters(&import_id).await?;
                let status = ImportStatus::derive(counters.imported, counters.failed);
                let (error, category) = match status {
                    ImportStatus::Failed => (
                        Some(format!("all {} rows failed to import", counters.failed)),
                        summary.failures.first().map(|f| f.category),
                    ),
                    _ => (None, None),
                };
                imports
                    .update_import_status(&import_id, status, error.as_deref(), category)
                    .await?;
                Ok(Finalized { status, counters })
            })
            .await?;

        let members = &self.members;
        let mailer = &self.mailer;
        let run_id = ctx.run_id();
        let notified: bool = ctx
            .run("notify-requester", || async {
                let Some(requester) = members.get_member(&payload.requesting_user_id).await? else {
                    tracing::debug!(user_id = %payload.requesting_user_id, "requester not found, skipping summary");
                    return Ok(false);
                };
                mailer
                    .send(&summary_email(run_id, &requester.email, &file_name, &finalized))
                    .await?;
                Ok(true)
            })
            .await?;

        tracing::info!(
            %import_id,
            status = %finalized.status,
            imported = finalized.counters.imported,
            failed = finalized.counters.failed,
            "import finished"
        );

        Ok(serde_json::json!({
            "status": finalized.status,
            "imported": finalized.counters.imported,
            "failed": finalized.counters.failed,
            "notified": notified,
        }))
    }

    async fn on_failure(&self, failure: &RunFailure) -> Result<(), StepFailure> {
        let payload: ProcessImport = failure
            .event
            .decode()
            .map_err(|e| StepFailure::fatal(e.to_string(), ErrorCategory::InvalidResponse))?;

        let Some(log) = self.imports.get_import(&payload.import_log_id).await? else {
            return Ok(());
        };

        // Only the summary email failed: keep the derived outcome.
        if log.status.is_terminal() && log.status != ImportStatus::Failed {
            tracing::warn!(
                import_id = %log.id,
                status = %log.status,
                error = %failure.message,
                "import finished but post-processing failed"
            );
            return Ok(());
        }

        self.imports
            .refresh_counters(&log.id)
            .await?;
        self.imports
            .update_import_status(
                &log.id,
                ImportStatus::Failed,
                Some(&failure.message),
                Some(failure.category),
            )
            .await?;

        tracing::warn!(
            import_id = %log.id,
            category = %failure.category,
            attempts = failure.attempts,
            error = %failure.message,
            "import failed"
        );
        Ok(())
    }
}
