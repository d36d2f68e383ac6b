use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use classdesk_types::error::{ErrorCategory, RepositoryError};
use classdesk_types::grading::{
    GradingAnalysis, GradingJob, GradingJobStatus, Submission, SubmissionStatus,
};
use classdesk_types::import::{
    CsvImportLog, CsvImportRowLog, ImportCounters, ImportStatus, Member, NewMember, RowStatus,
};
use classdesk_types::notification::Recipient;
use classdesk_types::schedule::SessionSnapshot;

use crate::repository::directory::{MemberDirectory, SessionDirectory};
use crate::repository::grading::GradingRepository;
use crate::repository::import::ImportRepository;

/// In-memory implementation of every domain repository and directory.
#[derive(Default)]
pub struct InMemoryDomainStore {
    jobs: DashMap<Uuid, GradingJob>,
    /// submission id -> job id
    job_ids: DashMap<Uuid, Uuid>,
    submissions: DashMap<Uuid, Submission>,
    analyses: DashMap<Uuid, GradingAnalysis>,
    imports: DashMap<Uuid, CsvImportLog>,
    rows: DashMap<Uuid, CsvImportRowLog>,
    members: DashMap<Uuid, Member>,
    sessions: DashMap<Uuid, SessionSnapshot>,
    class_recipients: DashMap<Uuid, Vec<Recipient>>,
}

impl InMemoryDomainStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_submission(&self, submission: Submission) {
        self.submissions.insert(submission.id, submission);
    }

    pub fn insert_member(&self, member: Member) {
        self.members.insert(member.user_id, member);
    }

    /// Insert or replace a session snapshot.
    pub fn put_session(&self, session: SessionSnapshot) {
        self.sessions.insert(session.session_id, session);
    }

    pub fn remove_session(&self, session_id: &Uuid) {
        self.sessions.remove(session_id);
    }

    pub fn set_class_recipients(&self, class_id: Uuid, recipients: Vec<Recipient>) {
        self.class_recipients.insert(class_id, recipients);
    }

    /// Number of grading job rows for a submission.
    pub fn job_count_for(&self, submission_id: &Uuid) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.submission_id == *submission_id)
            .count()
    }

    fn job_id_for(&self, submission_id: &Uuid) -> Option<Uuid> {
        self.job_ids.get(submission_id).map(|id| *id)
    }
}

// ---------------------------------------------------------------------------
// Grading
// ---------------------------------------------------------------------------

impl GradingRepository for InMemoryDomainStore {
    async fn upsert_job_for_submission(
        &self,
        submission_id: &Uuid,
        center_id: &Uuid,
    ) -> Result<GradingJob, RepositoryError> {
        // The submission entry stays locked until the job row is written.
        let mut created = None;
        let entry = self.job_ids.entry(*submission_id).or_insert_with(|| {
            let job = GradingJob::new(*submission_id, *center_id);
            let id = job.id;
            created = Some(job);
            id
        });
        if let Some(job) = created {
            self.jobs.insert(job.id, job.clone());
            return Ok(job);
        }

        let mut job = self.jobs.get_mut(entry.value()).ok_or(RepositoryError::NotFound)?;
        drop(entry);
        if job.status.is_terminal() {
            job.previous_submission_status = None;
        }
        job.status = GradingJobStatus::Pending;
        job.error = None;
        job.error_category = None;
        job.completed_at = None;
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn get_job(&self, job_id: &Uuid) -> Result<Option<GradingJob>, RepositoryError> {
        Ok(self.jobs.get(job_id).map(|j| j.clone()))
    }

    async fn get_job_by_submission(
        &self,
        submission_id: &Uuid,
    ) -> Result<Option<GradingJob>, RepositoryError> {
        Ok(self
            .job_id_for(submission_id)
            .and_then(|id| self.jobs.get(&id).map(|j| j.clone())))
    }

    async fn update_job_status(
        &self,
        job_id: &Uuid,
        status: GradingJobStatus,
        error: Option<&str>,
        category: Option<ErrorCategory>,
    ) -> Result<(), RepositoryError> {
        let mut job = self.jobs.get_mut(job_id).ok_or(RepositoryError::NotFound)?;
        let now = Utc::now();
        job.status = status;
        job.error = error.map(str::to_string);
        job.error_category = category;
        job.updated_at = now;
        job.completed_at = status.is_terminal().then_some(now);
        Ok(())
    }

    async fn capture_previous_status(
        &self,
        job_id: &Uuid,
        status: SubmissionStatus,
    ) -> Result<(), RepositoryError> {
        let mut job = self.jobs.get_mut(job_id).ok_or(RepositoryError::NotFound)?;
        if job.previous_submission_status.is_none() {
            job.previous_submission_status = Some(status);
        }
        Ok(())
    }

    async fn get_submission(
        &self,
        submission_id: &Uuid,
    ) -> Result<Option<Submission>, RepositoryError> {
        Ok(self.submissions.get(submission_id).map(|s| s.clone()))
    }

    async fn set_submission_status(
        &self,
        submission_id: &Uuid,
        status: SubmissionStatus,
    ) -> Result<(), RepositoryError> {
        let mut submission = self
            .submissions
            .get_mut(submission_id)
            .ok_or(RepositoryError::NotFound)?;
        submission.status = status;
        Ok(())
    }

    async fn save_analysis(
        &self,
        submission_id: &Uuid,
        _job_id: &Uuid,
        analysis: &GradingAnalysis,
    ) -> Result<(), RepositoryError> {
        self.analyses.insert(*submission_id, analysis.clone());
        Ok(())
    }

    async fn get_analysis(
        &self,
        submission_id: &Uuid,
    ) -> Result<Option<GradingAnalysis>, RepositoryError> {
        Ok(self.analyses.get(submission_id).map(|a| a.clone()))
    }
}

// ---------------------------------------------------------------------------
// Imports
// ---------------------------------------------------------------------------

impl ImportRepository for InMemoryDomainStore {
    async fn create_import(
        &self,
        log: &CsvImportLog,
        rows: &[CsvImportRowLog],
    ) -> Result<(), RepositoryError> {
        if self.imports.contains_key(&log.id) {
            return Err(RepositoryError::Conflict(format!("import {} exists", log.id)));
        }
        self.imports.insert(log.id, log.clone());
        for row in rows {
            self.rows.insert(row.id, row.clone());
        }
        Ok(())
    }

    async fn get_import(&self, import_id: &Uuid) -> Result<Option<CsvImportLog>, RepositoryError> {
        Ok(self.imports.get(import_id).map(|l| l.clone()))
    }

    async fn update_import_status(
        &self,
        import_id: &Uuid,
        status: ImportStatus,
        error: Option<&str>,
        category: Option<ErrorCategory>,
    ) -> Result<(), RepositoryError> {
        let mut log = self
            .imports
            .get_mut(import_id)
            .ok_or(RepositoryError::NotFound)?;
        let now = Utc::now();
        log.status = status;
        log.error = error.map(str::to_string);
        log.error_category = category;
        log.updated_at = now;
        log.completed_at = status.is_terminal().then_some(now);
        Ok(())
    }

    async fn list_rows(&self, import_id: &Uuid) -> Result<Vec<CsvImportRowLog>, RepositoryError> {
        let mut rows: Vec<CsvImportRowLog> = self
            .rows
            .iter()
            .filter(|r| r.import_log_id == *import_id)
            .map(|r| r.clone())
            .collect();
        rows.sort_by_key(|r| r.row_number);
        Ok(rows)
    }

    async fn update_row_status(
        &self,
        row_id: &Uuid,
        status: RowStatus,
        error: Option<&str>,
        user_id: Option<Uuid>,
    ) -> Result<(), RepositoryError> {
        let mut row = self.rows.get_mut(row_id).ok_or(RepositoryError::NotFound)?;
        row.status = status;
        row.error = error.map(str::to_string);
        row.user_id = user_id;
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn refresh_counters(&self, import_id: &Uuid) -> Result<ImportCounters, RepositoryError> {
        let mut counters = ImportCounters::default();
        for row in self.rows.iter().filter(|r| r.import_log_id == *import_id) {
            match row.status {
                RowStatus::Imported => counters.imported += 1,
                RowStatus::Failed => counters.failed += 1,
                _ => {}
            }
        }

        let mut log = self
            .imports
            .get_mut(import_id)
            .ok_or(RepositoryError::NotFound)?;
        log.imported_count = counters.imported;
        log.failed_count = counters.failed;
        log.updated_at = Utc::now();
        Ok(counters)
    }
}

// ---------------------------------------------------------------------------
// Directories
// ---------------------------------------------------------------------------

impl MemberDirectory for InMemoryDomainStore {
    async fn find_member_by_email(
        &self,
        center_id: &Uuid,
        email: &str,
    ) -> Result<Option<Member>, RepositoryError> {
        Ok(self
            .members
            .iter()
            .find(|m| m.center_id == *center_id && m.email.eq_ignore_ascii_case(email))
            .map(|m| m.clone()))
    }

    async fn get_member(&self, user_id: &Uuid) -> Result<Option<Member>, RepositoryError> {
        Ok(self.members.get(user_id).map(|m| m.clone()))
    }

    async fn provision_member(
        &self,
        center_id: &Uuid,
        member: &NewMember,
    ) -> Result<Member, RepositoryError> {
        if let Some(existing) = self.find_member_by_email(center_id, &member.email).await? {
            return Ok(existing);
        }
        let created = Member {
            user_id: Uuid::now_v7(),
            center_id: *center_id,
            name: member.name.clone(),
            email: member.email.to_lowercase(),
            role: member.role,
        };
        self.members.insert(created.user_id, created.clone());
        Ok(created)
    }
}

impl SessionDirectory for InMemoryDomainStore {
    async fn get_session(
        &self,
        session_id: &Uuid,
    ) -> Result<Option<SessionSnapshot>, RepositoryError> {
        Ok(self.sessions.get(session_id).map(|s| s.clone()))
    }

    async fn list_class_recipients(
        &self,
        class_id: &Uuid,
    ) -> Result<Vec<Recipient>, RepositoryError> {
        Ok(self
            .class_recipients
            .get(class_id)
            .map(|r| r.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use classdesk_types::import::MemberRole;
    use std::sync::Arc;

    #[tokio::test]
    async fn retrigger_reuses_job_row() {
        let store = InMemoryDomainStore::new();
        let submission = Uuid::now_v7();
        let center = Uuid::now_v7();

        let first = store.upsert_job_for_submission(&submission, &center).await.unwrap();
        store
            .update_job_status(&first.id, GradingJobStatus::Failed, Some("boom"), None)
            .await
            .unwrap();
        let second = store.upsert_job_for_submission(&submission, &center).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.status, GradingJobStatus::Pending);
        assert!(second.error.is_none());
        assert_eq!(store.job_count_for(&submission), 1);
    }

    #[tokio::test]
    async fn upsert_keeps_captured_status_while_job_is_active() {
        let store = InMemoryDomainStore::new();
        let submission = Uuid::now_v7();
        let center = Uuid::now_v7();

        let job = store.upsert_job_for_submission(&submission, &center).await.unwrap();
        store
            .capture_previous_status(&job.id, SubmissionStatus::Reviewed)
            .await
            .unwrap();
        store
            .update_job_status(&job.id, GradingJobStatus::Processing, None, None)
            .await
            .unwrap();

        let active = store.upsert_job_for_submission(&submission, &center).await.unwrap();
        assert_eq!(active.status, GradingJobStatus::Pending);
        assert_eq!(active.previous_submission_status, Some(SubmissionStatus::Reviewed));

        store
            .update_job_status(&job.id, GradingJobStatus::Failed, Some("boom"), None)
            .await
            .unwrap();
        let after_failure = store.upsert_job_for_submission(&submission, &center).await.unwrap();
        assert!(after_failure.previous_submission_status.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_upserts_create_one_job() {
        let store = Arc::new(InMemoryDomainStore::new());
        let submission = Uuid::now_v7();
        let center = Uuid::now_v7();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store.upsert_job_for_submission(&submission, &center).await.unwrap()
                })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.job_count_for(&submission), 1);
    }

    #[tokio::test]
    async fn provision_member_is_idempotent_per_email() {
        let store = InMemoryDomainStore::new();
        let center = Uuid::now_v7();
        let new = NewMember {
            name: "Ada".into(),
            email: "Ada@Example.com".into(),
            role: MemberRole::Student,
        };
        let a = store.provision_member(&center, &new).await.unwrap();
        let b = store.provision_member(&center, &new).await.unwrap();
        assert_eq!(a.user_id, b.user_id);
        assert_eq!(a.email, "ada@example.com");
    }
}
