use dashmap::DashMap;
use std::sync::Mutex;

use classdesk_types::error::RepositoryError;
use classdesk_types::event::Event;
use classdesk_types::workflow::{RunStatus, StepRecord, WorkflowRun};
use chrono::Utc;
use uuid::Uuid;

use crate::repository::workflow::WorkflowRepository;

/// In-memory `WorkflowRepository` backed by concurrent maps.
///
/// Step records live in a per-run append-only vector so `list_steps` keeps
/// completion order. Token swaps go through `DashMap::insert`, which is
/// atomic per scope.
#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    runs: DashMap<Uuid, WorkflowRun>,
    steps: DashMap<Uuid, Vec<StepRecord>>,
    tokens: DashMap<String, Uuid>,
    events: DashMap<Uuid, (Event, bool)>,
    // Insertion order of events, for oldest-first listing.
    event_order: Mutex<Vec<Uuid>>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted_runs(&self, filter: impl Fn(&WorkflowRun) -> bool, limit: u32) -> Vec<WorkflowRun> {
        let mut runs: Vec<WorkflowRun> = self
            .runs
            .iter()
            .filter(|r| filter(r.value()))
            .map(|r| r.value().clone())
            .collect();
        // UUIDv7 sorts by creation time.
        runs.sort_by(|a, b| b.id.cmp(&a.id));
        runs.truncate(limit as usize);
        runs
    }
}

impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn create_run(&self, run: &WorkflowRun) -> Result<(), RepositoryError> {
        if self.runs.contains_key(&run.id) {
            return Err(RepositoryError::Conflict(format!("run {} exists", run.id)));
        }
        self.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<WorkflowRun>, RepositoryError> {
        Ok(self.runs.get(run_id).map(|r| r.value().clone()))
    }

    async fn find_run_by_event(
        &self,
        event_id: &Uuid,
        workflow_name: &str,
    ) -> Result<Option<WorkflowRun>, RepositoryError> {
        Ok(self
            .runs
            .iter()
            .find(|r| r.event_id == *event_id && r.workflow_name == workflow_name)
            .map(|r| r.value().clone()))
    }

    async fn finish_run(
        &self,
        run_id: &Uuid,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<bool, RepositoryError> {
        let mut run = self.runs.get_mut(run_id).ok_or(RepositoryError::NotFound)?;
        if run.status.is_terminal() {
            return Ok(false);
        }
        run.status = status;
        run.error = error.map(str::to_string);
        run.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_attempt(&self, run_id: &Uuid, attempt: u32) -> Result<(), RepositoryError> {
        let mut run = self.runs.get_mut(run_id).ok_or(RepositoryError::NotFound)?;
        run.attempt = attempt;
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn list_runs_by_key(
        &self,
        correlation_key: &str,
        limit: u32,
    ) -> Result<Vec<WorkflowRun>, RepositoryError> {
        Ok(self.sorted_runs(|r| r.correlation_key == correlation_key, limit))
    }

    async fn list_recent_runs(&self, limit: u32) -> Result<Vec<WorkflowRun>, RepositoryError> {
        Ok(self.sorted_runs(|_| true, limit))
    }

    async fn list_running_runs(&self) -> Result<Vec<WorkflowRun>, RepositoryError> {
        let mut runs = self.sorted_runs(|r| r.status == RunStatus::Running, u32::MAX);
        runs.reverse();
        Ok(runs)
    }

    async fn get_step(
        &self,
        run_id: &Uuid,
        step_name: &str,
    ) -> Result<Option<StepRecord>, RepositoryError> {
        Ok(self
            .steps
            .get(run_id)
            .and_then(|steps| steps.iter().find(|s| s.step_name == step_name).cloned()))
    }

    async fn save_step(&self, record: &StepRecord) -> Result<bool, RepositoryError> {
        let mut steps = self.steps.entry(record.run_id).or_default();
        if steps.iter().any(|s| s.step_name == record.step_name) {
            return Ok(false);
        }
        steps.push(record.clone());
        Ok(true)
    }

    async fn list_steps(&self, run_id: &Uuid) -> Result<Vec<StepRecord>, RepositoryError> {
        Ok(self
            .steps
            .get(run_id)
            .map(|steps| steps.clone())
            .unwrap_or_default())
    }

    async fn swap_token(&self, scope: &str, run_id: &Uuid) -> Result<Option<Uuid>, RepositoryError> {
        Ok(self.tokens.insert(scope.to_string(), *run_id))
    }

    async fn get_token(&self, scope: &str) -> Result<Option<Uuid>, RepositoryError> {
        Ok(self.tokens.get(scope).map(|t| *t.value()))
    }

    async fn record_event(&self, event: &Event) -> Result<bool, RepositoryError> {
        if self.events.contains_key(&event.id) {
            return Ok(false);
        }
        self.events.insert(event.id, (event.clone(), false));
        self.event_order
            .lock()
            .map_err(|_| RepositoryError::Connection)?
            .push(event.id);
        Ok(true)
    }

    async fn get_event(&self, event_id: &Uuid) -> Result<Option<Event>, RepositoryError> {
        Ok(self.events.get(event_id).map(|e| e.value().0.clone()))
    }

    async fn mark_event_processed(&self, event_id: &Uuid) -> Result<(), RepositoryError> {
        let mut entry = self.events.get_mut(event_id).ok_or(RepositoryError::NotFound)?;
        entry.1 = true;
        Ok(())
    }

    async fn list_pending_events(&self) -> Result<Vec<Event>, RepositoryError> {
        let order = self
            .event_order
            .lock()
            .map_err(|_| RepositoryError::Connection)?
            .clone();
        Ok(order
            .iter()
            .filter_map(|id| self.events.get(id))
            .filter(|e| !e.value().1)
            .map(|e| e.value().0.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(key: &str) -> WorkflowRun {
        WorkflowRun::new(
            Uuid::now_v7(),
            "notify-schedule-change",
            Uuid::now_v7(),
            "logistics/session.schedule-changed",
            key,
            serde_json::json!({}),
        )
    }

    #[tokio::test]
    async fn terminal_runs_are_immutable() {
        let repo = InMemoryWorkflowRepository::new();
        let r = run("s1");
        repo.create_run(&r).await.unwrap();

        assert!(repo.finish_run(&r.id, RunStatus::Cancelled, None).await.unwrap());
        assert!(!repo.finish_run(&r.id, RunStatus::Completed, None).await.unwrap());
        assert_eq!(
            repo.get_run(&r.id).await.unwrap().unwrap().status,
            RunStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn swap_token_returns_previous() {
        let repo = InMemoryWorkflowRepository::new();
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        assert_eq!(repo.swap_token("scope", &a).await.unwrap(), None);
        assert_eq!(repo.swap_token("scope", &b).await.unwrap(), Some(a));
        assert_eq!(repo.get_token("scope").await.unwrap(), Some(b));
    }

    #[tokio::test]
    async fn pending_events_exclude_processed() {
        let repo = InMemoryWorkflowRepository::new();
        let first = Event::new("a", serde_json::json!({}), "k1");
        let second = Event::new("b", serde_json::json!({}), "k2");
        assert!(repo.record_event(&first).await.unwrap());
        assert!(!repo.record_event(&first).await.unwrap());
        repo.record_event(&second).await.unwrap();
        repo.mark_event_processed(&first.id).await.unwrap();

        let pending = repo.list_pending_events().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second.id);
    }

    #[tokio::test]
    async fn runs_by_key_newest_first() {
        let repo = InMemoryWorkflowRepository::new();
        let older = run("s1");
        let newer = run("s1");
        repo.create_run(&older).await.unwrap();
        repo.create_run(&newer).await.unwrap();
        repo.create_run(&run("s2")).await.unwrap();

        let runs = repo.list_runs_by_key("s1", 10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, newer.id);
    }
}
