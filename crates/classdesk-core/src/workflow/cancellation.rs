//! Cancellation matcher: last-writer-wins run tokens per correlation key.
//!
//! Registering a run atomically swaps the token of its scope
//! (`{workflow}:{correlation key}`). Older runs of the same scope observe the
//! mismatch at their next step boundary and stop. Cancellation is
//! cooperative: a step already executing is never interrupted.
//!
//! Known limitation: a run that has passed its last step boundary before a
//! newer run registers still completes, including its terminal side effect
//! (for example one stale notification email), and the newer run completes
//! afterwards as well.

use std::sync::Arc;

use classdesk_types::error::RepositoryError;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::repository::workflow::WorkflowRepository;

/// Tracks the current run per cancellation scope.
///
/// The durable token lives in the repository. Local `CancellationToken`s wake
/// superseded runs of this process that are suspended in a sleep step, so
/// they can observe the mismatch without waiting out the full duration.
pub struct CancellationMatcher<R: WorkflowRepository> {
    repo: Arc<R>,
    /// Wake-up signals keyed by run_id, for runs executing in this process.
    local: DashMap<Uuid, CancellationToken>,
}

impl<R: WorkflowRepository> CancellationMatcher<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self {
            repo,
            local: DashMap::new(),
        }
    }

    /// Scope key for a workflow and correlation key.
    pub fn scope(workflow: &str, correlation_key: &str) -> String {
        format!("{workflow}:{correlation_key}")
    }

    /// Register a new run for the scope and return its ID.
    ///
    /// Any previously registered run of the scope is superseded.
    pub async fn register(
        &self,
        workflow: &str,
        correlation_key: &str,
    ) -> Result<Uuid, RepositoryError> {
        let run_id = Uuid::now_v7();
        let scope = Self::scope(workflow, correlation_key);
        let previous = self.repo.swap_token(&scope, &run_id).await?;

        if let Some(previous) = previous {
            if let Some(token) = self.local.get(&previous) {
                token.cancel();
            }
            tracing::info!(
                %scope,
                superseded = %previous,
                current = %run_id,
                "newer run registered, older run will stop at its next step"
            );
        }

        Ok(run_id)
    }

    /// Whether `run_id` is still the current run of its scope.
    ///
    /// A scope without a token has never registered a run; the caller's run is
    /// then considered current.
    pub async fn is_current(
        &self,
        workflow: &str,
        correlation_key: &str,
        run_id: Uuid,
    ) -> Result<bool, RepositoryError> {
        let scope = Self::scope(workflow, correlation_key);
        Ok(match self.repo.get_token(&scope).await? {
            Some(current) => current == run_id,
            None => true,
        })
    }

    /// Start tracking a locally executing run; the token fires when it is
    /// superseded.
    pub fn track(&self, run_id: Uuid) -> CancellationToken {
        self.local.entry(run_id).or_default().clone()
    }

    /// Stop tracking a run once its attempt ends.
    pub fn untrack(&self, run_id: Uuid) {
        self.local.remove(&run_id);
    }
}
