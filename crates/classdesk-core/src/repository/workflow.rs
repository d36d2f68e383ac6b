//! Workflow repository trait definition.
//!
//! Defines the storage interface for workflow runs, memoized step records,
//! per-key cancellation tokens and durable events. The infrastructure layer
//! (classdesk-infra) implements this trait with SQLite persistence; the
//! in-memory implementation in [`crate::store`] backs tests and dry runs.

use classdesk_types::error::RepositoryError;
use classdesk_types::event::Event;
use classdesk_types::workflow::{RunStatus, StepRecord, WorkflowRun};
use uuid::Uuid;

/// Repository trait for workflow engine persistence.
///
/// Covers four entity families:
/// - **Runs:** create/query runs, attempt counter, terminal transitions.
/// - **Steps:** insert-if-absent step records keyed by (run id, step name).
/// - **Tokens:** compare-and-swap of the current run per cancellation scope.
/// - **Events:** durable event log with a processed flag for redelivery.
///
/// Every write is idempotent: re-applying it after a crash leaves the same
/// state. Uses native async fn in traits (Rust 2024 edition, no async_trait
/// macro).
pub trait WorkflowRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Insert a new run.
    fn create_run(
        &self,
        run: &WorkflowRun,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a run by ID.
    fn get_run(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowRun>, RepositoryError>> + Send;

    /// Find the run a workflow created for a given event (delivery dedup).
    fn find_run_by_event(
        &self,
        event_id: &Uuid,
        workflow_name: &str,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowRun>, RepositoryError>> + Send;

    /// Move a `running` run to `status`.
    ///
    /// Returns `false` without writing when the run is already terminal:
    /// terminal states are immutable.
    fn finish_run(
        &self,
        run_id: &Uuid,
        status: RunStatus,
        error: Option<&str>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Persist the attempt counter of a running run.
    fn set_attempt(
        &self,
        run_id: &Uuid,
        attempt: u32,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Most recent runs for a correlation key, newest first.
    fn list_runs_by_key(
        &self,
        correlation_key: &str,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowRun>, RepositoryError>> + Send;

    /// Most recent runs across all keys, newest first.
    fn list_recent_runs(
        &self,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowRun>, RepositoryError>> + Send;

    /// Runs still `running` (interrupted by a crash if no worker owns them).
    fn list_running_runs(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowRun>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    /// Get the memoized record of a step.
    fn get_step(
        &self,
        run_id: &Uuid,
        step_name: &str,
    ) -> impl std::future::Future<Output = Result<Option<StepRecord>, RepositoryError>> + Send;

    /// Insert a step record unless one already exists for (run id, step name).
    ///
    /// Returns `true` if this call wrote the record.
    fn save_step(
        &self,
        record: &StepRecord,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// All step records of a run in completion order.
    fn list_steps(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<StepRecord>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Cancellation tokens
    // -----------------------------------------------------------------------

    /// Atomically replace the current run of `scope`, returning the previous one.
    fn swap_token(
        &self,
        scope: &str,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Uuid>, RepositoryError>> + Send;

    /// Read the current run of `scope`.
    fn get_token(
        &self,
        scope: &str,
    ) -> impl std::future::Future<Output = Result<Option<Uuid>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Record an event unless its ID is already known. Returns `true` if new.
    fn record_event(
        &self,
        event: &Event,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    fn get_event(
        &self,
        event_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Event>, RepositoryError>> + Send;

    /// Flag an event as fully handled; it will not be redelivered.
    fn mark_event_processed(
        &self,
        event_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Events not yet processed, oldest first.
    fn list_pending_events(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Event>, RepositoryError>> + Send;
}
