//! Workflow run and step record types.
//!
//! A [`WorkflowRun`] is one attempt at executing a workflow for one triggering
//! event. Its [`StepRecord`]s form an append-only log of memoized step
//! outcomes keyed by (run id, step name).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::ErrorCategory;

/// Step name under which retry exhaustion is memoized.
pub const EXHAUSTED_STEP: &str = "__exhausted";

/// Step name under which a completed failure handler is memoized.
pub const ON_FAILURE_STEP: &str = "__on-failure";

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Lifecycle status of a workflow run. Terminal states are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Cancelled,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "cancelled" => Ok(RunStatus::Cancelled),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("invalid run status: '{other}'")),
        }
    }
}

/// How a workflow reacts to a newer event carrying the same correlation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationPolicy {
    /// Runs for the same key proceed independently.
    None,
    /// A newer run supersedes any older run for the same key, which stops at
    /// its next step boundary.
    SupersedeSameKey,
}

/// One execution of a workflow for one triggering event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// UUIDv7 run ID.
    pub id: Uuid,
    /// Registered workflow name (e.g. "analyze-submission").
    pub workflow_name: String,
    /// ID of the event that created this run.
    pub event_id: Uuid,
    /// Name of the triggering event.
    pub event_name: String,
    /// Domain identifier grouping related runs (submission, import, session).
    pub correlation_key: String,
    /// Snapshot of the triggering payload.
    pub payload: serde_json::Value,
    pub status: RunStatus,
    /// 1-based attempt counter, persisted before each re-entry.
    pub attempt: u32,
    /// Last error message (set when the run fails).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRun {
    /// Build a new `running` run on its first attempt.
    pub fn new(
        id: Uuid,
        workflow_name: impl Into<String>,
        event_id: Uuid,
        event_name: impl Into<String>,
        correlation_key: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            workflow_name: workflow_name.into(),
            event_id,
            event_name: event_name.into(),
            correlation_key: correlation_key.into(),
            payload,
            status: RunStatus::Running,
            attempt: 1,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// Stored outcome of a memoized step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOutcome {
    Success {
        value: serde_json::Value,
    },
    Failure {
        message: String,
        category: ErrorCategory,
    },
}

/// One memoized step result within a run. Never mutated once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub run_id: Uuid,
    pub step_name: String,
    pub outcome: StepOutcome,
    pub completed_at: DateTime<Utc>,
}

impl StepRecord {
    pub fn success(run_id: Uuid, step_name: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            run_id,
            step_name: step_name.into(),
            outcome: StepOutcome::Success { value },
            completed_at: Utc::now(),
        }
    }

    pub fn failure(run_id: Uuid, step_name: impl Into<String>, failure: &StepFailure) -> Self {
        Self {
            run_id,
            step_name: step_name.into(),
            outcome: StepOutcome::Failure {
                message: failure.message.clone(),
                category: failure.category,
            },
            completed_at: Utc::now(),
        }
    }

    /// Whether this record is an engine-internal bookkeeping entry.
    pub fn is_internal(&self) -> bool {
        self.step_name.starts_with("__")
    }
}

/// Error returned by a step body.
///
/// Retriable failures are not memoized, so the next attempt re-runs the body.
/// Non-retriable failures are recorded and exhaust the run immediately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct StepFailure {
    pub message: String,
    pub category: ErrorCategory,
    pub retriable: bool,
}

impl StepFailure {
    /// A retriable failure categorized from its message text.
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        let category = ErrorCategory::classify(&message);
        Self {
            message,
            category,
            retriable: true,
        }
    }

    /// A retriable failure with a known category.
    pub fn categorized(message: impl Into<String>, category: ErrorCategory) -> Self {
        Self {
            message: message.into(),
            category,
            retriable: true,
        }
    }

    /// A failure that no retry can fix (missing entity, bad input).
    pub fn fatal(message: impl Into<String>, category: ErrorCategory) -> Self {
        Self {
            message: message.into(),
            category,
            retriable: false,
        }
    }
}

impl From<crate::error::RepositoryError> for StepFailure {
    fn from(err: crate::error::RepositoryError) -> Self {
        StepFailure::categorized(err.to_string(), ErrorCategory::Other)
    }
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

/// Externally visible status of a domain entity driven by a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatusView {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    /// Whether polling can stop.
    pub terminal: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_terminality() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }

    #[test]
    fn run_status_parses_its_own_display() {
        for status in [
            RunStatus::Running,
            RunStatus::Cancelled,
            RunStatus::Completed,
            RunStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<RunStatus>(), Ok(status));
        }
        assert!("paused".parse::<RunStatus>().is_err());
    }

    #[test]
    fn new_run_starts_on_first_attempt() {
        let run = WorkflowRun::new(
            Uuid::now_v7(),
            "analyze-submission",
            Uuid::now_v7(),
            "grading/analyze-submission",
            "sub-1",
            serde_json::json!({}),
        );
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.attempt, 1);
        assert!(run.error.is_none());
    }

    #[test]
    fn step_outcome_is_tagged() {
        let outcome = StepOutcome::Failure {
            message: "bad".into(),
            category: ErrorCategory::ValidationError,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["kind"], "failure");
        assert_eq!(json["category"], "validation_error");
    }

    #[test]
    fn step_failure_classifies_message() {
        let failure = StepFailure::new("upstream timed out");
        assert_eq!(failure.category, ErrorCategory::ApiTimeout);
        assert!(failure.retriable);

        let fatal = StepFailure::fatal("submission missing", ErrorCategory::ValidationError);
        assert!(!fatal.retriable);
        assert_eq!(fatal.to_string(), "submission missing");
    }

    #[test]
    fn internal_records_are_flagged() {
        let run_id = Uuid::now_v7();
        assert!(StepRecord::success(run_id, EXHAUSTED_STEP, serde_json::Value::Null).is_internal());
        assert!(!StepRecord::success(run_id, "analyze", serde_json::Value::Null).is_internal());
    }
}
