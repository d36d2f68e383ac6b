//! AI grading entities: grading jobs, submissions and analysis results.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorCategory;
use crate::workflow::RunStatusView;

/// Score bounds accepted from the analyzer.
pub const MAX_SCORE: f64 = 100.0;

// ---------------------------------------------------------------------------
// Grading job
// ---------------------------------------------------------------------------

/// `pending -> processing -> {completed, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradingJobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl GradingJobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GradingJobStatus::Completed | GradingJobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GradingJobStatus::Pending => "pending",
            GradingJobStatus::Processing => "processing",
            GradingJobStatus::Completed => "completed",
            GradingJobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for GradingJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GradingJobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(GradingJobStatus::Pending),
            "processing" => Ok(GradingJobStatus::Processing),
            "completed" => Ok(GradingJobStatus::Completed),
            "failed" => Ok(GradingJobStatus::Failed),
            other => Err(format!("invalid grading job status: '{other}'")),
        }
    }
}

/// The single grading job of a submission. Re-triggers reuse the row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingJob {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub center_id: Uuid,
    pub status: GradingJobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    /// Submission status captured when processing started, restored on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_submission_status: Option<SubmissionStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl GradingJob {
    pub fn new(submission_id: Uuid, center_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            submission_id,
            center_id,
            status: GradingJobStatus::Pending,
            error: None,
            error_category: None,
            previous_submission_status: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn status_view(&self) -> RunStatusView {
        RunStatusView {
            status: self.status.to_string(),
            error: self.error.clone(),
            error_category: self.error_category,
            terminal: self.status.is_terminal(),
        }
    }
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// Review status of a student submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Submitted,
    Analyzing,
    Reviewed,
    Graded,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Submitted => "submitted",
            SubmissionStatus::Analyzing => "analyzing",
            SubmissionStatus::Reviewed => "reviewed",
            SubmissionStatus::Graded => "graded",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submitted" => Ok(SubmissionStatus::Submitted),
            "analyzing" => Ok(SubmissionStatus::Analyzing),
            "reviewed" => Ok(SubmissionStatus::Reviewed),
            "graded" => Ok(SubmissionStatus::Graded),
            other => Err(format!("invalid submission status: '{other}'")),
        }
    }
}

/// A student's answer to an exercise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub center_id: Uuid,
    pub student_id: Uuid,
    pub exercise_title: String,
    pub content: String,
    pub status: SubmissionStatus,
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// Request handed to the grading analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub submission_id: Uuid,
    pub exercise_title: String,
    pub content: String,
}

/// Structured feedback returned by the analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingAnalysis {
    pub score: f64,
    pub feedback: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
}

impl GradingAnalysis {
    /// Check the analysis contract: finite score within `0..=100` and
    /// non-empty feedback.
    pub fn validate(&self) -> Result<(), String> {
        if !self.score.is_finite() || !(0.0..=MAX_SCORE).contains(&self.score) {
            return Err(format!("validation failed: score {} out of range", self.score));
        }
        if self.feedback.trim().is_empty() {
            return Err("validation failed: feedback is empty".to_string());
        }
        Ok(())
    }
}
