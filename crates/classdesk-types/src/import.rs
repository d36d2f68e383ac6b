//! Bulk CSV user import: import logs, per-row logs and member roles.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorCategory;
use crate::workflow::RunStatusView;

// ---------------------------------------------------------------------------
// Import log
// ---------------------------------------------------------------------------

/// `PENDING -> PROCESSING -> {COMPLETED, PARTIAL, FAILED}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportStatus {
    Pending,
    Processing,
    Completed,
    Partial,
    Failed,
}

impl ImportStatus {
    /// Final status once every batch has finished.
    ///
    /// `COMPLETED` when no row failed, `FAILED` when rows failed and none was
    /// imported, `PARTIAL` otherwise.
    pub fn derive(imported: u32, failed: u32) -> Self {
        if failed == 0 {
            ImportStatus::Completed
        } else if imported == 0 {
            ImportStatus::Failed
        } else {
            ImportStatus::Partial
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ImportStatus::Completed | ImportStatus::Partial | ImportStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Pending => "PENDING",
            ImportStatus::Processing => "PROCESSING",
            ImportStatus::Completed => "COMPLETED",
            ImportStatus::Partial => "PARTIAL",
            ImportStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ImportStatus::Pending),
            "PROCESSING" => Ok(ImportStatus::Processing),
            "COMPLETED" => Ok(ImportStatus::Completed),
            "PARTIAL" => Ok(ImportStatus::Partial),
            "FAILED" => Ok(ImportStatus::Failed),
            other => Err(format!("invalid import status: '{other}'")),
        }
    }
}

/// One uploaded CSV file and its aggregate progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvImportLog {
    pub id: Uuid,
    pub center_id: Uuid,
    pub requested_by: Uuid,
    pub file_name: String,
    pub status: ImportStatus,
    pub total_rows: u32,
    pub valid_rows: u32,
    pub imported_count: u32,
    pub failed_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl CsvImportLog {
    pub fn status_view(&self) -> RunStatusView {
        RunStatusView {
            status: self.status.to_string(),
            error: self.error.clone(),
            error_category: self.error_category,
            terminal: self.status.is_terminal(),
        }
    }
}

/// Row counts recomputed from row logs after each batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportCounters {
    pub imported: u32,
    pub failed: u32,
}

// ---------------------------------------------------------------------------
// Row log
// ---------------------------------------------------------------------------

/// Validation states are assigned at upload time; `IMPORTED` and `FAILED`
/// during workflow execution for rows that were `VALID`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowStatus {
    Valid,
    DuplicateInCsv,
    DuplicateInCenter,
    Error,
    Imported,
    Failed,
}

impl RowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowStatus::Valid => "VALID",
            RowStatus::DuplicateInCsv => "DUPLICATE_IN_CSV",
            RowStatus::DuplicateInCenter => "DUPLICATE_IN_CENTER",
            RowStatus::Error => "ERROR",
            RowStatus::Imported => "IMPORTED",
            RowStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VALID" => Ok(RowStatus::Valid),
            "DUPLICATE_IN_CSV" => Ok(RowStatus::DuplicateInCsv),
            "DUPLICATE_IN_CENTER" => Ok(RowStatus::DuplicateInCenter),
            "ERROR" => Ok(RowStatus::Error),
            "IMPORTED" => Ok(RowStatus::Imported),
            "FAILED" => Ok(RowStatus::Failed),
            other => Err(format!("invalid row status: '{other}'")),
        }
    }
}

/// Role assigned to an imported member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Student,
    Teacher,
    Staff,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Student => "student",
            MemberRole::Teacher => "teacher",
            MemberRole::Staff => "staff",
        }
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemberRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "student" => Ok(MemberRole::Student),
            "teacher" => Ok(MemberRole::Teacher),
            "staff" => Ok(MemberRole::Staff),
            other => Err(format!("invalid role: '{other}'")),
        }
    }
}

/// One raw row from the uploaded file, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsvRowInput {
    /// 1-based data row number (header excluded).
    pub row_number: u32,
    pub name: String,
    pub email: String,
    pub role: String,
}

/// Per-row outcome of an import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsvImportRowLog {
    pub id: Uuid,
    pub import_log_id: Uuid,
    pub row_number: u32,
    pub name: String,
    pub email: String,
    pub role: String,
    pub status: RowStatus,
    /// Validation or provisioning failure reason, kept for selective retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Members
// ---------------------------------------------------------------------------

/// A user belonging to a center.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub user_id: Uuid,
    pub center_id: Uuid,
    pub name: String,
    pub email: String,
    pub role: MemberRole,
}

/// Input for provisioning a member from a validated row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMember {
    pub name: String,
    pub email: String,
    pub role: MemberRole,
}
