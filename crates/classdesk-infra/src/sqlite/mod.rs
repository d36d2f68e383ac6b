//! SQLite storage layer.
//!
//! Repository implementations backed by SQLite with WAL mode and split
//! read/write connection pools.

pub mod directory;
pub mod grading;
pub mod import;
pub mod pool;
pub mod workflow;

pub use directory::SqliteDirectory;
pub use grading::SqliteGradingRepository;
pub use import::SqliteImportRepository;
pub use pool::DatabasePool;
pub use workflow::SqliteWorkflowRepository;

use chrono::{DateTime, Utc};
use classdesk_types::error::RepositoryError;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Shared column helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Parse a status-like column through its `FromStr` impl.
fn parse_enum<T: std::str::FromStr<Err = String>>(s: &str) -> Result<T, RepositoryError> {
    s.parse::<T>().map_err(RepositoryError::Query)
}

fn query_error(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}
