use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from repository operations (used by trait definitions in classdesk-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Failure taxonomy written to domain entities when a run exhausts its attempts.
///
/// Assigned from the typed error of the last failing step when one is
/// available, otherwise from the raw error text via [`ErrorCategory::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// An external call exceeded its deadline.
    ApiTimeout,
    /// HTTP 429 or quota exhaustion from an external provider.
    RateLimit,
    /// Malformed, non-JSON or schema-violating provider response.
    InvalidResponse,
    /// Output failed contract validation.
    ValidationError,
    /// Anything else.
    Other,
}

impl ErrorCategory {
    /// Classify a raw error message.
    ///
    /// Checks are ordered from most to least specific: a message mentioning
    /// both a timeout and JSON is treated as a timeout.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if has(&["timeout", "timed out", "deadline exceeded"]) {
            ErrorCategory::ApiTimeout
        } else if has(&["429", "rate limit", "rate-limit", "too many requests", "quota"]) {
            ErrorCategory::RateLimit
        } else if has(&[
            "json",
            "parse",
            "malformed",
            "unexpected token",
            "invalid response",
        ]) {
            ErrorCategory::InvalidResponse
        } else if has(&["validation", "invalid", "out of range", "missing field"]) {
            ErrorCategory::ValidationError
        } else {
            ErrorCategory::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::ApiTimeout => "api_timeout",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::InvalidResponse => "invalid_response",
            ErrorCategory::ValidationError => "validation_error",
            ErrorCategory::Other => "other",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api_timeout" => Ok(ErrorCategory::ApiTimeout),
            "rate_limit" => Ok(ErrorCategory::RateLimit),
            "invalid_response" => Ok(ErrorCategory::InvalidResponse),
            "validation_error" => Ok(ErrorCategory::ValidationError),
            "other" => Ok(ErrorCategory::Other),
            other => Err(format!("invalid error category: '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }

    #[test]
    fn classify_timeouts() {
        assert_eq!(
            ErrorCategory::classify("request timed out after 60s"),
            ErrorCategory::ApiTimeout
        );
        assert_eq!(
            ErrorCategory::classify("Deadline exceeded while parsing JSON"),
            ErrorCategory::ApiTimeout
        );
    }

    #[test]
    fn classify_rate_limits() {
        assert_eq!(
            ErrorCategory::classify("HTTP 429 Too Many Requests"),
            ErrorCategory::RateLimit
        );
        assert_eq!(
            ErrorCategory::classify("monthly quota exhausted"),
            ErrorCategory::RateLimit
        );
    }

    #[test]
    fn classify_invalid_responses_and_validation() {
        assert_eq!(
            ErrorCategory::classify("expected value at line 1 column 1 (JSON)"),
            ErrorCategory::InvalidResponse
        );
        assert_eq!(
            ErrorCategory::classify("score out of range: 140"),
            ErrorCategory::ValidationError
        );
        assert_eq!(
            ErrorCategory::classify("connection reset by peer"),
            ErrorCategory::Other
        );
    }

    #[test]
    fn category_string_roundtrip() {
        for category in [
            ErrorCategory::ApiTimeout,
            ErrorCategory::RateLimit,
            ErrorCategory::InvalidResponse,
            ErrorCategory::ValidationError,
            ErrorCategory::Other,
        ] {
            assert_eq!(category.as_str().parse::<ErrorCategory>(), Ok(category));
            let json = serde_json::to_string(&category).unwrap();
            assert_eq!(json, format!("\"{}\"", category.as_str()));
        }
    }
}
