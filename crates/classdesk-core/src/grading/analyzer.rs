//! GradingAnalyzer trait: the AI collaborator that reviews submissions.
//!
//! Implementations live in classdesk-infra (e.g. `HttpGradingAnalyzer`).
//! The analyzer returns the raw model text; turning it into a
//! [`GradingAnalysis`] happens in [`parse_analysis`] so a malformed reply is
//! classified the same way regardless of the provider.

use classdesk_types::error::ErrorCategory;
use classdesk_types::grading::{AnalysisRequest, GradingAnalysis};
use classdesk_types::workflow::StepFailure;

/// Errors from an analysis call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalyzerError {
    #[error("analysis request timed out")]
    Timeout,

    #[error("rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("provider error: {0}")]
    Provider(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("authentication failed")]
    AuthenticationFailed,
}

impl AnalyzerError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            AnalyzerError::Timeout => ErrorCategory::ApiTimeout,
            AnalyzerError::RateLimited { .. } => ErrorCategory::RateLimit,
            AnalyzerError::InvalidResponse(_) => ErrorCategory::InvalidResponse,
            AnalyzerError::Provider(message) => ErrorCategory::classify(message),
            AnalyzerError::AuthenticationFailed => ErrorCategory::Other,
        }
    }

    /// Missing or rejected credentials will not fix themselves on retry.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, AnalyzerError::AuthenticationFailed)
    }
}

impl From<AnalyzerError> for StepFailure {
    fn from(err: AnalyzerError) -> Self {
        let category = err.category();
        if err.is_retriable() {
            StepFailure::categorized(err.to_string(), category)
        } else {
            StepFailure::fatal(err.to_string(), category)
        }
    }
}

/// Trait for grading analysis backends.
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition).
pub trait GradingAnalyzer: Send + Sync {
    /// Human-readable backend name (e.g. "anthropic").
    fn name(&self) -> &str;

    /// Analyze a submission and return the raw model reply.
    fn analyze(
        &self,
        request: &AnalysisRequest,
    ) -> impl std::future::Future<Output = Result<String, AnalyzerError>> + Send;
}

/// Parse and validate a raw analyzer reply.
///
/// Accepts bare JSON or JSON wrapped in prose or a fenced code block; the
/// outermost object is used. Unparseable replies are `invalid_response`,
/// contract violations are `validation_error`. Both stay retriable: the
/// model may answer correctly on the next call.
pub fn parse_analysis(raw: &str) -> Result<GradingAnalysis, StepFailure> {
    let json = extract_object(raw).ok_or_else(|| {
        StepFailure::categorized(
            "invalid response: no JSON object in analyzer reply",
            ErrorCategory::InvalidResponse,
        )
    })?;

    let analysis: GradingAnalysis = serde_json::from_str(json).map_err(|e| {
        StepFailure::categorized(
            format!("invalid response: {e}"),
            ErrorCategory::InvalidResponse,
        )
    })?;

    analysis
        .validate()
        .map_err(|message| StepFailure::categorized(message, ErrorCategory::ValidationError))?;

    Ok(analysis)
}

fn extract_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}
