//! HttpGradingAnalyzer: sends a submission to the Messages API and returns
//! the model's raw reply.
//!
//! The API key is a [`SecretString`], exposed only when building the
//! request headers.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use classdesk_core::grading::analyzer::{AnalyzerError, GradingAnalyzer};
use classdesk_types::config::GradingConfig;
use classdesk_types::grading::AnalysisRequest;

use super::types::{MessagesRequest, MessagesResponse, MessagesTurn};
use crate::config::ConfigError;

const SYSTEM_PROMPT: &str = "You are a teaching assistant grading a student submission. \
Reply with a single JSON object and nothing else, using exactly these fields: \
\"score\" (integer 0-100), \"feedback\" (string), \
\"strengths\" (array of strings), \"improvements\" (array of strings).";

/// Grading analyzer backed by an HTTP Messages API.
///
/// Does not derive `Debug`; the key stays out of formatted output.
pub struct HttpGradingAnalyzer {
    client: reqwest::Client,
    api_key: SecretString,
    endpoint: String,
    model: String,
    max_tokens: u32,
}

impl HttpGradingAnalyzer {
    const API_VERSION: &'static str = "2023-06-01";

    pub fn new(api_key: SecretString, config: &GradingConfig) -> Result<Self, ConfigError> {
        if !config.endpoint.starts_with("http://") && !config.endpoint.starts_with("https://") {
            return Err(ConfigError::InvalidEndpoint(config.endpoint.clone()));
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            api_key,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            max_tokens: 1024,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn to_request(&self, request: &AnalysisRequest) -> MessagesRequest {
        MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: SYSTEM_PROMPT.to_string(),
            messages: vec![MessagesTurn {
                role: "user".to_string(),
                content: format!(
                    "Exercise: {}\n\nSubmission:\n{}",
                    request.exercise_title, request.content
                ),
            }],
        }
    }
}

fn transport_error(err: reqwest::Error) -> AnalyzerError {
    if err.is_timeout() {
        AnalyzerError::Timeout
    } else {
        AnalyzerError::Provider(format!("HTTP request failed: {err}"))
    }
}

/// `retry-after` in whole seconds, as milliseconds.
fn retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| Duration::from_secs(secs).as_millis() as u64)
}

impl GradingAnalyzer for HttpGradingAnalyzer {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<String, AnalyzerError> {
        let body = self.to_request(request);

        tracing::debug!(
            submission_id = %request.submission_id,
            model = %self.model,
            "requesting submission analysis"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", Self::API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_ms(response.headers());
            let error_body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => AnalyzerError::AuthenticationFailed,
                429 => AnalyzerError::RateLimited {
                    retry_after_ms: retry_after,
                },
                _ => AnalyzerError::Provider(format!("HTTP {status}: {error_body}")),
            });
        }

        let bytes = response.bytes().await.map_err(transport_error)?;
        let parsed: MessagesResponse = serde_json::from_slice(&bytes).map_err(|e| {
            AnalyzerError::InvalidResponse(format!("failed to parse response: {e}"))
        })?;

        tracing::debug!(
            submission_id = %request.submission_id,
            message_id = parsed.id.as_deref().unwrap_or("-"),
            "analysis reply received"
        );

        Ok(parsed.text())
    }
}
