//! HttpMailer: posts messages to a transactional mail API.
//!
//! Body is `{from, to, subject, text}`; the message's idempotency key goes
//! in the `Idempotency-Key` header so the provider drops re-sends.

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use classdesk_core::notify::mailer::{MailError, Mailer};
use classdesk_types::notification::EmailMessage;

use crate::config::ConfigError;

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

/// Does not derive `Debug`; holds the provider key.
pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: String,
    from: String,
    api_key: SecretString,
}

impl HttpMailer {
    const TIMEOUT_SECS: u64 = 30;

    pub fn new(endpoint: &str, from: &str, api_key: SecretString) -> Result<Self, ConfigError> {
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ConfigError::InvalidEndpoint(endpoint.to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(Self::TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            from: from.to_string(),
            api_key,
        })
    }

    #[cfg(test)]
    fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        if let Ok(client) = reqwest::Client::builder().timeout(timeout).build() {
            self.client = client;
        }
        self
    }
}

impl Mailer for HttpMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        let body = SendRequest {
            from: &self.from,
            to: &message.to,
            subject: &message.subject,
            text: &message.body,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .header("Idempotency-Key", &message.idempotency_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MailError::Timeout
                } else {
                    MailError::Transport(format!("HTTP request failed: {e}"))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(to = %message.to, key = %message.idempotency_key, "email accepted");
            return Ok(());
        }

        let error_body = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            429 => MailError::RateLimited,
            408 => MailError::Timeout,
            400..=499 => MailError::Rejected(format!("HTTP {status}: {error_body}")),
            _ => MailError::Transport(format!("HTTP {status}: {error_body}")),
        })
    }
}
