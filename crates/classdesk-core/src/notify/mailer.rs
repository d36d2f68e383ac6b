//! Mailer trait: the outbound email collaborator.
//!
//! Implementations live in classdesk-infra (HTTP provider, log-only mailer).
//! Every message carries an idempotency key; providers drop a second
//! message with a key they have already accepted, which makes a re-executed
//! send step harmless.

use std::collections::HashSet;
use std::sync::Mutex;

use classdesk_types::error::ErrorCategory;
use classdesk_types::notification::EmailMessage;
use classdesk_types::workflow::StepFailure;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MailError {
    #[error("mail provider rate limited the request")]
    RateLimited,

    #[error("mail request timed out")]
    Timeout,

    /// The provider refused this message (bad address, blocked recipient).
    #[error("message rejected: {0}")]
    Rejected(String),

    #[error("mail transport error: {0}")]
    Transport(String),
}

impl MailError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            MailError::RateLimited => ErrorCategory::RateLimit,
            MailError::Timeout => ErrorCategory::ApiTimeout,
            MailError::Rejected(_) => ErrorCategory::ValidationError,
            MailError::Transport(message) => ErrorCategory::classify(message),
        }
    }
}

impl From<MailError> for StepFailure {
    fn from(err: MailError) -> Self {
        let category = err.category();
        match err {
            MailError::Rejected(_) => StepFailure::fatal(err.to_string(), category),
            _ => StepFailure::categorized(err.to_string(), category),
        }
    }
}

pub trait Mailer: Send + Sync {
    fn send(
        &self,
        message: &EmailMessage,
    ) -> impl std::future::Future<Output = Result<(), MailError>> + Send;
}

/// Process-local outbox that keeps every accepted message.
///
/// Deduplicates by idempotency key the way real providers do. Addresses
/// registered with [`RecordingMailer::reject`] are refused.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
    rejected: Mutex<HashSet<String>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every future message to `address`.
    pub fn reject(&self, address: &str) {
        if let Ok(mut rejected) = self.rejected.lock() {
            rejected.insert(address.to_lowercase());
        }
    }

    /// Messages accepted so far, in send order.
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Mailer for RecordingMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        let refused = self
            .rejected
            .lock()
            .map(|r| r.contains(&message.to.to_lowercase()))
            .unwrap_or(false);
        if refused {
            return Err(MailError::Rejected(format!("recipient {} refused", message.to)));
        }

        let mut sent = self
            .sent
            .lock()
            .map_err(|e| MailError::Transport(e.to_string()))?;
        if sent.iter().any(|m| m.idempotency_key == message.idempotency_key) {
            tracing::debug!(key = %message.idempotency_key, "duplicate message dropped");
            return Ok(());
        }
        sent.push(message.clone());
        Ok(())
    }
}
