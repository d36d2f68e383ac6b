//! Mailer that only writes a log line per message. Used when no mail
//! provider is configured.

use classdesk_core::notify::mailer::{MailError, Mailer};
use classdesk_types::notification::EmailMessage;

#[derive(Debug, Clone)]
pub struct LogMailer {
    from: String,
}

impl LogMailer {
    pub fn new(from: &str) -> Self {
        Self {
            from: from.to_string(),
        }
    }
}

impl Mailer for LogMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        tracing::info!(
            from = %self.from,
            to = %message.to,
            subject = %message.subject,
            idempotency_key = %message.idempotency_key,
            "email (log backend)"
        );
        Ok(())
    }
}
