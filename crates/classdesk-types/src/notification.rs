use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A person receiving a notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Recipient {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
}

/// A plain-text email handed to the mail provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Provider-side deduplication key, stable across re-executions of the
    /// same step for the same recipient.
    pub idempotency_key: String,
}

impl EmailMessage {
    pub fn new(
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
            idempotency_key: idempotency_key.into(),
        }
    }
}
