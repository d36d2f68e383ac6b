//! Outbound notifications.

pub mod mailer;

pub use mailer::{MailError, Mailer, RecordingMailer};
