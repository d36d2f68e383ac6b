//! Outbound mail backends.
//!
//! [`ConfiguredMailer`] picks a backend from [`MailConfig`]: the HTTP
//! provider when an endpoint is configured, otherwise the log-only mailer.

pub mod http;
pub mod log;

pub use http::HttpMailer;
pub use log::LogMailer;

use classdesk_core::notify::mailer::{MailError, Mailer};
use classdesk_types::config::MailConfig;
use classdesk_types::notification::EmailMessage;

use crate::config::{ConfigError, api_key_from_env};

/// Mail backend selected at startup.
pub enum ConfiguredMailer {
    Http(HttpMailer),
    Log(LogMailer),
}

impl ConfiguredMailer {
    pub fn from_config(config: &MailConfig) -> Result<Self, ConfigError> {
        match &config.endpoint {
            Some(endpoint) => {
                let api_key = api_key_from_env(&config.api_key_env)?;
                Ok(Self::Http(HttpMailer::new(
                    endpoint,
                    &config.from,
                    api_key,
                )?))
            }
            None => Ok(Self::Log(LogMailer::new(&config.from))),
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::Log(_) => "log",
        }
    }
}

impl Mailer for ConfiguredMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        match self {
            Self::Http(mailer) => mailer.send(message).await,
            Self::Log(mailer) => mailer.send(message).await,
        }
    }
}
