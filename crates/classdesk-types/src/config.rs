//! Configuration types for Classdesk.
//!
//! `ClassdeskConfig` represents the top-level `config.toml`. Every section and
//! field has a default, so an empty file (or no file) is a valid config.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassdeskConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub grading: GradingConfig,
    #[serde(default)]
    pub csv_import: ImportConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub mail: MailConfig,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Retry, timeout and polling knobs of the workflow engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Attempts per run before the failure handler is invoked.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay between attempts; doubled for every further attempt.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Upper bound on a single step body.
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
    /// How often a worker looks for undelivered events.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1_000
}

fn default_step_timeout_secs() -> u64 {
    120
}

fn default_poll_interval_secs() -> u64 {
    5
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            step_timeout_secs: default_step_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl EngineConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

// ---------------------------------------------------------------------------
// Grading analyzer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingConfig {
    /// Messages API endpoint of the analysis provider.
    #[serde(default = "default_grading_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_grading_model")]
    pub model: String,
    /// Environment variable holding the provider API key.
    #[serde(default = "default_grading_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_grading_endpoint() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_grading_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_grading_key_env() -> String {
    "CLASSDESK_GRADING_API_KEY".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_grading_endpoint(),
            model: default_grading_model(),
            api_key_env: default_grading_key_env(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl GradingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// CSV import
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    #[serde(default = "default_import_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
}

fn default_import_batch_size() -> usize {
    10
}

fn default_batch_delay_ms() -> u64 {
    1_000
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: default_import_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
        }
    }
}

impl ImportConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Quiet window before a schedule change is announced.
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,
    #[serde(default = "default_notification_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
}

fn default_debounce_secs() -> u64 {
    120
}

fn default_notification_batch_size() -> usize {
    50
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            debounce_secs: default_debounce_secs(),
            batch_size: default_notification_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
        }
    }
}

impl NotificationConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// Mail
// ---------------------------------------------------------------------------

/// Mail provider settings. Without an endpoint, emails are only logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_mail_from")]
    pub from: String,
    #[serde(default = "default_mail_key_env")]
    pub api_key_env: String,
}

fn default_mail_from() -> String {
    "Classdesk <no-reply@classdesk.local>".to_string()
}

fn default_mail_key_env() -> String {
    "CLASSDESK_MAIL_API_KEY".to_string()
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            from: default_mail_from(),
            api_key_env: default_mail_key_env(),
        }
    }
}
