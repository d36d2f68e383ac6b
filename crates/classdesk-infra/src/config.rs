//! Configuration loader for Classdesk.
//!
//! Reads `config.toml` from the data directory (`~/.classdesk/` in production)
//! and deserializes it into [`ClassdeskConfig`]. Falls back to defaults when
//! the file is missing or malformed.

use std::path::{Path, PathBuf};

use classdesk_types::config::ClassdeskConfig;

/// Errors building configured collaborators (analyzer, mailer).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    MissingApiKey(String),

    #[error("invalid endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Read an API key from the environment variable named in the config.
pub fn api_key_from_env(var: &str) -> Result<secrecy::SecretString, ConfigError> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(secrecy::SecretString::from(key)),
        _ => Err(ConfigError::MissingApiKey(var.to_string())),
    }
}

/// Resolve the data directory.
///
/// Priority:
/// 1. `CLASSDESK_DATA_DIR` environment variable
/// 2. `~/.classdesk`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CLASSDESK_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".classdesk");
    }

    // Last resort: current directory
    PathBuf::from(".classdesk")
}

/// Load configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`ClassdeskConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
pub async fn load_config(data_dir: &Path) -> ClassdeskConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return ClassdeskConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return ClassdeskConfig::default();
        }
    };

    match toml::from_str::<ClassdeskConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            ClassdeskConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_api_key_is_reported_by_name() {
        let err = api_key_from_env("CLASSDESK_TEST_UNSET_KEY_VAR").unwrap_err();
        assert_eq!(
            err.to_string(),
            "environment variable CLASSDESK_TEST_UNSET_KEY_VAR is not set"
        );
    }

    #[tokio::test]
    async fn missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(tmp.path()).await;
        assert_eq!(config.engine.max_attempts, 3);
        assert_eq!(config.csv_import.batch_size, 10);
    }

    #[tokio::test]
    async fn valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
[engine]
max_attempts = 5
poll_interval_secs = 2

[notifications]
debounce_secs = 30

[mail]
endpoint = "https://mail.example.com/v1/send"
"#,
        )
        .await
        .unwrap();

        let config = load_config(tmp.path()).await;
        assert_eq!(config.engine.max_attempts, 5);
        assert_eq!(config.engine.poll_interval_secs, 2);
        assert_eq!(config.notifications.debounce_secs, 30);
        assert_eq!(config.notifications.batch_size, 50);
        assert!(config.mail.endpoint.is_some());
    }

    #[tokio::test]
    async fn invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_config(tmp.path()).await;
        assert_eq!(config.engine.max_attempts, 3);
        assert!(config.mail.endpoint.is_none());
    }
}
