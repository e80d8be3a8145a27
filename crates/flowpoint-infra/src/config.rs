//! Engine configuration loader for flowpoint.
//!
//! Reads `flowpoint.toml` and deserializes it into [`EngineConfig`]. Falls
//! back to defaults when the file is missing, malformed or out of range, so
//! a bad edit never stops the engine.

use std::path::{Path, PathBuf};

use flowpoint_types::config::EngineConfig;
use thiserror::Error;
use tokio::sync::watch;

/// File name looked up inside the data directory.
pub const CONFIG_FILE_NAME: &str = "flowpoint.toml";

/// Longest accepted resend window: 30 days.
pub const MAX_RESEND_WINDOW_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// `{data_dir}/flowpoint.toml`.
pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE_NAME)
}

/// Parse and validate TOML content.
pub fn parse_engine_config(content: &str) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.worker_count == 0 {
        return Err(ConfigError::Invalid("worker_count must be at least 1".to_string()));
    }
    if config.mailbox_capacity == 0 {
        return Err(ConfigError::Invalid("mailbox_capacity must be at least 1".to_string()));
    }
    if config.max_inline_resumes == 0 {
        return Err(ConfigError::Invalid("max_inline_resumes must be at least 1".to_string()));
    }
    check_resend_window("resend_window_secs", config.resend_window_secs)?;
    for (class_name, policy) in &config.flows {
        if let Some(secs) = policy.resend_window_secs {
            check_resend_window(&format!("flows.\"{class_name}\".resend_window_secs"), secs)?;
        }
    }
    Ok(())
}

fn check_resend_window(field: &str, secs: u64) -> Result<(), ConfigError> {
    if secs > MAX_RESEND_WINDOW_SECS {
        return Err(ConfigError::Invalid(format!(
            "{field} must be at most {MAX_RESEND_WINDOW_SECS}, got {secs}"
        )));
    }
    Ok(())
}

/// Load engine configuration from `path`.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file exists but fails to parse or validate, logs a warning and returns the default.
/// - Otherwise returns the parsed config.
pub async fn load_engine_config(path: &Path) -> EngineConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {} found, using defaults", path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return EngineConfig::default();
        }
    };

    match parse_engine_config(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to load {}: {err}, using defaults", path.display());
            EngineConfig::default()
        }
    }
}

/// Re-read `path` and publish it to running components if it changed.
///
/// Returns `true` when a new configuration was sent.
pub async fn reload_engine_config(path: &Path, sender: &watch::Sender<EngineConfig>) -> bool {
    let config = load_engine_config(path).await;
    let changed = sender.send_if_modified(|current| {
        if *current == config {
            return false;
        }
        *current = config;
        true
    });
    if changed {
        tracing::info!("engine configuration reloaded from {}", path.display());
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_engine_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(&config_path(tmp.path())).await;
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn load_engine_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        let path = config_path(tmp.path());
        tokio::fs::write(
            &path,
            r#"
max_retries = 2
resend_window_secs = 10
worker_count = 4

[initiated_context]
"corda.account" = "local"

[flows."com.example.PaymentFlow"]
max_retries = 9
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(&path).await;
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.mailbox_capacity, 256);
        assert_eq!(config.initiated_context.get("corda.account"), Some("local"));
        assert_eq!(config.policy_for("com.example.PaymentFlow").max_retries, 9);
        assert_eq!(config.policy_for("com.example.Other").max_retries, 2);
    }

    #[tokio::test]
    async fn load_engine_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        let path = config_path(tmp.path());
        tokio::fs::write(&path, "this is not { valid toml !!!")
            .await
            .unwrap();

        assert_eq!(load_engine_config(&path).await, EngineConfig::default());
    }

    #[tokio::test]
    async fn load_engine_config_out_of_range_returns_default() {
        let tmp = TempDir::new().unwrap();
        let path = config_path(tmp.path());
        tokio::fs::write(&path, "worker_count = 0\nmax_retries = 1\n")
            .await
            .unwrap();

        let config = load_engine_config(&path).await;
        assert_eq!(config.worker_count, 8);
        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn parse_engine_config_reports_invalid_values() {
        let err = parse_engine_config("mailbox_capacity = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(matches!(
            parse_engine_config("max_retries = \"many\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn parse_engine_config_bounds_resend_window() {
        assert!(parse_engine_config(&format!("resend_window_secs = {MAX_RESEND_WINDOW_SECS}")).is_ok());
        assert!(matches!(
            parse_engine_config("resend_window_secs = 9000000000000"),
            Err(ConfigError::Invalid(_))
        ));

        let err = parse_engine_config(
            "[flows.\"com.example.SlowFlow\"]\nresend_window_secs = 9000000000000\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("com.example.SlowFlow"));
    }

    #[tokio::test]
    async fn reload_publishes_only_changes() {
        let tmp = TempDir::new().unwrap();
        let path = config_path(tmp.path());
        let (tx, rx) = watch::channel(EngineConfig::default());

        assert!(!reload_engine_config(&path, &tx).await);

        tokio::fs::write(&path, "max_retries = 1\n").await.unwrap();
        assert!(reload_engine_config(&path, &tx).await);
        assert_eq!(rx.borrow().max_retries, 1);

        assert!(!reload_engine_config(&path, &tx).await);
    }
}
