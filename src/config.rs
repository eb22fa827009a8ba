use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mailspool: MailspoolConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Mailspool-specific configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MailspoolConfig {
    pub db_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Background worker tuning
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Cool-down after an orchestration error escapes a batch pass,
    /// so a persistent fault cannot turn into a hot loop.
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            error_backoff_secs: default_error_backoff_secs(),
        }
    }
}

fn default_error_backoff_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in MAILSPOOL_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // Load .env file if it exists (ignore errors - file is optional)
        let _ = dotenv::dotenv();

        let config_path = std::env::var("MAILSPOOL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config = toml::from_str(&config_str)
            .context("Failed to parse config.toml")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.mailspool.db_path.as_os_str().is_empty() {
            anyhow::bail!("mailspool.db_path must not be empty");
        }

        if self.worker.error_backoff_secs == 0 {
            anyhow::bail!("worker.error_backoff_secs must be greater than 0");
        }

        Ok(())
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.mailspool.db_path
    }

    /// Cool-down duration applied after a batch orchestration error
    pub fn error_backoff(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.worker.error_backoff_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serialize config tests that mutate process-wide env so they don't race.
    static CONFIG_TEST_LOCK: Mutex<()> = Mutex::new(());

    fn with_config_env(config_path: &std::path::Path, f: impl FnOnce()) {
        let original = std::env::var("MAILSPOOL_CONFIG").ok();
        std::env::set_var("MAILSPOOL_CONFIG", config_path.to_str().unwrap());
        f();
        std::env::remove_var("MAILSPOOL_CONFIG");
        if let Some(val) = original {
            std::env::set_var("MAILSPOOL_CONFIG", val);
        }
    }

    #[test]
    fn test_config_load_success() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[mailspool]
db_path = "./test.db"
log_level = "debug"

[worker]
error_backoff_secs = 2
"#,
        )
        .unwrap();
        with_config_env(&config_path, || {
            let config = Config::load();
            assert!(config.is_ok(), "Config::load() failed: {:?}", config.err());
            let config = config.unwrap();
            assert_eq!(config.mailspool.log_level, "debug");
            assert_eq!(config.worker.error_backoff_secs, 2);
            assert_eq!(config.error_backoff(), std::time::Duration::from_secs(2));
        });
    }

    #[test]
    fn test_config_worker_defaults() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[mailspool]
db_path = "./test.db"
"#,
        )
        .unwrap();
        with_config_env(&config_path, || {
            let config = Config::load().unwrap();
            assert_eq!(config.mailspool.log_level, "info");
            assert_eq!(config.worker.error_backoff_secs, 5);
        });
    }

    #[test]
    fn test_config_rejects_zero_backoff() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[mailspool]
db_path = "./test.db"

[worker]
error_backoff_secs = 0
"#,
        )
        .unwrap();
        with_config_env(&config_path, || {
            let config = Config::load();
            assert!(config.is_err());
            assert!(config
                .unwrap_err()
                .to_string()
                .contains("error_backoff_secs"));
        });
    }

    #[test]
    fn test_config_invalid_path() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let original = std::env::var("MAILSPOOL_CONFIG").ok();
        std::env::set_var("MAILSPOOL_CONFIG", "nonexistent.toml");
        let config = Config::load();
        assert!(config.is_err());
        std::env::remove_var("MAILSPOOL_CONFIG");
        if let Some(v) = original {
            std::env::set_var("MAILSPOOL_CONFIG", v);
        }
    }
}
