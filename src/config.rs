use crate::core::{OtpgateError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level configuration structure parsed from a TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db: DbConfig,
    pub log: LogConfig,
    pub queue: QueueConfig,
}

/// Database connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// `sqlite:<path>` or `sqlite::memory:`
    pub dsn: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub charset: Option<String>,
    /// Substituted for `%` inside `{{...}}` table tokens
    pub table_prefix: String,
    /// First character opens a quoted table name, last one closes it
    pub table_quote: String,
    pub column_quote: String,
    /// Statements run once right after the handle opens
    pub pragmas: Vec<String>,
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig {
            dsn: "sqlite::memory:".to_string(),
            username: None,
            password: None,
            charset: None,
            table_prefix: String::new(),
            table_quote: "`".to_string(),
            column_quote: "`".to_string(),
            pragmas: vec!["PRAGMA foreign_keys = ON".to_string()],
        }
    }
}

/// Where statement failures are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    #[default]
    Tracing,
    File,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub target: LogTarget,
    pub path: PathBuf,
    pub file_name: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            target: LogTarget::Tracing,
            path: PathBuf::from("logs"),
            file_name: "app_log.txt".to_string(),
        }
    }
}

/// Background queue settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// A job goes to the error state once its retry count exceeds this
    pub max_retries: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig { max_retries: 5 }
    }
}

/// Loads configuration from a TOML file at the given path.
///
/// # Arguments
///
/// * `path` - The file path to the TOML configuration file.
///
/// # Example
///
/// ```no_run
/// let config = otpgate::config::load_config("otpgate.toml").expect("Failed to load config");
/// println!("{:?}", config.db.dsn);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses configuration from TOML text. Missing sections take defaults.
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).map_err(|e| OtpgateError::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CONFIG: &str = r#"
[db]
dsn = "sqlite:/var/lib/otpgate/app.db"
table_prefix = "app_"
pragmas = ["PRAGMA journal_mode = WAL"]

[log]
target = "file"
path = "/var/log/otpgate"

[queue]
max_retries = 3
"#;

    #[test]
    fn test_load_config_from_str() {
        let config = parse_config(SAMPLE_CONFIG).expect("Failed to parse sample config");
        assert_eq!(config.db.dsn, "sqlite:/var/lib/otpgate/app.db");
        assert_eq!(config.db.table_prefix, "app_");
        assert_eq!(config.db.table_quote, "`");
        assert_eq!(config.db.pragmas, vec!["PRAGMA journal_mode = WAL"]);
        assert_eq!(config.log.target, LogTarget::File);
        assert_eq!(config.log.file_name, "app_log.txt");
        assert_eq!(config.queue.max_retries, 3);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.db.dsn, "sqlite::memory:");
        assert_eq!(config.log.target, LogTarget::Tracing);
        assert_eq!(config.queue.max_retries, 5);
    }

    #[test]
    fn test_invalid_config_is_reported() {
        assert!(matches!(
            parse_config("[log]\ntarget = \"syslog\""),
            Err(OtpgateError::Config(_))
        ));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("otpgate.toml");
        fs::write(&path, SAMPLE_CONFIG).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.queue.max_retries, 3);

        assert!(matches!(
            load_config(dir.path().join("missing.toml")),
            Err(OtpgateError::Io(_))
        ));
    }
}
