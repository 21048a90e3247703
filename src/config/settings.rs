//! Configuration structures for seqlog

use crate::{Result, SeqlogError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::filter::LevelFilter;

fn default_log_level() -> u8 {
    2
}

fn default_grace_secs() -> f64 {
    0.5
}

/// Daemon configuration snapshot
///
/// One immutable snapshot is active at a time. A reload parses a fresh
/// snapshot from the same file and swaps it in; the listen address from the
/// first snapshot stays authoritative for the life of the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log verbosity, 0 (errors only) through 4 (trace)
    #[serde(default = "default_log_level")]
    pub log_level: u8,
    /// File that received records are appended to
    pub log_file: PathBuf,
    /// File the daemon pid is written to
    #[serde(default)]
    pub pid_file: Option<PathBuf>,
    /// Sync the log file every N records; 0 syncs only at shutdown
    #[serde(default)]
    pub sync_rate: u64,
    /// Unix socket path the daemon listens on, fixed after first load
    pub socket_path: PathBuf,
    /// Seconds to wait for producers to finish after connections are half-closed
    #[serde(default = "default_grace_secs")]
    pub shutdown_grace_secs: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: PathBuf::from("/var/log/seqlog/records.log"),
            pid_file: None,
            sync_rate: 0,
            socket_path: PathBuf::from("/run/seqlog.sock"),
            shutdown_grace_secs: default_grace_secs(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SeqlogError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| SeqlogError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.socket_path.as_os_str().is_empty() {
            return Err(SeqlogError::Config(
                "Socket path cannot be empty".to_string(),
            ));
        }
        if self.log_file.as_os_str().is_empty() {
            return Err(SeqlogError::Config(
                "Log file path cannot be empty".to_string(),
            ));
        }
        if !self.shutdown_grace_secs.is_finite() || self.shutdown_grace_secs < 0.0 {
            return Err(SeqlogError::Config(
                "Shutdown grace period must be a non-negative number of seconds".to_string(),
            ));
        }
        Ok(())
    }

    /// Tracing level filter corresponding to the numeric log level
    pub fn level_filter(&self) -> LevelFilter {
        match self.log_level {
            0 => LevelFilter::ERROR,
            1 => LevelFilter::WARN,
            2 => LevelFilter::INFO,
            3 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }

    /// Shutdown grace period as a duration
    pub fn grace_period(&self) -> Duration {
        // validate() guarantees the value is finite and non-negative
        Duration::try_from_secs_f64(self.shutdown_grace_secs).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            log_level = 3
            log_file = "/tmp/seqlog-test/records.log"
            pid_file = "/tmp/seqlog-test/seqlogd.pid"
            sync_rate = 100
            socket_path = "/tmp/seqlog-test/seqlog.sock"
            shutdown_grace_secs = 0.25
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.log_level, 3);
        assert_eq!(config.sync_rate, 100);
        assert_eq!(
            config.pid_file.as_deref(),
            Some(Path::new("/tmp/seqlog-test/seqlogd.pid"))
        );
        assert_eq!(config.grace_period(), Duration::from_millis(250));
    }

    #[test]
    fn test_optional_fields_default() {
        let toml = r#"
            log_file = "records.log"
            socket_path = "seqlog.sock"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.log_level, 2);
        assert_eq!(config.sync_rate, 0);
        assert!(config.pid_file.is_none());
        assert_eq!(config.shutdown_grace_secs, 0.5);
    }

    #[test]
    fn test_required_fields() {
        let missing_log_file: std::result::Result<Config, _> =
            toml::from_str(r#"socket_path = "seqlog.sock""#);
        assert!(missing_log_file.is_err());

        let missing_socket: std::result::Result<Config, _> =
            toml::from_str(r#"log_file = "records.log""#);
        assert!(missing_socket.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_grace() {
        let mut config = Config::default();
        config.shutdown_grace_secs = -1.0;
        assert!(config.validate().is_err());

        config.shutdown_grace_secs = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_level_filter_mapping() {
        let mut config = Config::default();

        config.log_level = 0;
        assert_eq!(config.level_filter(), LevelFilter::ERROR);
        config.log_level = 1;
        assert_eq!(config.level_filter(), LevelFilter::WARN);
        config.log_level = 2;
        assert_eq!(config.level_filter(), LevelFilter::INFO);
        config.log_level = 3;
        assert_eq!(config.level_filter(), LevelFilter::DEBUG);
        config.log_level = 9;
        assert_eq!(config.level_filter(), LevelFilter::TRACE);
    }

    #[test]
    fn test_from_file_missing() {
        let result = Config::from_file("/nonexistent/seqlogd.toml");
        assert!(matches!(result, Err(SeqlogError::Config(_))));
    }
}
