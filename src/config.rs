//! Configuration module for redis-tap.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Which entry points the tap feeds captured data through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Socket-level capture: directional tuples, FIN on close.
    Socket,
    /// Instrumented-library capture: one tuple per connection, close hook.
    Library,
}

/// Command-line arguments for the tap
#[derive(Parser, Debug)]
#[command(name = "redis-tap")]
#[command(author = "redis-tap authors")]
#[command(version = "0.1.0")]
#[command(about = "A Redis proxy that correlates GET/SET requests with responses", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to accept clients on (e.g., 127.0.0.1:7379)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Redis server to forward to (e.g., 127.0.0.1:6379)
    #[arg(short = 'u', long)]
    pub upstream: Option<String>,

    /// Capture path to exercise
    #[arg(long, value_enum)]
    pub capture: Option<CaptureMode>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Seconds between statistics reports
    #[arg(long)]
    pub report_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub tap: TapConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Proxy-related configuration
#[derive(Debug, Deserialize)]
pub struct TapConfig {
    /// Address to accept clients on
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Redis server address
    #[serde(default = "default_upstream")]
    pub upstream: String,
    /// Capture path
    #[serde(default = "default_capture")]
    pub capture: CaptureMode,
    /// Maximum concurrent proxied connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Size of each read, and so of each captured window
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Number of worker threads
    pub workers: Option<usize>,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            upstream: default_upstream(),
            capture: default_capture(),
            max_connections: default_max_connections(),
            read_buffer_size: default_read_buffer_size(),
            workers: None,
        }
    }
}

/// Statistics configuration
#[derive(Debug, Deserialize)]
pub struct StatsConfig {
    /// Seconds between reports
    #[serde(default = "default_report_interval")]
    pub report_interval: u64,
    /// Distinct keys tracked per interval
    #[serde(default = "default_max_keys")]
    pub max_keys: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            report_interval: default_report_interval(),
            max_keys: default_max_keys(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:7379".to_string()
}

fn default_upstream() -> String {
    "127.0.0.1:6379".to_string()
}

fn default_capture() -> CaptureMode {
    CaptureMode::Socket
}

fn default_max_connections() -> usize {
    10_000
}

fn default_read_buffer_size() -> usize {
    16 * 1024 // 16 KB
}

fn default_report_interval() -> u64 {
    10 // 10 seconds
}

fn default_max_keys() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub upstream: String,
    pub capture: CaptureMode,
    pub max_connections: usize,
    pub read_buffer_size: usize,
    pub workers: Option<usize>,
    pub report_interval: u64,
    pub max_keys: usize,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Self::merge(cli, toml_config);
        config.validate()?;
        Ok(config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            listen: cli.listen.unwrap_or(toml_config.tap.listen),
            upstream: cli.upstream.unwrap_or(toml_config.tap.upstream),
            capture: cli.capture.unwrap_or(toml_config.tap.capture),
            max_connections: toml_config.tap.max_connections,
            read_buffer_size: toml_config.tap.read_buffer_size,
            workers: cli.workers.or(toml_config.tap.workers),
            report_interval: cli
                .report_interval
                .unwrap_or(toml_config.stats.report_interval),
            max_keys: toml_config.stats.max_keys,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be at least 1"));
        }
        if self.read_buffer_size == 0 {
            return Err(ConfigError::Invalid("read_buffer_size must be at least 1"));
        }
        if self.report_interval == 0 {
            return Err(ConfigError::Invalid("report_interval must be at least 1"));
        }
        if self.workers == Some(0) {
            return Err(ConfigError::Invalid("workers must be at least 1"));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, std::io::Error),

    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.tap.listen, "127.0.0.1:7379");
        assert_eq!(config.tap.upstream, "127.0.0.1:6379");
        assert_eq!(config.tap.capture, CaptureMode::Socket);
        assert_eq!(config.stats.report_interval, 10);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [tap]
            listen = "0.0.0.0:7379"
            upstream = "10.0.0.5:6379"
            capture = "library"
            workers = 4
            read_buffer_size = 4096

            [stats]
            report_interval = 30
            max_keys = 50

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.tap.listen, "0.0.0.0:7379");
        assert_eq!(config.tap.upstream, "10.0.0.5:6379");
        assert_eq!(config.tap.capture, CaptureMode::Library);
        assert_eq!(config.tap.workers, Some(4));
        assert_eq!(config.tap.read_buffer_size, 4096);
        assert_eq!(config.tap.max_connections, 10_000);
        assert_eq!(config.stats.report_interval, 30);
        assert_eq!(config.stats.max_keys, 50);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_file() {
        let cli = CliArgs::parse_from([
            "redis-tap",
            "--upstream",
            "192.168.1.1:6380",
            "--capture",
            "library",
            "--log-level",
            "trace",
        ]);
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [tap]
            upstream = "10.0.0.5:6379"
            capture = "socket"

            [logging]
            level = "warn"
        "#,
        )
        .unwrap();

        let config = Config::merge(cli, toml_config);
        assert_eq!(config.upstream, "192.168.1.1:6380");
        assert_eq!(config.capture, CaptureMode::Library);
        assert_eq!(config.listen, "127.0.0.1:7379");
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let cli = CliArgs::parse_from(["redis-tap", "--report-interval", "0"]);
        let config = Config::merge(cli, TomlConfig::default());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_config_file() {
        let cli = CliArgs::parse_from(["redis-tap", "--config", "/nonexistent/redis-tap.toml"]);
        assert!(matches!(Config::from_cli(cli), Err(ConfigError::FileRead(..))));
    }
}
