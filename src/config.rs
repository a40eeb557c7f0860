//! Configuration module for the fileferry server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::runtime::ConnLimits;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the file server
#[derive(Parser, Debug, Default)]
#[command(name = "fileferry")]
#[command(author = "fileferry authors")]
#[command(version = "0.1.0")]
#[command(about = "A reactor-based file transfer server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Idle connection TTL in seconds
    #[arg(short = 't', long)]
    pub ttl: Option<u64>,

    /// Directory served by list/get and written by put
    #[arg(short = 'r', long)]
    pub root: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Number of worker threads
    pub workers: Option<usize>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// TEXT message sent to every client on connect
    #[serde(default = "default_greeting")]
    pub greeting: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: None,
            max_connections: default_max_connections(),
            greeting: default_greeting(),
        }
    }
}

/// Per-connection limits and timeouts
#[derive(Debug, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Reaper sweep interval; derived from the TTL when absent
    pub reap_interval_secs: Option<u64>,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_max_text_len")]
    pub max_text_len: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            reap_interval_secs: None,
            buffer_size: default_buffer_size(),
            max_text_len: default_max_text_len(),
        }
    }
}

/// Storage-related configuration
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
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

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_max_connections() -> usize {
    1024
}

fn default_greeting() -> Option<String> {
    Some("fileferry ready".to_string())
}

fn default_ttl_secs() -> u64 {
    300 // 5 minutes
}

fn default_buffer_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_max_text_len() -> u64 {
    64 * 1024 // 64 KB
}

fn default_root() -> PathBuf {
    PathBuf::from("./data")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Scratch buffers must at least hold a full message header.
const MIN_BUFFER_SIZE: usize = 64;

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub max_connections: usize,
    pub greeting: Option<String>,
    pub ttl_secs: u64,
    pub reap_interval_secs: Option<u64>,
    pub buffer_size: usize,
    pub max_text_len: u64,
    pub root: PathBuf,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(CliArgs::default(), TomlConfig::default())
    }
}

impl Config {
    /// Defaults with the four settings every deployment picks.
    pub fn new(host: impl Into<String>, port: u16, workers: usize, ttl: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            workers,
            ttl_secs: ttl.as_secs(),
            ..Self::default()
        }
    }

    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

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

    /// Merge CLI args with TOML config (CLI takes precedence)
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            workers: cli
                .workers
                .or(toml_config.server.workers)
                .unwrap_or_else(default_workers),
            max_connections: toml_config.server.max_connections,
            greeting: toml_config.server.greeting.filter(|g| !g.is_empty()),
            ttl_secs: cli.ttl.unwrap_or(toml_config.connection.ttl_secs),
            reap_interval_secs: toml_config.connection.reap_interval_secs,
            buffer_size: toml_config.connection.buffer_size,
            max_text_len: toml_config.connection.max_text_len,
            root: cli.root.unwrap_or(toml_config.storage.root),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be at least 1".into(),
            ));
        }
        if self.ttl_secs == 0 {
            return Err(ConfigError::Invalid("ttl_secs must be at least 1".into()));
        }
        if self.reap_interval_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "reap_interval_secs must be at least 1".into(),
            ));
        }
        if self.buffer_size < MIN_BUFFER_SIZE {
            return Err(ConfigError::Invalid(format!(
                "buffer_size must be at least {MIN_BUFFER_SIZE}"
            )));
        }
        Ok(())
    }

    /// `host:port` for binding.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        match self.reap_interval_secs {
            Some(secs) => Duration::from_secs(secs),
            None => crate::runtime::reaper::default_interval(self.ttl()),
        }
    }

    pub fn limits(&self) -> ConnLimits {
        ConnLimits {
            buffer_size: self.buffer_size,
            max_text_len: self.max_text_len,
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(reason) => write!(f, "Invalid configuration: {}", reason),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.max_connections, 1024);
        assert_eq!(config.connection.ttl_secs, 300);
        assert_eq!(config.connection.buffer_size, 64 * 1024);
        assert_eq!(config.storage.root, PathBuf::from("./data"));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "0.0.0.0"
            port = 9000
            workers = 4
            greeting = "hi"

            [connection]
            ttl_secs = 60
            reap_interval_secs = 5
            buffer_size = 4096

            [storage]
            root = "/srv/files"

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.workers, Some(4));
        assert_eq!(config.server.greeting.as_deref(), Some("hi"));
        assert_eq!(config.connection.ttl_secs, 60);
        assert_eq!(config.connection.reap_interval_secs, Some(5));
        assert_eq!(config.connection.buffer_size, 4096);
        assert_eq!(config.connection.max_text_len, 64 * 1024);
        assert_eq!(config.storage.root, PathBuf::from("/srv/files"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            port = 9000
            workers = 4

            [connection]
            ttl_secs = 60
            "#,
        )
        .unwrap();
        let cli = CliArgs {
            port: Some(7000),
            ttl: Some(10),
            log_level: Some("trace".into()),
            ..CliArgs::default()
        };

        let config = Config::merge(cli, toml_config);
        assert_eq!(config.port, 7000);
        assert_eq!(config.workers, 4);
        assert_eq!(config.ttl(), Duration::from_secs(10));
        assert_eq!(config.log_level, "trace");
        assert_eq!(config.listen_addr(), "127.0.0.1:7000");
    }

    #[test]
    fn test_reap_interval_defaults_from_ttl() {
        let config = Config::new("127.0.0.1", 0, 2, Duration::from_secs(40));
        assert_eq!(config.reap_interval(), Duration::from_secs(10));

        let config = Config {
            reap_interval_secs: Some(3),
            ..config
        };
        assert_eq!(config.reap_interval(), Duration::from_secs(3));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let base = Config::new("127.0.0.1", 0, 2, Duration::from_secs(30));
        assert!(base.validate().is_ok());

        let cases = [
            Config {
                workers: 0,
                ..base.clone()
            },
            Config {
                ttl_secs: 0,
                ..base.clone()
            },
            Config {
                buffer_size: 8,
                ..base.clone()
            },
            Config {
                max_connections: 0,
                ..base.clone()
            },
        ];
        for config in cases {
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }
    }
}
