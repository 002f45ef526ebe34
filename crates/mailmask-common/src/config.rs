//! Configuration for mailmask

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Inbound mail configuration
    #[serde(default)]
    pub mail: MailConfig,

    /// Transaction log configuration
    #[serde(default)]
    pub transactions: TransactionConfig,

    /// Outbound relay configuration
    #[serde(default)]
    pub outbound: OutboundConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Hostname used in the SMTP banner
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Bind address for the inbound SMTP listener
    #[serde(default = "default_smtp_bind")]
    pub smtp_bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            smtp_bind: default_smtp_bind(),
        }
    }
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_smtp_bind() -> String {
    "0.0.0.0:25".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

/// Inbound mail configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// Domains this instance accepts mail for
    #[serde(default)]
    pub domains: Vec<String>,

    /// Maximum inbound message size in bytes
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: usize,

    /// Wrap forwarded messages as a quoted copy inside a fresh message
    #[serde(default)]
    pub rewrite_as_quoted: bool,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            domains: Vec::new(),
            max_size_bytes: default_max_size_bytes(),
            rewrite_as_quoted: false,
        }
    }
}

fn default_max_size_bytes() -> usize {
    25 * 1024 * 1024 // 25 MB
}

/// Transaction log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionConfig {
    /// Days to retain transaction records; 0 disables the log entirely
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Capacity of the in-flight transaction queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_retention_days() -> u32 {
    30
}

fn default_queue_capacity() -> usize {
    1024
}

/// Outbound relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundConfig {
    /// Relay host forwarded mail is handed to
    #[serde(default = "default_outbound_host")]
    pub host: String,

    /// Relay port
    #[serde(default = "default_outbound_port")]
    pub port: u16,

    /// Optional relay credentials
    pub username: Option<String>,
    pub password: Option<String>,

    /// Upper bound on concurrent outbound sends
    #[serde(default = "default_max_concurrent_sends")]
    pub max_concurrent_sends: usize,

    /// Log the full transformed message before dispatch
    #[serde(default)]
    pub debug: bool,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            host: default_outbound_host(),
            port: default_outbound_port(),
            username: None,
            password: None,
            max_concurrent_sends: default_max_concurrent_sends(),
            debug: false,
        }
    }
}

fn default_outbound_host() -> String {
    "localhost".to_string()
}

fn default_outbound_port() -> u16 {
    25
}

fn default_max_concurrent_sends() -> usize {
    32
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Load configuration from the default locations
    pub fn load() -> crate::Result<Self> {
        let paths = [
            std::path::PathBuf::from("./config.toml"),
            std::path::PathBuf::from("/etc/mailmask/config.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }
}
