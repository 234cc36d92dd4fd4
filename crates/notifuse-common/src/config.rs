//! Configuration for Notifuse

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable pointing at an explicit config file
pub const CONFIG_ENV_VAR: &str = "NOTIFUSE_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// API key authentication
    #[serde(default)]
    pub auth: AuthConfig,

    /// Inbound provider webhook handling
    #[serde(default)]
    pub webhooks: WebhookConfig,

    /// Open/click tracking and unsubscribe links
    #[serde(default)]
    pub tracking: TrackingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
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

    /// Run embedded migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    2
}

fn default_run_migrations() -> bool {
    true
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API port
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Per-request timeout in seconds; bounds how long a lifecycle
    /// operation may wait for its event acknowledgement
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_api_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
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
    "json".to_string()
}

/// API key authentication configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub api_keys: Vec<ApiKeyConfig>,
}

/// One API key granting access to a workspace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    /// Workspace the key is scoped to
    pub workspace_id: String,

    /// User the key acts as
    pub user_id: String,

    /// Human-readable label
    pub name: Option<String>,

    /// Argon2 PHC string or legacy SHA-256 hex digest of the key
    pub key_hash: String,
}

/// Webhook ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Only confirm SNS subscriptions against https amazonaws.com hosts
    #[serde(default = "default_verify_sns_subscribe_host")]
    pub verify_sns_subscribe_host: bool,

    /// Timeout for outbound confirmation requests in seconds
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            verify_sns_subscribe_host: default_verify_sns_subscribe_host(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

fn default_verify_sns_subscribe_host() -> bool {
    true
}

fn default_http_timeout() -> u64 {
    10
}

/// Tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Public base URL serving open pixels and unsubscribe pages
    pub endpoint: Option<String>,

    /// Secret used to sign unsubscribe tokens
    #[serde(default = "default_unsubscribe_secret")]
    pub unsubscribe_secret: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            unsubscribe_secret: default_unsubscribe_secret(),
        }
    }
}

fn default_unsubscribe_secret() -> String {
    "change-me".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML document
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from `$NOTIFUSE_CONFIG` or the default locations
    pub fn load() -> crate::Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::from_file(Path::new(&path));
        }

        let paths = [
            PathBuf::from("./config.toml"),
            PathBuf::from("/etc/notifuse/config.toml"),
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
