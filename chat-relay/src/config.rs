//! Configuration loading for chat-relay.
//!
//! Configuration is loaded from a TOML file (default: `relay.toml`), then
//! a small set of environment overrides is applied for container hosts.

use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration for chat-relay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Rate limiting configuration.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Credential verification.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Invite code lifetime.
    #[serde(default)]
    pub invites: InviteConfig,
    /// HTTP endpoints configuration.
    #[serde(default)]
    pub http: HttpConfig,
    /// Cleanup task configuration.
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for HTTP and WebSocket traffic (default: 0.0.0.0:8080).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
    /// Connection pool size (default: 10).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// How long a connection waits on a locked database (default: 5000ms).
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Attempts per transaction before a transient conflict is surfaced (default: 5).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Relay connections per identity per minute (default: 30).
    #[serde(default = "default_connections_per_minute")]
    pub connections_per_minute: u32,
    /// Relay frames per identity per minute (default: 600).
    #[serde(default = "default_messages_per_minute")]
    pub messages_per_minute: u32,
    /// Relay frames per second across all identities (default: 5000).
    #[serde(default = "default_global_messages_per_second")]
    pub global_messages_per_second: u32,
    /// Outbound frames buffered per connection before new ones are dropped (default: 64).
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

/// Credential verification configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Prefix of bearer tokens accepted by the token authenticator (default: `token_`).
    #[serde(default = "default_token_prefix")]
    pub token_prefix: String,
}

/// Invite configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct InviteConfig {
    /// Lifetime of a fresh invite code in seconds (default: 300).
    #[serde(default = "default_invite_ttl")]
    pub ttl_secs: u64,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Enable metrics endpoint (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Maximum request body size in bytes (default: 8MB).
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Cleanup task configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// Cleanup interval in seconds (default: 3600 = 1 hour).
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,
    /// Enable cleanup task (default: true).
    #[serde(default = "default_cleanup_enabled")]
    pub enabled: bool,
    /// How long expired invites are kept before deletion (default: 3600).
    #[serde(default = "default_invite_retention")]
    pub invite_retention_secs: u64,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("relay.db")
}

fn default_max_connections() -> u32 {
    10
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_connections_per_minute() -> u32 {
    30
}

fn default_messages_per_minute() -> u32 {
    600
}

fn default_global_messages_per_second() -> u32 {
    5000
}

fn default_outbound_queue() -> usize {
    64
}

fn default_token_prefix() -> String {
    "token_".to_string()
}

fn default_invite_ttl() -> u64 {
    5 * 60
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_max_body_bytes() -> usize {
    8 * 1024 * 1024 // 8MB
}

fn default_cleanup_interval() -> u64 {
    3600 // 1 hour
}

fn default_cleanup_enabled() -> bool {
    true
}

fn default_invite_retention() -> u64 {
    3600
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            connections_per_minute: default_connections_per_minute(),
            messages_per_minute: default_messages_per_minute(),
            global_messages_per_second: default_global_messages_per_second(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_prefix: default_token_prefix(),
        }
    }
}

impl Default for InviteConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_invite_ttl(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: default_metrics_enabled(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cleanup_interval(),
            enabled: default_cleanup_enabled(),
            invite_retention_secs: default_invite_retention(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Apply environment overrides.
    ///
    /// `PORT` replaces the port of `server.bind_address`;
    /// `CHAT_RELAY_DATABASE` replaces `storage.database`.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(
            std::env::var("PORT").ok().as_deref(),
            std::env::var("CHAT_RELAY_DATABASE").ok().as_deref(),
        )
    }

    fn apply_overrides(&mut self, port: Option<&str>, database: Option<&str>) -> Result<(), ConfigError> {
        if let Some(port) = port {
            let port: u16 = port.trim().parse().map_err(|_| ConfigError::InvalidValue {
                field: "PORT",
                reason: format!("not a port number: {port:?}"),
            })?;
            let host = self
                .server
                .bind_address
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            self.server.bind_address = format!("{host}:{port}");
        }
        if let Some(database) = database.filter(|d| !d.trim().is_empty()) {
            self.storage.database = PathBuf::from(database.trim());
        }
        Ok(())
    }

    /// Reject values that would make the server unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&'static str, bool); 6] = [
            ("limits.connections_per_minute", self.limits.connections_per_minute == 0),
            ("limits.messages_per_minute", self.limits.messages_per_minute == 0),
            ("limits.global_messages_per_second", self.limits.global_messages_per_second == 0),
            ("limits.outbound_queue", self.limits.outbound_queue == 0),
            ("storage.max_attempts", self.storage.max_attempts == 0),
            ("storage.max_connections", self.storage.max_connections == 0),
        ];
        for (field, is_zero) in checks {
            if is_zero {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Offending setting.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}
