//! Configuration management
//!
//! Loads configuration from config.toml at startup.
//! Every section is optional and falls back to its defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Receive buffer sizing (both sides)
    #[serde(default)]
    pub buffer: BufferConfig,

    /// Client session settings
    #[serde(default)]
    pub client: ClientConfig,

    /// Listener settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Latency probe settings
    #[serde(default)]
    pub keepalive: KeepaliveConfig,
}

/// Receive buffer configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BufferConfig {
    /// Grow the buffer on demand instead of using a fixed size
    #[serde(default = "default_use_adaptive")]
    pub use_adaptive_buffer: bool,

    /// Upper bound for the adaptive buffer in KB (0 = unbounded)
    #[serde(default = "default_buffer_kb")]
    pub adaptive_cap_kb: usize,

    /// Size of the fixed buffer in KB (only when adaptive is off)
    #[serde(default = "default_buffer_kb")]
    pub fixed_buffer_kb: usize,
}

/// Client session configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Endpoint used by the demo binary
    #[serde(default = "default_client_url")]
    pub url: String,

    /// Give up on the transport handshake after this many seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address to listen on, e.g. `ws://0.0.0.0:8080/`
    #[serde(default = "default_server_url")]
    pub url: String,

    /// Answer plain HTTP requests with 400 instead of ignoring them
    #[serde(default)]
    pub refuse_non_upgrade_requests: bool,
}

/// Latency probe configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeepaliveConfig {
    /// How long a ping waits for its pong
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_ms: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            use_adaptive_buffer: default_use_adaptive(),
            adaptive_cap_kb: default_buffer_kb(),
            fixed_buffer_kb: default_buffer_kb(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_client_url(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_server_url(),
            refuse_non_upgrade_requests: false,
        }
    }
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            pong_timeout_ms: default_pong_timeout(),
        }
    }
}

fn default_use_adaptive() -> bool {
    true
}

fn default_buffer_kb() -> usize {
    100
}

fn default_client_url() -> String {
    "ws://127.0.0.1:8080/".to_string()
}

fn default_server_url() -> String {
    "ws://0.0.0.0:8080/".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_pong_timeout() -> u64 {
    5_000
}

impl Config {
    /// Load configuration from config.toml file
    ///
    /// The path can be overridden with `CONFIG_PATH`.
    /// If the file doesn't exist, returns default configuration.
    /// # Errors
    /// Returns error if file exists but cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => Self::from_toml(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File not found - use defaults
                Ok(Config::default())
            }
            Err(e) => Err(ConfigError::IoError(e)),
        }
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    #[inline]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.client.connect_timeout_secs)
    }

    #[inline]
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.keepalive.pong_timeout_ms)
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading file
    IoError(std::io::Error),
    /// Parse error (invalid TOML)
    ParseError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::ParseError(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError(e) => Some(e),
            ConfigError::ParseError(_) => None,
        }
    }
}

impl From<ConfigError> for crate::WsLinkError {
    fn from(err: ConfigError) -> Self {
        crate::WsLinkError::Config(err.to_string())
    }
}
