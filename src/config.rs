//! Relay configuration
//!
//! Loaded from a TOML file (every field optional) and then overridden by
//! command-line flags. A missing file yields the defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RelayError, Result};

/// Top-level relay configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub tunnel: TunnelConfig,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener and upgrade endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Path prefix of the application's own upgrade endpoint
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// Origins allowed to open an application connection
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    /// Query parameter carrying the shared secret
    #[serde(default = "default_token_query_param")]
    pub token_query_param: String,

    /// Shared secret; unset or blank means no token is required
    #[serde(default)]
    pub auth_token: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://127.0.0.1:3000".to_string(),
    ]
}

fn default_token_query_param() -> String {
    "token".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_path: default_ws_path(),
            allowed_origins: default_allowed_origins(),
            token_query_param: default_token_query_param(),
            auth_token: None,
        }
    }
}

impl ServerConfig {
    /// The configured secret after trimming, if any remains
    pub fn secret(&self) -> Option<&str> {
        self.auth_token
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Secondary upstream that receives every non-application upgrade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    #[serde(default = "default_upstream_host")]
    pub upstream_host: String,

    #[serde(default = "default_upstream_port")]
    pub upstream_port: u16,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_upstream_host() -> String {
    "127.0.0.1".to_string()
}

fn default_upstream_port() -> u16 {
    3001
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            upstream_host: default_upstream_host(),
            upstream_port: default_upstream_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl TunnelConfig {
    pub fn upstream_addr(&self) -> String {
        format!("{}:{}", self.upstream_host, self.upstream_port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Change source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Directory tree to watch
    #[serde(default = "default_watch_root")]
    pub root: PathBuf,

    /// Quiet period before a burst of writes is reported
    #[serde(default = "default_stability_threshold_ms")]
    pub stability_threshold_ms: u64,

    /// Poll interval for polling-based backends
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_watch_root() -> PathBuf {
    PathBuf::from("queue")
}

fn default_stability_threshold_ms() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    100
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            root: default_watch_root(),
            stability_threshold_ms: default_stability_threshold_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl WatchConfig {
    pub fn stability_threshold(&self) -> Duration {
        Duration::from_millis(self.stability_threshold_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Dedupe, batching and retry timings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_dedupe_window_ms")]
    pub dedupe_window_ms: u64,

    #[serde(default = "default_flush_window_ms")]
    pub flush_window_ms: u64,

    #[serde(default = "default_parse_retry_delay_ms")]
    pub parse_retry_delay_ms: u64,

    /// Upper bound on concurrently processed notifications
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_dedupe_window_ms() -> u64 {
    300
}

fn default_flush_window_ms() -> u64 {
    50
}

fn default_parse_retry_delay_ms() -> u64 {
    100
}

fn default_max_in_flight() -> usize {
    32
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            dedupe_window_ms: default_dedupe_window_ms(),
            flush_window_ms: default_flush_window_ms(),
            parse_retry_delay_ms: default_parse_retry_delay_ms(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl SyncConfig {
    pub fn dedupe_window(&self) -> Duration {
        Duration::from_millis(self.dedupe_window_ms)
    }

    pub fn flush_window(&self) -> Duration {
        Duration::from_millis(self.flush_window_ms)
    }

    pub fn parse_retry_delay(&self) -> Duration {
        Duration::from_millis(self.parse_retry_delay_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| RelayError::Config {
            message: format!("Failed to parse config: {}", e),
        })
    }
}
