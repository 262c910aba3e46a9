//! Configuration types for Pipehook

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{HookError, Result};

/// Storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Everything lives in process memory and is lost on restart
    Memory,
    /// In-memory state backed by an append-only journal file
    Journal,
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address the HTTP server listens on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Authority used for replay when the caller sent no Host header
    #[serde(default)]
    pub public_host: Option<String>,
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Endpoint lifecycle configuration
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    /// Live-view configuration
    #[serde(default)]
    pub live: LiveConfig,
    /// Replay configuration
    #[serde(default)]
    pub replay: ReplayConfig,
    /// Resource limits
    #[serde(default)]
    pub limits: LimitsConfig,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend to use
    pub backend: Backend,
    /// Journal file path (journal backend only)
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// fsync after every journal append
    #[serde(default)]
    pub sync_writes: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            path: None,
            sync_writes: false,
        }
    }
}

/// Endpoint lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    /// Lifetime given to new endpoints
    pub default_ttl_secs: u64,
    /// Upper bound for a caller-requested lifetime
    pub max_ttl_secs: u64,
    /// Interval between expiry sweeps
    pub cleanup_interval_secs: u64,
    /// Default page size for listings
    pub list_limit: usize,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 24 * 60 * 60,
            max_ttl_secs: 7 * 24 * 60 * 60,
            cleanup_interval_secs: 60 * 60,
            list_limit: 50,
        }
    }
}

/// Live-view configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Frames buffered per subscriber before new events are dropped
    pub queue_capacity: usize,
    /// Keepalive interval for WebSocket and SSE viewers
    pub heartbeat_secs: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            queue_capacity: crate::live::DEFAULT_QUEUE_CAPACITY,
            heartbeat_secs: 15,
        }
    }
}

/// Replay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Outbound call timeout
    pub timeout_secs: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

/// Resource limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Maximum captured body size in bytes
    pub max_body_size: usize,
    /// Maximum headers per request
    pub max_headers: usize,
    /// Time allowed for a client to send its request head
    pub header_read_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: 4096,
            max_body_size: 16 * 1024 * 1024, // 16 MB
            max_headers: 128,
            header_read_timeout_secs: 30,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            public_host: None,
            storage: StorageConfig::default(),
            endpoints: EndpointsConfig::default(),
            live: LiveConfig::default(),
            replay: ReplayConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HookError::ConfigError(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| HookError::ConfigError(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Load from an optional file, apply process environment overrides and validate
    ///
    /// # Errors
    ///
    /// Returns error if the file or any override is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PORT`, `DATABASE_PATH` and `MAX_BODY_SIZE` overrides
    ///
    /// # Errors
    ///
    /// Returns error if an override value cannot be parsed
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT").filter(|p| !p.trim().is_empty()) {
            let port: u16 = port
                .trim()
                .parse()
                .map_err(|e| HookError::ConfigError(format!("Invalid PORT {port:?}: {e}")))?;
            let host = self
                .listen_addr
                .rsplit_once(':')
                .map_or("0.0.0.0", |(host, _)| host);
            self.listen_addr = format!("{host}:{port}");
        }

        if let Some(path) = lookup("DATABASE_PATH").filter(|p| !p.trim().is_empty()) {
            self.storage.backend = Backend::Journal;
            self.storage.path = Some(PathBuf::from(path));
        }

        if let Some(size) = lookup("MAX_BODY_SIZE").filter(|s| !s.trim().is_empty()) {
            self.limits.max_body_size = parse_size(&size)?;
        }

        Ok(())
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;

        if self.storage.backend == Backend::Journal && self.storage.path.is_none() {
            return Err(HookError::ConfigError(
                "storage.path is required for the journal backend".to_string(),
            ));
        }

        let non_zero = [
            ("endpoints.default_ttl_secs", self.endpoints.default_ttl_secs),
            ("endpoints.max_ttl_secs", self.endpoints.max_ttl_secs),
            (
                "endpoints.cleanup_interval_secs",
                self.endpoints.cleanup_interval_secs,
            ),
            ("live.heartbeat_secs", self.live.heartbeat_secs),
            ("replay.timeout_secs", self.replay.timeout_secs),
            (
                "limits.header_read_timeout_secs",
                self.limits.header_read_timeout_secs,
            ),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(HookError::ConfigError(format!("{name} must be > 0")));
            }
        }

        if self.endpoints.default_ttl_secs > self.endpoints.max_ttl_secs {
            return Err(HookError::ConfigError(
                "endpoints.default_ttl_secs exceeds endpoints.max_ttl_secs".to_string(),
            ));
        }

        let non_zero_sizes = [
            ("endpoints.list_limit", self.endpoints.list_limit),
            ("live.queue_capacity", self.live.queue_capacity),
            ("limits.max_connections", self.limits.max_connections),
            ("limits.max_body_size", self.limits.max_body_size),
            ("limits.max_headers", self.limits.max_headers),
        ];
        for (name, value) in non_zero_sizes {
            if value == 0 {
                return Err(HookError::ConfigError(format!("{name} must be > 0")));
            }
        }

        Ok(())
    }

    /// Parsed listen address
    ///
    /// # Errors
    ///
    /// Returns error if `listen_addr` is not a socket address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.listen_addr.parse().map_err(|e| {
            HookError::ConfigError(format!("Invalid listen_addr {:?}: {e}", self.listen_addr))
        })
    }

    /// Lifetime of a new endpoint, clamped to the configured maximum
    #[must_use]
    pub fn endpoint_ttl(&self, requested_secs: Option<u64>) -> Duration {
        let secs = requested_secs
            .filter(|s| *s > 0)
            .unwrap_or(self.endpoints.default_ttl_secs)
            .min(self.endpoints.max_ttl_secs);
        Duration::from_secs(secs)
    }

    /// Viewer keepalive interval
    #[must_use]
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.live.heartbeat_secs)
    }

    /// Replay call timeout
    #[must_use]
    pub fn replay_timeout(&self) -> Duration {
        Duration::from_secs(self.replay.timeout_secs)
    }

    /// Interval between expiry sweeps
    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.endpoints.cleanup_interval_secs)
    }
}

/// Parse a human size such as `50MB`, `100kb` or `1GB` into bytes
///
/// # Errors
///
/// Returns error if the numeric part is not an unsigned integer
pub fn parse_size(raw: &str) -> Result<usize> {
    let upper = raw.trim().to_ascii_uppercase();

    let (digits, multiplier) = if let Some(n) = upper.strip_suffix("KB") {
        (n, 1024)
    } else if let Some(n) = upper.strip_suffix("MB") {
        (n, 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix("GB") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix('B') {
        (n, 1)
    } else {
        (upper.as_str(), 1)
    };

    let value: usize = digits
        .trim()
        .parse()
        .map_err(|e| HookError::ConfigError(format!("invalid size format {raw:?}: {e}")))?;

    value
        .checked_mul(multiplier)
        .ok_or_else(|| HookError::ConfigError(format!("size {raw:?} overflows")))
}
