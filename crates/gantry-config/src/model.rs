//! Configuration model.
//!
//! The gateway is configured from a single JSON file. A parsed
//! [`GatewayConfig`] is published as an immutable snapshot; every request
//! reads one snapshot and never observes a torn mix of old and new values.

use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// One proxied route.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RouteSpec {
    /// Request path, matched by exact equality.
    pub path: String,
    /// Upstream base URL, e.g. `http://127.0.0.1:9001`.
    pub backend: String,
    /// Allowed HTTP methods.
    pub methods: Vec<String>,
    /// Requests per minute for this route; 0 uses the global default.
    #[serde(default = "default_route_rate")]
    pub rate_limit_per_minute: u32,
    /// Upstream deadline in seconds.
    #[serde(default = "default_route_timeout")]
    pub timeout_seconds: u64,
    /// Whether GET responses on this route may be cached.
    #[serde(default)]
    pub enable_cache: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub burst_size: u32,
    pub default_rate_per_minute: u32,
    pub num_shards: usize,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            burst_size: 10,
            default_rate_per_minute: 1000,
            num_shards: 16,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl_seconds: i64,
    pub max_size_mb: u64,
    pub capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 300,
            max_size_mb: 100,
            capacity: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct BreakerSettings {
    pub enabled: bool,
    pub failure_threshold: u64,
    pub success_threshold: u64,
    pub timeout_seconds: u64,
    pub health_decay: f64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            success_threshold: 3,
            timeout_seconds: 60,
            health_decay: 0.95,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimeoutSettings {
    pub read_seconds: u64,
    pub write_seconds: u64,
    pub total_seconds: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            read_seconds: 30,
            write_seconds: 10,
            total_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolSettings {
    pub max_idle: usize,
    pub idle_timeout: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_idle: 100,
            idle_timeout: 60,
        }
    }
}

/// Complete gateway configuration, immutable once published.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    pub listen_addr: String,
    /// Accepted for compatibility; administrative endpoints are served on
    /// the main listener.
    pub metrics_addr: String,
    pub routes: Vec<RouteSpec>,
    pub rate_limit: RateLimitSettings,
    pub circuit_breaker: BreakerSettings,
    pub cache: CacheSettings,
    pub connection_pool: PoolSettings,
    pub timeouts: TimeoutSettings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_owned(),
            metrics_addr: "0.0.0.0:9090".to_owned(),
            routes: Vec::new(),
            rate_limit: RateLimitSettings::default(),
            circuit_breaker: BreakerSettings::default(),
            cache: CacheSettings::default(),
            connection_pool: PoolSettings::default(),
            timeouts: TimeoutSettings::default(),
        }
    }
}

fn default_route_rate() -> u32 {
    100
}

fn default_route_timeout() -> u64 {
    30
}

impl GatewayConfig {
    /// Loads and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: GatewayConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Structural validation, run on every load and reload.
    pub fn validate(&self) -> Result<()> {
        self.listen_addr.parse::<SocketAddr>().map_err(|_| {
            ConfigError::Invalid(format!("listen_addr '{}' is not a socket address", self.listen_addr))
        })?;

        if self.rate_limit.num_shards == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.num_shards must be greater than 0".to_owned(),
            ));
        }
        if self.rate_limit.default_rate_per_minute == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.default_rate_per_minute must be greater than 0".to_owned(),
            ));
        }
        if self.cache.capacity == 0 {
            return Err(ConfigError::Invalid(
                "cache.capacity must be greater than 0".to_owned(),
            ));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker.failure_threshold must be greater than 0".to_owned(),
            ));
        }
        if self.circuit_breaker.success_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker.success_threshold must be greater than 0".to_owned(),
            ));
        }
        if !(0.0..1.0).contains(&self.circuit_breaker.health_decay) {
            return Err(ConfigError::Invalid(
                "circuit_breaker.health_decay must be in [0, 1)".to_owned(),
            ));
        }

        for route in &self.routes {
            if !route.path.starts_with('/') {
                return Err(ConfigError::Invalid(format!(
                    "route path '{}' must start with '/'",
                    route.path
                )));
            }
            validate_http_url(&route.backend, &route.path)?;
            if route.methods.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "route '{}' must allow at least one method",
                    route.path
                )));
            }
        }

        Ok(())
    }
}

/// Validates that a backend URL starts with http:// or https://.
fn validate_http_url(url: &str, route_path: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "backend '{}' for route '{}' must start with http:// or https://",
            url, route_path
        )))
    }
}
