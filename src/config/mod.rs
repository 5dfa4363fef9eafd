//! Configuration management for Gatekeeper Core

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;
use uuid::Uuid;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server host
    pub http_host: String,
    /// HTTP server port
    pub http_port: u16,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Redis configuration (shared cache tier)
    pub redis: RedisConfig,
    /// Cache layer configuration
    pub cache: CacheConfig,
    /// Resolution engine configuration
    pub resolution: ResolutionConfig,
    /// Telemetry configuration
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct RedisConfig {
    /// Shared cache endpoint; `None` runs the engine with the local tier only
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub local_ttl_secs: u64,
    pub shared_ttl_secs: u64,
    pub local_max_entries: u64,
    /// Prefix for every cache key, shared by all instances of a deployment
    pub key_namespace: String,
    /// Pub/sub channel used to broadcast evictions to peer instances
    pub invalidation_channel: String,
    pub warm_on_startup: bool,
    pub warm_limit: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            local_ttl_secs: 300,
            shared_ttl_secs: 3600,
            local_max_entries: 100_000,
            key_namespace: "gatekeeper:authz".to_string(),
            invalidation_channel: "gatekeeper:authz:invalidate".to_string(),
            warm_on_startup: false,
            warm_limit: 500,
        }
    }
}

impl CacheConfig {
    pub fn local_ttl(&self) -> Duration {
        Duration::from_secs(self.local_ttl_secs)
    }

    pub fn shared_ttl(&self) -> Duration {
        Duration::from_secs(self.shared_ttl_secs)
    }
}

#[derive(Debug, Clone)]
pub struct ResolutionConfig {
    /// Identifier of the single system-scoped bypass role
    pub super_admin_role_id: Uuid,
    /// Deadline applied when the caller does not supply one
    pub default_timeout_ms: u64,
    /// Role name auto-assigned when a principal is provisioned into a tenant
    pub default_role_name: Option<String>,
    /// Above this many role holders, a role-permission change evicts the
    /// whole tenant instead of each holder
    pub role_fanout_limit: usize,
}

impl ResolutionConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// "json" or "pretty"
    pub log_format: String,
    pub metrics_enabled: bool,
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            service_name: "gatekeeper-core".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let cache_defaults = CacheConfig::default();

        Ok(Self {
            http_host: env::var("HTTP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            http_port: env::var("HTTP_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("Invalid HTTP_PORT")?,
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").context("DATABASE_URL is required")?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .unwrap_or_else(|_| "2".to_string())
                    .parse()
                    .unwrap_or(2),
                acquire_timeout_ms: env::var("DATABASE_ACQUIRE_TIMEOUT_MS")
                    .unwrap_or_else(|_| "2000".to_string())
                    .parse()
                    .unwrap_or(2000),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL")
                    .ok()
                    .filter(|url| !url.trim().is_empty()),
            },
            cache: CacheConfig {
                local_ttl_secs: env::var("CACHE_LOCAL_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(cache_defaults.local_ttl_secs),
                shared_ttl_secs: env::var("CACHE_SHARED_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(cache_defaults.shared_ttl_secs),
                local_max_entries: env::var("CACHE_LOCAL_MAX_ENTRIES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(cache_defaults.local_max_entries),
                key_namespace: env::var("CACHE_KEY_NAMESPACE")
                    .unwrap_or(cache_defaults.key_namespace),
                invalidation_channel: env::var("CACHE_INVALIDATION_CHANNEL")
                    .unwrap_or(cache_defaults.invalidation_channel),
                warm_on_startup: env::var("CACHE_WARM_ON_STARTUP")
                    .map(|s| s.to_lowercase() == "true")
                    .unwrap_or(false),
                warm_limit: env::var("CACHE_WARM_LIMIT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(cache_defaults.warm_limit),
            },
            resolution: ResolutionConfig {
                super_admin_role_id: env::var("SUPER_ADMIN_ROLE_ID")
                    .context("SUPER_ADMIN_ROLE_ID is required")?
                    .parse()
                    .context("Invalid SUPER_ADMIN_ROLE_ID")?,
                default_timeout_ms: env::var("RESOLUTION_TIMEOUT_MS")
                    .unwrap_or_else(|_| "250".to_string())
                    .parse()
                    .unwrap_or(250),
                default_role_name: env::var("DEFAULT_ROLE_NAME")
                    .ok()
                    .filter(|name| !name.trim().is_empty()),
                role_fanout_limit: env::var("ROLE_INVALIDATION_FANOUT_LIMIT")
                    .unwrap_or_else(|_| "500".to_string())
                    .parse()
                    .unwrap_or(500),
            },
            telemetry: TelemetryConfig {
                log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),
                metrics_enabled: env::var("METRICS_ENABLED")
                    .map(|s| s.to_lowercase() == "true")
                    .unwrap_or(false),
                service_name: env::var("SERVICE_NAME")
                    .unwrap_or_else(|_| "gatekeeper-core".to_string()),
            },
        })
    }

    /// Get HTTP server address
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}
