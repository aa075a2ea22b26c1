use crate::error::{PoolError, Result};
use crate::models::ProxyEndpoint;
use std::env;
use std::str::FromStr;
use url::Url;

/// Local Cloudflare WARP SOCKS5 endpoints used when `WARP_PROXIES` is unset
pub const DEFAULT_PROXIES: &str = "socks5://localhost:40001,socks5://localhost:40002,\
socks5://localhost:40003,socks5://localhost:40004,socks5://localhost:40005";

/// Longest spacing between outbound calls the limiter accepts (one hour)
const MIN_CALLS_PER_SECOND: f64 = 1.0 / 3600.0;

/// Largest retry backoff base, in seconds
const MAX_BACKOFF_FACTOR: f64 = 3600.0;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Proxy pool configuration
    pub pool: ProxyPoolConfig,
    /// Background health checking
    pub health: HealthCheckConfig,
    /// Outbound call pacing
    pub rate_limit: RateLimitConfig,
    /// Outbound call retries
    pub retry: RetryConfig,
    /// Optional persistence database; in-memory state only when absent
    pub database: Option<DatabaseConfig>,
    /// Admin API server configuration
    pub api: ApiServerConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    /// Static proxy endpoints; the pool size is fixed to this list
    pub proxies: Vec<ProxyEndpoint>,
    /// Default selection strategy (round_robin, random, best)
    pub rotation_strategy: String,
    /// Consecutive failures before a proxy is marked unhealthy
    pub max_error_count: u32,
}

#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Seconds between probe passes
    pub interval_secs: u64,
    /// Per-probe timeout in seconds
    pub timeout_secs: u64,
    /// Plain-HTTP endpoint fetched through each proxy
    pub url: String,
    /// Status code that counts as a healthy probe
    pub expected_status: u16,
    /// Probes in flight per pass
    pub concurrency: usize,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Outbound calls per second across the whole pool
    pub calls_per_second: f64,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Base of the exponential backoff, in seconds
    pub backoff_factor: f64,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Postgres connection URL
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Minimum connections in pool
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port for the admin API (default: 8001)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let health_url = get_env_or("HEALTH_CHECK_URL", "http://httpbin.org/ip");
        validate_probe_url(&health_url)?;

        let calls_per_second: f64 = parse_env_or("RATE_LIMIT_CALLS_PER_SECOND", "1.5")?;
        if !(calls_per_second.is_finite() && calls_per_second >= MIN_CALLS_PER_SECOND) {
            return Err(PoolError::InvalidConfig(format!(
                "RATE_LIMIT_CALLS_PER_SECOND must be at least {} (one call per hour)",
                MIN_CALLS_PER_SECOND
            )));
        }

        let backoff_factor: f64 = parse_env_or("RETRY_BACKOFF_FACTOR", "1.0")?;
        if !(backoff_factor.is_finite() && (0.0..=MAX_BACKOFF_FACTOR).contains(&backoff_factor)) {
            return Err(PoolError::InvalidConfig(format!(
                "RETRY_BACKOFF_FACTOR must be between 0 and {} seconds",
                MAX_BACKOFF_FACTOR
            )));
        }

        let database = match env::var("DATABASE_URL") {
            Ok(url) if !url.trim().is_empty() => Some(DatabaseConfig {
                url: url.trim().to_string(),
                max_connections: parse_env_or("DB_MAX_CONNECTIONS", "5")?,
                min_connections: parse_env_or("DB_MIN_CONNECTIONS", "1")?,
            }),
            _ => None,
        };

        Ok(Config {
            pool: ProxyPoolConfig {
                proxies: parse_proxy_list(&get_env_or("WARP_PROXIES", DEFAULT_PROXIES))?,
                rotation_strategy: get_env_or("POOL_ROTATION_STRATEGY", "round_robin"),
                max_error_count: parse_env_or::<u32>("POOL_MAX_ERROR_COUNT", "3")?.max(1),
            },
            health: HealthCheckConfig {
                interval_secs: parse_env_or::<u64>("HEALTH_CHECK_INTERVAL", "60")?.max(1),
                timeout_secs: parse_env_or::<u64>("HEALTH_CHECK_TIMEOUT", "10")?.max(1),
                url: health_url,
                expected_status: parse_env_or("HEALTH_CHECK_STATUS", "200")?,
                concurrency: parse_env_or::<usize>("HEALTH_CHECK_CONCURRENCY", "5")?.max(1),
            },
            rate_limit: RateLimitConfig { calls_per_second },
            retry: RetryConfig {
                max_retries: parse_env_or("RETRY_MAX_RETRIES", "3")?,
                backoff_factor,
            },
            database,
            api: ApiServerConfig {
                port: get_env_or("API_PORT", "8001").parse().map_err(|_| {
                    PoolError::InvalidConfig("API_PORT must be a valid port number".into())
                })?,
                host: get_env_or("API_HOST", "0.0.0.0"),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }

    /// Get the API server address
    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

/// Parse a comma-separated list of proxy endpoints
pub fn parse_proxy_list(raw: &str) -> Result<Vec<ProxyEndpoint>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            ProxyEndpoint::parse(s)
                .map_err(|e| PoolError::InvalidConfig(format!("WARP_PROXIES entry '{}': {}", s, e)))
        })
        .collect()
}

fn validate_probe_url(raw: &str) -> Result<()> {
    let url = Url::parse(raw).map_err(|e| {
        PoolError::InvalidConfig(format!("HEALTH_CHECK_URL must be a valid URL: {}", e))
    })?;

    // The probe speaks plain HTTP/1.1 over the proxied tunnel.
    if url.scheme() != "http" {
        return Err(PoolError::InvalidConfig(format!(
            "HEALTH_CHECK_URL has unsupported scheme: {}",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(PoolError::InvalidConfig(
            "HEALTH_CHECK_URL must include a host".into(),
        ));
    }

    Ok(())
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse environment variable, falling back to a default literal
fn parse_env_or<T: FromStr>(key: &str, default: &str) -> Result<T> {
    let raw = get_env_or(key, default);
    raw.trim()
        .parse()
        .map_err(|_| PoolError::InvalidConfig(format!("{} has invalid value '{}'", key, raw)))
}
