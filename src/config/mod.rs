//! Configuration management for keymesh
//!
//! This module handles loading and validating configuration from environment
//! variables and TOML files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Spider configuration
    pub spider: SpiderConfig,

    /// Valid-IP selector configuration
    pub selector: SelectorConfig,

    /// Query service configuration
    pub server: ServerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Spider-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpiderConfig {
    /// Seed hostnames the crawl starts from
    pub seeds: Vec<String>,

    /// Port the status probe connects to
    pub probe_port: u16,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Probe rate limit (requests per second)
    pub rate_limit: u32,

    /// Maximum number of retry attempts per probe
    pub max_retries: u32,

    /// Seconds between crawls in serve mode
    pub interval_secs: u64,

    /// DNS zone queried for IP country codes, reversed-octet style
    pub country_zone: String,
}

/// Selector thresholds
///
/// `bucket_size` quantizes keycounts for mode detection; `keys_sanity_min`
/// is the lowest believable in-bounds mean; `keys_daily_jitter` is the
/// slack subtracted from the threshold base to absorb day-to-day churn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorConfig {
    pub bucket_size: u64,
    pub keys_sanity_min: u64,
    pub keys_daily_jitter: u64,
}

/// Query service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP server binds to
    pub bind_addr: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let seeds = std::env::var("KEYMESH_SEEDS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let country_zone = std::env::var("KEYMESH_COUNTRY_ZONE")
            .unwrap_or_else(|_| String::from("zz.countries.nerd.dk"));

        let bind_addr =
            std::env::var("KEYMESH_BIND_ADDR").unwrap_or_else(|_| String::from("127.0.0.1:8080"));

        let log_level = std::env::var("KEYMESH_LOG_LEVEL").unwrap_or_else(|_| String::from("info"));
        let log_format =
            std::env::var("KEYMESH_LOG_FORMAT").unwrap_or_else(|_| String::from("text"));

        Ok(Self {
            spider: SpiderConfig {
                seeds,
                probe_port: env_parse("KEYMESH_PROBE_PORT", 11371),
                request_timeout_secs: env_parse("KEYMESH_REQUEST_TIMEOUT", 30),
                rate_limit: env_parse("KEYMESH_RATE_LIMIT", 4),
                max_retries: env_parse("KEYMESH_MAX_RETRIES", 2),
                interval_secs: env_parse("KEYMESH_CRAWL_INTERVAL", 3600),
                country_zone,
            },
            selector: SelectorConfig {
                bucket_size: env_parse("KEYMESH_BUCKET_SIZE", 500_000),
                keys_sanity_min: env_parse("KEYMESH_KEYS_SANITY_MIN", 3_100_000),
                keys_daily_jitter: env_parse("KEYMESH_KEYS_DAILY_JITTER", 1_500),
            },
            server: ServerConfig { bind_addr },
            logging: LoggingConfig {
                level: log_level,
                format: log_format,
            },
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.spider.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than 0");
        }

        if self.spider.rate_limit == 0 {
            anyhow::bail!("rate_limit must be greater than 0");
        }

        if self.selector.bucket_size == 0 {
            anyhow::bail!("bucket_size must be greater than 0");
        }

        if self.server.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            anyhow::bail!("bind_addr is not a valid socket address");
        }

        Ok(())
    }

    /// Get probe request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.spider.request_timeout_secs)
    }

    /// Get the pause between crawls as Duration
    #[must_use]
    pub fn crawl_interval(&self) -> Duration {
        Duration::from_secs(self.spider.interval_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            spider: SpiderConfig {
                seeds: Vec::new(),
                probe_port: 11371,
                request_timeout_secs: 30,
                rate_limit: 4,
                max_retries: 2,
                interval_secs: 3600,
                country_zone: String::from("zz.countries.nerd.dk"),
            },
            selector: SelectorConfig {
                bucket_size: 500_000,
                keys_sanity_min: 3_100_000,
                keys_daily_jitter: 1_500,
            },
            server: ServerConfig {
                bind_addr: String::from("127.0.0.1:8080"),
            },
            logging: LoggingConfig {
                level: String::from("info"),
                format: String::from("text"),
            },
        }
    }
}
