//! Process configuration from command-line flags and environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use chrono::TimeDelta;
use clap::Parser;

use crate::network::{AppSettings, NetworkConfig};

/// Rill server configuration.
///
/// All values can be set via environment variables or CLI arguments.
#[derive(Debug, Clone, Parser)]
#[command(name = "rill-server", about = "Rill task board backend")]
pub struct Config {
    /// Bind address
    #[arg(long, env = "RILL_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Listen port
    #[arg(long, env = "RILL_PORT", default_value = "3333")]
    pub port: u16,

    /// Redis broker URL; the in-memory broker is used when absent
    #[arg(long, env = "RILL_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Redis connection pool size
    #[arg(long, env = "RILL_REDIS_POOL_MAX", default_value = "16")]
    pub redis_pool_max: usize,

    /// Queues the producer may publish to (comma-separated)
    #[arg(
        long,
        env = "RILL_QUEUES",
        value_delimiter = ',',
        default_value = "images,notifications,maintenance"
    )]
    pub queues: Vec<String>,

    /// Broker acknowledgement timeout in milliseconds
    #[arg(long, env = "RILL_BROKER_TIMEOUT_MS", default_value = "5000")]
    pub broker_timeout_ms: u64,

    /// Directory for uploaded files
    #[arg(long, env = "RILL_UPLOAD_DIR", default_value = "./uploads")]
    pub upload_dir: PathBuf,

    /// Max avatar upload size in bytes (default: 2MB)
    #[arg(long, env = "RILL_MAX_AVATAR_BYTES", default_value = "2097152")]
    pub max_avatar_bytes: usize,

    /// Allow anyone to register an account
    #[arg(long, env = "RILL_ALLOW_PUBLIC_REGISTRATION")]
    pub allow_public_registration: bool,

    /// Session lifetime in hours
    #[arg(long, env = "RILL_SESSION_TTL_HOURS", default_value = "24")]
    pub session_ttl_hours: u32,

    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, env = "RILL_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Use JSON log format
    #[arg(long, env = "RILL_JSON_LOGS")]
    pub json_logs: bool,

    /// Prometheus scrape address; metrics export is off when absent
    #[arg(long, env = "RILL_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one queue must be configured")]
    NoQueues,
    #[error("broker timeout must be > 0")]
    InvalidBrokerTimeout,
    #[error("session TTL must be > 0")]
    InvalidSessionTtl,
    #[error("redis pool size must be > 0")]
    InvalidPoolSize,
}

impl Config {
    /// Parse and validate configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn init() -> anyhow::Result<Self> {
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// See [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queues().next().is_none() {
            return Err(ConfigError::NoQueues);
        }
        if self.broker_timeout_ms == 0 {
            return Err(ConfigError::InvalidBrokerTimeout);
        }
        if self.session_ttl_hours == 0 {
            return Err(ConfigError::InvalidSessionTtl);
        }
        if self.redis_pool_max == 0 {
            return Err(ConfigError::InvalidPoolSize);
        }
        Ok(())
    }

    /// Configured queue names, trimmed, blanks skipped.
    pub fn queues(&self) -> impl Iterator<Item = &str> {
        self.queues.iter().map(|q| q.trim()).filter(|q| !q.is_empty())
    }

    #[inline]
    #[must_use]
    pub const fn broker_timeout(&self) -> Duration {
        Duration::from_millis(self.broker_timeout_ms)
    }

    #[must_use]
    pub fn network(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            ..NetworkConfig::default()
        }
    }

    #[must_use]
    pub fn app_settings(&self) -> AppSettings {
        AppSettings {
            allow_public_registration: self.allow_public_registration,
            session_ttl: TimeDelta::hours(i64::from(self.session_ttl_hours)),
            upload_dir: self.upload_dir.clone(),
            max_avatar_bytes: self.max_avatar_bytes,
        }
    }
}
