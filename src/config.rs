use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{ThrottlerError, ThrottlerResult};
use crate::store::redis::DEFAULT_KEY_PREFIX;
use crate::store::sql::DEFAULT_TABLE;
use crate::throttle_config::ThrottleConfig;

/// Where trial records are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    Memory,
    Redis,
    Sqlite,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "trial-throttler", version, about)]
pub struct Config {
    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Trial record backend
    #[arg(long, env = "STORE_BACKEND", value_enum, default_value = "memory")]
    pub backend: StoreBackend,

    /// Redis connection URL
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    #[arg(long, env = "REDIS_KEY_PREFIX", default_value = DEFAULT_KEY_PREFIX)]
    pub redis_key_prefix: String,

    /// Database URL for the sqlite backend
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://trial-throttler.db")]
    pub database_url: String,

    #[arg(long, env = "THROTTLE_TABLE", default_value = DEFAULT_TABLE)]
    pub table: String,

    /// HS256 secret shared with the token issuer
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    #[arg(long, env = "IP_WINDOW", default_value = "10s", value_parser = humantime::parse_duration)]
    pub ip_window: Duration,

    #[arg(long, env = "JWT_WINDOW", default_value = "10s", value_parser = humantime::parse_duration)]
    pub jwt_window: Duration,

    #[arg(long, env = "IP_TRY_MAX", default_value_t = 5)]
    pub ip_try_max: u32,

    #[arg(long, env = "JWT_TRY_MAX", default_value_t = 10)]
    pub jwt_try_max: u32,

    #[arg(long, env = "BLOCK_DURATION", default_value = "5m", value_parser = humantime::parse_duration)]
    pub block_duration: Duration,

    /// Upper bound for one throttle check against the store
    #[arg(long, env = "STORE_TIMEOUT", value_parser = humantime::parse_duration)]
    pub store_timeout: Option<Duration>,

    /// Use X-Forwarded-For / X-Real-IP as the caller address
    #[arg(long, env = "TRUST_FORWARDED_HEADERS", default_value_t = false)]
    pub trust_forwarded_headers: bool,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Load configuration from command line arguments and environment variables
    pub fn from_env() -> Self {
        Config::parse()
    }

    pub fn throttle(&self) -> ThrottleConfig {
        ThrottleConfig {
            ip_window: self.ip_window,
            jwt_window: self.jwt_window,
            ip_try_max: self.ip_try_max,
            jwt_try_max: self.jwt_try_max,
            block_duration: self.block_duration,
        }
    }

    pub fn validate(&self) -> ThrottlerResult<()> {
        if self.jwt_secret.is_empty() {
            return Err(ThrottlerError::ValidationError(
                "JWT secret cannot be empty".to_string(),
            ));
        }

        match self.backend {
            StoreBackend::Redis
                if !self.redis_url.starts_with("redis://") && !self.redis_url.starts_with("rediss://") =>
            {
                return Err(ThrottlerError::ValidationError(
                    "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
                ));
            }
            StoreBackend::Sqlite if !self.database_url.starts_with("sqlite:") => {
                return Err(ThrottlerError::ValidationError(
                    "Database URL must start with 'sqlite:'".to_string(),
                ));
            }
            _ => {}
        }

        if self.store_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(ThrottlerError::ValidationError(
                "Store timeout must be greater than 0".to_string(),
            ));
        }

        self.throttle().check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["trial-throttler", "--jwt-secret", "s3cret"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.backend, StoreBackend::Memory);
        assert_eq!(config.throttle(), ThrottleConfig::default());
        assert!(config.store_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_humantime_arguments() {
        let config = parse(&["--ip-window", "30s", "--block-duration", "1h", "--store-timeout", "250ms"]);
        assert_eq!(config.ip_window, Duration::from_secs(30));
        assert_eq!(config.block_duration, Duration::from_secs(3600));
        assert_eq!(config.store_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_invalid_redis_url() {
        let config = parse(&["--backend", "redis", "--redis-url", "http://localhost:6379"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_database_url() {
        let config = parse(&["--backend", "sqlite", "--database-url", "postgres://db"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_budget_rejected() {
        let config = parse(&["--ip-try-max", "0"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_store_timeout_rejected() {
        let config = parse(&["--store-timeout", "0s"]);
        assert!(config.validate().is_err());
    }
}
