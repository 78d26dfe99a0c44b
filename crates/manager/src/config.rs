//! Configuration loaded from environment variables.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port (default: 3000).
    pub port: u16,

    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Maximum database connections in pool (default: 10).
    pub database_max_connections: u32,

    /// Redis connection URL, used for the event bus and the republish queue.
    pub redis_url: String,

    /// Interval between plugin health probes (default: 10s).
    pub poll_interval: Duration,

    /// Timeout for a single health probe (default: 5s).
    pub health_timeout: Duration,

    /// Timeout for proxied action/configure calls (default: 30s).
    pub proxy_timeout: Duration,

    /// Consecutive failed probes before a plugin is marked as having no
    /// live instances (default: 3).
    pub liveness_failure_threshold: u32,

    /// Consumer name inside the router's consumer group (default: hostname).
    pub event_consumer_name: String,

    /// Attempts made for one failed republish before it is dropped (default: 5).
    pub republish_max_attempts: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("PORT must be a valid u16")?;

        let database_url =
            env::var("DATABASE_URL").context("DATABASE_URL environment variable is required")?;

        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        let poll_interval = secs_var("POLL_INTERVAL_SECS", 10)?;
        let health_timeout = secs_var("HEALTH_TIMEOUT_SECS", 5)?;
        let proxy_timeout = secs_var("PROXY_TIMEOUT_SECS", 30)?;

        let liveness_failure_threshold: u32 = env::var("LIVENESS_FAILURE_THRESHOLD")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .context("LIVENESS_FAILURE_THRESHOLD must be a valid u32")?;
        if liveness_failure_threshold == 0 {
            anyhow::bail!("LIVENESS_FAILURE_THRESHOLD must be at least 1");
        }

        let event_consumer_name = env::var("EVENT_CONSUMER_NAME").unwrap_or_else(|_| hostname());

        let republish_max_attempts = env::var("REPUBLISH_MAX_ATTEMPTS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .context("REPUBLISH_MAX_ATTEMPTS must be a valid u32")?;

        Ok(Self {
            port,
            database_url,
            database_max_connections,
            redis_url,
            poll_interval,
            health_timeout,
            proxy_timeout,
            liveness_failure_threshold,
            event_consumer_name,
            republish_max_attempts,
        })
    }
}

/// Read a whole-seconds duration, rejecting zero.
fn secs_var(name: &str, default: u64) -> Result<Duration> {
    let secs: u64 = match env::var(name) {
        Ok(v) => v
            .parse()
            .with_context(|| format!("{name} must be a whole number of seconds"))?,
        Err(_) => default,
    };
    if secs == 0 {
        anyhow::bail!("{name} must be greater than zero");
    }
    Ok(Duration::from_secs(secs))
}

fn hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "plugin-manager".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn secs_var_uses_default_when_unset() {
        let d = secs_var("FORMLOOM_TEST_UNSET_SECS", 7).unwrap();
        assert_eq!(d, Duration::from_secs(7));
    }

    #[test]
    fn secs_var_rejects_zero_default() {
        assert!(secs_var("FORMLOOM_TEST_UNSET_ZERO_SECS", 0).is_err());
    }

    #[test]
    fn hostname_is_not_empty() {
        assert!(!hostname().is_empty());
    }
}
