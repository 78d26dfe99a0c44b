//! Plugin process configuration loaded from environment variables.

use std::env;
use std::time::Duration;

use crate::error::PluginError;

/// Settings every plugin process needs to join the platform.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    /// Port the plugin's HTTP surface listens on (default: 80).
    pub port: u16,

    /// Base URL the manager should use to reach this plugin.
    pub public_url: String,

    /// Base URL of the plugin manager (default: http://plugin-manager-service).
    pub manager_url: String,

    /// Redis URL of the event bus. When unset, the plugin does not consume events.
    pub redis_url: Option<String>,

    /// Registration attempts before giving up (default: 10).
    pub registration_attempts: u32,

    /// Delay between registration attempts (default: 3s).
    pub registration_backoff: Duration,
}

impl PluginConfig {
    pub fn from_env() -> Result<Self, PluginError> {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "80".to_string())
            .parse()
            .map_err(|_| PluginError::Config("PORT must be a valid u16".to_string()))?;

        let public_url = env::var("PLUGIN_URL").map_err(|_| {
            PluginError::Config("PLUGIN_URL environment variable is required".to_string())
        })?;

        let manager_url = env::var("MANAGER_URL")
            .unwrap_or_else(|_| "http://plugin-manager-service".to_string());

        let redis_url = env::var("REDIS_URL").ok();

        let registration_attempts = env::var("REGISTRATION_ATTEMPTS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| {
                PluginError::Config("REGISTRATION_ATTEMPTS must be a valid u32".to_string())
            })?;

        let registration_backoff = env::var("REGISTRATION_BACKOFF_SECS")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .map(Duration::from_secs)
            .map_err(|_| {
                PluginError::Config("REGISTRATION_BACKOFF_SECS must be a valid u64".to_string())
            })?;

        Ok(Self {
            port,
            public_url,
            manager_url,
            redis_url,
            registration_attempts,
            registration_backoff,
        })
    }
}
