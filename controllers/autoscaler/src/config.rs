//! Autoscaler configuration loaded from environment variables.

use crate::error::AutoscalerError;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Runtime configuration of the autoscaler controller
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace to watch; all namespaces when unset
    pub namespace: Option<String>,
    /// Prometheus used when an autoscaler does not name its own
    pub prometheus_url: String,
    /// Interval between evaluations of one component
    pub sync_period: Duration,
    /// Upper bound on waiting for a satellite to become healthy after an action
    pub action_timeout: Duration,
    /// How often the health wait re-reads the satellite
    pub health_poll_period: Duration,
    /// Attempts for conflicting satellite updates
    pub update_retry_attempts: u32,
    pub probe_addr: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: None,
            prometheus_url: "http://prometheus.monitoring:9090".to_string(),
            sync_period: Duration::from_secs(30),
            action_timeout: Duration::from_secs(300),
            health_poll_period: Duration::from_secs(5),
            update_retry_attempts: 5,
            probe_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

fn parse_var<T: FromStr>(key: &str, default: T) -> Result<T, AutoscalerError> {
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| {
            AutoscalerError::InvalidConfig(format!("{} has an invalid value: {}", key, raw))
        }),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AutoscalerError> {
        let defaults = Self::default();
        let config = Self {
            namespace: env::var("WATCH_NAMESPACE").ok().filter(|ns| !ns.is_empty()),
            prometheus_url: env::var("PROMETHEUS_URL").unwrap_or(defaults.prometheus_url),
            sync_period: Duration::from_secs(parse_var("AUTOSCALER_SYNC_PERIOD_SECONDS", 30)?),
            action_timeout: Duration::from_secs(parse_var("AUTOSCALER_ACTION_TIMEOUT_SECONDS", 300)?),
            health_poll_period: Duration::from_secs(parse_var("AUTOSCALER_HEALTH_POLL_SECONDS", 5)?),
            update_retry_attempts: parse_var("UPDATE_RETRY_ATTEMPTS", defaults.update_retry_attempts)?,
            probe_addr: parse_var("PROBE_ADDR", defaults.probe_addr)?,
        };
        if config.sync_period.is_zero() {
            return Err(AutoscalerError::InvalidConfig(
                "AUTOSCALER_SYNC_PERIOD_SECONDS must be positive".to_string(),
            ));
        }
        Ok(config)
    }
}
