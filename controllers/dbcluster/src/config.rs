//! Controller configuration loaded from environment variables.

use crate::error::ControllerError;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Runtime configuration of the DbCluster controller
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace to watch; all namespaces when unset
    pub namespace: Option<String>,
    /// Maximum concurrent reconciles across clusters
    pub reconcile_concurrency: u16,
    /// Periodic resync interval for converged clusters
    pub resync_period: Duration,
    /// Requeue interval while a rollout, scale or wait is in progress
    pub progress_period: Duration,
    /// How long a pod must stay not-ready before it becomes a failure member
    pub failover_period: Duration,
    pub webhook_enabled: bool,
    pub webhook_addr: SocketAddr,
    pub webhook_cert_path: Option<String>,
    pub webhook_key_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: None,
            reconcile_concurrency: 3,
            resync_period: Duration::from_secs(30),
            progress_period: Duration::from_secs(10),
            failover_period: Duration::from_secs(300),
            webhook_enabled: true,
            webhook_addr: SocketAddr::from(([0, 0, 0, 0], 8443)),
            webhook_cert_path: None,
            webhook_key_path: None,
        }
    }
}

fn parse_var<T: FromStr>(key: &str, default: T) -> Result<T, ControllerError> {
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| {
            ControllerError::InvalidConfig(format!("{} has an invalid value: {}", key, raw))
        }),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ControllerError> {
        let defaults = Self::default();
        Ok(Self {
            namespace: env::var("WATCH_NAMESPACE").ok().filter(|ns| !ns.is_empty()),
            reconcile_concurrency: parse_var("RECONCILE_CONCURRENCY", defaults.reconcile_concurrency)?,
            resync_period: Duration::from_secs(parse_var("RESYNC_PERIOD_SECONDS", 30)?),
            progress_period: Duration::from_secs(parse_var("PROGRESS_PERIOD_SECONDS", 10)?),
            failover_period: Duration::from_secs(parse_var("FAILOVER_PERIOD_SECONDS", 300)?),
            webhook_enabled: parse_var("WEBHOOK_ENABLED", defaults.webhook_enabled)?,
            webhook_addr: parse_var("WEBHOOK_ADDR", defaults.webhook_addr)?,
            webhook_cert_path: env::var("WEBHOOK_CERT_PATH").ok(),
            webhook_key_path: env::var("WEBHOOK_KEY_PATH").ok(),
        })
    }
}
