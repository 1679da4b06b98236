//! DbClusterAutoScaler Controller
//!
//! Scales a `DbCluster` horizontally from observed utilization. For each
//! autoscaled component a worker samples usage/quota ratios from Prometheus
//! and grows, shrinks or deletes a satellite `DbCluster` that joins the
//! target cluster, with cooldowns and a decommission window as hysteresis.

mod config;
mod controller;
mod error;
mod evaluator;
mod metrics;
mod registry;
mod satellite;
mod scaler;
mod server;
mod watcher;
mod worker;
#[cfg(test)]
mod test_utils;
#[cfg(test)]
mod worker_test;

use crate::config::Config;
use crate::error::AutoscalerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AutoscalerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube uses rustls; pick ring once for the process
    let _res = rustls::crypto::ring::default_provider().install_default();

    info!("Starting DbClusterAutoScaler Controller");

    let config = Config::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Prometheus: {}", config.prometheus_url);
    info!("  Sync period: {:?}", config.sync_period);
    info!("  Action timeout: {:?}", config.action_timeout);
    info!("  Probe address: {}", config.probe_addr);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
