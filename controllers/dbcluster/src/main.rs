//! DbCluster Controller
//!
//! Runs a multi-component database cluster on Kubernetes: each `DbCluster`
//! declares meta, store, gateway and other components, and this controller
//! keeps one StatefulSet, its Services and ConfigMap per component in line
//! with the cluster spec. Config changes roll out ordinal by ordinal through the
//! StatefulSet partition, and the admission webhook defaults and validates
//! clusters before they are stored.

mod admission;
mod backoff;
mod config;
mod context;
mod controller;
mod error;
mod metrics;
mod reconciler;
mod rollout;
mod server;
mod watcher;
#[cfg(test)]
mod test_utils;

use crate::config::Config;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube and axum-server both use rustls; pick ring once for the process
    let _res = rustls::crypto::ring::default_provider().install_default();

    info!("Starting DbCluster Controller");

    let config = Config::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Reconcile concurrency: {}", config.reconcile_concurrency);
    info!("  Resync period: {:?}", config.resync_period);
    info!("  Failover period: {:?}", config.failover_period);
    info!("  Webhook: {} on {}", config.webhook_enabled, config.webhook_addr);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
