//! Main controller implementation.
//!
//! Owns the autoscaler watcher and the probe server, and stops both on
//! SIGINT/SIGTERM.

use crate::config::Config;
use crate::error::AutoscalerError;
use crate::metrics::Metrics;
use crate::registry::{MetricsClientFactory, Registry};
use crate::worker::WorkerSettings;
use crate::{server, watcher};
use cluster_client::{KubeClusterClient, RetryConfig};
use crds::DbClusterAutoScaler;
use kube::{Api, Client};
use monitor_client::{MetricsClientTrait, PrometheusClient};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}

/// Autoscaler controller.
#[derive(Debug)]
pub struct Controller {
    autoscaler_watcher: JoinHandle<Result<(), AutoscalerError>>,
    probe_server: JoinHandle<Result<(), AutoscalerError>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: Config) -> Result<Self, AutoscalerError> {
        info!("Initializing DbClusterAutoScaler Controller");

        let kube_client = Client::try_default().await?;
        let metrics = Arc::new(
            Metrics::new().map_err(|e| AutoscalerError::InvalidConfig(format!("metrics registry: {}", e)))?,
        );

        let factory: MetricsClientFactory = Arc::new(|url: &str| {
            Ok(Arc::new(PrometheusClient::new(url.to_string())?) as Arc<dyn MetricsClientTrait>)
        });
        let settings = WorkerSettings {
            sync_period: config.sync_period,
            action_timeout: config.action_timeout,
            health_poll_period: config.health_poll_period,
            retry: RetryConfig::with_max_attempts(config.update_retry_attempts),
        };
        let registry = Registry::new(
            Arc::new(KubeClusterClient::new(kube_client.clone())),
            Arc::clone(&metrics),
            settings,
            config.prometheus_url.clone(),
            factory,
        );

        let api: Api<DbClusterAutoScaler> = match &config.namespace {
            Some(namespace) => Api::namespaced(kube_client, namespace),
            None => Api::all(kube_client),
        };

        let (shutdown_tx, watcher_shutdown) = broadcast::channel(1);
        let server_shutdown = shutdown_tx.subscribe();

        let autoscaler_watcher = tokio::spawn(watcher::watch_autoscalers(api, registry, watcher_shutdown));
        let probe_server = tokio::spawn(server::serve(config.probe_addr, metrics, server_shutdown));

        Ok(Self {
            autoscaler_watcher,
            probe_server,
            shutdown_tx,
        })
    }

    /// Runs the controller until a signal arrives or a task fails.
    pub async fn run(mut self) -> Result<(), AutoscalerError> {
        info!("DbClusterAutoScaler Controller running");

        // The watcher cancels and awaits every worker before it returns
        tokio::select! {
            () = shutdown_signal() => {
                let _res = self.shutdown_tx.send(());
                self.autoscaler_watcher
                    .await
                    .map_err(|e| AutoscalerError::Watch(format!("Autoscaler watcher panicked: {}", e)))??;
                self.probe_server
                    .await
                    .map_err(|e| AutoscalerError::Server(format!("Probe server panicked: {}", e)))??;
            }
            result = &mut self.autoscaler_watcher => {
                let _res = self.shutdown_tx.send(());
                result.map_err(|e| AutoscalerError::Watch(format!("Autoscaler watcher panicked: {}", e)))??;
                self.probe_server
                    .await
                    .map_err(|e| AutoscalerError::Server(format!("Probe server panicked: {}", e)))??;
            }
            result = &mut self.probe_server => {
                let _res = self.shutdown_tx.send(());
                result.map_err(|e| AutoscalerError::Server(format!("Probe server panicked: {}", e)))??;
                self.autoscaler_watcher
                    .await
                    .map_err(|e| AutoscalerError::Watch(format!("Autoscaler watcher panicked: {}", e)))??;
            }
        }

        Ok(())
    }
}
