//! Main controller implementation.
//!
//! Owns the DbCluster watcher and the webhook server tasks and runs until
//! either exits.

use crate::admission::webhook::WebhookState;
use crate::backoff::BackoffTracker;
use crate::config::Config;
use crate::context::Context;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconciler::{ReconcileSettings, Reconciler};
use crate::{server, watcher};
use cluster_client::KubeClusterClient;
use kube::Client;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for DbCluster management.
#[derive(Debug)]
pub struct Controller {
    cluster_watcher: JoinHandle<Result<(), ControllerError>>,
    webhook_server: JoinHandle<Result<(), ControllerError>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing DbCluster Controller");

        let kube_client = Client::try_default().await.map_err(ControllerError::Kube)?;

        let metrics = Arc::new(
            Metrics::new().map_err(|e| ControllerError::InvalidConfig(format!("metrics registry: {}", e)))?,
        );
        let reconciler = Reconciler::new(
            Arc::new(KubeClusterClient::new(kube_client.clone())),
            ReconcileSettings::from(&config),
        );
        let ctx = Arc::new(Context {
            reconciler,
            metrics: metrics.clone(),
            backoff: BackoffTracker::default(),
        });

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let namespace = config.namespace.clone();
        let concurrency = config.reconcile_concurrency;
        let cluster_watcher = tokio::spawn(async move {
            watcher::watch_clusters(kube_client, namespace, concurrency, ctx).await
        });

        let state = Arc::new(WebhookState { metrics });
        let webhook_server = tokio::spawn(server::serve(config, state, shutdown_rx));

        Ok(Self {
            cluster_watcher,
            webhook_server,
            shutdown_tx,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("DbCluster Controller running");

        // The watcher stops on SIGTERM/SIGINT; the server follows it.
        tokio::select! {
            result = &mut self.cluster_watcher => {
                let _res = self.shutdown_tx.send(());
                result.map_err(|e| ControllerError::Watch(format!("DbCluster watcher panicked: {}", e)))??;
                self.webhook_server
                    .await
                    .map_err(|e| ControllerError::Webhook(format!("Webhook server panicked: {}", e)))??;
            }
            result = &mut self.webhook_server => {
                result.map_err(|e| ControllerError::Webhook(format!("Webhook server panicked: {}", e)))??;
            }
        }

        Ok(())
    }
}
