//! DbCluster watcher.
//!
//! Drives `kube_runtime::Controller` over DbCluster objects and the
//! StatefulSets, Services and ConfigMaps they own. Events on an owned object
//! requeue its owning cluster.

use crate::context::Context;
use crate::error::ControllerError;
use crds::labels::{MANAGED_BY, MANAGED_BY_LABEL};
use crds::DbCluster;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::{Api, Client, ResourceExt};
use kube_runtime::{Controller, watcher, controller::{Action, Config as ControllerConfig}};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

fn cluster_key(cluster: &DbCluster) -> String {
    format!(
        "{}/{}",
        cluster.namespace().unwrap_or_else(|| "default".to_string()),
        cluster.name_any()
    )
}

fn outcome_label(result: &Result<Action, ControllerError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) if e.is_configuration() => "config_error",
        Err(_) => "error",
    }
}

async fn reconcile(cluster: Arc<DbCluster>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let key = cluster_key(&cluster);
    debug!("Reconciling DbCluster {}", key);
    let started = Instant::now();

    let result = match ctx.reconciler.reconcile(&cluster).await {
        Ok(outcome) => {
            for (kind, phase) in &outcome.transitions {
                info!("DbCluster {} component {} is now {:?}", key, kind, phase);
                ctx.metrics
                    .phase_transitions_total
                    .with_label_values(&[kind.as_str(), &format!("{:?}", phase)])
                    .inc();
            }
            for message in &outcome.configuration_errors {
                warn!("DbCluster {}: {}", key, message);
            }
            ctx.backoff.reset(&key);
            Ok(Action::requeue(outcome.requeue_after))
        }
        Err(e) => Err(e),
    };

    ctx.metrics
        .observe_reconcile(outcome_label(&result), started.elapsed().as_secs_f64());
    result
}

fn error_policy(cluster: Arc<DbCluster>, error: &ControllerError, ctx: Arc<Context>) -> Action {
    let key = cluster_key(&cluster);
    let delay = ctx.backoff.next_delay(&key);
    error!("Reconciliation error for DbCluster {}: {} (retrying in {:?})", key, error, delay);
    Action::requeue(delay)
}

/// Watch DbClusters and reconcile them until the watch stream ends.
pub async fn watch_clusters(
    client: Client,
    namespace: Option<String>,
    concurrency: u16,
    ctx: Arc<Context>,
) -> Result<(), ControllerError> {
    info!("Starting DbCluster watcher");

    let (clusters, statefulsets, services, config_maps) = match namespace.as_deref() {
        Some(ns) => (
            Api::<DbCluster>::namespaced(client.clone(), ns),
            Api::<StatefulSet>::namespaced(client.clone(), ns),
            Api::<Service>::namespaced(client.clone(), ns),
            Api::<ConfigMap>::namespaced(client, ns),
        ),
        None => (
            Api::<DbCluster>::all(client.clone()),
            Api::<StatefulSet>::all(client.clone()),
            Api::<Service>::all(client.clone()),
            Api::<ConfigMap>::all(client),
        ),
    };

    let owned = watcher::Config::default().labels(&format!("{}={}", MANAGED_BY_LABEL, MANAGED_BY));

    // Debounce batches the burst of owned-object events a single write causes
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(1))
        .concurrency(concurrency);

    Controller::new(clusters, watcher::Config::default())
        .owns(statefulsets, owned.clone())
        .owns(services, owned.clone())
        .owns(config_maps, owned)
        .with_config(controller_config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _action)) => debug!("Reconciled DbCluster {}", obj.name),
                Err(e) => error!("Controller error for DbCluster: {}", e),
            }
        })
        .await;

    info!("DbCluster watcher stopped");
    Ok(())
}
