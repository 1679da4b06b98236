//! DbClusterAutoScaler watcher.
//!
//! Feeds watch events into the worker registry. A re-list (`Init` ..
//! `InitDone`) drops autoscalers deleted while the watch was down.

use crate::error::AutoscalerError;
use crate::registry::{autoscaler_key, Registry};
use crds::DbClusterAutoScaler;
use futures::TryStreamExt;
use kube::Api;
use kube_runtime::{watcher, WatchStreamExt};
use std::collections::HashSet;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

fn upsert(registry: &mut Registry, autoscaler: DbClusterAutoScaler) {
    let key = autoscaler_key(&autoscaler);
    if autoscaler.metadata.deletion_timestamp.is_some() {
        registry.remove(&key);
        return;
    }
    if let Err(e) = registry.apply(autoscaler) {
        warn!("Failed to start workers for autoscaler {}: {}", key, e);
    }
}

/// Apply one watch event to the registry.
///
/// `seen` collects the keys listed since the last `Init`.
pub fn handle_event(
    registry: &mut Registry,
    seen: &mut HashSet<String>,
    event: watcher::Event<DbClusterAutoScaler>,
) {
    match event {
        watcher::Event::Apply(autoscaler) => {
            debug!("DbClusterAutoScaler applied: {}", autoscaler_key(&autoscaler));
            upsert(registry, autoscaler);
        }
        watcher::Event::Delete(autoscaler) => {
            let key = autoscaler_key(&autoscaler);
            info!("DbClusterAutoScaler deleted: {}", key);
            registry.remove(&key);
        }
        watcher::Event::Init => {
            debug!("DbClusterAutoScaler watcher (re)listing");
            seen.clear();
        }
        watcher::Event::InitApply(autoscaler) => {
            seen.insert(autoscaler_key(&autoscaler));
            upsert(registry, autoscaler);
        }
        watcher::Event::InitDone => {
            registry.retain(seen);
            info!(
                "DbClusterAutoScaler watcher initialized, {} worker(s) running",
                registry.worker_count()
            );
        }
    }
}

/// Watch autoscalers until `shutdown` fires, then stop every worker.
pub async fn watch_autoscalers(
    api: Api<DbClusterAutoScaler>,
    mut registry: Registry,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), AutoscalerError> {
    info!("Starting DbClusterAutoScaler watcher");

    let stream = watcher(api, watcher::Config::default()).default_backoff();
    tokio::pin!(stream);
    let mut seen = HashSet::new();

    let result = loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!("DbClusterAutoScaler watcher received shutdown");
                break Ok(());
            }
            event = stream.try_next() => match event {
                Ok(Some(event)) => handle_event(&mut registry, &mut seen, event),
                Ok(None) => {
                    break Err(AutoscalerError::Watch("DbClusterAutoScaler watch stream ended".to_string()));
                }
                // The backoff layer retries; keep consuming
                Err(e) => warn!("DbClusterAutoScaler watch error: {}", e),
            }
        }
    };

    registry.stop_all().await;
    result
}
