//! Satellite writes and the health wait that follows them.

use crate::error::AutoscalerError;
use crate::satellite;
use cluster_client::{update_cluster_with_retry, ClusterClientError, ClusterClientTrait, RetryConfig};
use crds::{ComponentKind, DbCluster};
use kube::ResourceExt;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Create `desired`, or return the existing satellite if an earlier tick already did.
pub async fn create_satellite(
    client: &dyn ClusterClientTrait,
    desired: &DbCluster,
) -> Result<DbCluster, AutoscalerError> {
    let namespace = desired.namespace().unwrap_or_default();
    let name = desired.name_any();
    match client.create_cluster(&namespace, desired).await {
        Ok(created) => {
            info!("Created satellite DbCluster {}/{}", namespace, name);
            Ok(created)
        }
        Err(ClusterClientError::AlreadyExists(_)) => client
            .get_cluster(&namespace, &name)
            .await?
            .ok_or_else(|| ClusterClientError::NotFound(format!("DbCluster {}/{}", namespace, name)).into()),
        Err(e) => Err(e.into()),
    }
}

/// Set the replica count of `kind` in a satellite, retrying on conflicts.
pub async fn set_replicas(
    client: &dyn ClusterClientTrait,
    namespace: &str,
    name: &str,
    kind: ComponentKind,
    replicas: i32,
    retry: &RetryConfig,
) -> Result<DbCluster, AutoscalerError> {
    let updated = update_cluster_with_retry(client, namespace, name, retry, |cluster| {
        match cluster.spec.slot_mut(kind).as_mut() {
            Some(component) if component.replicas != Some(replicas) => {
                component.replicas = Some(replicas);
                true
            }
            _ => false,
        }
    })
    .await?;
    info!("Satellite DbCluster {}/{} {} replicas set to {}", namespace, name, kind, replicas);
    Ok(updated)
}

pub async fn delete_satellite(client: &dyn ClusterClientTrait, namespace: &str, name: &str) -> Result<(), AutoscalerError> {
    match client.delete_cluster(namespace, name).await {
        Ok(()) | Err(ClusterClientError::NotFound(_)) => {
            info!("Deleted satellite DbCluster {}/{}", namespace, name);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Poll a satellite until `kind` is healthy.
///
/// Returns `Ok(false)` when `timeout` elapses first, and `Cancelled` when a
/// shutdown signal arrives. Either way the satellite keeps its last-applied
/// spec and the next tick picks up from there.
pub async fn wait_for_healthy(
    client: &dyn ClusterClientTrait,
    namespace: &str,
    name: &str,
    kind: ComponentKind,
    timeout: Duration,
    poll: Duration,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<bool, AutoscalerError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(cluster) = client.get_cluster(namespace, name).await? {
            if satellite::view(&cluster, kind).healthy {
                debug!("Satellite DbCluster {}/{} is healthy", namespace, name);
                return Ok(true);
            }
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return Ok(false);
        }
        tokio::select! {
            _ = tokio::time::sleep(poll.min(deadline - now)) => {}
            _ = shutdown.recv() => {
                return Err(AutoscalerError::Cancelled(format!(
                    "waiting for satellite {}/{}",
                    namespace, name
                )));
            }
        }
    }
}
