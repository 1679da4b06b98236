//! Shared controller state and the per-reconcile context.

use crate::backoff::BackoffTracker;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use chrono::{DateTime, Utc};
use cluster_client::controller_owner_ref;
use crds::{ComponentKind, DbCluster};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use std::sync::Arc;

/// Meta config key holding the number of data replicas.
pub const REPLICATION_KEY: &str = "replication.max-replicas";
pub const DEFAULT_REPLICATION_FACTOR: i32 = 3;

/// State shared by every reconcile, handed to `kube_runtime::Controller`.
#[derive(Debug)]
pub struct Context {
    pub reconciler: Reconciler,
    pub metrics: Arc<Metrics>,
    pub backoff: BackoffTracker,
}

/// Parent a satellite cluster joins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentCluster {
    pub name: String,
    pub namespace: String,
}

/// Everything one reconcile of one cluster needs, built fresh per invocation.
#[derive(Debug, Clone)]
pub struct ReconcileContext<'a> {
    pub cluster: &'a DbCluster,
    pub namespace: String,
    pub name: String,
    /// Controller reference stamped on every managed object
    pub owner: OwnerReference,
    pub parent: Option<ParentCluster>,
    pub now: DateTime<Utc>,
}

impl<'a> ReconcileContext<'a> {
    pub fn new(cluster: &'a DbCluster, now: DateTime<Utc>) -> Result<Self, ControllerError> {
        let name = cluster
            .metadata
            .name
            .clone()
            .ok_or_else(|| ControllerError::InvalidConfig("DbCluster has no name".to_string()))?;
        let namespace = cluster
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let owner = controller_owner_ref(cluster).ok_or_else(|| {
            ControllerError::InvalidConfig(format!("DbCluster {}/{} has no uid yet", namespace, name))
        })?;
        let parent = cluster.spec.cluster_ref.as_ref().map(|r| ParentCluster {
            name: r.name.clone(),
            namespace: r.resolve_namespace(&namespace).to_string(),
        });
        Ok(Self {
            cluster,
            namespace,
            name,
            owner,
            parent,
            now,
        })
    }

    /// Client endpoint of the metadata service this cluster's members join.
    pub fn meta_endpoint(&self) -> String {
        let scheme = if self.cluster.spec.enable_tls { "https" } else { "http" };
        let (cluster, namespace) = match &self.parent {
            Some(parent) => (parent.name.as_str(), parent.namespace.as_str()),
            None => (self.name.as_str(), self.namespace.as_str()),
        };
        format!(
            "{}://{}.{}.svc:{}",
            scheme,
            ComponentKind::Meta.resource_name(cluster),
            namespace,
            ComponentKind::Meta.client_port()
        )
    }

    /// Minimum store count, or `None` for satellites which borrow the parent's stores.
    pub fn replication_floor(&self) -> Option<i32> {
        if self.parent.is_some() {
            return None;
        }
        let configured = self
            .cluster
            .spec
            .meta
            .as_ref()
            .and_then(|meta| meta.config.get(REPLICATION_KEY))
            .and_then(|raw| raw.trim().parse::<i32>().ok());
        Some(configured.unwrap_or(DEFAULT_REPLICATION_FACTOR))
    }

    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}
