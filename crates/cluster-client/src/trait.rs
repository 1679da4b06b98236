//! ClusterClient trait for mocking
//!
//! This trait abstracts every Kubernetes read and write the controllers make.
//! The concrete `KubeClusterClient` implements it over the API server, and
//! tests use the in-memory `MockClusterClient`.

use crate::error::ClusterClientError;
use crate::models::{ManagedKind, ManagedObject, PodObservation};
use crds::{DbCluster, DbClusterAutoScalerStatus, DbClusterStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use std::collections::BTreeMap;

/// Trait for managed-resource operations
///
/// All writes that replace an object carry its `resourceVersion` and fail with
/// `ClusterClientError::Conflict` when it is stale.
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ClusterClientTrait: Send + Sync {
    // Managed resources
    async fn get_object(&self, namespace: &str, kind: ManagedKind, name: &str) -> Result<Option<ManagedObject>, ClusterClientError>;
    async fn list_objects(&self, namespace: &str, kind: ManagedKind, selector: &BTreeMap<String, String>) -> Result<Vec<ManagedObject>, ClusterClientError>;
    async fn create_object(&self, namespace: &str, object: &ManagedObject) -> Result<ManagedObject, ClusterClientError>;
    async fn replace_object(&self, namespace: &str, object: &ManagedObject) -> Result<ManagedObject, ClusterClientError>;
    /// Deleting an absent object succeeds.
    async fn delete_object(&self, namespace: &str, kind: ManagedKind, name: &str) -> Result<(), ClusterClientError>;
    /// Set a controller owner reference without touching the object's spec.
    async fn adopt_object(&self, namespace: &str, kind: ManagedKind, name: &str, owner: &OwnerReference, resource_version: &str) -> Result<ManagedObject, ClusterClientError>;

    // Read-only inputs
    async fn secret_exists(&self, namespace: &str, name: &str) -> Result<bool, ClusterClientError>;
    async fn list_pods(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<PodObservation>, ClusterClientError>;

    // Clusters
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<DbCluster>, ClusterClientError>;
    async fn list_clusters(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<DbCluster>, ClusterClientError>;
    async fn create_cluster(&self, namespace: &str, cluster: &DbCluster) -> Result<DbCluster, ClusterClientError>;
    async fn replace_cluster(&self, namespace: &str, cluster: &DbCluster) -> Result<DbCluster, ClusterClientError>;
    async fn delete_cluster(&self, namespace: &str, name: &str) -> Result<(), ClusterClientError>;
    async fn patch_cluster_status(&self, namespace: &str, name: &str, status: &DbClusterStatus) -> Result<(), ClusterClientError>;

    // Autoscalers
    async fn patch_autoscaler_status(&self, namespace: &str, name: &str, status: &DbClusterAutoScalerStatus) -> Result<(), ClusterClientError>;
}
