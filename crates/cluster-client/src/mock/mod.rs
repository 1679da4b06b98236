//! Mock ClusterClient for unit testing
//!
//! This module provides an in-memory implementation of `ClusterClientTrait`
//! that behaves like a small API server:
//! - every write bumps `resourceVersion` and stale replaces fail with a conflict
//! - services get a stable `clusterIP` and node ports; changing `clusterIP` is rejected
//! - StatefulSets roll their pods according to replicas and partition (`workload.rs`)
//!
//! Tests drive pod health with `set_pod_ready` and inject write conflicts with
//! `inject_conflicts`.

mod workload;

use crate::cluster_trait::ClusterClientTrait;
use crate::error::ClusterClientError;
use crate::models::{ManagedKind, ManagedObject, PodObservation};
use crds::labels::matches_selector;
use crds::{DbCluster, DbClusterAutoScalerStatus, DbClusterStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type ObjectKey = (String, ManagedKind, String);
type NamedKey = (String, String);

/// A pod simulated for a StatefulSet.
#[derive(Debug, Clone)]
pub(crate) struct MockPod {
    pub(crate) stateful_set: String,
    pub(crate) observation: PodObservation,
}

#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub(crate) objects: HashMap<ObjectKey, ManagedObject>,
    pub(crate) clusters: HashMap<NamedKey, DbCluster>,
    pub(crate) autoscaler_status: HashMap<NamedKey, DbClusterAutoScalerStatus>,
    pub(crate) secrets: HashSet<NamedKey>,
    pub(crate) pods: BTreeMap<NamedKey, MockPod>,
    pub(crate) unready_pods: HashSet<NamedKey>,
    pub(crate) conflicts: u32,
    pub(crate) resource_version: u64,
    pub(crate) writes: u64,
    pub(crate) status_writes: u64,
    pub(crate) next_node_port: i32,
    pub(crate) next_cluster_ip: u32,
}

impl MockState {
    pub(crate) fn bump_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    fn take_conflict(&mut self, what: &str) -> Result<(), ClusterClientError> {
        if self.conflicts > 0 {
            self.conflicts -= 1;
            return Err(ClusterClientError::Conflict(format!("{}: injected conflict", what)));
        }
        Ok(())
    }
}

/// Mock ClusterClient for testing
///
/// Clones share the same in-memory store.
#[derive(Debug, Clone, Default)]
pub struct MockClusterClient {
    pub(crate) state: Arc<Mutex<MockState>>,
}

fn key(namespace: &str, name: &str) -> NamedKey {
    (namespace.to_string(), name.to_string())
}

fn stamp_new(meta: &mut ObjectMeta, namespace: &str, resource_version: String) {
    meta.namespace = Some(namespace.to_string());
    meta.resource_version = Some(resource_version);
    if meta.uid.is_none() {
        meta.uid = Some(uuid::Uuid::new_v4().to_string());
    }
}

impl MockClusterClient {
    /// Create a new, empty mock client
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a cluster to the mock store (for test setup)
    pub fn add_cluster(&self, mut cluster: DbCluster) -> DbCluster {
        let mut state = self.lock();
        let namespace = cluster.metadata.namespace.clone().unwrap_or_else(|| "default".to_string());
        let version = state.bump_version();
        stamp_new(&mut cluster.metadata, &namespace, version);
        cluster.metadata.generation.get_or_insert(1);
        let name = cluster.metadata.name.clone().unwrap_or_default();
        state.clusters.insert(key(&namespace, &name), cluster.clone());
        cluster
    }

    /// Add a pre-existing object (e.g. an orphan to be adopted)
    pub fn add_object(&self, namespace: &str, mut object: ManagedObject) -> ManagedObject {
        let mut state = self.lock();
        let version = state.bump_version();
        stamp_new(object.metadata_mut(), namespace, version);
        workload::on_create(&mut state, namespace, &mut object);
        state
            .objects
            .insert((namespace.to_string(), object.kind(), object.name().to_string()), object.clone());
        object
    }

    /// Register a secret so `secret_exists` finds it
    pub fn add_secret(&self, namespace: &str, name: &str) {
        self.lock().secrets.insert(key(namespace, name));
    }

    /// Mark a pod (un)ready and re-run the StatefulSet simulation
    pub fn set_pod_ready(&self, namespace: &str, pod: &str, ready: bool) {
        let mut state = self.lock();
        if ready {
            state.unready_pods.remove(&key(namespace, pod));
        } else {
            state.unready_pods.insert(key(namespace, pod));
        }
        workload::resync_namespace(&mut state, namespace);
    }

    /// Make the next `count` replace/adopt calls fail with a conflict
    pub fn inject_conflicts(&self, count: u32) {
        self.lock().conflicts = count;
    }

    pub fn conflicts_remaining(&self) -> u32 {
        self.lock().conflicts
    }

    /// Number of create/replace/delete/adopt calls on objects and clusters
    pub fn write_count(&self) -> u64 {
        self.lock().writes
    }

    /// Number of status patches
    pub fn status_write_count(&self) -> u64 {
        self.lock().status_writes
    }

    pub fn cluster(&self, namespace: &str, name: &str) -> Option<DbCluster> {
        self.lock().clusters.get(&key(namespace, name)).cloned()
    }

    pub fn object(&self, namespace: &str, kind: ManagedKind, name: &str) -> Option<ManagedObject> {
        self.lock()
            .objects
            .get(&(namespace.to_string(), kind, name.to_string()))
            .cloned()
    }

    pub fn objects(&self, namespace: &str, kind: ManagedKind) -> Vec<ManagedObject> {
        let state = self.lock();
        let mut objects: Vec<_> = state
            .objects
            .iter()
            .filter(|((ns, k, _), _)| ns == namespace && *k == kind)
            .map(|(_, o)| o.clone())
            .collect();
        objects.sort_by(|a, b| a.name().cmp(b.name()));
        objects
    }

    pub fn pods(&self, namespace: &str) -> Vec<PodObservation> {
        self.lock()
            .pods
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, pod)| pod.observation.clone())
            .collect()
    }

    pub fn autoscaler_status(&self, namespace: &str, name: &str) -> Option<DbClusterAutoScalerStatus> {
        self.lock().autoscaler_status.get(&key(namespace, name)).cloned()
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for MockClusterClient {
    async fn get_object(&self, namespace: &str, kind: ManagedKind, name: &str) -> Result<Option<ManagedObject>, ClusterClientError> {
        Ok(self.object(namespace, kind, name))
    }

    async fn list_objects(&self, namespace: &str, kind: ManagedKind, selector: &BTreeMap<String, String>) -> Result<Vec<ManagedObject>, ClusterClientError> {
        Ok(self
            .objects(namespace, kind)
            .into_iter()
            .filter(|o| matches_selector(o.labels(), selector))
            .collect())
    }

    async fn create_object(&self, namespace: &str, object: &ManagedObject) -> Result<ManagedObject, ClusterClientError> {
        let mut state = self.lock();
        state.writes += 1;
        let object_key = (namespace.to_string(), object.kind(), object.name().to_string());
        if state.objects.contains_key(&object_key) {
            return Err(ClusterClientError::AlreadyExists(format!("{} {}", object.kind(), object.name())));
        }
        let mut created = object.clone();
        let version = state.bump_version();
        stamp_new(created.metadata_mut(), namespace, version);
        workload::on_create(&mut state, namespace, &mut created);
        state.objects.insert(object_key, created.clone());
        Ok(created)
    }

    async fn replace_object(&self, namespace: &str, object: &ManagedObject) -> Result<ManagedObject, ClusterClientError> {
        let mut state = self.lock();
        state.writes += 1;
        let what = format!("{} {}/{}", object.kind(), namespace, object.name());
        let object_key = (namespace.to_string(), object.kind(), object.name().to_string());
        let stored = state
            .objects
            .get(&object_key)
            .cloned()
            .ok_or_else(|| ClusterClientError::NotFound(what.clone()))?;
        state.take_conflict(&what)?;
        if object.resource_version() != stored.resource_version() {
            return Err(ClusterClientError::Conflict(format!("{}: stale resourceVersion", what)));
        }

        let mut replaced = object.clone();
        {
            let meta = replaced.metadata_mut();
            meta.uid = stored.metadata().uid.clone();
            meta.namespace = Some(namespace.to_string());
        }
        workload::on_replace(&mut state, namespace, &stored, &mut replaced)?;
        if replaced == stored {
            return Ok(stored);
        }
        replaced.metadata_mut().resource_version = Some(state.bump_version());
        workload::after_write(&mut state, namespace, &mut replaced);
        state.objects.insert(object_key, replaced.clone());
        Ok(replaced)
    }

    async fn delete_object(&self, namespace: &str, kind: ManagedKind, name: &str) -> Result<(), ClusterClientError> {
        let mut state = self.lock();
        state.writes += 1;
        state.objects.remove(&(namespace.to_string(), kind, name.to_string()));
        if kind == ManagedKind::StatefulSet {
            state
                .pods
                .retain(|(ns, _), pod| !(ns == namespace && pod.stateful_set == name));
        }
        Ok(())
    }

    async fn adopt_object(&self, namespace: &str, kind: ManagedKind, name: &str, owner: &OwnerReference, resource_version: &str) -> Result<ManagedObject, ClusterClientError> {
        let mut state = self.lock();
        state.writes += 1;
        let what = format!("{} {}/{}", kind, namespace, name);
        state.take_conflict(&what)?;
        let version = state.bump_version();
        let object = state
            .objects
            .get_mut(&(namespace.to_string(), kind, name.to_string()))
            .ok_or_else(|| ClusterClientError::NotFound(what.clone()))?;
        if object.resource_version() != Some(resource_version) {
            return Err(ClusterClientError::Conflict(format!("{}: stale resourceVersion", what)));
        }
        let meta = object.metadata_mut();
        let owners = meta.owner_references.get_or_insert_with(Vec::new);
        owners.retain(|o| o.uid != owner.uid);
        owners.push(owner.clone());
        meta.resource_version = Some(version);
        Ok(object.clone())
    }

    async fn secret_exists(&self, namespace: &str, name: &str) -> Result<bool, ClusterClientError> {
        Ok(self.lock().secrets.contains(&key(namespace, name)))
    }

    async fn list_pods(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<PodObservation>, ClusterClientError> {
        let mut pods: Vec<_> = self
            .pods(namespace)
            .into_iter()
            .filter(|p| matches_selector(Some(&p.labels), selector))
            .collect();
        pods.sort_by_key(|p| p.ordinal);
        Ok(pods)
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<DbCluster>, ClusterClientError> {
        Ok(self.cluster(namespace, name))
    }

    async fn list_clusters(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<DbCluster>, ClusterClientError> {
        let state = self.lock();
        let mut clusters: Vec<_> = state
            .clusters
            .iter()
            .filter(|((ns, _), c)| ns == namespace && matches_selector(c.metadata.labels.as_ref(), selector))
            .map(|(_, c)| c.clone())
            .collect();
        clusters.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(clusters)
    }

    async fn create_cluster(&self, namespace: &str, cluster: &DbCluster) -> Result<DbCluster, ClusterClientError> {
        let name = cluster.metadata.name.clone().unwrap_or_default();
        {
            let mut state = self.lock();
            state.writes += 1;
            if state.clusters.contains_key(&key(namespace, &name)) {
                return Err(ClusterClientError::AlreadyExists(format!("DbCluster {}/{}", namespace, name)));
            }
        }
        let mut created = cluster.clone();
        created.metadata.namespace = Some(namespace.to_string());
        created.metadata.generation = Some(1);
        created.status = None;
        Ok(self.add_cluster(created))
    }

    async fn replace_cluster(&self, namespace: &str, cluster: &DbCluster) -> Result<DbCluster, ClusterClientError> {
        let mut state = self.lock();
        state.writes += 1;
        let name = cluster.metadata.name.clone().unwrap_or_default();
        let what = format!("DbCluster {}/{}", namespace, name);
        let stored = state
            .clusters
            .get(&key(namespace, &name))
            .cloned()
            .ok_or_else(|| ClusterClientError::NotFound(what.clone()))?;
        state.take_conflict(&what)?;
        if cluster.metadata.resource_version != stored.metadata.resource_version {
            return Err(ClusterClientError::Conflict(format!("{}: stale resourceVersion", what)));
        }
        let mut replaced = cluster.clone();
        replaced.metadata.uid = stored.metadata.uid.clone();
        replaced.metadata.namespace = Some(namespace.to_string());
        // status is only written through the status subresource
        replaced.status = stored.status.clone();
        if replaced == stored {
            return Ok(stored);
        }
        if replaced.spec != stored.spec {
            replaced.metadata.generation = Some(stored.metadata.generation.unwrap_or(1) + 1);
        }
        replaced.metadata.resource_version = Some(state.bump_version());
        state.clusters.insert(key(namespace, &name), replaced.clone());
        Ok(replaced)
    }

    async fn delete_cluster(&self, namespace: &str, name: &str) -> Result<(), ClusterClientError> {
        let mut state = self.lock();
        state.writes += 1;
        state.clusters.remove(&key(namespace, name));
        Ok(())
    }

    async fn patch_cluster_status(&self, namespace: &str, name: &str, status: &DbClusterStatus) -> Result<(), ClusterClientError> {
        let mut state = self.lock();
        state.status_writes += 1;
        let version = state.bump_version();
        let cluster = state
            .clusters
            .get_mut(&key(namespace, name))
            .ok_or_else(|| ClusterClientError::NotFound(format!("DbCluster {}/{}", namespace, name)))?;
        cluster.status = Some(status.clone());
        cluster.metadata.resource_version = Some(version);
        Ok(())
    }

    async fn patch_autoscaler_status(&self, namespace: &str, name: &str, status: &DbClusterAutoScalerStatus) -> Result<(), ClusterClientError> {
        let mut state = self.lock();
        state.status_writes += 1;
        state.autoscaler_status.insert(key(namespace, name), status.clone());
        Ok(())
    }
}
