//! Kubernetes-backed cluster client

use crate::error::ClusterClientError;
use crate::models::{ordinal_from_pod_name, ManagedKind, ManagedObject, PodObservation, POD_REVISION_LABEL};
use crate::cluster_trait::ClusterClientTrait;
use crds::labels::selector_string;
use crds::{DbCluster, DbClusterAutoScaler, DbClusterAutoScalerStatus, DbClusterStatus};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::debug;

/// Cluster client talking to the Kubernetes API server.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient").finish_non_exhaustive()
    }
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the in-cluster or kubeconfig environment.
    pub async fn try_default() -> Result<Self, ClusterClientError> {
        Ok(Self::new(Client::try_default().await?))
    }

    pub fn kube_client(&self) -> Client {
        self.client.clone()
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn describe(kind: impl std::fmt::Display, namespace: &str, name: &str) -> String {
    format!("{} {}/{}", kind, namespace, name)
}

fn list_params(selector: &BTreeMap<String, String>) -> ListParams {
    if selector.is_empty() {
        ListParams::default()
    } else {
        ListParams::default().labels(&selector_string(selector))
    }
}

async fn get_typed<K>(api: &Api<K>, what: &str, name: &str) -> Result<Option<K>, ClusterClientError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    api.get_opt(name)
        .await
        .map_err(|e| ClusterClientError::from_kube(e, what))
}

async fn create_typed<K>(api: &Api<K>, what: &str, object: &K) -> Result<K, ClusterClientError>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    api.create(&PostParams::default(), object)
        .await
        .map_err(|e| ClusterClientError::from_kube(e, what))
}

async fn replace_typed<K>(api: &Api<K>, what: &str, name: &str, object: &K) -> Result<K, ClusterClientError>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    // replace sends metadata.resourceVersion, so a stale read fails with 409
    api.replace(name, &PostParams::default(), object)
        .await
        .map_err(|e| ClusterClientError::from_kube(e, what))
}

async fn delete_typed<K>(api: &Api<K>, what: &str, name: &str) -> Result<(), ClusterClientError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::background()).await {
        Ok(_) => Ok(()),
        Err(e) => match ClusterClientError::from_kube(e, what) {
            ClusterClientError::NotFound(_) => Ok(()),
            other => Err(other),
        },
    }
}

async fn adopt_typed<K>(
    api: &Api<K>,
    what: &str,
    name: &str,
    owner: &OwnerReference,
    resource_version: &str,
) -> Result<K, ClusterClientError>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    let current = get_typed(api, what, name)
        .await?
        .ok_or_else(|| ClusterClientError::NotFound(what.to_string()))?;
    let meta = current.meta();
    if meta.resource_version.as_deref() != Some(resource_version) {
        return Err(ClusterClientError::Conflict(format!(
            "{}: resourceVersion changed since it was read",
            what
        )));
    }
    let mut owners = meta.owner_references.clone().unwrap_or_default();
    owners.retain(|o| o.uid != owner.uid);
    owners.push(owner.clone());

    // resourceVersion in a merge patch is a precondition; only metadata changes
    let patch = serde_json::json!({
        "metadata": {
            "resourceVersion": resource_version,
            "ownerReferences": owners,
        }
    });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(|e| ClusterClientError::from_kube(e, what))
}

/// A merge patch cannot drop map entries (cleared failure members would linger),
/// so status is written as a JSON patch replacing the whole subtree.
fn replace_status_patch<S: Serialize>(status: &S) -> Result<Patch<()>, ClusterClientError> {
    let ops: json_patch::Patch = serde_json::from_value(serde_json::json!([
        { "op": "add", "path": "/status", "value": status }
    ]))?;
    Ok(Patch::Json(ops))
}

fn observe_pod(pod: Pod) -> Option<PodObservation> {
    let name = pod.metadata.name?;
    let ordinal = ordinal_from_pod_name(&name)?;
    let labels = pod.metadata.labels.unwrap_or_default();
    let terminating = pod.metadata.deletion_timestamp.is_some();
    let ready = !terminating
        && pod
            .status
            .and_then(|s| s.conditions)
            .unwrap_or_default()
            .iter()
            .any(|c| c.type_ == "Ready" && c.status == "True");
    Some(PodObservation {
        name,
        ordinal,
        ready,
        revision: labels.get(POD_REVISION_LABEL).cloned(),
        labels,
    })
}

#[async_trait::async_trait]
impl ClusterClientTrait for KubeClusterClient {
    async fn get_object(&self, namespace: &str, kind: ManagedKind, name: &str) -> Result<Option<ManagedObject>, ClusterClientError> {
        let what = describe(kind, namespace, name);
        let object = match kind {
            ManagedKind::StatefulSet => get_typed(&self.api::<StatefulSet>(namespace), &what, name).await?.map(ManagedObject::from),
            ManagedKind::Service => get_typed(&self.api::<Service>(namespace), &what, name).await?.map(ManagedObject::from),
            ManagedKind::ConfigMap => get_typed(&self.api::<ConfigMap>(namespace), &what, name).await?.map(ManagedObject::from),
        };
        Ok(object)
    }

    async fn list_objects(&self, namespace: &str, kind: ManagedKind, selector: &BTreeMap<String, String>) -> Result<Vec<ManagedObject>, ClusterClientError> {
        let params = list_params(selector);
        let what = describe(kind, namespace, "*");
        let map_err = |e| ClusterClientError::from_kube(e, &what);
        let objects = match kind {
            ManagedKind::StatefulSet => self.api::<StatefulSet>(namespace).list(&params).await.map_err(map_err)?.items.into_iter().map(ManagedObject::from).collect(),
            ManagedKind::Service => self.api::<Service>(namespace).list(&params).await.map_err(map_err)?.items.into_iter().map(ManagedObject::from).collect(),
            ManagedKind::ConfigMap => self.api::<ConfigMap>(namespace).list(&params).await.map_err(map_err)?.items.into_iter().map(ManagedObject::from).collect(),
        };
        Ok(objects)
    }

    async fn create_object(&self, namespace: &str, object: &ManagedObject) -> Result<ManagedObject, ClusterClientError> {
        let what = describe(object.kind(), namespace, object.name());
        debug!("Creating {}", what);
        let created = match object {
            ManagedObject::StatefulSet(o) => create_typed(&self.api(namespace), &what, o).await?.into(),
            ManagedObject::Service(o) => create_typed(&self.api(namespace), &what, o).await?.into(),
            ManagedObject::ConfigMap(o) => create_typed(&self.api(namespace), &what, o).await?.into(),
        };
        Ok(created)
    }

    async fn replace_object(&self, namespace: &str, object: &ManagedObject) -> Result<ManagedObject, ClusterClientError> {
        let name = object.name();
        let what = describe(object.kind(), namespace, name);
        debug!("Replacing {} at resourceVersion {:?}", what, object.resource_version());
        let replaced = match object {
            ManagedObject::StatefulSet(o) => replace_typed(&self.api(namespace), &what, name, o).await?.into(),
            ManagedObject::Service(o) => replace_typed(&self.api(namespace), &what, name, o).await?.into(),
            ManagedObject::ConfigMap(o) => replace_typed(&self.api(namespace), &what, name, o).await?.into(),
        };
        Ok(replaced)
    }

    async fn delete_object(&self, namespace: &str, kind: ManagedKind, name: &str) -> Result<(), ClusterClientError> {
        let what = describe(kind, namespace, name);
        debug!("Deleting {}", what);
        match kind {
            ManagedKind::StatefulSet => delete_typed(&self.api::<StatefulSet>(namespace), &what, name).await,
            ManagedKind::Service => delete_typed(&self.api::<Service>(namespace), &what, name).await,
            ManagedKind::ConfigMap => delete_typed(&self.api::<ConfigMap>(namespace), &what, name).await,
        }
    }

    async fn adopt_object(&self, namespace: &str, kind: ManagedKind, name: &str, owner: &OwnerReference, resource_version: &str) -> Result<ManagedObject, ClusterClientError> {
        let what = describe(kind, namespace, name);
        let adopted = match kind {
            ManagedKind::StatefulSet => adopt_typed(&self.api::<StatefulSet>(namespace), &what, name, owner, resource_version).await?.into(),
            ManagedKind::Service => adopt_typed(&self.api::<Service>(namespace), &what, name, owner, resource_version).await?.into(),
            ManagedKind::ConfigMap => adopt_typed(&self.api::<ConfigMap>(namespace), &what, name, owner, resource_version).await?.into(),
        };
        Ok(adopted)
    }

    async fn secret_exists(&self, namespace: &str, name: &str) -> Result<bool, ClusterClientError> {
        let what = describe("Secret", namespace, name);
        Ok(get_typed(&self.api::<Secret>(namespace), &what, name).await?.is_some())
    }

    async fn list_pods(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<PodObservation>, ClusterClientError> {
        let what = describe("Pod", namespace, "*");
        let pods = self
            .api::<Pod>(namespace)
            .list(&list_params(selector))
            .await
            .map_err(|e| ClusterClientError::from_kube(e, &what))?;
        let mut observed: Vec<_> = pods.items.into_iter().filter_map(observe_pod).collect();
        observed.sort_by_key(|p| p.ordinal);
        Ok(observed)
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<DbCluster>, ClusterClientError> {
        let what = describe("DbCluster", namespace, name);
        get_typed(&self.api::<DbCluster>(namespace), &what, name).await
    }

    async fn list_clusters(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<DbCluster>, ClusterClientError> {
        let what = describe("DbCluster", namespace, "*");
        let list = self
            .api::<DbCluster>(namespace)
            .list(&list_params(selector))
            .await
            .map_err(|e| ClusterClientError::from_kube(e, &what))?;
        Ok(list.items)
    }

    async fn create_cluster(&self, namespace: &str, cluster: &DbCluster) -> Result<DbCluster, ClusterClientError> {
        let name = cluster.metadata.name.as_deref().unwrap_or_default();
        let what = describe("DbCluster", namespace, name);
        create_typed(&self.api(namespace), &what, cluster).await
    }

    async fn replace_cluster(&self, namespace: &str, cluster: &DbCluster) -> Result<DbCluster, ClusterClientError> {
        let name = cluster.metadata.name.as_deref().unwrap_or_default();
        let what = describe("DbCluster", namespace, name);
        replace_typed(&self.api(namespace), &what, name, cluster).await
    }

    async fn delete_cluster(&self, namespace: &str, name: &str) -> Result<(), ClusterClientError> {
        let what = describe("DbCluster", namespace, name);
        delete_typed(&self.api::<DbCluster>(namespace), &what, name).await
    }

    async fn patch_cluster_status(&self, namespace: &str, name: &str, status: &DbClusterStatus) -> Result<(), ClusterClientError> {
        let what = describe("DbCluster", namespace, name);
        let patch = replace_status_patch(status)?;
        self.api::<DbCluster>(namespace)
            .patch_status(name, &PatchParams::default(), &patch)
            .await
            .map_err(|e| ClusterClientError::from_kube(e, &what))?;
        Ok(())
    }

    async fn patch_autoscaler_status(&self, namespace: &str, name: &str, status: &DbClusterAutoScalerStatus) -> Result<(), ClusterClientError> {
        let what = describe("DbClusterAutoScaler", namespace, name);
        let patch = replace_status_patch(status)?;
        self.api::<DbClusterAutoScaler>(namespace)
            .patch_status(name, &PatchParams::default(), &patch)
            .await
            .map_err(|e| ClusterClientError::from_kube(e, &what))?;
        Ok(())
    }
}
