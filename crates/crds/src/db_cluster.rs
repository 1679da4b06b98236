//! DbCluster CRD
//!
//! Desired state of a multi-component database cluster, and the observed
//! state the reconciler writes back through the status subresource.

use crate::component::ComponentKind;
use crate::references::ClusterReference;
use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "dbops.microscaler.io",
    version = "v1alpha1",
    kind = "DbCluster",
    namespaced,
    status = "DbClusterStatus",
    shortname = "dbc",
    derive = "PartialEq",
    derive = "Default",
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Paused","type":"boolean","jsonPath":".spec.paused"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DbClusterSpec {
    /// Cluster-wide default version, applied to components that do not override it
    #[serde(default)]
    pub version: String,

    /// Pause all member writes; reconciliation resumes from current partitions when cleared
    #[serde(default)]
    pub paused: bool,

    /// Parent cluster this cluster joins (satellite / heterogeneous cluster)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_ref: Option<ClusterReference>,

    /// Enable mutual TLS between components
    #[serde(default)]
    pub enable_tls: bool,

    /// Enable TLS for SQL clients connecting to the gateway
    #[serde(default)]
    pub enable_client_tls: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<ComponentSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<ComponentSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<ComponentSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdc: Option<ComponentSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_replication: Option<ComponentSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columnar: Option<ComponentSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<ComponentSpec>,
}

/// Desired state of a single component.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    /// Desired replica count (defaulted at admission)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Legacy full image reference. Objects carrying this field predate `baseImage`/`version`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Image repository; combined with the effective version to form the image
    #[serde(default)]
    pub base_image: String,

    /// Per-component version override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ComponentResources>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub storage_claims: Vec<StorageClaim>,

    /// Dotted-key configuration overrides (e.g. `replication.max-replicas`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,

    /// How configuration changes reach running pods
    #[serde(default)]
    pub rollout_strategy: RolloutStrategy,

    /// Client-facing service properties
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceSpec>,

    /// Placement labels for store-bearing components.
    /// Only `specialUse`, `resource-type` and `group` are applied.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub store_labels: BTreeMap<String, String>,

    /// Maximum number of spare replicas added while members are failed over
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_failover_count: Option<i32>,

    /// Run pods on the node network. Switching it rolls the component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_network: Option<bool>,
}

/// CPU/memory/storage quantities, applied as both request and limit.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
}

/// A persistent volume claim template.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageClaim {
    /// Claim name suffix (defaults to `data`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
    /// Requested size, as a Kubernetes quantity (e.g. `10Gi`)
    pub size: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum RolloutStrategy {
    /// Config changes alter the pod template and roll pods by partition
    #[default]
    RollingUpdate,
    /// Config changes are written in place; pods pick them up without restart
    InPlace,
}

/// Client-facing service properties.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// Service type (`ClusterIP`, `NodePort`, `LoadBalancer`)
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_traffic_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_ip: Option<String>,
}

impl DbClusterSpec {
    /// Component spec for a kind, if the component is enabled.
    pub fn component(&self, kind: ComponentKind) -> Option<&ComponentSpec> {
        self.slot(kind).as_ref()
    }

    /// Mutable slot for a kind, so callers can enable or drop a component.
    pub fn slot_mut(&mut self, kind: ComponentKind) -> &mut Option<ComponentSpec> {
        match kind {
            ComponentKind::Meta => &mut self.meta,
            ComponentKind::Store => &mut self.store,
            ComponentKind::Gateway => &mut self.gateway,
            ComponentKind::Cdc => &mut self.cdc,
            ComponentKind::LogReplication => &mut self.log_replication,
            ComponentKind::Columnar => &mut self.columnar,
            ComponentKind::Monitor => &mut self.monitor,
        }
    }

    fn slot(&self, kind: ComponentKind) -> &Option<ComponentSpec> {
        match kind {
            ComponentKind::Meta => &self.meta,
            ComponentKind::Store => &self.store,
            ComponentKind::Gateway => &self.gateway,
            ComponentKind::Cdc => &self.cdc,
            ComponentKind::LogReplication => &self.log_replication,
            ComponentKind::Columnar => &self.columnar,
            ComponentKind::Monitor => &self.monitor,
        }
    }

    /// Enabled components in reconcile order.
    pub fn components(&self) -> impl Iterator<Item = (ComponentKind, &ComponentSpec)> {
        ComponentKind::ALL
            .into_iter()
            .filter_map(move |kind| self.component(kind).map(|spec| (kind, spec)))
    }

    /// A satellite joins a parent's metadata store instead of running its own.
    pub fn is_satellite(&self) -> bool {
        self.cluster_ref.is_some()
    }

    /// True when any component still uses the legacy `image` field.
    pub fn has_legacy_image(&self) -> bool {
        self.components().any(|(_, spec)| spec.has_legacy_image())
    }

    /// True once any new-schema field (`baseImage`, `version`) is populated.
    pub fn is_migrated(&self) -> bool {
        !self.version.is_empty()
            || self.components().any(|(_, spec)| {
                !spec.base_image.is_empty() || spec.version.as_deref().is_some_and(|v| !v.is_empty())
            })
    }
}

impl ComponentSpec {
    pub fn has_legacy_image(&self) -> bool {
        self.image.as_deref().is_some_and(|image| !image.is_empty())
    }

    /// Declared replicas, or the kind default when admission did not fill it.
    pub fn replicas_or_default(&self, kind: ComponentKind) -> i32 {
        self.replicas.unwrap_or_else(|| kind.default_replicas())
    }

    /// Version after applying the cluster-wide default.
    pub fn effective_version<'a>(&'a self, cluster_version: &'a str) -> &'a str {
        match self.version.as_deref() {
            Some(version) if !version.is_empty() => version,
            _ => cluster_version,
        }
    }

    /// Container image: the legacy reference when present, otherwise `<baseImage>:<version>`.
    pub fn image_for(&self, kind: ComponentKind, cluster_version: &str) -> String {
        if let Some(image) = self.image.as_deref().filter(|image| !image.is_empty()) {
            return image.to_string();
        }
        let base = if self.base_image.is_empty() {
            kind.default_base_image()
        } else {
            self.base_image.as_str()
        };
        match self.effective_version(cluster_version) {
            "" => base.to_string(),
            version => format!("{}:{}", base, version),
        }
    }
}

/// Observed state of the cluster.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DbClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Per-component observed state, keyed by component name
    #[serde(default)]
    pub components: BTreeMap<String, ComponentStatus>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ClusterCondition>,
}

/// Lifecycle phase of a component.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum MemberPhase {
    #[default]
    Normal,
    Upgrading,
    Scaling,
    Failover,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    #[serde(default)]
    pub phase: MemberPhase,

    /// Replicas reported by the StatefulSet
    #[serde(default)]
    pub replicas: i32,

    #[serde(default)]
    pub ready_replicas: i32,

    /// Current rollout partition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_revision: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_revision: Option<String>,

    /// Store membership for store-bearing components, keyed by ordinal
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub stores: BTreeMap<String, StoreStatus>,

    /// Members the controller has given up on, keyed by ordinal
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failure_members: BTreeMap<String, FailureMember>,

    /// First time each not-ready ordinal was observed unhealthy
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unhealthy_since: BTreeMap<String, DateTime<Utc>>,

    /// Why the rollout is not progressing, if it is held
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_reason: Option<String>,

    /// Unrecoverable configuration error; the component is skipped until it is fixed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Store membership state as seen by the metadata service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum StoreState {
    Up,
    Down,
    /// Leaving the cluster; data is being migrated off
    Offline,
    /// Fully removed
    Tombstone,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoreStatus {
    pub pod_name: String,
    pub state: StoreState,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FailureMember {
    pub pod_name: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCondition {
    #[serde(rename = "type")]
    pub type_: String,
    /// `True`, `False` or `Unknown`
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl DbClusterStatus {
    /// Insert or replace a condition, keeping the transition time when the status is unchanged.
    pub fn set_condition(&mut self, mut condition: ClusterCondition, now: DateTime<Utc>) {
        match self.conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => {
                condition.last_transition_time = if existing.status == condition.status {
                    existing.last_transition_time
                } else {
                    Some(now)
                };
                *existing = condition;
            }
            None => {
                condition.last_transition_time = Some(now);
                self.conditions.push(condition);
            }
        }
    }

    pub fn condition(&self, type_: &str) -> Option<&ClusterCondition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    pub fn component(&self, kind: ComponentKind) -> Option<&ComponentStatus> {
        self.components.get(kind.as_str())
    }
}

impl DbCluster {
    /// Observed status of one component, if the reconciler has reported it.
    pub fn component_status(&self, kind: ComponentKind) -> Option<&ComponentStatus> {
        self.status.as_ref().and_then(|status| status.component(kind))
    }
}
