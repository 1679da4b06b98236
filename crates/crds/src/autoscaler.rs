//! DbClusterAutoScaler CRD
//!
//! Declares utilization rules and resource profiles for a target cluster.
//! The autoscaler controller expresses scale-out as a satellite `DbCluster`
//! that joins the target, and grows or shrinks that satellite over time.

use crate::component::ComponentKind;
use crate::references::ClusterReference;
use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default sampling window for utilization queries
pub const DEFAULT_METRIC_DURATION_SECONDS: i64 = 60;
/// Default cooldown between scale-in actions
pub const DEFAULT_SCALE_IN_INTERVAL_SECONDS: i64 = 500;
/// Default cooldown between scale-out actions
pub const DEFAULT_SCALE_OUT_INTERVAL_SECONDS: i64 = 300;
/// Default time a satellite must sit at its floor before it is deleted
pub const DEFAULT_DECOMMISSION_INTERVAL_SECONDS: i64 = 600;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "dbops.microscaler.io",
    version = "v1alpha1",
    kind = "DbClusterAutoScaler",
    namespaced,
    status = "DbClusterAutoScalerStatus",
    shortname = "dbca",
    derive = "PartialEq",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct DbClusterAutoScalerSpec {
    /// Target (parent) cluster
    pub cluster: ClusterReference,

    /// Prometheus endpoint; falls back to the controller's configured URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<ComponentAutoScalerSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<ComponentAutoScalerSpec>,
}

/// Autoscaling policy for one component.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentAutoScalerSpec {
    /// Resource profiles keyed by profile name
    #[serde(default)]
    pub resources: BTreeMap<String, AutoResource>,

    /// Utilization rules keyed by resource (`cpu`, `memory`, `storage`)
    #[serde(default)]
    pub rules: BTreeMap<String, AutoRule>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_duration_seconds: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_in_interval_seconds: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_out_interval_seconds: Option<i64>,

    /// How long a satellite must sit at its floor with low usage before deletion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decommission_interval_seconds: Option<i64>,

    /// What to do when a tick returns no utilization data
    #[serde(default)]
    pub no_data_policy: NoDataPolicy,
}

/// A resource profile for satellite replicas.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AutoResource {
    pub cpu: String,
    pub memory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
    /// Replicas added or removed per scaling step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i32>,
    /// Replica floor while the satellite exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<i32>,
}

/// Hysteresis thresholds for one resource.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutoRule {
    /// Scale out when utilization reaches this ratio
    pub max_threshold: f64,
    /// Scale in when utilization falls to this ratio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_threshold: Option<f64>,
    /// Profiles this rule applies to (empty means all)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_types: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum NoDataPolicy {
    /// Take no action and leave every timer untouched
    #[default]
    Hold,
    /// Treat the tick as below every minimum threshold
    TreatAsIdle,
}

impl DbClusterAutoScalerSpec {
    /// Autoscaled components with their policies.
    pub fn components(&self) -> impl Iterator<Item = (ComponentKind, &ComponentAutoScalerSpec)> {
        [
            (ComponentKind::Store, self.store.as_ref()),
            (ComponentKind::Gateway, self.gateway.as_ref()),
        ]
        .into_iter()
        .filter_map(|(kind, spec)| spec.map(|spec| (kind, spec)))
    }
}

impl ComponentAutoScalerSpec {
    pub fn metric_duration_seconds(&self) -> i64 {
        self.metric_duration_seconds.unwrap_or(DEFAULT_METRIC_DURATION_SECONDS)
    }

    pub fn scale_in_interval_seconds(&self) -> i64 {
        self.scale_in_interval_seconds.unwrap_or(DEFAULT_SCALE_IN_INTERVAL_SECONDS)
    }

    pub fn scale_out_interval_seconds(&self) -> i64 {
        self.scale_out_interval_seconds.unwrap_or(DEFAULT_SCALE_OUT_INTERVAL_SECONDS)
    }

    pub fn decommission_interval_seconds(&self) -> i64 {
        self.decommission_interval_seconds
            .unwrap_or(DEFAULT_DECOMMISSION_INTERVAL_SECONDS)
    }

    /// First profile in name order; satellites are sized from it.
    pub fn primary_profile(&self) -> Option<(&String, &AutoResource)> {
        self.resources.iter().next()
    }
}

impl AutoResource {
    pub fn step(&self) -> i32 {
        self.count.unwrap_or(1).max(1)
    }

    pub fn floor(&self) -> i32 {
        self.min_replicas.unwrap_or(1).max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DbClusterAutoScalerStatus {
    /// Per-component loop state, keyed by component name
    #[serde(default)]
    pub components: BTreeMap<String, AutoScalerComponentStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutoScalerComponentStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub satellite_name: Option<String>,

    /// Time of the last create/scale action, used for cooldowns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scale_time: Option<DateTime<Utc>>,

    /// Start of the current stretch at the replica floor with low usage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor_since: Option<DateTime<Utc>>,

    /// Last sampled utilization per rule
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub last_utilization: BTreeMap<String, f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_decision: Option<String>,

    /// Set while waiting for the satellite to become healthy after an action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_since: Option<DateTime<Utc>>,

    /// Configuration error of the last tick, cleared once a tick succeeds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
