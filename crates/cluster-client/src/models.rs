//! Managed resource models
//!
//! The controllers own three kinds of Kubernetes objects per component.
//! `ManagedObject` wraps them so adoption, ownership and revision checks
//! can be written once.

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use std::collections::BTreeMap;
use std::fmt;

/// Label the StatefulSet controller stamps on pods with their template revision
pub const POD_REVISION_LABEL: &str = "controller-revision-hash";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ManagedKind {
    StatefulSet,
    Service,
    ConfigMap,
}

impl fmt::Display for ManagedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ManagedKind::StatefulSet => "StatefulSet",
            ManagedKind::Service => "Service",
            ManagedKind::ConfigMap => "ConfigMap",
        };
        f.write_str(name)
    }
}

/// A Kubernetes object owned (or to be adopted) by a cluster.
#[derive(Debug, Clone, PartialEq)]
pub enum ManagedObject {
    StatefulSet(StatefulSet),
    Service(Service),
    ConfigMap(ConfigMap),
}

impl ManagedObject {
    pub fn kind(&self) -> ManagedKind {
        match self {
            ManagedObject::StatefulSet(_) => ManagedKind::StatefulSet,
            ManagedObject::Service(_) => ManagedKind::Service,
            ManagedObject::ConfigMap(_) => ManagedKind::ConfigMap,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            ManagedObject::StatefulSet(o) => &o.metadata,
            ManagedObject::Service(o) => &o.metadata,
            ManagedObject::ConfigMap(o) => &o.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            ManagedObject::StatefulSet(o) => &mut o.metadata,
            ManagedObject::Service(o) => &mut o.metadata,
            ManagedObject::ConfigMap(o) => &mut o.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Content revision used as the optimistic-concurrency precondition
    pub fn resource_version(&self) -> Option<&str> {
        self.metadata().resource_version.as_deref()
    }

    pub fn labels(&self) -> Option<&BTreeMap<String, String>> {
        self.metadata().labels.as_ref()
    }

    pub fn owner_references(&self) -> &[OwnerReference] {
        self.metadata().owner_references.as_deref().unwrap_or_default()
    }

    pub fn as_stateful_set(&self) -> Option<&StatefulSet> {
        match self {
            ManagedObject::StatefulSet(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_service(&self) -> Option<&Service> {
        match self {
            ManagedObject::Service(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_config_map(&self) -> Option<&ConfigMap> {
        match self {
            ManagedObject::ConfigMap(o) => Some(o),
            _ => None,
        }
    }
}

impl From<StatefulSet> for ManagedObject {
    fn from(value: StatefulSet) -> Self {
        ManagedObject::StatefulSet(value)
    }
}

impl From<Service> for ManagedObject {
    fn from(value: Service) -> Self {
        ManagedObject::Service(value)
    }
}

impl From<ConfigMap> for ManagedObject {
    fn from(value: ConfigMap) -> Self {
        ManagedObject::ConfigMap(value)
    }
}

/// What the reconciler needs to know about one pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodObservation {
    pub name: String,
    /// StatefulSet ordinal parsed from the pod name
    pub ordinal: i32,
    pub ready: bool,
    /// Template revision the pod was created from
    pub revision: Option<String>,
    pub labels: BTreeMap<String, String>,
}

/// Parse the trailing `-<n>` ordinal of a StatefulSet pod name.
pub fn ordinal_from_pod_name(name: &str) -> Option<i32> {
    name.rsplit_once('-').and_then(|(_, ordinal)| ordinal.parse().ok())
}
