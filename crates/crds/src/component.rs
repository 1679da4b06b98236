//! Component kinds of a database cluster
//!
//! A cluster is made of up to seven independently toggleable components.
//! Each kind knows its naming convention, ports and defaults.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of cluster components.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentKind {
    /// Metadata/placement store (quorum-based)
    Meta,
    /// Storage nodes holding regions
    Store,
    /// Stateless SQL gateway
    Gateway,
    /// Change data capture
    Cdc,
    /// Binlog-style log replication
    LogReplication,
    /// Columnar replica nodes
    Columnar,
    /// Monitoring stack
    Monitor,
}

impl ComponentKind {
    /// All kinds in reconcile order (dependencies first).
    pub const ALL: [ComponentKind; 7] = [
        ComponentKind::Meta,
        ComponentKind::Store,
        ComponentKind::Columnar,
        ComponentKind::LogReplication,
        ComponentKind::Gateway,
        ComponentKind::Cdc,
        ComponentKind::Monitor,
    ];

    /// Short lowercase name used in resource names, labels and annotations.
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Meta => "meta",
            ComponentKind::Store => "store",
            ComponentKind::Gateway => "gateway",
            ComponentKind::Cdc => "cdc",
            ComponentKind::LogReplication => "log-replication",
            ComponentKind::Columnar => "columnar",
            ComponentKind::Monitor => "monitor",
        }
    }

    /// `<cluster>-<component>`, the name of the StatefulSet and its ConfigMap base.
    pub fn resource_name(&self, cluster: &str) -> String {
        format!("{}-{}", cluster, self.as_str())
    }

    /// Headless service name used for stable pod DNS.
    pub fn peer_service_name(&self, cluster: &str) -> String {
        format!("{}-{}-peer", cluster, self.as_str())
    }

    /// Pod name for an ordinal.
    pub fn pod_name(&self, cluster: &str, ordinal: i32) -> String {
        format!("{}-{}", self.resource_name(cluster), ordinal)
    }

    /// Secret consumed for inter-component TLS.
    pub fn cluster_tls_secret_name(&self, cluster: &str) -> String {
        format!("{}-{}-cluster-secret", cluster, self.as_str())
    }

    /// Image repository used when none is declared.
    pub fn default_base_image(&self) -> &'static str {
        match self {
            ComponentKind::Meta => "dbops/meta",
            ComponentKind::Store => "dbops/store",
            ComponentKind::Gateway => "dbops/gateway",
            ComponentKind::Cdc => "dbops/cdc",
            ComponentKind::LogReplication => "dbops/log-replication",
            ComponentKind::Columnar => "dbops/columnar",
            ComponentKind::Monitor => "prom/prometheus",
        }
    }

    /// Replica count used when none is declared.
    pub fn default_replicas(&self) -> i32 {
        match self {
            ComponentKind::Meta | ComponentKind::Store => 3,
            ComponentKind::Gateway => 2,
            _ => 1,
        }
    }

    /// Whether the component holds durable data (scale-in one ordinal at a time).
    pub fn is_stateful(&self) -> bool {
        matches!(
            self,
            ComponentKind::Meta | ComponentKind::Store | ComponentKind::LogReplication | ComponentKind::Columnar
        )
    }

    /// Whether pods register as stores in the metadata service.
    pub fn tracks_stores(&self) -> bool {
        matches!(self, ComponentKind::Store | ComponentKind::Columnar)
    }

    /// Client-facing port.
    pub fn client_port(&self) -> i32 {
        match self {
            ComponentKind::Meta => 2379,
            ComponentKind::Store => 20160,
            ComponentKind::Gateway => 4000,
            ComponentKind::Cdc => 8301,
            ComponentKind::LogReplication => 8250,
            ComponentKind::Columnar => 3930,
            ComponentKind::Monitor => 9090,
        }
    }

    /// Peer/status port, if the component exposes one separately.
    pub fn peer_port(&self) -> Option<i32> {
        match self {
            ComponentKind::Meta => Some(2380),
            ComponentKind::Store => Some(20180),
            ComponentKind::Gateway => Some(10080),
            ComponentKind::Columnar => Some(20170),
            _ => None,
        }
    }

    /// Whether the component gets a client-facing (non-headless) service.
    pub fn has_client_service(&self) -> bool {
        matches!(
            self,
            ComponentKind::Meta | ComponentKind::Gateway | ComponentKind::Cdc | ComponentKind::Monitor
        )
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown component name.
#[derive(Debug, thiserror::Error)]
#[error("unknown component: {0}")]
pub struct UnknownComponent(pub String);

impl FromStr for ComponentKind {
    type Err = UnknownComponent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ComponentKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownComponent(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naming_conventions() {
        assert_eq!(ComponentKind::Store.resource_name("basic"), "basic-store");
        assert_eq!(ComponentKind::Meta.peer_service_name("basic"), "basic-meta-peer");
        assert_eq!(ComponentKind::Gateway.pod_name("basic", 2), "basic-gateway-2");
        assert_eq!(
            ComponentKind::Store.cluster_tls_secret_name("basic"),
            "basic-store-cluster-secret"
        );
    }

    #[test]
    fn test_parse_round_trips_every_kind() {
        for kind in ComponentKind::ALL {
            assert_eq!(kind.as_str().parse::<ComponentKind>().ok(), Some(kind));
        }
        assert!("tikv".parse::<ComponentKind>().is_err());
    }

    #[test]
    fn test_meta_reconciles_before_dependents() {
        assert_eq!(ComponentKind::ALL[0], ComponentKind::Meta);
        assert!(!ComponentKind::Gateway.is_stateful());
        assert!(ComponentKind::Store.tracks_stores());
    }
}
