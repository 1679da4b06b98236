//! Test fixtures for the autoscaler loop.

use crate::evaluator::Policy;
use crate::metrics::Metrics;
use crate::registry::{MetricsClientFactory, Registry};
use crate::worker::WorkerSettings;
use cluster_client::{ClusterClientTrait, MockClusterClient, RetryConfig};
use crds::{
    AutoResource, AutoRule, ClusterReference, ComponentAutoScalerSpec, ComponentKind, ComponentSpec,
    ComponentStatus, DbCluster, DbClusterAutoScaler, DbClusterAutoScalerSpec, DbClusterSpec, DbClusterStatus,
    MemberPhase, StoreState, StoreStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use monitor_client::{MetricsClientTrait, MockMetricsClient};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const NAMESPACE: &str = "db";

fn metadata(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        uid: Some(format!("uid-{}", name)),
        generation: Some(1),
        ..Default::default()
    }
}

/// Cluster with meta, three stores and two gateways.
pub fn parent_cluster(name: &str) -> DbCluster {
    let component = |replicas| ComponentSpec {
        replicas: Some(replicas),
        ..Default::default()
    };
    DbCluster {
        metadata: metadata(name),
        spec: DbClusterSpec {
            version: "v8.5.0".to_string(),
            meta: Some(component(3)),
            store: Some(component(3)),
            gateway: Some(component(2)),
            ..Default::default()
        },
        status: None,
    }
}

fn storage_profile() -> AutoResource {
    AutoResource {
        cpu: "1024m".to_string(),
        memory: "2Gi".to_string(),
        storage: Some("10Gi".to_string()),
        count: Some(2),
        min_replicas: Some(1),
        max_replicas: Some(5),
    }
}

/// Store policy with a single cpu rule (max 0.5, min 0.2) and short cooldowns.
pub fn store_spec() -> ComponentAutoScalerSpec {
    ComponentAutoScalerSpec {
        resources: BTreeMap::from([("storage".to_string(), storage_profile())]),
        rules: BTreeMap::from([(
            "cpu".to_string(),
            AutoRule {
                max_threshold: 0.5,
                min_threshold: Some(0.2),
                resource_types: vec!["storage".to_string()],
            },
        )]),
        scale_in_interval_seconds: Some(60),
        scale_out_interval_seconds: Some(60),
        decommission_interval_seconds: Some(120),
        ..Default::default()
    }
}

pub fn store_policy() -> Policy {
    Policy::from_spec(&store_spec()).unwrap()
}

/// Autoscaler targeting cluster `basic` with a store policy.
pub fn store_autoscaler(name: &str) -> DbClusterAutoScaler {
    DbClusterAutoScaler {
        metadata: metadata(name),
        spec: DbClusterAutoScalerSpec {
            cluster: ClusterReference::new("basic"),
            store: Some(store_spec()),
            ..Default::default()
        },
        status: None,
    }
}

/// Report `kind` as fully up for the cluster's current generation.
pub fn mark_healthy(cluster: &mut DbCluster, kind: ComponentKind) {
    let replicas = cluster
        .spec
        .component(kind)
        .and_then(|c| c.replicas)
        .unwrap_or_default();
    let name = cluster.metadata.name.clone().unwrap_or_default();
    let stores = (0..replicas)
        .map(|ordinal| {
            (
                format!("{}", 100 + ordinal),
                StoreStatus {
                    pod_name: kind.pod_name(&name, ordinal),
                    state: StoreState::Up,
                    labels: BTreeMap::new(),
                    last_transition_time: None,
                },
            )
        })
        .collect();
    let component = ComponentStatus {
        phase: MemberPhase::Normal,
        replicas,
        ready_replicas: replicas,
        stores,
        ..Default::default()
    };
    cluster.status = Some(DbClusterStatus {
        observed_generation: cluster.metadata.generation,
        components: BTreeMap::from([(kind.as_str().to_string(), component)]),
        ..Default::default()
    });
}

/// `mark_healthy` applied through the mock's status subresource.
pub async fn mark_healthy_in(client: &MockClusterClient, name: &str, kind: ComponentKind) {
    let mut cluster = client.cluster(NAMESPACE, name).unwrap();
    mark_healthy(&mut cluster, kind);
    client
        .patch_cluster_status(NAMESPACE, name, cluster.status.as_ref().unwrap())
        .await
        .unwrap();
}

/// Registry over `client` whose workers tick once on start, then hourly.
pub fn registry(client: &MockClusterClient) -> Registry {
    let prometheus = MockMetricsClient::new();
    let factory: MetricsClientFactory =
        Arc::new(move |_url: &str| Ok(Arc::new(prometheus.clone()) as Arc<dyn MetricsClientTrait>));
    Registry::new(
        Arc::new(client.clone()),
        Arc::new(Metrics::new().unwrap()),
        WorkerSettings {
            sync_period: Duration::from_secs(3600),
            action_timeout: Duration::from_millis(20),
            health_poll_period: Duration::from_millis(5),
            retry: RetryConfig::default(),
        },
        "http://prometheus:9090".to_string(),
        factory,
    )
}
