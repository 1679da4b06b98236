//! Test utilities for unit testing the reconciler and admission handlers
//!
//! This module provides fixture clusters and a reconciler wired to the mock client.

use crate::reconciler::{ReconcileSettings, Reconciler};
use cluster_client::MockClusterClient;
use crds::{ClusterReference, ComponentSpec, DbCluster, DbClusterSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::sync::Arc;
use std::time::Duration;

pub const NAMESPACE: &str = "db";

fn component(replicas: i32) -> ComponentSpec {
    ComponentSpec {
        replicas: Some(replicas),
        ..Default::default()
    }
}

fn metadata(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        uid: Some(format!("uid-{}", name)),
        generation: Some(1),
        ..Default::default()
    }
}

/// A cluster with 3 meta, 3 store and 2 gateway replicas.
pub fn basic_cluster(name: &str) -> DbCluster {
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

/// A store-only cluster joining `parent`.
pub fn satellite_cluster(name: &str, parent: &str) -> DbCluster {
    DbCluster {
        metadata: metadata(name),
        spec: DbClusterSpec {
            version: "v8.5.0".to_string(),
            cluster_ref: Some(ClusterReference::new(parent)),
            store: Some(component(1)),
            ..Default::default()
        },
        status: None,
    }
}

/// Settings with a short failover period so tests can cross it.
pub fn test_settings() -> ReconcileSettings {
    ReconcileSettings {
        failover_period: Duration::from_secs(60),
        resync_period: Duration::from_secs(30),
        progress_period: Duration::from_secs(5),
    }
}

pub fn test_reconciler(client: &MockClusterClient) -> Reconciler {
    Reconciler::new(Arc::new(client.clone()), test_settings())
}
