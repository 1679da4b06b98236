//! Admission validation for DbCluster objects.
//!
//! Every violated rule is reported, joined into one rejection message.

use super::Rejection;
use crds::labels::INSTANCE_LABEL;
use crds::quantity::parse_quantity;
use crds::{ComponentKind, DbCluster};
use kube::core::admission::Operation;
use std::collections::BTreeMap;

const REPLICATION_PREFIX: &str = "replication.";
const SERVICE_TYPES: [&str; 3] = ["ClusterIP", "NodePort", "LoadBalancer"];

pub fn validate(operation: &Operation, cluster: &DbCluster, old: Option<&DbCluster>) -> Result<(), Rejection> {
    let mut errors = Vec::new();

    if matches!(operation, Operation::Create) {
        legacy_on_create(cluster, &mut errors);
    }
    if let Some(old) = old.filter(|o| o.spec.is_migrated()) {
        cleared_fields(cluster, old, &mut errors);
    }
    if let Some(old) = old {
        replication_change(cluster, old, &mut errors);
    }
    instance_label(cluster, &mut errors);
    topology(cluster, &mut errors);
    component_fields(cluster, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(Rejection(errors.join("; ")))
    }
}

fn legacy_on_create(cluster: &DbCluster, errors: &mut Vec<String>) {
    for (kind, spec) in cluster.spec.components() {
        if !spec.has_legacy_image() {
            continue;
        }
        if !spec.base_image.is_empty() || spec.version.is_some() {
            errors.push(format!("{}: image cannot be combined with baseImage or version", kind));
        } else {
            errors.push(format!("{}: image is not allowed on new clusters, use baseImage and version", kind));
        }
    }
}

fn cleared_fields(cluster: &DbCluster, old: &DbCluster, errors: &mut Vec<String>) {
    if !old.spec.version.is_empty() && cluster.spec.version.is_empty() {
        errors.push("spec.version cannot be cleared".to_string());
    }
    for (kind, spec) in cluster.spec.components() {
        let Some(previous) = old.spec.component(kind) else {
            continue;
        };
        if !previous.base_image.is_empty() && spec.base_image.is_empty() {
            errors.push(format!("{}.baseImage cannot be cleared", kind));
        }
        let had_version = previous.version.as_deref().is_some_and(|v| !v.is_empty());
        let has_version = spec.version.as_deref().is_some_and(|v| !v.is_empty());
        if had_version && !has_version {
            errors.push(format!("{}.version cannot be cleared", kind));
        }
    }
}

fn replication_settings(cluster: &DbCluster) -> BTreeMap<&str, &str> {
    cluster
        .spec
        .meta
        .iter()
        .flat_map(|meta| meta.config.iter())
        .filter(|(key, _)| key.starts_with(REPLICATION_PREFIX))
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect()
}

fn replication_change(cluster: &DbCluster, old: &DbCluster, errors: &mut Vec<String>) {
    if replication_settings(cluster) != replication_settings(old) {
        errors.push("meta replication.* configuration is immutable after creation".to_string());
    }
}

fn instance_label(cluster: &DbCluster, errors: &mut Vec<String>) {
    let name = cluster.metadata.name.as_deref().unwrap_or_default();
    if let Some(value) = cluster.metadata.labels.as_ref().and_then(|l| l.get(INSTANCE_LABEL)) {
        if value != name {
            errors.push(format!("label {} must equal the cluster name {}, got {}", INSTANCE_LABEL, name, value));
        }
    }
}

fn topology(cluster: &DbCluster, errors: &mut Vec<String>) {
    let spec = &cluster.spec;
    if spec.is_satellite() && spec.meta.is_some() {
        errors.push("a cluster with clusterRef joins its parent's meta and cannot declare meta".to_string());
    }
    if !spec.is_satellite() && spec.store.is_some() && spec.meta.is_none() {
        errors.push("store requires meta unless clusterRef is set".to_string());
    }
}

fn component_fields(cluster: &DbCluster, errors: &mut Vec<String>) {
    for (kind, spec) in cluster.spec.components() {
        if spec.replicas.is_some_and(|r| r < 0) {
            errors.push(format!("{}.replicas must not be negative", kind));
        }
        if spec.max_failover_count.is_some_and(|c| c < 0) {
            errors.push(format!("{}.maxFailoverCount must not be negative", kind));
        }
        if let Some(resources) = &spec.resources {
            for (field, value) in [
                ("cpu", &resources.cpu),
                ("memory", &resources.memory),
                ("storage", &resources.storage),
            ] {
                check_quantity(kind, &format!("resources.{}", field), value.as_deref(), errors);
            }
        }
        for claim in &spec.storage_claims {
            check_quantity(kind, "storageClaims.size", Some(&claim.size), errors);
        }
        if let Some(service_type) = spec.service.as_ref().and_then(|s| s.service_type.as_deref()) {
            if !SERVICE_TYPES.contains(&service_type) {
                errors.push(format!("{}.service.type {} is not one of {}", kind, service_type, SERVICE_TYPES.join(", ")));
            }
        }
    }
}

fn check_quantity(kind: ComponentKind, field: &str, value: Option<&str>, errors: &mut Vec<String>) {
    if let Some(value) = value {
        if parse_quantity(value).is_none() {
            errors.push(format!("{}.{}: invalid quantity {:?}", kind, field, value));
        }
    }
}
