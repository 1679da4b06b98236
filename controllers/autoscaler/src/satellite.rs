//! Satellite clusters.
//!
//! Scale-out is expressed as a separate `DbCluster` that joins the target
//! cluster's metadata service, created in the target's namespace. When the
//! autoscaler shares that namespace it owns the satellite, so deleting the
//! autoscaler cascades to it. Owner references cannot cross namespaces, so a
//! satellite of an autoscaler elsewhere is only removed by decommission.

use crate::error::AutoscalerError;
use crate::evaluator::{Policy, SatelliteView};
use cluster_client::controller_owner_ref;
use crds::labels::{
    AUTO_COMPONENT_LABEL, AUTO_INSTANCE_LABEL, BASE_CLUSTER_LABEL, STORE_LABEL_GROUP,
    STORE_LABEL_RESOURCE_TYPE, STORE_LABEL_SPECIAL_USE,
};
use crds::{
    ClusterReference, ComponentKind, ComponentResources, DbCluster, DbClusterAutoScaler, DbClusterSpec,
    MemberPhase, StoreState,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;

/// Value of the `specialUse` store label on autoscaled stores
pub const HOT_REGION: &str = "hotRegion";

pub fn satellite_name(cluster: &str, kind: ComponentKind) -> String {
    format!("{}-{}-auto", cluster, kind.as_str())
}

/// Labels identifying the satellite of one autoscaler component.
pub fn satellite_selector(autoscaler: &str, cluster: &str, kind: ComponentKind) -> BTreeMap<String, String> {
    BTreeMap::from([
        (AUTO_INSTANCE_LABEL.to_string(), autoscaler.to_string()),
        (BASE_CLUSTER_LABEL.to_string(), cluster.to_string()),
        (AUTO_COMPONENT_LABEL.to_string(), kind.as_str().to_string()),
    ])
}

/// Placement labels for stores of a satellite, restricted to the allowed keys.
pub fn store_labels(autoscaler: &str, kind: ComponentKind, profile: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (STORE_LABEL_SPECIAL_USE.to_string(), HOT_REGION.to_string()),
        (STORE_LABEL_RESOURCE_TYPE.to_string(), profile.to_string()),
        (STORE_LABEL_GROUP.to_string(), format!("{}-{}", autoscaler, kind.as_str())),
    ])
}

/// Desired satellite for `kind` of `parent`, sized from the policy's profile.
pub fn build_satellite(
    autoscaler: &DbClusterAutoScaler,
    parent: &DbCluster,
    kind: ComponentKind,
    policy: &Policy,
    replicas: i32,
) -> Result<DbCluster, AutoscalerError> {
    let autoscaler_name = autoscaler.name_any();
    let namespace = autoscaler
        .namespace()
        .ok_or_else(|| AutoscalerError::InvalidConfig(format!("autoscaler {} has no namespace", autoscaler_name)))?;
    let parent_name = parent.name_any();
    let parent_namespace = parent.namespace().unwrap_or_else(|| namespace.clone());

    let owner_references = if parent_namespace == namespace {
        let owner = controller_owner_ref(autoscaler).ok_or_else(|| {
            AutoscalerError::InvalidConfig(format!("autoscaler {}/{} has no uid yet", namespace, autoscaler_name))
        })?;
        Some(vec![owner])
    } else {
        None
    };

    let mut component = parent
        .spec
        .component(kind)
        .cloned()
        .ok_or_else(|| AutoscalerError::InvalidConfig(format!("cluster {} has no {} component", parent_name, kind)))?;

    let profile = &policy.profile;
    component.replicas = Some(replicas);
    component.resources = Some(ComponentResources {
        cpu: Some(profile.cpu.clone()),
        memory: Some(profile.memory.clone()),
        storage: profile
            .storage
            .clone()
            .or_else(|| component.resources.as_ref().and_then(|r| r.storage.clone())),
    });
    if let Some(storage) = &profile.storage {
        for claim in &mut component.storage_claims {
            claim.size = storage.clone();
        }
    }
    component.store_labels = if kind.tracks_stores() {
        store_labels(&autoscaler_name, kind, &policy.profile_name)
    } else {
        BTreeMap::new()
    };

    let mut spec = DbClusterSpec {
        version: parent.spec.version.clone(),
        cluster_ref: Some(ClusterReference::with_namespace(parent_name.clone(), parent_namespace.clone())),
        enable_tls: parent.spec.enable_tls,
        enable_client_tls: parent.spec.enable_client_tls,
        image_pull_policy: parent.spec.image_pull_policy.clone(),
        ..Default::default()
    };
    *spec.slot_mut(kind) = Some(component);

    Ok(DbCluster {
        metadata: ObjectMeta {
            name: Some(satellite_name(&parent_name, kind)),
            namespace: Some(parent_namespace),
            labels: Some(satellite_selector(&autoscaler_name, &parent_name, kind)),
            owner_references,
            ..Default::default()
        },
        spec,
        status: None,
    })
}

/// Desired replicas and health of `kind` in a satellite.
///
/// Healthy means the status reflects the current spec generation, the
/// component is in `Normal` phase with every replica ready and, for store
/// components, as many stores up as replicas requested.
pub fn view(satellite: &DbCluster, kind: ComponentKind) -> SatelliteView {
    let Some(replicas) = satellite.spec.component(kind).map(|c| c.replicas_or_default(kind)) else {
        return SatelliteView { replicas: 0, healthy: false };
    };
    let Some(status) = satellite.status.as_ref() else {
        return SatelliteView { replicas, healthy: false };
    };
    let observed_current = match (status.observed_generation, satellite.metadata.generation) {
        (Some(observed), Some(generation)) => observed >= generation,
        (_, None) => true,
        (None, Some(_)) => false,
    };
    let healthy = observed_current
        && status.component(kind).is_some_and(|component| {
            let stores_up = component
                .stores
                .values()
                .filter(|store| store.state == StoreState::Up)
                .count();
            component.phase == MemberPhase::Normal
                && component.error.is_none()
                && component.ready_replicas >= replicas
                && (!kind.tracks_stores() || stores_up >= usize::try_from(replicas).unwrap_or(0))
        });
    SatelliteView { replicas, healthy }
}
