//! Component StatefulSets
//!
//! The desired pod template is hashed and the hash stamped on the StatefulSet
//! (`dbops.microscaler.io/template-hash`). Comparing hashes instead of
//! templates keeps server-side defaulting from looking like drift.

use crate::context::ReconcileContext;
use crate::error::ControllerError;
use crate::reconciler::component::{
    client_tls_secret_name, ComponentReconciler, CLIENT_TLS_DIR, CLUSTER_TLS_DIR, CONFIG_DIR, DATA_DIR,
};
use cluster_client::content_revision;
use crds::labels::{component_selector, TEMPLATE_HASH_ANNOTATION};
use crds::{ComponentKind, ComponentSpec};
use k8s_openapi::api::apps::v1::{
    RollingUpdateStatefulSetStrategy, StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy,
};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EnvVar, EnvVarSource, ObjectFieldSelector, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, Probe, ResourceRequirements, SecretVolumeSource,
    TCPSocketAction, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

/// Desired StatefulSet and the hash of its pod template.
#[derive(Debug, Clone)]
pub struct DesiredStatefulSet {
    pub object: StatefulSet,
    pub template_hash: String,
}

fn field_env(name: &str, path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn resources(spec: &ComponentSpec) -> Option<ResourceRequirements> {
    let declared = spec.resources.as_ref()?;
    let mut quantities = BTreeMap::new();
    if let Some(cpu) = &declared.cpu {
        quantities.insert("cpu".to_string(), Quantity(cpu.clone()));
    }
    if let Some(memory) = &declared.memory {
        quantities.insert("memory".to_string(), Quantity(memory.clone()));
    }
    if quantities.is_empty() {
        return None;
    }
    Some(ResourceRequirements {
        limits: Some(quantities.clone()),
        requests: Some(quantities),
        ..Default::default()
    })
}

fn volume_claims(kind: ComponentKind, spec: &ComponentSpec) -> Vec<PersistentVolumeClaim> {
    let claim = |name: String, size: &str, class: Option<String>| PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: class,
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([("storage".to_string(), Quantity(size.to_string()))])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    };

    if !spec.storage_claims.is_empty() {
        return spec
            .storage_claims
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let name = c.name.clone().unwrap_or_else(|| claim_name(i));
                claim(name, &c.size, c.storage_class_name.clone())
            })
            .collect();
    }
    let storage = spec.resources.as_ref().and_then(|r| r.storage.as_deref());
    match storage {
        Some(size) if kind.is_stateful() => vec![claim(claim_name(0), size, None)],
        _ => Vec::new(),
    }
}

fn claim_name(index: usize) -> String {
    if index == 0 { "data".to_string() } else { format!("data-{}", index) }
}

fn pod_template(
    ctx: &ReconcileContext<'_>,
    kind: ComponentKind,
    spec: &ComponentSpec,
    config_map: &str,
    claims: &[PersistentVolumeClaim],
) -> PodTemplateSpec {
    let mut mounts = vec![VolumeMount {
        name: "config".to_string(),
        mount_path: CONFIG_DIR.to_string(),
        read_only: Some(true),
        ..Default::default()
    }];
    let mut volumes = vec![Volume {
        name: "config".to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }];

    for (i, claim) in claims.iter().enumerate() {
        let name = claim.metadata.name.clone().unwrap_or_else(|| claim_name(i));
        let mount_path = if i == 0 { DATA_DIR.to_string() } else { format!("{}/{}", DATA_DIR, name) };
        mounts.push(VolumeMount {
            name,
            mount_path,
            ..Default::default()
        });
    }

    let mut secret_mount = |volume: &str, secret: String, path: &str| {
        volumes.push(Volume {
            name: volume.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret),
                ..Default::default()
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name: volume.to_string(),
            mount_path: path.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    };
    if ctx.cluster.spec.enable_tls && kind != ComponentKind::Monitor {
        secret_mount("cluster-tls", kind.cluster_tls_secret_name(&ctx.name), CLUSTER_TLS_DIR);
    }
    if ctx.cluster.spec.enable_client_tls && kind == ComponentKind::Gateway {
        secret_mount("client-tls", client_tls_secret_name(&ctx.name), CLIENT_TLS_DIR);
    }

    let container = Container {
        name: kind.as_str().to_string(),
        image: Some(spec.image_for(kind, &ctx.cluster.spec.version)),
        image_pull_policy: ctx.cluster.spec.image_pull_policy.clone(),
        command: Some(vec!["/bin/sh".to_string(), format!("{}/start.sh", CONFIG_DIR)]),
        ports: Some(kind.container_ports()),
        env: Some(vec![
            field_env("POD_NAME", "metadata.name"),
            field_env("NAMESPACE", "metadata.namespace"),
        ]),
        resources: resources(spec),
        readiness_probe: Some(Probe {
            tcp_socket: Some(TCPSocketAction {
                port: IntOrString::Int(kind.client_port()),
                ..Default::default()
            }),
            initial_delay_seconds: Some(10),
            period_seconds: Some(10),
            ..Default::default()
        }),
        volume_mounts: Some(mounts),
        ..Default::default()
    };

    let host_network = spec.host_network.unwrap_or(false);
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(component_selector(&ctx.name, kind)),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![container],
            volumes: Some(volumes),
            host_network: host_network.then_some(true),
            // Keep cluster DNS reachable from the node network
            dns_policy: host_network.then(|| "ClusterFirstWithHostNet".to_string()),
            ..Default::default()
        }),
    }
}

impl DesiredStatefulSet {
    pub fn set_partition(&mut self, partition: i32) {
        if let Some(spec) = self.object.spec.as_mut() {
            spec.update_strategy = Some(update_strategy(partition));
        }
    }
}

fn update_strategy(partition: i32) -> StatefulSetUpdateStrategy {
    StatefulSetUpdateStrategy {
        type_: Some("RollingUpdate".to_string()),
        rolling_update: Some(RollingUpdateStatefulSetStrategy {
            partition: Some(partition),
            ..Default::default()
        }),
    }
}

pub fn build_stateful_set(
    ctx: &ReconcileContext<'_>,
    kind: ComponentKind,
    spec: &ComponentSpec,
    config_map: &str,
    replicas: i32,
    partition: i32,
) -> Result<DesiredStatefulSet, ControllerError> {
    let labels = component_selector(&ctx.name, kind);
    let claims = volume_claims(kind, spec);
    let template = pod_template(ctx, kind, spec, config_map, &claims);
    let template_hash = content_revision(&template)?;

    let object = StatefulSet {
        metadata: ObjectMeta {
            name: Some(kind.resource_name(&ctx.name)),
            namespace: Some(ctx.namespace.clone()),
            labels: Some(labels.clone()),
            annotations: Some(BTreeMap::from([(
                TEMPLATE_HASH_ANNOTATION.to_string(),
                template_hash.clone(),
            )])),
            owner_references: Some(vec![ctx.owner.clone()]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(labels),
                ..Default::default()
            },
            service_name: kind.peer_service_name(&ctx.name).into(),
            pod_management_policy: Some("Parallel".to_string()),
            update_strategy: Some(update_strategy(partition)),
            template,
            volume_claim_templates: if claims.is_empty() { None } else { Some(claims) },
            ..Default::default()
        }),
        status: None,
    };
    Ok(DesiredStatefulSet { object, template_hash })
}

/// Template hash the StatefulSet was last written with.
///
/// StatefulSets created elsewhere carry no annotation; their template is hashed directly.
pub fn applied_template_hash(sts: &StatefulSet) -> Option<String> {
    if let Some(hash) = sts
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(TEMPLATE_HASH_ANNOTATION))
    {
        return Some(hash.clone());
    }
    sts.spec.as_ref().and_then(|s| content_revision(&s.template).ok())
}

pub fn partition_of(sts: &StatefulSet) -> Option<i32> {
    sts.spec
        .as_ref()?
        .update_strategy
        .as_ref()?
        .rolling_update
        .as_ref()?
        .partition
}

pub fn replicas_of(sts: &StatefulSet) -> Option<i32> {
    sts.spec.as_ref().and_then(|s| s.replicas)
}

/// ConfigMap mounted by the StatefulSet's current template.
pub fn referenced_config_map(sts: &StatefulSet) -> Option<String> {
    sts.spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .volumes
        .as_ref()?
        .iter()
        .find(|v| v.name == "config")
        .and_then(|v| v.config_map.as_ref())
        .map(|cm| cm.name.clone())
        .filter(|name| !name.is_empty())
}

/// Apply replicas, partition and (when it changed) the template onto `existing`.
///
/// Selector, service name and claim templates are immutable and left alone.
pub fn merge_stateful_set(existing: &StatefulSet, desired: &DesiredStatefulSet, template_changed: bool) -> StatefulSet {
    let mut next = existing.clone();
    next.metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(TEMPLATE_HASH_ANNOTATION.to_string(), desired.template_hash.clone());
    next.metadata
        .labels
        .get_or_insert_with(Default::default)
        .extend(desired.object.metadata.labels.clone().unwrap_or_default());

    if let (Some(spec), Some(want)) = (next.spec.as_mut(), desired.object.spec.as_ref()) {
        spec.replicas = want.replicas;
        spec.update_strategy = want.update_strategy.clone();
        if template_changed {
            spec.template = want.template.clone();
        }
    }
    next
}
