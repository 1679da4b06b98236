//! Server-side behavior simulated by the mock
//!
//! - Services: clusterIP and node port allocation, clusterIP immutability
//! - StatefulSets: pods follow replicas and the rolling-update partition

use super::{MockPod, MockState};
use crate::error::ClusterClientError;
use crate::models::{ManagedObject, PodObservation, POD_REVISION_LABEL};
use crate::revision::content_revision;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;

const NODE_PORT_BASE: i32 = 30000;

pub(crate) fn on_create(state: &mut MockState, namespace: &str, object: &mut ManagedObject) {
    match object {
        ManagedObject::Service(svc) => {
            // a fresh object has no previous allocation, so this cannot fail
            let _ = allocate_service(state, svc, None);
        }
        ManagedObject::StatefulSet(sts) => simulate(state, namespace, sts),
        ManagedObject::ConfigMap(_) => {}
    }
}

/// Normalize a replacement the way the API server would before comparing it to the stored copy.
pub(crate) fn on_replace(
    state: &mut MockState,
    _namespace: &str,
    stored: &ManagedObject,
    replaced: &mut ManagedObject,
) -> Result<(), ClusterClientError> {
    match (stored, replaced) {
        (ManagedObject::Service(previous), ManagedObject::Service(svc)) => {
            allocate_service(state, svc, Some(previous))
        }
        (ManagedObject::StatefulSet(previous), ManagedObject::StatefulSet(sts)) => {
            sts.status = previous.status.clone();
            sts.metadata.generation = previous.metadata.generation;
            if sts.spec != previous.spec {
                sts.metadata.generation = Some(previous.metadata.generation.unwrap_or(1) + 1);
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

pub(crate) fn after_write(state: &mut MockState, namespace: &str, object: &mut ManagedObject) {
    if let ManagedObject::StatefulSet(sts) = object {
        simulate(state, namespace, sts);
    }
}

/// Re-run every StatefulSet in a namespace, e.g. after pod health changed.
pub(crate) fn resync_namespace(state: &mut MockState, namespace: &str) {
    let keys: Vec<_> = state
        .objects
        .keys()
        .filter(|(ns, _, _)| ns == namespace)
        .cloned()
        .collect();
    for object_key in keys {
        let Some(ManagedObject::StatefulSet(mut sts)) = state.objects.get(&object_key).cloned() else {
            continue;
        };
        simulate(state, namespace, &mut sts);
        state.objects.insert(object_key, ManagedObject::StatefulSet(sts));
    }
}

fn allocate_service(
    state: &mut MockState,
    svc: &mut Service,
    previous: Option<&Service>,
) -> Result<(), ClusterClientError> {
    let name = svc.metadata.name.clone().unwrap_or_default();
    let spec = svc.spec.get_or_insert_with(Default::default);
    let previous_ip = previous
        .and_then(|p| p.spec.as_ref())
        .and_then(|p| p.cluster_ip.clone());

    match previous_ip {
        Some(previous_ip) => match spec.cluster_ip.as_deref() {
            None | Some("") => spec.cluster_ip = Some(previous_ip),
            Some(ip) if ip == previous_ip => {}
            Some(_) => {
                return Err(ClusterClientError::Invalid(format!(
                    "Service {}: spec.clusterIP: field is immutable",
                    name
                )));
            }
        },
        None => {
            if spec.cluster_ip.as_deref().is_none_or(str::is_empty) {
                state.next_cluster_ip += 1;
                let n = state.next_cluster_ip;
                spec.cluster_ip = Some(format!("10.96.{}.{}", n / 256, n % 256));
            }
        }
    }
    if spec.cluster_ips.is_none() {
        spec.cluster_ips = spec.cluster_ip.clone().map(|ip| vec![ip]);
    }

    // an omitted node port is re-allocated, as the API server does on a full replace
    let exposes_node_ports = matches!(spec.type_.as_deref(), Some("NodePort" | "LoadBalancer"));
    if exposes_node_ports {
        for port in spec.ports.iter_mut().flatten() {
            if port.node_port.is_none() {
                state.next_node_port += 1;
                port.node_port = Some(NODE_PORT_BASE + state.next_node_port);
            }
        }
    }
    Ok(())
}

fn simulate(state: &mut MockState, namespace: &str, sts: &mut StatefulSet) {
    let name = sts.metadata.name.clone().unwrap_or_default();
    let generation = sts.metadata.generation;
    let spec = sts.spec.clone().unwrap_or_default();
    let replicas = spec.replicas.unwrap_or(1).max(0);
    let partition = spec
        .update_strategy
        .as_ref()
        .and_then(|s| s.rolling_update.as_ref())
        .and_then(|r| r.partition)
        .unwrap_or(0);
    let template_hash = content_revision(&spec.template).unwrap_or_default();
    let update_revision = format!("{}-{}", name, template_hash);
    let status = sts.status.get_or_insert_with(Default::default);
    let current_revision = status
        .current_revision
        .clone()
        .unwrap_or_else(|| update_revision.clone());
    let template_labels = spec
        .template
        .metadata
        .as_ref()
        .and_then(|m| m.labels.clone())
        .unwrap_or_default();

    state.pods.retain(|(ns, _), pod| {
        !(ns == namespace && pod.stateful_set == name && pod.observation.ordinal >= replicas)
    });

    for ordinal in 0..replicas {
        let pod_name = format!("{}-{}", name, ordinal);
        let pod_key = (namespace.to_string(), pod_name.clone());
        let existing = state
            .pods
            .get(&pod_key)
            .and_then(|p| p.observation.revision.clone());
        let revision = if ordinal >= partition {
            update_revision.clone()
        } else {
            existing.unwrap_or_else(|| current_revision.clone())
        };
        let mut labels = template_labels.clone();
        labels.insert(POD_REVISION_LABEL.to_string(), revision.clone());
        let ready = !state.unready_pods.contains(&pod_key);
        state.pods.insert(
            pod_key,
            MockPod {
                stateful_set: name.clone(),
                observation: PodObservation {
                    name: pod_name,
                    ordinal,
                    ready,
                    revision: Some(revision),
                    labels,
                },
            },
        );
    }

    let owned: Vec<_> = state
        .pods
        .iter()
        .filter(|((ns, _), pod)| ns == namespace && pod.stateful_set == name)
        .map(|(_, pod)| &pod.observation)
        .collect();
    let updated = owned
        .iter()
        .filter(|p| p.revision.as_deref() == Some(update_revision.as_str()))
        .count() as i32;
    let ready = owned.iter().filter(|p| p.ready).count() as i32;

    status.replicas = replicas;
    status.ready_replicas = Some(ready);
    status.available_replicas = Some(ready);
    status.updated_replicas = Some(updated);
    status.current_replicas = Some(replicas - updated);
    status.current_revision = Some(if updated == replicas {
        update_revision.clone()
    } else {
        current_revision
    });
    status.update_revision = Some(update_revision);
    status.observed_generation = generation;
}

#[cfg(test)]
mod tests {
    use super::super::MockClusterClient;
    use crate::cluster_trait::ClusterClientTrait;
    use crate::models::{ManagedKind, ManagedObject};
    use k8s_openapi::api::apps::v1::{
        RollingUpdateStatefulSetStrategy, StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy,
    };
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn stateful_set(replicas: i32, image: &str, partition: i32) -> StatefulSet {
        StatefulSet {
            metadata: ObjectMeta {
                name: Some("basic-store".to_string()),
                ..Default::default()
            },
            spec: Some(StatefulSetSpec {
                replicas: Some(replicas),
                update_strategy: Some(StatefulSetUpdateStrategy {
                    type_: Some("RollingUpdate".to_string()),
                    rolling_update: Some(RollingUpdateStatefulSetStrategy {
                        partition: Some(partition),
                        ..Default::default()
                    }),
                }),
                template: PodTemplateSpec {
                    metadata: None,
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "store".to_string(),
                            image: Some(image.to_string()),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            status: None,
        }
    }

    fn stored(client: &MockClusterClient) -> StatefulSet {
        client
            .object("db", ManagedKind::StatefulSet, "basic-store")
            .and_then(|o| o.as_stateful_set().cloned())
            .unwrap()
    }

    #[tokio::test]
    async fn test_partition_limits_updated_pods() {
        let client = MockClusterClient::new();
        client
            .create_object("db", &stateful_set(3, "store:v1", 0).into())
            .await
            .unwrap();
        let v1 = stored(&client).status.unwrap().current_revision.unwrap();

        let mut next = stored(&client);
        next.spec = stateful_set(3, "store:v2", 2).spec;
        client
            .replace_object("db", &ManagedObject::StatefulSet(next))
            .await
            .unwrap();

        let status = stored(&client).status.unwrap();
        assert_eq!(status.current_revision.as_deref(), Some(v1.as_str()));
        assert_ne!(status.update_revision, status.current_revision);
        assert_eq!(status.updated_replicas, Some(1));

        let pods = client.pods("db");
        assert_eq!(pods[0].revision.as_deref(), Some(v1.as_str()));
        assert_eq!(pods[2].revision, status.update_revision);
    }

    #[tokio::test]
    async fn test_scale_down_removes_highest_ordinals() {
        let client = MockClusterClient::new();
        client
            .create_object("db", &stateful_set(3, "store:v1", 0).into())
            .await
            .unwrap();
        let mut next = stored(&client);
        next.spec.as_mut().unwrap().replicas = Some(1);
        client
            .replace_object("db", &ManagedObject::StatefulSet(next))
            .await
            .unwrap();

        let pods = client.pods("db");
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].ordinal, 0);
    }

    #[tokio::test]
    async fn test_unready_pod_lowers_ready_replicas() {
        let client = MockClusterClient::new();
        client
            .create_object("db", &stateful_set(3, "store:v1", 0).into())
            .await
            .unwrap();
        client.set_pod_ready("db", "basic-store-1", false);
        assert_eq!(stored(&client).status.unwrap().ready_replicas, Some(2));
    }
}
