//! Component Services
//!
//! Every component has a headless peer service for stable pod DNS. Client
//! facing components also get `<cluster>-<component>` with the declared type,
//! annotations and traffic policy. Updates keep what the API server
//! allocated: `clusterIP`, `clusterIPs`, node ports and `healthCheckNodePort`.

use crate::context::ReconcileContext;
use crate::error::ControllerError;
use crate::reconciler::adopt::get_claimed;
use cluster_client::{ClusterClientTrait, ManagedKind, ManagedObject};
use crds::labels::component_selector;
use crds::{ComponentKind, ServiceSpec as ComponentServiceSpec};
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tracing::{debug, info};

fn ports(kind: ComponentKind, include_peer: bool) -> Vec<ServicePort> {
    let mut ports = vec![ServicePort {
        name: Some("client".to_string()),
        port: kind.client_port(),
        target_port: Some(IntOrString::Int(kind.client_port())),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }];
    if let Some(peer) = kind.peer_port().filter(|_| include_peer) {
        ports.push(ServicePort {
            name: Some("peer".to_string()),
            port: peer,
            target_port: Some(IntOrString::Int(peer)),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        });
    }
    ports
}

fn metadata(ctx: &ReconcileContext<'_>, kind: ComponentKind, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: Some(ctx.namespace.clone()),
        labels: Some(component_selector(&ctx.name, kind)),
        owner_references: Some(vec![ctx.owner.clone()]),
        ..Default::default()
    }
}

/// Headless service governing the component's StatefulSet.
pub fn peer_service(ctx: &ReconcileContext<'_>, kind: ComponentKind) -> Service {
    Service {
        metadata: metadata(ctx, kind, kind.peer_service_name(&ctx.name)),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            selector: Some(component_selector(&ctx.name, kind)),
            ports: Some(ports(kind, true)),
            ..Default::default()
        }),
        status: None,
    }
}

pub fn client_service(ctx: &ReconcileContext<'_>, kind: ComponentKind, declared: Option<&ComponentServiceSpec>) -> Service {
    let mut service = Service {
        metadata: metadata(ctx, kind, kind.resource_name(&ctx.name)),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(component_selector(&ctx.name, kind)),
            ports: Some(ports(kind, kind == ComponentKind::Gateway)),
            ..Default::default()
        }),
        status: None,
    };
    if let Some(declared) = declared {
        if !declared.annotations.is_empty() {
            service.metadata.annotations = Some(declared.annotations.clone());
        }
        if let Some(spec) = service.spec.as_mut() {
            if let Some(type_) = &declared.service_type {
                spec.type_ = Some(type_.clone());
            }
            spec.external_traffic_policy = declared.external_traffic_policy.clone();
            spec.load_balancer_ip = declared.load_balancer_ip.clone();
        }
    }
    service
}

fn exposes_node_ports(spec: &ServiceSpec) -> bool {
    matches!(spec.type_.as_deref(), Some("NodePort" | "LoadBalancer"))
}

/// Apply the managed fields of `desired` onto `existing`, keeping allocations.
pub fn merge_service(existing: &Service, desired: &Service) -> Service {
    let mut next = existing.clone();

    let labels = next.metadata.labels.get_or_insert_with(Default::default);
    labels.extend(desired.metadata.labels.clone().unwrap_or_default());
    if let Some(annotations) = &desired.metadata.annotations {
        next.metadata
            .annotations
            .get_or_insert_with(Default::default)
            .extend(annotations.clone());
    }

    let Some(want) = desired.spec.as_ref() else {
        return next;
    };
    let previous = existing.spec.clone().unwrap_or_default();
    let spec = next.spec.get_or_insert_with(Default::default);

    if want.type_.is_some() {
        spec.type_ = want.type_.clone();
    }
    spec.selector = want.selector.clone();
    if want.publish_not_ready_addresses.is_some() {
        spec.publish_not_ready_addresses = want.publish_not_ready_addresses;
    }
    if want.external_traffic_policy.is_some() {
        spec.external_traffic_policy = want.external_traffic_policy.clone();
    }
    if want.load_balancer_ip.is_some() {
        spec.load_balancer_ip = want.load_balancer_ip.clone();
    }
    if previous.cluster_ip.is_none() {
        spec.cluster_ip = want.cluster_ip.clone();
    }

    let keep_node_ports = exposes_node_ports(spec);
    let mut ports = want.ports.clone().unwrap_or_default();
    for port in &mut ports {
        let allocated = previous
            .ports
            .iter()
            .flatten()
            .find(|p| p.name == port.name && p.port == port.port)
            .or_else(|| previous.ports.iter().flatten().find(|p| p.port == port.port));
        if keep_node_ports {
            port.node_port = port.node_port.or(allocated.and_then(|p| p.node_port));
        }
        if port.app_protocol.is_none() {
            port.app_protocol = allocated.and_then(|p| p.app_protocol.clone());
        }
    }
    spec.ports = Some(ports);
    if !keep_node_ports {
        spec.health_check_node_port = None;
    }
    next
}

async fn sync_service(
    client: &dyn ClusterClientTrait,
    ctx: &ReconcileContext<'_>,
    kind: ComponentKind,
    desired: Service,
) -> Result<(), ControllerError> {
    let name = desired.metadata.name.clone().unwrap_or_default();
    match get_claimed(client, ctx, kind, ManagedKind::Service, &name).await? {
        None => {
            info!(cluster = %ctx.key(), "Creating Service {}", name);
            client.create_object(&ctx.namespace, &desired.into()).await?;
        }
        Some(ManagedObject::Service(existing)) => {
            let next = merge_service(&existing, &desired);
            if next != existing {
                info!(cluster = %ctx.key(), "Updating Service {}", name);
                client.replace_object(&ctx.namespace, &next.into()).await?;
            } else {
                debug!("Service {} up to date", name);
            }
        }
        Some(other) => {
            return Err(ControllerError::Reconciliation(format!(
                "expected Service {}, found {}",
                name,
                other.kind()
            )));
        }
    }
    Ok(())
}

pub async fn sync_services(
    client: &dyn ClusterClientTrait,
    ctx: &ReconcileContext<'_>,
    kind: ComponentKind,
    declared: Option<&ComponentServiceSpec>,
) -> Result<(), ControllerError> {
    sync_service(client, ctx, kind, peer_service(ctx, kind)).await?;
    if kind.has_client_service() {
        sync_service(client, ctx, kind, client_service(ctx, kind, declared)).await?;
    }
    Ok(())
}
