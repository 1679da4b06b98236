//! Adoption of pre-existing resources
//!
//! A resource already sitting at a name the cluster needs is taken over when
//! nobody controls it and its labels name this cluster and component. Only
//! the owner reference is written, so content, revision and service
//! allocations survive.

use crate::context::ReconcileContext;
use crate::error::ControllerError;
use cluster_client::{can_adopt, ownership, ClusterClientTrait, ManagedKind, ManagedObject, Ownership};
use crds::labels::{adoption_selector, selector_string};
use crds::ComponentKind;
use tracing::info;

/// Fetch the object at `name`, adopting it when it is an eligible orphan.
pub async fn get_claimed(
    client: &dyn ClusterClientTrait,
    ctx: &ReconcileContext<'_>,
    component: ComponentKind,
    kind: ManagedKind,
    name: &str,
) -> Result<Option<ManagedObject>, ControllerError> {
    match client.get_object(&ctx.namespace, kind, name).await? {
        Some(object) => claim(client, ctx, component, object).await.map(Some),
        None => Ok(None),
    }
}

/// Make sure `object` is controlled by the reconciled cluster.
pub async fn claim(
    client: &dyn ClusterClientTrait,
    ctx: &ReconcileContext<'_>,
    component: ComponentKind,
    object: ManagedObject,
) -> Result<ManagedObject, ControllerError> {
    match ownership(&object, &ctx.owner.uid) {
        Ownership::Owned => Ok(object),
        Ownership::Foreign(owner) => Err(ControllerError::NotAdoptable(format!(
            "{} {}/{} is controlled by {}",
            object.kind(),
            ctx.namespace,
            object.name(),
            owner
        ))),
        Ownership::Orphaned => {
            let selector = adoption_selector(&ctx.name, component);
            if !can_adopt(&object, &selector) {
                return Err(ControllerError::NotAdoptable(format!(
                    "{} {}/{} exists without labels {}",
                    object.kind(),
                    ctx.namespace,
                    object.name(),
                    selector_string(&selector)
                )));
            }
            let resource_version = object.resource_version().ok_or_else(|| {
                ControllerError::Reconciliation(format!("{} {} has no resourceVersion", object.kind(), object.name()))
            })?;
            info!(
                cluster = %ctx.key(),
                "Adopting orphaned {} {}",
                object.kind(),
                object.name()
            );
            let adopted = client
                .adopt_object(&ctx.namespace, object.kind(), object.name(), &ctx.owner, resource_version)
                .await?;
            Ok(adopted)
        }
    }
}
