//! One reconcile of one component: member resources, rollout and status.

use crate::context::ReconcileContext;
use crate::error::ControllerError;
use crate::reconciler::adopt::get_claimed;
use crate::reconciler::component::ComponentReconciler;
use crate::reconciler::config_map::{collect_garbage, sync_config_map};
use crate::reconciler::failover::observe_failover;
use crate::reconciler::scale::{plan_scale, ScaleInput, ScalePlan};
use crate::reconciler::service::sync_services;
use crate::reconciler::state::{derive_phase, PhaseInput};
use crate::reconciler::statefulset::{
    applied_template_hash, build_stateful_set, merge_stateful_set, partition_of, referenced_config_map,
    replicas_of,
};
use crate::reconciler::stores::{bounded_store_labels, observe_stores};
use crate::rollout::{pinned_partition, plan_rollout, RolloutAction, RolloutInput, RolloutPlan};
use cluster_client::{ClusterClientTrait, ManagedKind, ManagedObject};
use crds::labels::component_selector;
use crds::{ComponentKind, ComponentSpec, ComponentStatus};
use k8s_openapi::api::apps::v1::StatefulSet;
use tracing::{debug, info};

/// Hold reason of every component while the cluster is paused.
pub const PAUSED_REASON: &str = "reconciliation paused";

/// Sync one declared component and return its new observed status.
pub(crate) async fn sync_component(
    client: &dyn ClusterClientTrait,
    ctx: &ReconcileContext<'_>,
    kind: ComponentKind,
    spec: &ComponentSpec,
    previous: Option<&ComponentStatus>,
    failover_period: chrono::Duration,
) -> Result<ComponentStatus, ControllerError> {
    if kind == ComponentKind::Meta {
        if let Some(parent) = &ctx.parent {
            return Err(ControllerError::InvalidConfig(format!(
                "satellite cluster joins the meta service of {}/{} and cannot declare its own",
                parent.namespace, parent.name
            )));
        }
    }
    for secret in kind.required_secrets(ctx) {
        if !client.secret_exists(&ctx.namespace, &secret).await? {
            return Err(ControllerError::InvalidConfig(format!("waiting for TLS secret {}", secret)));
        }
    }

    let mut status = previous.cloned().unwrap_or_default();
    status.error = None;
    status.hold_reason = None;

    let selector = component_selector(&ctx.name, kind);
    let existing = get_claimed(
        client,
        ctx,
        kind,
        ManagedKind::StatefulSet,
        &kind.resource_name(&ctx.name),
    )
    .await?
    .and_then(|object| match object {
        ManagedObject::StatefulSet(sts) => Some(sts),
        _ => None,
    });
    let pods = client.list_pods(&ctx.namespace, &selector).await?;

    let desired = spec.replicas_or_default(kind).max(0);
    observe_failover(&mut status, &pods, desired, failover_period, ctx.now);

    let stores = status.stores.clone();
    let scale = plan_scale(&ScaleInput {
        kind,
        cluster: &ctx.name,
        desired,
        current: existing.as_ref().and_then(replicas_of),
        failure_members: status.failure_members.len(),
        max_failover_count: spec.max_failover_count,
        replication_floor: if kind == ComponentKind::Store { ctx.replication_floor() } else { None },
        stores: &stores,
    });

    if ctx.cluster.spec.paused {
        debug!(cluster = %ctx.key(), "Paused, skipping {} writes", kind);
        let planned = existing.as_ref().and_then(replicas_of).unwrap_or(0);
        fill_workload_status(&mut status, existing.as_ref(), partition_from(existing.as_ref()));
        // Nothing is written while paused, so pending work must not read as in progress
        status.phase = match previous {
            Some(previous) => previous.phase,
            None => derive_phase(&PhaseInput {
                failure_members: status.failure_members.len(),
                target: scale.target,
                planned,
                observed: status.replicas,
                upgrading: revisions_differ(&status),
            }),
        };
        status.hold_reason = Some(PAUSED_REASON.to_string());
        return Ok(status);
    }

    let referenced = existing.as_ref().and_then(referenced_config_map);
    let config_map = sync_config_map(client, ctx, kind, spec, referenced.as_deref()).await?;
    sync_services(client, ctx, kind, spec.service.as_ref()).await?;

    let mut desired_sts = build_stateful_set(ctx, kind, spec, &config_map, scale.replicas, 0)?;
    let (written, rollout, template_changed) = match existing {
        None => {
            info!(cluster = %ctx.key(), "Creating StatefulSet for {} with {} replicas", kind, scale.replicas);
            let created = client
                .create_object(&ctx.namespace, &desired_sts.object.clone().into())
                .await?;
            let rollout = RolloutPlan {
                partition: 0,
                pinned: pinned_partition(ctx.cluster, kind),
                action: RolloutAction::NotNeeded,
            };
            (stateful_set_or(created, desired_sts.object), rollout, false)
        }
        Some(existing) => {
            let template_changed = applied_template_hash(&existing).as_deref() != Some(desired_sts.template_hash.as_str());
            let workload = existing.status.clone().unwrap_or_default();
            let rollout = plan_rollout(&RolloutInput {
                replicas: scale.replicas,
                partition: partition_of(&existing),
                pinned: pinned_partition(ctx.cluster, kind),
                template_changed,
                current_revision: workload.current_revision.as_deref(),
                update_revision: workload.update_revision.as_deref(),
                pods: &pods,
            });
            desired_sts.set_partition(rollout.partition);

            let next = merge_stateful_set(&existing, &desired_sts, template_changed);
            if next == existing {
                debug!("StatefulSet {} up to date", kind.resource_name(&ctx.name));
                (existing, rollout, template_changed)
            } else {
                info!(
                    cluster = %ctx.key(),
                    "Updating StatefulSet for {}: replicas={} partition={} ({:?})",
                    kind, scale.replicas, rollout.partition, rollout.action
                );
                let replaced = client.replace_object(&ctx.namespace, &next.clone().into()).await?;
                (stateful_set_or(replaced, next), rollout, template_changed)
            }
        }
    };

    fill_workload_status(&mut status, Some(&written), Some(rollout.partition));
    let settled = !template_changed && !revisions_differ(&status) && status.update_revision.is_some();
    if settled {
        let deleted = collect_garbage(client, ctx, kind, &config_map).await?;
        if deleted > 0 {
            debug!("Removed {} stale ConfigMaps of {}", deleted, kind);
        }
    }

    if kind.tracks_stores() {
        let pods = client.list_pods(&ctx.namespace, &selector).await?;
        status.stores = observe_stores(
            &status.stores,
            &pods,
            scale.replicas,
            scale.leaving,
            &bounded_store_labels(&spec.store_labels),
            ctx.now,
        );
    } else {
        status.stores.clear();
    }

    status.phase = derive_phase(&PhaseInput {
        failure_members: status.failure_members.len(),
        target: scale.target,
        planned: scale.replicas,
        observed: status.replicas,
        upgrading: template_changed || revisions_differ(&status),
    });
    status.hold_reason = hold_reason(&scale, &rollout);
    Ok(status)
}

fn hold_reason(scale: &ScalePlan, rollout: &RolloutPlan) -> Option<String> {
    scale
        .hold_reason
        .clone()
        .or_else(|| rollout.hold_reason().map(str::to_string))
}

fn stateful_set_or(object: ManagedObject, fallback: StatefulSet) -> StatefulSet {
    match object {
        ManagedObject::StatefulSet(sts) => sts,
        _ => fallback,
    }
}

fn partition_from(sts: Option<&StatefulSet>) -> Option<i32> {
    sts.and_then(partition_of)
}

fn revisions_differ(status: &ComponentStatus) -> bool {
    matches!(
        (&status.current_revision, &status.update_revision),
        (Some(current), Some(update)) if current != update
    )
}

/// Copy what the workload reports into the component status.
fn fill_workload_status(status: &mut ComponentStatus, sts: Option<&StatefulSet>, partition: Option<i32>) {
    let workload = sts.and_then(|s| s.status.clone()).unwrap_or_default();
    status.replicas = workload.replicas;
    status.ready_replicas = workload.ready_replicas.unwrap_or(0);
    status.partition = partition;
    status.current_revision = workload.current_revision;
    status.update_revision = workload.update_revision;
}
