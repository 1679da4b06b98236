//! # Rollout Orchestrator
//!
//! Drives a StatefulSet rolling update through its partition. Pods with an
//! ordinal at or above the partition run the update revision; the rest keep
//! the current one.
//!
//! - A new template is applied with `partition = replicas`, so no pod rolls yet,
//!   or at the pinned partition when one is set.
//! - Each reconcile lowers the partition by one, and only once every pod at or
//!   above it runs the update revision and is ready. A pod that never becomes
//!   ready blocks the component indefinitely.
//! - The pinned partition annotation is a floor the partition is never lowered past.
//! - Within one rollout the partition never goes up.

use cluster_client::PodObservation;
use crds::labels::partition_annotation;
use crds::{ComponentKind, DbCluster};
use tracing::warn;

/// What the orchestrator decided for this reconcile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloutAction {
    /// No rollout in progress
    NotNeeded,
    /// A new template is applied with every pod behind the partition
    Start,
    /// Partition stays where it is
    Hold(String),
    /// Partition lowered by one
    Advance,
    /// Partition reached zero; the workload finishes the remaining pods
    Complete,
}

/// Partition to write and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutPlan {
    pub partition: i32,
    pub pinned: Option<i32>,
    pub action: RolloutAction,
}

impl RolloutPlan {
    pub fn hold_reason(&self) -> Option<&str> {
        match &self.action {
            RolloutAction::Hold(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Observed rollout state of one component.
#[derive(Debug, Clone, Copy)]
pub struct RolloutInput<'a> {
    /// Replicas being written this reconcile
    pub replicas: i32,
    /// Partition currently on the StatefulSet (`None` when it has none)
    pub partition: Option<i32>,
    pub pinned: Option<i32>,
    /// The desired pod template differs from the applied one
    pub template_changed: bool,
    pub current_revision: Option<&'a str>,
    pub update_revision: Option<&'a str>,
    pub pods: &'a [PodObservation],
}

impl RolloutInput<'_> {
    fn in_progress(&self) -> bool {
        match (self.current_revision, self.update_revision) {
            (Some(current), Some(update)) => current != update,
            _ => false,
        }
    }
}

/// Pinned partition from the `dbops.microscaler.io/<component>-partition` annotation.
///
/// Unparseable or negative values are ignored.
pub fn pinned_partition(cluster: &DbCluster, kind: ComponentKind) -> Option<i32> {
    let key = partition_annotation(kind);
    let raw = cluster.metadata.annotations.as_ref()?.get(&key)?;
    match raw.trim().parse::<i32>() {
        Ok(value) if value >= 0 => Some(value),
        _ => {
            warn!("Ignoring invalid partition annotation {}={}", key, raw);
            None
        }
    }
}

/// Decide the partition for this reconcile.
pub fn plan_rollout(input: &RolloutInput<'_>) -> RolloutPlan {
    let replicas = input.replicas.max(0);
    let pinned = input.pinned;

    if input.template_changed {
        return RolloutPlan {
            partition: pinned.unwrap_or(replicas).min(replicas),
            pinned,
            action: RolloutAction::Start,
        };
    }

    let partition = input.partition.unwrap_or(0).clamp(0, replicas);
    if !input.in_progress() {
        return RolloutPlan {
            partition,
            pinned,
            action: RolloutAction::NotNeeded,
        };
    }

    let floor = pinned.unwrap_or(0).clamp(0, replicas);
    if partition <= floor {
        let action = if partition == 0 {
            RolloutAction::Complete
        } else {
            RolloutAction::Hold(format!("partition pinned at {}", partition))
        };
        return RolloutPlan {
            partition,
            pinned,
            action,
        };
    }

    match blocking_pod(input, partition) {
        Some(reason) => RolloutPlan {
            partition,
            pinned,
            action: RolloutAction::Hold(reason),
        },
        None => RolloutPlan {
            partition: partition - 1,
            pinned,
            action: RolloutAction::Advance,
        },
    }
}

/// First ordinal at or above the partition that is missing, outdated or not ready.
fn blocking_pod(input: &RolloutInput<'_>, partition: i32) -> Option<String> {
    for ordinal in partition..input.replicas {
        let Some(pod) = input.pods.iter().find(|p| p.ordinal == ordinal) else {
            return Some(format!("waiting for pod ordinal {} to be created", ordinal));
        };
        if pod.revision.as_deref() != input.update_revision {
            return Some(format!("waiting for {} to be updated", pod.name));
        }
        if !pod.ready {
            return Some(format!("waiting for {} to become ready", pod.name));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn pod(ordinal: i32, revision: &str, ready: bool) -> PodObservation {
        PodObservation {
            name: format!("basic-store-{}", ordinal),
            ordinal,
            ready,
            revision: Some(revision.to_string()),
            labels: BTreeMap::new(),
        }
    }

    fn input<'a>(partition: i32, pinned: Option<i32>, pods: &'a [PodObservation]) -> RolloutInput<'a> {
        RolloutInput {
            replicas: 3,
            partition: Some(partition),
            pinned,
            template_changed: false,
            current_revision: Some("v1"),
            update_revision: Some("v2"),
            pods,
        }
    }

    #[test]
    fn test_template_change_starts_at_replicas() {
        let pods = [pod(0, "v1", true), pod(1, "v1", true), pod(2, "v1", true)];
        let mut start = input(0, None, &pods);
        start.template_changed = true;
        let plan = plan_rollout(&start);
        assert_eq!(plan.partition, 3);
        assert_eq!(plan.action, RolloutAction::Start);
    }

    #[test]
    fn test_advances_one_ordinal_when_updated_pods_are_ready() {
        let pods = [pod(0, "v1", true), pod(1, "v1", true), pod(2, "v2", true)];
        let plan = plan_rollout(&input(2, None, &pods));
        assert_eq!(plan.partition, 1);
        assert_eq!(plan.action, RolloutAction::Advance);
    }

    #[test]
    fn test_unready_updated_pod_holds() {
        let pods = [pod(0, "v1", true), pod(1, "v1", true), pod(2, "v2", false)];
        let plan = plan_rollout(&input(2, None, &pods));
        assert_eq!(plan.partition, 2);
        assert_eq!(plan.hold_reason(), Some("waiting for basic-store-2 to become ready"));
    }

    #[test]
    fn test_outdated_pod_holds() {
        let pods = [pod(0, "v1", true), pod(1, "v1", true), pod(2, "v1", true)];
        let plan = plan_rollout(&input(2, None, &pods));
        assert_eq!(plan.partition, 2);
        assert!(plan.hold_reason().is_some());
    }

    #[test]
    fn test_pinned_partition_is_a_floor() {
        let pods = [pod(0, "v1", true), pod(1, "v2", true), pod(2, "v2", true)];
        let plan = plan_rollout(&input(1, Some(1), &pods));
        assert_eq!(plan.partition, 1);
        assert_eq!(plan.hold_reason(), Some("partition pinned at 1"));

        let plan = plan_rollout(&input(2, Some(1), &pods));
        assert_eq!(plan.partition, 1);
    }

    #[test]
    fn test_template_change_starts_at_pinned_partition() {
        let pods = [pod(0, "v1", true), pod(1, "v1", true), pod(2, "v1", true)];
        let mut start = input(0, Some(2), &pods);
        start.template_changed = true;
        let plan = plan_rollout(&start);
        assert_eq!(plan.partition, 2);
        assert_eq!(plan.action, RolloutAction::Start);

        // Next reconcile holds at the pin once ordinal 2 has rolled
        let pods = [pod(0, "v1", true), pod(1, "v1", true), pod(2, "v2", true)];
        let plan = plan_rollout(&input(2, Some(2), &pods));
        assert_eq!(plan.partition, 2);
        assert_eq!(plan.hold_reason(), Some("partition pinned at 2"));

        start.pinned = Some(5);
        assert_eq!(plan_rollout(&start).partition, 3);
    }

    #[test]
    fn test_pin_above_partition_never_raises_it() {
        let pods = [pod(0, "v1", true), pod(1, "v2", true), pod(2, "v2", true)];
        let plan = plan_rollout(&input(1, Some(3), &pods));
        assert_eq!(plan.partition, 1);
    }

    #[test]
    fn test_partition_zero_completes() {
        let pods = [pod(0, "v2", true), pod(1, "v2", true), pod(2, "v2", true)];
        let plan = plan_rollout(&input(0, None, &pods));
        assert_eq!(plan.action, RolloutAction::Complete);
    }

    #[test]
    fn test_no_rollout_keeps_partition() {
        let pods = [pod(0, "v2", true)];
        let mut settled = input(0, None, &pods);
        settled.current_revision = Some("v2");
        let plan = plan_rollout(&settled);
        assert_eq!(plan.action, RolloutAction::NotNeeded);
        assert_eq!(plan.partition, 0);
    }

    #[test]
    fn test_partition_sequence_is_non_increasing() {
        let mut pods = vec![pod(0, "v1", true), pod(1, "v1", true), pod(2, "v1", true)];
        let mut partition = 3;
        let mut seen = vec![partition];
        while partition > 0 {
            let plan = plan_rollout(&input(partition, None, &pods));
            assert!(plan.partition <= partition);
            partition = plan.partition;
            for p in pods.iter_mut().filter(|p| p.ordinal >= partition) {
                p.revision = Some("v2".to_string());
            }
            seen.push(partition);
        }
        assert_eq!(seen, vec![3, 2, 1, 0]);
    }

    #[test]
    fn test_pinned_partition_annotation() {
        let mut cluster = DbCluster {
            metadata: ObjectMeta {
                annotations: Some(BTreeMap::from([(
                    "dbops.microscaler.io/store-partition".to_string(),
                    "2".to_string(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(pinned_partition(&cluster, ComponentKind::Store), Some(2));
        assert_eq!(pinned_partition(&cluster, ComponentKind::Meta), None);

        cluster.metadata.annotations = Some(BTreeMap::from([(
            "dbops.microscaler.io/store-partition".to_string(),
            "two".to_string(),
        )]));
        assert_eq!(pinned_partition(&cluster, ComponentKind::Store), None);
    }
}
