//! Failure members
//!
//! A pod that stays not-ready for the failover period becomes a failure
//! member. Failure members buy the component spare replicas (see `scale.rs`)
//! until the pod is ready again.

use chrono::{DateTime, Duration, Utc};
use cluster_client::{ordinal_from_pod_name, PodObservation};
use crds::{ComponentStatus, FailureMember};
use tracing::{info, warn};

/// Update `unhealthy_since` and `failure_members` from the observed pods.
///
/// Only ordinals below `desired` are tracked; spares and leaving pods never
/// become failure members. Scaling to zero clears everything.
pub fn observe_failover(
    status: &mut ComponentStatus,
    pods: &[PodObservation],
    desired: i32,
    period: Duration,
    now: DateTime<Utc>,
) {
    if desired <= 0 {
        status.unhealthy_since.clear();
        status.failure_members.clear();
        return;
    }

    let in_range = |name: &str| ordinal_from_pod_name(name).is_some_and(|o| o < desired);
    status.failure_members.retain(|name, _| in_range(name));
    status
        .unhealthy_since
        .retain(|name, _| in_range(name) && pods.iter().any(|p| &p.name == name));

    for pod in pods.iter().filter(|p| p.ordinal < desired) {
        if pod.ready {
            status.unhealthy_since.remove(&pod.name);
            if status.failure_members.remove(&pod.name).is_some() {
                info!("Pod {} recovered, clearing failure member", pod.name);
            }
            continue;
        }

        let since = *status
            .unhealthy_since
            .entry(pod.name.clone())
            .or_insert(now);
        if now - since >= period && !status.failure_members.contains_key(&pod.name) {
            warn!(
                "Pod {} not ready since {}, recording failure member",
                pod.name, since
            );
            status.failure_members.insert(
                pod.name.clone(),
                FailureMember {
                    pod_name: pod.name.clone(),
                    reason: format!("not ready for {}s", (now - since).num_seconds()),
                    created_at: now,
                },
            );
        }
    }
}
