//! Replica planning
//!
//! - Failure members add spare replicas, capped by `maxFailoverCount`.
//! - Stores never scale in below the metadata replication factor on a
//!   cluster that owns its metadata store.
//! - Stateful components lose one ordinal per reconcile. Stores are marked
//!   `Offline` first and removed on the following reconcile.

use crds::{ComponentKind, StoreState, StoreStatus};
use std::collections::BTreeMap;

/// Default cap on spare replicas added for failure members.
pub const DEFAULT_MAX_FAILOVER_COUNT: i32 = 3;

#[derive(Debug, Clone, Copy)]
pub struct ScaleInput<'a> {
    pub kind: ComponentKind,
    pub cluster: &'a str,
    /// Declared replicas
    pub desired: i32,
    /// Replicas on the existing StatefulSet, if any
    pub current: Option<i32>,
    pub failure_members: usize,
    pub max_failover_count: Option<i32>,
    /// Minimum store count, when it applies
    pub replication_floor: Option<i32>,
    pub stores: &'a BTreeMap<String, StoreStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalePlan {
    /// Replicas to write this reconcile
    pub replicas: i32,
    /// Where the component is heading once every step is done
    pub target: i32,
    /// Ordinal being taken offline before removal
    pub leaving: Option<i32>,
    pub hold_reason: Option<String>,
}

/// Whether failure members of this kind are replaced by spares.
pub fn supports_failover(kind: ComponentKind) -> bool {
    matches!(
        kind,
        ComponentKind::Meta | ComponentKind::Store | ComponentKind::Gateway | ComponentKind::Columnar
    )
}

pub fn plan_scale(input: &ScaleInput<'_>) -> ScalePlan {
    let desired = input.desired.max(0);
    let spares = if desired == 0 || !supports_failover(input.kind) {
        0
    } else {
        let cap = input.max_failover_count.unwrap_or(DEFAULT_MAX_FAILOVER_COUNT).max(0);
        (input.failure_members as i32).min(cap)
    };
    let mut target = desired + spares;

    let Some(current) = input.current else {
        return ScalePlan {
            replicas: target,
            target,
            leaving: None,
            hold_reason: None,
        };
    };
    if target >= current {
        return ScalePlan {
            replicas: target,
            target,
            leaving: None,
            hold_reason: None,
        };
    }

    let mut hold_reason = None;
    if let Some(floor) = input.replication_floor {
        let bounded = target.max(current.min(floor));
        if bounded > target {
            hold_reason = Some(format!(
                "{} scale-in limited to replication factor {}",
                input.kind, floor
            ));
            target = bounded;
        }
        if target >= current {
            return ScalePlan {
                replicas: current,
                target,
                leaving: None,
                hold_reason,
            };
        }
    }

    if !input.kind.is_stateful() {
        return ScalePlan {
            replicas: target,
            target,
            leaving: None,
            hold_reason,
        };
    }

    let leaving = current - 1;
    if input.kind.tracks_stores() {
        let pod = input.kind.pod_name(input.cluster, leaving);
        let offline = input
            .stores
            .get(&pod)
            .is_some_and(|s| s.state == StoreState::Offline);
        if !offline {
            return ScalePlan {
                replicas: current,
                target,
                leaving: Some(leaving),
                hold_reason: Some(format!("taking store {} offline before removal", pod)),
            };
        }
    }

    ScalePlan {
        replicas: leaving,
        target,
        leaving: None,
        hold_reason,
    }
}
