//! Admission defaulting for DbCluster objects.
//!
//! Clusters still on the legacy `image` schema are left untouched until they
//! migrate; everything else gets per-kind base images and replica counts.

use crate::reconciler::scale::DEFAULT_MAX_FAILOVER_COUNT;
use crds::{ComponentKind, DbCluster};

pub const DEFAULT_IMAGE_PULL_POLICY: &str = "IfNotPresent";

/// Whether defaulting applies to `cluster` at all.
pub fn should_default(cluster: &DbCluster) -> bool {
    !cluster.spec.has_legacy_image() || cluster.spec.is_migrated()
}

/// Fill unset fields in place. Returns whether anything changed.
///
/// A `baseImage` the previous object already had is not refilled, so clearing
/// it reaches validation instead of being silently undone.
pub fn apply_defaults(cluster: &mut DbCluster, old: Option<&DbCluster>) -> bool {
    if !should_default(cluster) {
        return false;
    }
    let before = cluster.spec.clone();

    if cluster.spec.image_pull_policy.is_none() {
        cluster.spec.image_pull_policy = Some(DEFAULT_IMAGE_PULL_POLICY.to_string());
    }

    for kind in ComponentKind::ALL {
        let previous_base_image = old
            .and_then(|o| o.spec.component(kind))
            .map(|c| c.base_image.as_str())
            .unwrap_or_default();
        let Some(spec) = cluster.spec.slot_mut(kind).as_mut() else {
            continue;
        };
        if spec.base_image.is_empty() && !spec.has_legacy_image() && previous_base_image.is_empty() {
            spec.base_image = kind.default_base_image().to_string();
        }
        if spec.replicas.is_none() {
            spec.replicas = Some(kind.default_replicas());
        }
        if spec.max_failover_count.is_none() {
            spec.max_failover_count = Some(DEFAULT_MAX_FAILOVER_COUNT);
        }
    }

    cluster.spec != before
}
