//! Store membership tracking for store-bearing components.

use chrono::{DateTime, Utc};
use cluster_client::{ordinal_from_pod_name, PodObservation};
use crds::labels::ALLOWED_STORE_LABELS;
use crds::{StoreState, StoreStatus};
use std::collections::BTreeMap;

/// Keep only the placement labels stores are allowed to carry.
pub fn bounded_store_labels(labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    labels
        .iter()
        .filter(|(key, _)| ALLOWED_STORE_LABELS.contains(&key.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Recompute store states after this reconcile's writes.
///
/// `leaving` is the ordinal marked for removal; ordinals at or above
/// `replicas` are on their way out. A store whose pod is gone for good is a
/// tombstone.
pub fn observe_stores(
    previous: &BTreeMap<String, StoreStatus>,
    pods: &[PodObservation],
    replicas: i32,
    leaving: Option<i32>,
    labels: &BTreeMap<String, String>,
    now: DateTime<Utc>,
) -> BTreeMap<String, StoreStatus> {
    let mut stores = BTreeMap::new();
    let transition = |name: &str, state: StoreState| {
        previous
            .get(name)
            .filter(|p| p.state == state)
            .and_then(|p| p.last_transition_time)
            .unwrap_or(now)
    };

    for pod in pods {
        let state = if leaving == Some(pod.ordinal) || pod.ordinal >= replicas {
            StoreState::Offline
        } else if pod.ready {
            StoreState::Up
        } else {
            StoreState::Down
        };
        stores.insert(
            pod.name.clone(),
            StoreStatus {
                pod_name: pod.name.clone(),
                state,
                labels: labels.clone(),
                last_transition_time: Some(transition(&pod.name, state)),
            },
        );
    }

    for (name, store) in previous {
        if stores.contains_key(name) {
            continue;
        }
        let gone = ordinal_from_pod_name(name).is_none_or(|o| o >= replicas);
        let state = if gone { StoreState::Tombstone } else { StoreState::Down };
        stores.insert(
            name.clone(),
            StoreStatus {
                state,
                last_transition_time: Some(transition(name, state)),
                ..store.clone()
            },
        );
    }
    stores
}
