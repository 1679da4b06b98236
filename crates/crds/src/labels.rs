//! Label and annotation keys shared by the controllers.

use crate::component::ComponentKind;
use std::collections::BTreeMap;

/// API group of all DBOps resources
pub const API_GROUP: &str = "dbops.microscaler.io";

/// Value of the managed-by label on every resource the controllers create
pub const MANAGED_BY: &str = "dbops-controller";

pub const NAME_LABEL: &str = "app.kubernetes.io/name";
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Autoscaler that created a satellite cluster
pub const AUTO_INSTANCE_LABEL: &str = "dbops.microscaler.io/auto-instance";
/// Parent cluster of a satellite
pub const BASE_CLUSTER_LABEL: &str = "dbops.microscaler.io/base-cluster";
/// Autoscaled component of a satellite
pub const AUTO_COMPONENT_LABEL: &str = "dbops.microscaler.io/auto-component";

/// Store placement labels the autoscaler is allowed to set
pub const STORE_LABEL_SPECIAL_USE: &str = "specialUse";
pub const STORE_LABEL_RESOURCE_TYPE: &str = "resource-type";
pub const STORE_LABEL_GROUP: &str = "group";
pub const ALLOWED_STORE_LABELS: [&str; 3] = [
    STORE_LABEL_SPECIAL_USE,
    STORE_LABEL_RESOURCE_TYPE,
    STORE_LABEL_GROUP,
];

/// Hash of the desired pod template, stamped on the StatefulSet
pub const TEMPLATE_HASH_ANNOTATION: &str = "dbops.microscaler.io/template-hash";

/// Annotation pinning the rollout partition of a component:
/// `dbops.microscaler.io/<component>-partition=<ordinal>`
pub fn partition_annotation(kind: ComponentKind) -> String {
    format!("{}/{}-partition", API_GROUP, kind.as_str())
}

/// Selector labels identifying the pods and resources of one component.
pub fn component_selector(cluster: &str, kind: ComponentKind) -> BTreeMap<String, String> {
    BTreeMap::from([
        (NAME_LABEL.to_string(), "dbcluster".to_string()),
        (INSTANCE_LABEL.to_string(), cluster.to_string()),
        (COMPONENT_LABEL.to_string(), kind.as_str().to_string()),
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string()),
    ])
}

/// Labels an existing resource must carry before it may be adopted.
///
/// Narrower than `component_selector` so resources created by an earlier
/// tool (without our name/managed-by labels) can still be taken over.
pub fn adoption_selector(cluster: &str, kind: ComponentKind) -> BTreeMap<String, String> {
    BTreeMap::from([
        (INSTANCE_LABEL.to_string(), cluster.to_string()),
        (COMPONENT_LABEL.to_string(), kind.as_str().to_string()),
    ])
}

/// Render a label map as a Kubernetes label selector string.
pub fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// True when every selector label is present with the same value.
pub fn matches_selector(labels: Option<&BTreeMap<String, String>>, selector: &BTreeMap<String, String>) -> bool {
    let Some(labels) = labels else {
        return selector.is_empty();
    };
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_annotation_key() {
        assert_eq!(
            partition_annotation(ComponentKind::Store),
            "dbops.microscaler.io/store-partition"
        );
    }

    #[test]
    fn test_selector_matching() {
        let selector = component_selector("basic", ComponentKind::Gateway);
        let mut labels = selector.clone();
        labels.insert("extra".to_string(), "x".to_string());
        assert!(matches_selector(Some(&labels), &selector));

        labels.insert(INSTANCE_LABEL.to_string(), "other".to_string());
        assert!(!matches_selector(Some(&labels), &selector));
        assert!(!matches_selector(None, &selector));
    }

    #[test]
    fn test_adoption_selector_is_subset_of_component_selector() {
        let full = component_selector("basic", ComponentKind::Store);
        let adoption = adoption_selector("basic", ComponentKind::Store);
        assert!(matches_selector(Some(&full), &adoption));
        assert_eq!(adoption.len(), 2);
    }

    #[test]
    fn test_selector_string_is_sorted() {
        let selector = BTreeMap::from([
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ]);
        assert_eq!(selector_string(&selector), "a=1,b=2");
    }
}
