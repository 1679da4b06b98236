//! Kubernetes object references between DBOps CRDs
//!
//! Satellite clusters and autoscalers point at a parent `DbCluster` by name,
//! optionally in another namespace.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to a `DbCluster` resource.
///
/// The namespace defaults to the namespace of the referencing resource.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterReference {
    /// Name of the referenced cluster
    pub name: String,

    /// Namespace of the referenced cluster (defaults to same namespace as the referencing resource)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ClusterReference {
    /// Create a new reference in the same namespace
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    /// Create a new reference with an explicit namespace
    pub fn with_namespace(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// Namespace to resolve the reference in, falling back to the referrer's namespace
    pub fn resolve_namespace<'a>(&'a self, default_namespace: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(default_namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_namespace_defaults_to_referrer() {
        let reference = ClusterReference::new("basic");
        assert_eq!(reference.resolve_namespace("db"), "db");

        let reference = ClusterReference::with_namespace("basic", "other");
        assert_eq!(reference.resolve_namespace("db"), "other");
    }
}
