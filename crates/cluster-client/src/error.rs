//! Cluster client errors

use thiserror::Error;

/// Errors that can occur when reading or writing managed resources
#[derive(Debug, Error)]
pub enum ClusterClientError {
    /// Kubernetes API or transport error not covered by a more specific variant
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency precondition failed (stale resourceVersion)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Create of a name that is already taken
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Rejected by the API server (immutable field, schema violation)
    #[error("Invalid: {0}")]
    Invalid(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClusterClientError {
    /// Classify a kube error by HTTP status so callers can match on conflicts.
    pub fn from_kube(err: kube::Error, what: &str) -> Self {
        match &err {
            kube::Error::Api(status) if status.code == 404 => {
                ClusterClientError::NotFound(what.to_string())
            }
            kube::Error::Api(status) if status.code == 409 && status.reason == "AlreadyExists" => {
                ClusterClientError::AlreadyExists(what.to_string())
            }
            kube::Error::Api(status) if status.code == 409 => {
                ClusterClientError::Conflict(format!("{}: {}", what, status.message))
            }
            kube::Error::Api(status) if status.code == 422 => {
                ClusterClientError::Invalid(format!("{}: {}", what, status.message))
            }
            _ => ClusterClientError::Kube(err),
        }
    }

    /// Transient errors are retried with backoff; the rest need a spec change.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClusterClientError::Kube(_) | ClusterClientError::Conflict(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterClientError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterClientError::NotFound(_))
    }
}
