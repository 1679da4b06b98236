//! Controller-specific error types.
//!
//! Transient failures are requeued with backoff; configuration errors are
//! written to the component status and wait for a spec change.

use cluster_client::ClusterClientError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the DbCluster Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Managed-resource adapter error
    #[error("Cluster client error: {0}")]
    Client(#[from] ClusterClientError),

    /// Invalid controller or cluster configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A resource at an expected name is controlled by someone else
    #[error("Resource not adoptable: {0}")]
    NotAdoptable(String),

    /// Component configuration could not be rendered
    #[error("Config render failed: {0}")]
    Render(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Reconciliation failed
    #[error("Reconciliation failed: {0}")]
    Reconciliation(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Webhook server failed
    #[error("Webhook server failed: {0}")]
    Webhook(String),
}

impl ControllerError {
    /// Errors that will not go away by retrying without a spec change.
    pub fn is_configuration(&self) -> bool {
        match self {
            ControllerError::InvalidConfig(_)
            | ControllerError::NotAdoptable(_)
            | ControllerError::Render(_) => true,
            ControllerError::Client(ClusterClientError::Invalid(_)) => true,
            _ => false,
        }
    }
}

impl From<toml::ser::Error> for ControllerError {
    fn from(e: toml::ser::Error) -> Self {
        ControllerError::Render(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_are_not_retried() {
        assert!(ControllerError::NotAdoptable("x".to_string()).is_configuration());
        assert!(ControllerError::Client(ClusterClientError::Invalid("x".to_string())).is_configuration());
        assert!(!ControllerError::Client(ClusterClientError::Conflict("x".to_string())).is_configuration());
        assert!(!ControllerError::Reconciliation("x".to_string()).is_configuration());
    }
}
