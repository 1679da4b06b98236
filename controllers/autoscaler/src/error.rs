//! Autoscaler error types.

use cluster_client::ClusterClientError;
use kube::Error as KubeError;
use monitor_client::MetricsError;
use thiserror::Error;

/// Errors that can occur in the autoscaler controller.
#[derive(Debug, Error)]
pub enum AutoscalerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Managed-resource adapter error
    #[error("Cluster client error: {0}")]
    Client(#[from] ClusterClientError),

    /// Utilization query error
    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),

    /// Invalid controller or autoscaler configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Probe server failed
    #[error("Probe server failed: {0}")]
    Server(String),

    /// Shutdown interrupted an action
    #[error("Cancelled: {0}")]
    Cancelled(String),
}
