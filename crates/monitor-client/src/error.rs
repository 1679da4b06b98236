//! Metrics client errors

use thiserror::Error;

/// Errors that can occur when querying utilization metrics
#[derive(Debug, Error)]
pub enum MetricsError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Prometheus returned an error status or payload
    #[error("Prometheus API error: {0}")]
    Api(String),

    /// JSON deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unsupported rule resource
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}
