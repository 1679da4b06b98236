//! MetricsClient trait for mocking

use crate::error::MetricsError;
use crate::models::UtilizationQuery;

/// Trait for utilization queries
///
/// `Ok(None)` means the metrics backend had no samples for the window.
#[async_trait::async_trait]
pub trait MetricsClientTrait: Send + Sync {
    /// Usage/quota ratio of a resource over the query window.
    async fn query_utilization(&self, query: &UtilizationQuery) -> Result<Option<f64>, MetricsError>;
}
