//! Mock MetricsClient for unit testing

use crate::error::MetricsError;
use crate::metrics_trait::MetricsClientTrait;
use crate::models::{ResourceKind, UtilizationQuery};
use crds::ComponentKind;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Mock metrics backend returning configured utilization per component and resource.
///
/// Unset series return no data. Clones share the same values.
#[derive(Debug, Clone, Default)]
pub struct MockMetricsClient {
    values: Arc<Mutex<HashMap<(ComponentKind, ResourceKind), f64>>>,
    failing: Arc<Mutex<bool>>,
    queries: Arc<Mutex<Vec<UtilizationQuery>>>,
}

impl MockMetricsClient {
    /// Create a new mock client with no data
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> MutexGuard<'_, HashMap<(ComponentKind, ResourceKind), f64>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set (or clear with `None`) the utilization returned for a series
    pub fn set_utilization(&self, component: ComponentKind, resource: ResourceKind, value: Option<f64>) {
        match value {
            Some(value) => self.values().insert((component, resource), value),
            None => self.values().remove(&(component, resource)),
        };
    }

    /// Make every query fail, as when Prometheus is unreachable
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap_or_else(PoisonError::into_inner) = failing;
    }

    /// Queries received so far
    pub fn queries(&self) -> Vec<UtilizationQuery> {
        self.queries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait::async_trait]
impl MetricsClientTrait for MockMetricsClient {
    async fn query_utilization(&self, query: &UtilizationQuery) -> Result<Option<f64>, MetricsError> {
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(query.clone());
        if *self.failing.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(MetricsError::Api("mock backend unavailable".to_string()));
        }
        Ok(self.values().get(&(query.component, query.resource)).copied())
    }
}
