//! Utilization metrics client
//!
//! Pull-based access to the usage/quota ratios the autoscaler compares
//! against its thresholds. `PrometheusClient` issues instant queries;
//! `MockMetricsClient` (feature `test-util`) returns configured values.

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod metrics_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::PrometheusClient;
pub use error::MetricsError;
pub use metrics_trait::MetricsClientTrait;
pub use models::{ResourceKind, UtilizationQuery};
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockMetricsClient;
