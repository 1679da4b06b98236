//! Prometheus HTTP client

use crate::error::MetricsError;
use crate::metrics_trait::MetricsClientTrait;
use crate::models::{QueryResponse, UtilizationQuery};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Prometheus instant-query client
#[derive(Debug, Clone)]
pub struct PrometheusClient {
    client: Client,
    base_url: String,
}

impl PrometheusClient {
    /// Create a new Prometheus client
    ///
    /// # Arguments
    /// * `base_url` - Prometheus base URL (e.g., "http://prometheus:9090")
    pub fn new(base_url: String) -> Result<Self, MetricsError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn instant_query(&self, promql: &str) -> Result<QueryResponse, MetricsError> {
        let url = format!("{}/api/v1/query", self.base_url);
        debug!("GET {} query={}", url, promql);

        let response = self
            .client
            .get(&url)
            .query(&[("query", promql)])
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        // Prometheus answers 400/422 with a JSON error envelope
        match serde_json::from_str::<QueryResponse>(&body) {
            Ok(parsed) => Ok(parsed),
            Err(_) if !status.is_success() => Err(MetricsError::Api(format!(
                "query failed: {} - {}",
                status,
                body.chars().take(500).collect::<String>()
            ))),
            Err(e) => Err(MetricsError::Serialization(e)),
        }
    }
}

#[async_trait::async_trait]
impl MetricsClientTrait for PrometheusClient {
    async fn query_utilization(&self, query: &UtilizationQuery) -> Result<Option<f64>, MetricsError> {
        let response = self.instant_query(&query.promql()).await?;
        response.scalar()
    }
}
