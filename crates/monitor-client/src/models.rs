//! Query and response models

use crate::error::MetricsError;
use crds::ComponentKind;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Resource a utilization rule watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Cpu,
    Memory,
    Storage,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Cpu => "cpu",
            ResourceKind::Memory => "memory",
            ResourceKind::Storage => "storage",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = MetricsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(ResourceKind::Cpu),
            "memory" => Ok(ResourceKind::Memory),
            "storage" => Ok(ResourceKind::Storage),
            other => Err(MetricsError::InvalidQuery(format!("unsupported resource: {}", other))),
        }
    }
}

/// Utilization of one resource across a set of clusters' component pods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtilizationQuery {
    pub namespace: String,
    /// Cluster names whose pods are included (parent and satellites)
    pub clusters: Vec<String>,
    pub component: ComponentKind,
    pub resource: ResourceKind,
    pub duration_seconds: i64,
}

impl UtilizationQuery {
    /// Regex matching the pods of every cluster in the query.
    pub fn pod_regex(&self) -> String {
        let names: Vec<_> = self
            .clusters
            .iter()
            .map(|cluster| self.component.resource_name(cluster))
            .collect();
        format!("({})-[0-9]+", names.join("|"))
    }

    /// PromQL expression for the usage/quota ratio.
    pub fn promql(&self) -> String {
        let ns = &self.namespace;
        let pods = self.pod_regex();
        let container = self.component.as_str();
        let window = self.duration_seconds.max(1);
        match self.resource {
            ResourceKind::Cpu => format!(
                r#"sum(rate(container_cpu_usage_seconds_total{{namespace="{ns}",pod=~"{pods}",container="{container}"}}[{window}s])) / sum(kube_pod_container_resource_limits{{namespace="{ns}",pod=~"{pods}",container="{container}",resource="cpu"}})"#
            ),
            ResourceKind::Memory => format!(
                r#"sum(avg_over_time(container_memory_working_set_bytes{{namespace="{ns}",pod=~"{pods}",container="{container}"}}[{window}s])) / sum(kube_pod_container_resource_limits{{namespace="{ns}",pod=~"{pods}",container="{container}",resource="memory"}})"#
            ),
            ResourceKind::Storage => format!(
                r#"sum(kubelet_volume_stats_used_bytes{{namespace="{ns}",persistentvolumeclaim=~".*-{pods}"}}) / sum(kubelet_volume_stats_capacity_bytes{{namespace="{ns}",persistentvolumeclaim=~".*-{pods}"}})"#
            ),
        }
    }
}

/// `/api/v1/query` response envelope
#[derive(Debug, Deserialize)]
pub struct QueryResponse {
    pub status: String,
    #[serde(default)]
    pub data: Option<QueryData>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryData {
    pub result_type: String,
    #[serde(default)]
    pub result: Vec<VectorSample>,
}

#[derive(Debug, Deserialize)]
pub struct VectorSample {
    /// `[unix_timestamp, "value"]`
    pub value: (f64, String),
}

impl QueryResponse {
    /// First sample of an instant vector, `None` for an empty or non-finite result.
    pub fn scalar(&self) -> Result<Option<f64>, MetricsError> {
        if self.status != "success" {
            return Err(MetricsError::Api(
                self.error.clone().unwrap_or_else(|| self.status.clone()),
            ));
        }
        let Some(sample) = self.data.as_ref().and_then(|d| d.result.first()) else {
            return Ok(None);
        };
        let value: f64 = sample
            .value
            .1
            .parse()
            .map_err(|_| MetricsError::Api(format!("non-numeric sample: {}", sample.value.1)))?;
        Ok(value.is_finite().then_some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(resource: ResourceKind) -> UtilizationQuery {
        UtilizationQuery {
            namespace: "db".to_string(),
            clusters: vec!["basic".to_string(), "basic-store-auto".to_string()],
            component: ComponentKind::Store,
            resource,
            duration_seconds: 60,
        }
    }

    #[test]
    fn test_pod_regex_covers_all_clusters() {
        assert_eq!(query(ResourceKind::Cpu).pod_regex(), "(basic-store|basic-store-auto-store)-[0-9]+");
    }

    #[test]
    fn test_promql_uses_window() {
        let promql = query(ResourceKind::Cpu).promql();
        assert!(promql.contains("[60s]"));
        assert!(promql.contains(r#"resource="cpu""#));
    }

    #[test]
    fn test_scalar_parsing() {
        let body = r#"{"status":"success","data":{"resultType":"vector","result":[{"metric":{},"value":[1700000000.1,"0.42"]}]}}"#;
        let response: QueryResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.scalar().unwrap(), Some(0.42));

        let empty = r#"{"status":"success","data":{"resultType":"vector","result":[]}}"#;
        let response: QueryResponse = serde_json::from_str(empty).unwrap();
        assert_eq!(response.scalar().unwrap(), None);

        let nan = r#"{"status":"success","data":{"resultType":"vector","result":[{"metric":{},"value":[1,"NaN"]}]}}"#;
        let response: QueryResponse = serde_json::from_str(nan).unwrap();
        assert_eq!(response.scalar().unwrap(), None);

        let failed = r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#;
        let response: QueryResponse = serde_json::from_str(failed).unwrap();
        assert!(response.scalar().is_err());
    }
}
