//! Tests for the autoscaler worker against the mock cluster and metrics clients.

#[cfg(test)]
mod tests {
    use crate::error::AutoscalerError;
    use crate::evaluator::Decision;
    use crate::metrics::Metrics;
    use crate::test_utils::{NAMESPACE, mark_healthy_in, parent_cluster, store_autoscaler};
    use crate::worker::{Worker, WorkerSettings};
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use cluster_client::{MockClusterClient, RetryConfig};
    use crds::labels::{AUTO_INSTANCE_LABEL, BASE_CLUSTER_LABEL};
    use crds::{ClusterReference, ComponentKind, DbClusterAutoScaler, DbClusterAutoScalerStatus, NoDataPolicy};
    use kube::ResourceExt;
    use monitor_client::{MockMetricsClient, ResourceKind};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{broadcast, Mutex};

    const SATELLITE: &str = "basic-store-auto";

    struct Harness {
        client: MockClusterClient,
        prometheus: MockMetricsClient,
        worker: Worker,
        autoscaler: DbClusterAutoScaler,
        shutdown: broadcast::Receiver<()>,
        _shutdown_tx: broadcast::Sender<()>,
        start: DateTime<Utc>,
    }

    impl Harness {
        fn new() -> Self {
            let client = MockClusterClient::new();
            client.add_cluster(parent_cluster("basic"));
            let prometheus = MockMetricsClient::new();
            let worker = Worker {
                client: Arc::new(client.clone()),
                metrics_client: Arc::new(prometheus.clone()),
                metrics: Arc::new(Metrics::new().unwrap()),
                settings: WorkerSettings {
                    sync_period: Duration::from_secs(30),
                    action_timeout: Duration::from_millis(20),
                    health_poll_period: Duration::from_millis(5),
                    retry: RetryConfig {
                        initial_delay: Duration::from_millis(1),
                        max_delay: Duration::from_millis(2),
                        ..RetryConfig::default()
                    },
                },
                kind: ComponentKind::Store,
                status: Arc::new(Mutex::new(DbClusterAutoScalerStatus::default())),
            };
            let (shutdown_tx, shutdown) = broadcast::channel(1);
            Self {
                client,
                prometheus,
                worker,
                autoscaler: store_autoscaler("auto"),
                shutdown,
                _shutdown_tx: shutdown_tx,
                start: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            }
        }

        fn cpu(&self, value: Option<f64>) {
            self.prometheus.set_utilization(ComponentKind::Store, ResourceKind::Cpu, value);
        }

        async fn tick(&mut self, seconds: i64) -> Result<Decision, AutoscalerError> {
            let now = self.start + ChronoDuration::seconds(seconds);
            self.worker.tick_at(&self.autoscaler, now, &mut self.shutdown).await
        }

        fn satellite_replicas(&self) -> Option<i32> {
            self.client
                .cluster(NAMESPACE, SATELLITE)
                .and_then(|c| c.spec.store)
                .and_then(|s| s.replicas)
        }

        fn status(&self) -> crds::AutoScalerComponentStatus {
            self.client
                .autoscaler_status(NAMESPACE, "auto")
                .and_then(|s| s.components.get("store").cloned())
                .unwrap_or_default()
        }
    }

    #[tokio::test]
    async fn test_high_utilization_creates_labelled_satellite() {
        let mut h = Harness::new();
        h.cpu(Some(0.9));

        assert_eq!(h.tick(0).await.unwrap(), Decision::Create { replicas: 1 });

        let satellite = h.client.cluster(NAMESPACE, SATELLITE).unwrap();
        let labels = satellite.metadata.labels.unwrap();
        assert_eq!(labels.get(AUTO_INSTANCE_LABEL).map(String::as_str), Some("auto"));
        assert_eq!(labels.get(BASE_CLUSTER_LABEL).map(String::as_str), Some("basic"));
        assert_eq!(satellite.spec.store.unwrap().replicas, Some(1));

        let status = h.status();
        assert_eq!(status.satellite_name.as_deref(), Some(SATELLITE));
        assert!(status.last_scale_time.is_some());
        // Not healthy within the action timeout
        assert!(status.pending_since.is_some());
        assert_eq!(status.last_utilization.get("cpu"), Some(&0.9));
    }

    #[tokio::test]
    async fn test_queries_cover_parent_and_satellite() {
        let mut h = Harness::new();
        h.cpu(Some(0.9));
        h.tick(0).await.unwrap();
        h.tick(1).await.unwrap();

        let queries = h.prometheus.queries();
        assert_eq!(queries[0].clusters, vec!["basic".to_string()]);
        assert_eq!(
            queries.last().unwrap().clusters,
            vec!["basic".to_string(), SATELLITE.to_string()]
        );
    }

    #[tokio::test]
    async fn test_unhealthy_satellite_blocks_scale_out() {
        let mut h = Harness::new();
        h.cpu(Some(0.9));
        h.tick(0).await.unwrap();

        assert_eq!(
            h.tick(120).await.unwrap(),
            Decision::Hold("waiting for satellite to become healthy".to_string())
        );
        assert_eq!(h.satellite_replicas(), Some(1));

        mark_healthy_in(&h.client, SATELLITE, ComponentKind::Store).await;
        assert_eq!(h.tick(120).await.unwrap(), Decision::ScaleOut { from: 1, to: 3 });
        assert_eq!(h.satellite_replicas(), Some(3));
    }

    #[tokio::test]
    async fn test_healthy_satellite_clears_pending() {
        let mut h = Harness::new();
        h.cpu(Some(0.9));
        h.tick(0).await.unwrap();
        mark_healthy_in(&h.client, SATELLITE, ComponentKind::Store).await;

        h.cpu(Some(0.3));
        assert!(matches!(h.tick(10).await.unwrap(), Decision::Hold(_)));
        assert_eq!(h.status().pending_since, None);
        assert_eq!(h.satellite_replicas(), Some(1));
    }

    #[tokio::test]
    async fn test_scale_in_then_decommission() {
        let mut h = Harness::new();
        h.cpu(Some(0.9));
        h.tick(0).await.unwrap();
        mark_healthy_in(&h.client, SATELLITE, ComponentKind::Store).await;
        h.tick(60).await.unwrap();
        mark_healthy_in(&h.client, SATELLITE, ComponentKind::Store).await;
        assert_eq!(h.satellite_replicas(), Some(3));

        h.cpu(Some(0.1));
        assert_eq!(
            h.tick(90).await.unwrap(),
            Decision::Hold("scale-in cooldown".to_string())
        );
        assert_eq!(h.tick(120).await.unwrap(), Decision::ScaleIn { from: 3, to: 1 });
        mark_healthy_in(&h.client, SATELLITE, ComponentKind::Store).await;

        assert_eq!(h.tick(130).await.unwrap(), Decision::Hold("at replica floor".to_string()));
        assert!(matches!(h.tick(200).await.unwrap(), Decision::Hold(_)));
        assert_eq!(h.tick(250).await.unwrap(), Decision::Decommission);

        assert!(h.client.cluster(NAMESPACE, SATELLITE).is_none());
        let status = h.status();
        assert_eq!(status.satellite_name, None);
        assert_eq!(status.floor_since, None);
    }

    #[tokio::test]
    async fn test_no_data_holds_or_idles() {
        let mut h = Harness::new();
        h.cpu(Some(0.9));
        h.tick(0).await.unwrap();
        mark_healthy_in(&h.client, SATELLITE, ComponentKind::Store).await;

        h.prometheus.set_failing(true);
        assert_eq!(
            h.tick(500).await.unwrap(),
            Decision::Hold("no utilization data".to_string())
        );
        assert_eq!(h.tick(1000).await.unwrap(), Decision::Hold("no utilization data".to_string()));

        if let Some(store) = h.autoscaler.spec.store.as_mut() {
            store.no_data_policy = NoDataPolicy::TreatAsIdle;
        }
        assert_eq!(h.tick(1000).await.unwrap(), Decision::Hold("at replica floor".to_string()));
        assert_eq!(h.tick(1120).await.unwrap(), Decision::Decommission);
    }

    #[tokio::test]
    async fn test_missing_target_is_a_configuration_error() {
        let mut h = Harness::new();
        h.autoscaler.spec.cluster.name = "missing".to_string();
        h.cpu(Some(0.9));

        let err = h.tick(0).await.unwrap_err();
        assert!(matches!(err, AutoscalerError::InvalidConfig(_)));
        assert!(h.client.cluster(NAMESPACE, "missing-store-auto").is_none());
        assert_eq!(h.status().error.as_deref(), Some("target cluster db/missing not found"));

        h.autoscaler.spec.cluster.name = "basic".to_string();
        h.cpu(Some(0.3));
        assert!(matches!(h.tick(10).await.unwrap(), Decision::Hold(_)));
        assert_eq!(h.status().error, None);
    }

    #[tokio::test]
    async fn test_missing_resource_profile_is_reported_in_status() {
        let mut h = Harness::new();
        if let Some(store) = h.autoscaler.spec.store.as_mut() {
            store.resources.clear();
        }
        h.cpu(Some(0.9));

        let err = h.tick(0).await.unwrap_err();
        assert!(matches!(err, AutoscalerError::InvalidConfig(_)));
        assert_eq!(h.status().error.as_deref(), Some("no resource profile configured"));
        assert!(h.client.cluster(NAMESPACE, SATELLITE).is_none());

        // Same error again writes nothing
        let writes = h.client.status_write_count();
        h.tick(30).await.unwrap_err();
        assert_eq!(h.client.status_write_count(), writes);
    }

    #[tokio::test]
    async fn test_autoscaler_in_other_namespace_scales_parent_namespace() {
        let mut h = Harness::new();
        h.autoscaler.metadata.namespace = Some("ops".to_string());
        h.autoscaler.spec.cluster = ClusterReference::with_namespace("basic", NAMESPACE);
        h.cpu(Some(0.9));

        assert_eq!(h.tick(0).await.unwrap(), Decision::Create { replicas: 1 });
        let satellite = h.client.cluster(NAMESPACE, SATELLITE).unwrap();
        assert!(h.client.cluster("ops", SATELLITE).is_none());

        h.tick(1).await.unwrap();
        let query = h.prometheus.queries().pop().unwrap();
        assert_eq!(Some(query.namespace), satellite.namespace());
        assert_eq!(query.clusters, vec!["basic".to_string(), SATELLITE.to_string()]);

        let status = h.client.autoscaler_status("ops", "auto").unwrap();
        assert_eq!(status.components["store"].satellite_name.as_deref(), Some(SATELLITE));
        assert!(h.client.autoscaler_status(NAMESPACE, "auto").is_none());
    }

    #[tokio::test]
    async fn test_mid_band_utilization_keeps_satellite_size() {
        let mut h = Harness::new();
        h.cpu(Some(0.9));
        h.tick(0).await.unwrap();
        mark_healthy_in(&h.client, SATELLITE, ComponentKind::Store).await;

        h.cpu(Some(0.35));
        for seconds in (10..=190).step_by(30) {
            assert!(matches!(h.tick(seconds).await.unwrap(), Decision::Hold(_)));
            assert_eq!(h.satellite_replicas(), Some(1));
        }
        assert_eq!(h.status().floor_since, None);
        assert!(h.client.cluster(NAMESPACE, SATELLITE).is_some());
    }

    #[tokio::test]
    async fn test_decisions_are_counted() {
        let mut h = Harness::new();
        h.cpu(Some(0.3));
        h.tick(0).await.unwrap();

        let text = h.worker.metrics.render().unwrap();
        assert!(text.contains("dbops_autoscaler_decisions_total{component=\"store\",decision=\"hold\"} 1"));
    }
}
