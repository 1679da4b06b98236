//! Reconciler tests against the mock API server

#[cfg(test)]
mod tests {
    use crate::context::ReconcileContext;
    use crate::reconciler::service::client_service;
    use crate::reconciler::statefulset::{partition_of, replicas_of};
    use crate::reconciler::{
        ReconcileOutcome, CONDITION_CONFIGURATION_ERROR, CONDITION_READY, PAUSED_REASON,
    };
    use crate::test_utils::{basic_cluster, satellite_cluster, test_reconciler, NAMESPACE};
    use chrono::{DateTime, Duration, Utc};
    use cluster_client::{ManagedKind, ManagedObject, MockClusterClient};
    use crds::labels::{adoption_selector, partition_annotation};
    use crds::{
        ComponentKind, DbCluster, MemberPhase, RolloutStrategy, ServiceSpec as ComponentServiceSpec, StoreState,
    };
    use k8s_openapi::api::apps::v1::StatefulSet;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
    use std::collections::BTreeMap;

    async fn reconcile(client: &MockClusterClient, cluster: &mut DbCluster, now: DateTime<Utc>) -> ReconcileOutcome {
        let outcome = test_reconciler(client).reconcile_at(cluster, now).await.unwrap();
        let name = cluster.metadata.name.clone().unwrap();
        cluster.status = client.cluster(NAMESPACE, &name).and_then(|c| c.status);
        outcome
    }

    fn stateful_set(client: &MockClusterClient, name: &str) -> StatefulSet {
        client
            .object(NAMESPACE, ManagedKind::StatefulSet, name)
            .and_then(|o| o.as_stateful_set().cloned())
            .unwrap()
    }

    fn component(cluster: &DbCluster, kind: ComponentKind) -> crds::ComponentStatus {
        cluster.component_status(kind).cloned().unwrap()
    }

    fn condition_status(cluster: &DbCluster, type_: &str) -> String {
        cluster
            .status
            .as_ref()
            .and_then(|s| s.condition(type_))
            .map(|c| c.status.clone())
            .unwrap()
    }

    #[tokio::test]
    async fn test_first_reconcile_creates_members_and_second_writes_nothing() {
        let client = MockClusterClient::new();
        let mut cluster = client.add_cluster(basic_cluster("basic"));
        let now = Utc::now();

        reconcile(&client, &mut cluster, now).await;

        assert_eq!(client.objects(NAMESPACE, ManagedKind::StatefulSet).len(), 3);
        assert_eq!(replicas_of(&stateful_set(&client, "basic-store")), Some(3));
        for kind in [ComponentKind::Meta, ComponentKind::Store, ComponentKind::Gateway] {
            assert_eq!(component(&cluster, kind).phase, MemberPhase::Normal);
        }
        assert_eq!(component(&cluster, ComponentKind::Store).stores.len(), 3);
        assert_eq!(condition_status(&cluster, CONDITION_READY), "True");
        assert_eq!(condition_status(&cluster, CONDITION_CONFIGURATION_ERROR), "False");

        let writes = client.write_count();
        let status_writes = client.status_write_count();
        let outcome = reconcile(&client, &mut cluster, now + Duration::seconds(30)).await;

        assert!(!outcome.status_changed);
        assert_eq!(client.write_count(), writes);
        assert_eq!(client.status_write_count(), status_writes);
    }

    #[tokio::test]
    async fn test_adoption_keeps_service_allocations() {
        let client = MockClusterClient::new();
        let mut cluster = basic_cluster("basic");
        cluster.spec.gateway.as_mut().unwrap().service = Some(ComponentServiceSpec {
            service_type: Some("NodePort".to_string()),
            ..Default::default()
        });
        let mut cluster = client.add_cluster(cluster);

        let ctx = ReconcileContext::new(&cluster, Utc::now()).unwrap();
        let mut orphan = client_service(&ctx, ComponentKind::Gateway, cluster.spec.gateway.as_ref().unwrap().service.as_ref());
        orphan.metadata.owner_references = None;
        orphan.metadata.labels = Some(adoption_selector("basic", ComponentKind::Gateway));
        let orphan = client.add_object(NAMESPACE, orphan.into());
        let before = orphan.as_service().unwrap().spec.clone().unwrap();

        reconcile(&client, &mut cluster, Utc::now()).await;

        let adopted = client.object(NAMESPACE, ManagedKind::Service, "basic-gateway").unwrap();
        assert_eq!(adopted.owner_references()[0].uid, "uid-basic");
        let after = adopted.as_service().unwrap().spec.clone().unwrap();
        assert_eq!(after.cluster_ip, before.cluster_ip);
        let node_ports = |spec: &k8s_openapi::api::core::v1::ServiceSpec| {
            spec.ports.iter().flatten().map(|p| p.node_port).collect::<Vec<_>>()
        };
        assert_eq!(node_ports(&after), node_ports(&before));
    }

    #[tokio::test]
    async fn test_orphaned_stateful_set_is_adopted_without_rolling() {
        let client = MockClusterClient::new();
        let mut cluster = client.add_cluster(basic_cluster("basic"));
        let now = Utc::now();
        reconcile(&client, &mut cluster, now).await;

        let mut orphan = stateful_set(&client, "basic-store");
        orphan.metadata.owner_references = None;
        client.add_object(NAMESPACE, orphan.into());
        let before = stateful_set(&client, "basic-store");

        let outcome = reconcile(&client, &mut cluster, now + Duration::seconds(30)).await;

        assert!(outcome.configuration_errors.is_empty());
        let adopted = stateful_set(&client, "basic-store");
        let owners: Vec<_> = adopted
            .metadata
            .owner_references
            .iter()
            .flatten()
            .map(|o| o.uid.as_str())
            .collect();
        assert_eq!(owners, vec!["uid-basic"]);
        assert_eq!(adopted.spec, before.spec);
        assert_eq!(partition_of(&adopted), Some(0));
        let workload = adopted.status.clone().unwrap();
        assert_eq!(workload.current_revision, workload.update_revision);
        assert_eq!(component(&cluster, ComponentKind::Store).phase, MemberPhase::Normal);
    }

    #[tokio::test]
    async fn test_foreign_owned_workload_is_a_configuration_error() {
        let client = MockClusterClient::new();
        let mut cluster = client.add_cluster(basic_cluster("basic"));
        client.add_object(
            NAMESPACE,
            ManagedObject::StatefulSet(StatefulSet {
                metadata: ObjectMeta {
                    name: Some("basic-store".to_string()),
                    owner_references: Some(vec![OwnerReference {
                        api_version: "apps/v1".to_string(),
                        kind: "Deployment".to_string(),
                        name: "someone-else".to_string(),
                        uid: "uid-other".to_string(),
                        controller: Some(true),
                        ..Default::default()
                    }]),
                    ..Default::default()
                },
                ..Default::default()
            }),
        );

        let outcome = reconcile(&client, &mut cluster, Utc::now()).await;

        assert_eq!(outcome.configuration_errors.len(), 1);
        let store = component(&cluster, ComponentKind::Store);
        assert!(store.error.unwrap().contains("controlled by Deployment/someone-else"));
        assert_eq!(condition_status(&cluster, CONDITION_CONFIGURATION_ERROR), "True");
        assert!(client.object(NAMESPACE, ManagedKind::StatefulSet, "basic-gateway").is_some());
    }

    #[tokio::test]
    async fn test_in_place_config_change_keeps_revision() {
        let client = MockClusterClient::new();
        let mut cluster = basic_cluster("basic");
        cluster.spec.gateway.as_mut().unwrap().rollout_strategy = RolloutStrategy::InPlace;
        let mut cluster = client.add_cluster(cluster);
        let now = Utc::now();

        reconcile(&client, &mut cluster, now).await;
        let revision = component(&cluster, ComponentKind::Gateway).update_revision;

        cluster
            .spec
            .gateway
            .as_mut()
            .unwrap()
            .config
            .insert("log.level".to_string(), "debug".to_string());
        reconcile(&client, &mut cluster, now + Duration::seconds(10)).await;

        let cm = client.object(NAMESPACE, ManagedKind::ConfigMap, "basic-gateway").unwrap();
        let data = cm.as_config_map().unwrap().data.clone().unwrap();
        assert!(data["config.toml"].contains("level = \"debug\""));
        let gateway = component(&cluster, ComponentKind::Gateway);
        assert_eq!(gateway.update_revision, revision);
        assert_eq!(gateway.phase, MemberPhase::Normal);
    }

    #[tokio::test]
    async fn test_config_change_rolls_one_ordinal_per_reconcile() {
        let client = MockClusterClient::new();
        let mut cluster = client.add_cluster(basic_cluster("basic"));
        let mut now = Utc::now();
        reconcile(&client, &mut cluster, now).await;
        let old_config_maps = client.objects(NAMESPACE, ManagedKind::ConfigMap).len();

        cluster
            .spec
            .store
            .as_mut()
            .unwrap()
            .config
            .insert("raftstore.capacity".to_string(), "100GiB".to_string());

        let mut partitions = Vec::new();
        for _ in 0..4 {
            now += Duration::seconds(10);
            reconcile(&client, &mut cluster, now).await;
            partitions.push(partition_of(&stateful_set(&client, "basic-store")).unwrap());
        }

        assert_eq!(partitions, vec![3, 2, 1, 0]);
        let store = component(&cluster, ComponentKind::Store);
        assert_eq!(store.current_revision, store.update_revision);
        assert_eq!(store.phase, MemberPhase::Normal);
        assert_eq!(client.objects(NAMESPACE, ManagedKind::ConfigMap).len(), old_config_maps);
    }

    #[tokio::test]
    async fn test_host_network_switch_rolls_and_switches_back() {
        let client = MockClusterClient::new();
        let mut cluster = client.add_cluster(basic_cluster("basic"));
        let mut now = Utc::now();
        reconcile(&client, &mut cluster, now).await;

        for host_network in [true, false] {
            cluster.spec.gateway.as_mut().unwrap().host_network = Some(host_network);
            let mut partitions = Vec::new();
            for _ in 0..3 {
                now += Duration::seconds(10);
                reconcile(&client, &mut cluster, now).await;
                partitions.push(partition_of(&stateful_set(&client, "basic-gateway")).unwrap());
            }
            assert_eq!(partitions, vec![2, 1, 0]);

            let sts = stateful_set(&client, "basic-gateway");
            let pod_spec = sts.spec.unwrap().template.spec.unwrap();
            assert_eq!(pod_spec.host_network.unwrap_or(false), host_network);
            let gateway = component(&cluster, ComponentKind::Gateway);
            assert_eq!(gateway.current_revision, gateway.update_revision);
        }
    }

    #[tokio::test]
    async fn test_pinned_partition_holds_rollout() {
        let client = MockClusterClient::new();
        let mut cluster = client.add_cluster(basic_cluster("basic"));
        let mut now = Utc::now();
        reconcile(&client, &mut cluster, now).await;

        cluster.metadata.annotations = Some(BTreeMap::from([(
            partition_annotation(ComponentKind::Store),
            "1".to_string(),
        )]));
        cluster.spec.store.as_mut().unwrap().version = Some("v8.5.1".to_string());

        let mut partitions = Vec::new();
        for _ in 0..5 {
            now += Duration::seconds(10);
            reconcile(&client, &mut cluster, now).await;
            partitions.push(partition_of(&stateful_set(&client, "basic-store")).unwrap());
        }
        assert_eq!(partitions, vec![1, 1, 1, 1, 1]);
        let store = component(&cluster, ComponentKind::Store);
        assert_eq!(store.phase, MemberPhase::Upgrading);
        assert_eq!(store.hold_reason.as_deref(), Some("partition pinned at 1"));

        cluster.metadata.annotations = None;
        reconcile(&client, &mut cluster, now + Duration::seconds(10)).await;
        assert_eq!(partition_of(&stateful_set(&client, "basic-store")), Some(0));
    }

    #[tokio::test]
    async fn test_unready_pod_blocks_rollout() {
        let client = MockClusterClient::new();
        let mut cluster = client.add_cluster(basic_cluster("basic"));
        let mut now = Utc::now();
        reconcile(&client, &mut cluster, now).await;

        cluster.spec.gateway.as_mut().unwrap().version = Some("v8.5.1".to_string());
        now += Duration::seconds(10);
        reconcile(&client, &mut cluster, now).await;
        now += Duration::seconds(10);
        reconcile(&client, &mut cluster, now).await;
        assert_eq!(partition_of(&stateful_set(&client, "basic-gateway")), Some(1));

        client.set_pod_ready(NAMESPACE, "basic-gateway-1", false);
        for _ in 0..3 {
            now += Duration::seconds(10);
            reconcile(&client, &mut cluster, now).await;
        }
        assert_eq!(partition_of(&stateful_set(&client, "basic-gateway")), Some(1));
        let gateway = component(&cluster, ComponentKind::Gateway);
        assert_eq!(gateway.hold_reason.as_deref(), Some("waiting for basic-gateway-1 to become ready"));
    }

    #[tokio::test]
    async fn test_pause_skips_member_writes() {
        let client = MockClusterClient::new();
        let mut cluster = client.add_cluster(basic_cluster("basic"));
        let start = Utc::now();
        reconcile(&client, &mut cluster, start).await;

        cluster.spec.paused = true;
        cluster.spec.gateway.as_mut().unwrap().replicas = Some(4);
        let writes = client.write_count();
        for minute in 1..=5 {
            reconcile(&client, &mut cluster, start + Duration::minutes(minute)).await;
        }

        assert_eq!(client.write_count(), writes);
        assert_eq!(replicas_of(&stateful_set(&client, "basic-gateway")), Some(2));
        let gateway = component(&cluster, ComponentKind::Gateway);
        assert_eq!(gateway.hold_reason.as_deref(), Some(PAUSED_REASON));
        assert_eq!(gateway.phase, MemberPhase::Normal);

        cluster.spec.paused = false;
        reconcile(&client, &mut cluster, start + Duration::minutes(6)).await;
        assert_eq!(replicas_of(&stateful_set(&client, "basic-gateway")), Some(4));
    }

    #[tokio::test]
    async fn test_failover_adds_spare_and_scale_to_zero_clears_it() {
        let client = MockClusterClient::new();
        let mut cluster = client.add_cluster(basic_cluster("basic"));
        let start = Utc::now();
        reconcile(&client, &mut cluster, start).await;

        client.set_pod_ready(NAMESPACE, "basic-gateway-1", false);
        let outcome = reconcile(&client, &mut cluster, start + Duration::seconds(10)).await;
        assert!(component(&cluster, ComponentKind::Gateway).failure_members.is_empty());
        assert_eq!(outcome.requeue_after, std::time::Duration::from_secs(5));

        reconcile(&client, &mut cluster, start + Duration::minutes(2)).await;
        let gateway = component(&cluster, ComponentKind::Gateway);
        assert!(gateway.failure_members.contains_key("basic-gateway-1"));
        assert_eq!(gateway.phase, MemberPhase::Failover);
        assert_eq!(replicas_of(&stateful_set(&client, "basic-gateway")), Some(3));

        cluster.spec.gateway.as_mut().unwrap().replicas = Some(0);
        reconcile(&client, &mut cluster, start + Duration::minutes(3)).await;
        let gateway = component(&cluster, ComponentKind::Gateway);
        assert!(gateway.failure_members.is_empty());
        assert!(gateway.unhealthy_since.is_empty());
        assert_eq!(replicas_of(&stateful_set(&client, "basic-gateway")), Some(0));
    }

    #[tokio::test]
    async fn test_store_scale_in_stops_at_replication_factor() {
        let client = MockClusterClient::new();
        let mut cluster = client.add_cluster(basic_cluster("basic"));
        reconcile(&client, &mut cluster, Utc::now()).await;

        cluster.spec.store.as_mut().unwrap().replicas = Some(1);
        reconcile(&client, &mut cluster, Utc::now()).await;

        assert_eq!(replicas_of(&stateful_set(&client, "basic-store")), Some(3));
        let store = component(&cluster, ComponentKind::Store);
        assert_eq!(
            store.hold_reason.as_deref(),
            Some("store scale-in limited to replication factor 3")
        );
    }

    #[tokio::test]
    async fn test_store_is_taken_offline_before_removal() {
        let client = MockClusterClient::new();
        let mut cluster = basic_cluster("basic");
        cluster.spec.store.as_mut().unwrap().replicas = Some(4);
        let mut cluster = client.add_cluster(cluster);
        let now = Utc::now();
        reconcile(&client, &mut cluster, now).await;

        cluster.spec.store.as_mut().unwrap().replicas = Some(3);
        reconcile(&client, &mut cluster, now + Duration::seconds(10)).await;
        assert_eq!(replicas_of(&stateful_set(&client, "basic-store")), Some(4));
        let store = component(&cluster, ComponentKind::Store);
        assert_eq!(store.stores["basic-store-3"].state, StoreState::Offline);
        assert_eq!(store.phase, MemberPhase::Scaling);

        reconcile(&client, &mut cluster, now + Duration::seconds(20)).await;
        assert_eq!(replicas_of(&stateful_set(&client, "basic-store")), Some(3));
        let store = component(&cluster, ComponentKind::Store);
        assert_eq!(store.stores["basic-store-3"].state, StoreState::Tombstone);
        assert_eq!(store.phase, MemberPhase::Normal);
    }

    #[tokio::test]
    async fn test_missing_parent_is_reported_on_every_component() {
        let client = MockClusterClient::new();
        let mut satellite = client.add_cluster(satellite_cluster("burst", "basic"));

        let outcome = reconcile(&client, &mut satellite, Utc::now()).await;

        assert!(client.objects(NAMESPACE, ManagedKind::StatefulSet).is_empty());
        let store = component(&satellite, ComponentKind::Store);
        assert_eq!(store.error.as_deref(), Some("Invalid configuration: parent cluster db/basic not found"));
        assert_eq!(outcome.configuration_errors.len(), 1);
    }

    #[tokio::test]
    async fn test_satellite_joins_parent_without_own_meta() {
        let client = MockClusterClient::new();
        client.add_cluster(basic_cluster("basic"));
        let mut satellite = satellite_cluster("burst", "basic");
        satellite.spec.meta = Some(Default::default());
        let mut satellite = client.add_cluster(satellite);

        reconcile(&client, &mut satellite, Utc::now()).await;

        assert!(component(&satellite, ComponentKind::Meta).error.is_some());
        assert!(client.object(NAMESPACE, ManagedKind::StatefulSet, "burst-meta").is_none());
        assert_eq!(replicas_of(&stateful_set(&client, "burst-store")), Some(1));
    }

    #[tokio::test]
    async fn test_missing_tls_secret_waits() {
        let client = MockClusterClient::new();
        let mut cluster = basic_cluster("basic");
        cluster.spec.enable_tls = true;
        let mut cluster = client.add_cluster(cluster);

        let outcome = reconcile(&client, &mut cluster, Utc::now()).await;
        assert_eq!(outcome.configuration_errors.len(), 3);
        assert!(component(&cluster, ComponentKind::Meta)
            .error
            .unwrap()
            .contains("waiting for TLS secret basic-meta-cluster-secret"));

        client.add_secret(NAMESPACE, "basic-meta-cluster-secret");
        reconcile(&client, &mut cluster, Utc::now()).await;
        assert!(component(&cluster, ComponentKind::Meta).error.is_none());
        assert!(client.object(NAMESPACE, ManagedKind::StatefulSet, "basic-meta").is_some());
    }

    #[tokio::test]
    async fn test_removed_component_is_cleaned_up() {
        let client = MockClusterClient::new();
        let mut cluster = client.add_cluster(basic_cluster("basic"));
        reconcile(&client, &mut cluster, Utc::now()).await;

        cluster.spec.gateway = None;
        reconcile(&client, &mut cluster, Utc::now()).await;

        assert!(client.object(NAMESPACE, ManagedKind::StatefulSet, "basic-gateway").is_none());
        assert!(client.object(NAMESPACE, ManagedKind::Service, "basic-gateway").is_none());
        assert!(cluster.component_status(ComponentKind::Gateway).is_none());
    }
}
