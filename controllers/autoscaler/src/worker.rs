//! Per-component autoscaler worker.
//!
//! One worker runs for each (autoscaler, component) pair and is the only
//! writer of that component's satellite. Each tick samples utilization,
//! decides, applies the decision and records the outcome in the autoscaler
//! status. Configuration errors are recorded there too, until a tick succeeds.
//!
//! Satellites live in the target cluster's namespace, next to the cluster
//! whose metadata service they join.

use crate::error::AutoscalerError;
use crate::evaluator::{classify, decide, Decision, Policy};
use crate::metrics::Metrics;
use crate::satellite::{self, satellite_selector};
use crate::scaler;
use chrono::{DateTime, Utc};
use cluster_client::{ClusterClientTrait, RetryConfig};
use crds::{AutoScalerComponentStatus, ComponentKind, DbCluster, DbClusterAutoScaler, DbClusterAutoScalerStatus};
use kube::ResourceExt;
use monitor_client::{MetricsClientTrait, ResourceKind, UtilizationQuery};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Timing and retry knobs shared by all workers.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub sync_period: Duration,
    pub action_timeout: Duration,
    pub health_poll_period: Duration,
    pub retry: RetryConfig,
}

pub struct Worker {
    pub(crate) client: Arc<dyn ClusterClientTrait>,
    pub(crate) metrics_client: Arc<dyn MetricsClientTrait>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) settings: WorkerSettings,
    pub(crate) kind: ComponentKind,
    /// Status of the whole autoscaler, shared with its other workers
    pub(crate) status: Arc<Mutex<DbClusterAutoScalerStatus>>,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("kind", &self.kind)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

struct Target {
    /// Autoscaler namespace and name
    namespace: String,
    name: String,
    parent: DbCluster,
    /// Namespace of the parent and its satellites
    parent_namespace: String,
    parent_name: String,
}

impl Worker {
    /// Tick every sync period until stopped.
    pub async fn run(
        self,
        spec: watch::Receiver<Arc<DbClusterAutoScaler>>,
        mut stop: broadcast::Receiver<()>,
    ) {
        let mut interval = tokio::time::interval(self.settings.sync_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = stop.recv() => break,
            }
            let autoscaler = spec.borrow().clone();
            let key = format!("{}/{}", autoscaler.namespace().unwrap_or_default(), autoscaler.name_any());
            match self.tick_at(&autoscaler, Utc::now(), &mut stop).await {
                Ok(decision) => debug!("Autoscaler {} {}: {}", key, self.kind, decision),
                Err(AutoscalerError::Cancelled(what)) => {
                    info!("Autoscaler {} {} stopped while {}", key, self.kind, what);
                    break;
                }
                Err(e) => warn!("Autoscaler {} {} tick failed: {}", key, self.kind, e),
            }
        }
        debug!("Autoscaler worker for {} stopped", self.kind);
    }

    /// Run one evaluation as of `now` and apply its decision.
    pub async fn tick_at(
        &self,
        autoscaler: &DbClusterAutoScaler,
        now: DateTime<Utc>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<Decision, AutoscalerError> {
        match self.evaluate(autoscaler, now, shutdown).await {
            Err(AutoscalerError::InvalidConfig(reason)) => {
                let mut entry = self.status_entry().await;
                entry.error = Some(reason.clone());
                let namespace = autoscaler.namespace().unwrap_or_else(|| "default".to_string());
                self.persist(&namespace, &autoscaler.name_any(), entry).await?;
                Err(AutoscalerError::InvalidConfig(reason))
            }
            result => result,
        }
    }

    async fn evaluate(
        &self,
        autoscaler: &DbClusterAutoScaler,
        now: DateTime<Utc>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<Decision, AutoscalerError> {
        let spec = autoscaler
            .spec
            .components()
            .find(|(kind, _)| *kind == self.kind)
            .map(|(_, spec)| spec)
            .ok_or_else(|| AutoscalerError::InvalidConfig(format!("{} is not autoscaled", self.kind)))?;
        let policy = Policy::from_spec(spec).map_err(AutoscalerError::InvalidConfig)?;
        let target = self.target(autoscaler).await?;

        let satellites = self
            .client
            .list_clusters(
                &target.parent_namespace,
                &satellite_selector(&target.name, &target.parent_name, self.kind),
            )
            .await?;
        let current = satellites.into_iter().next();
        let view = current.as_ref().map(|s| satellite::view(s, self.kind));

        let rules = policy.applicable_rules(&spec.rules);
        let mut instances = vec![target.parent_name.clone()];
        instances.extend(current.as_ref().map(|s| s.name_any()));
        let samples = self
            .sample(&target, &rules, instances, spec.metric_duration_seconds())
            .await;
        let signal = classify(&rules, &samples);

        let mut entry = self.status_entry().await;
        entry.error = None;
        entry.last_utilization = samples;
        entry.satellite_name = current.as_ref().map(|s| s.name_any());
        let decision = decide(&policy, &mut entry, view, signal, now);
        entry.last_decision = Some(decision.to_string());

        self.metrics
            .decisions_total
            .with_label_values(&[self.kind.as_str(), decision.label()])
            .inc();
        if decision.is_action() {
            info!(
                "Autoscaler {}/{} {}: {}",
                target.namespace, target.name, self.kind, decision
            );
        }

        let result = self
            .apply(autoscaler, &target, &policy, current.as_ref(), &decision, &mut entry, now)
            .await;
        if decision.is_action() {
            self.metrics
                .observe_action(self.kind.as_str(), decision.label(), result.is_ok());
        }
        let satellite = match result {
            Ok(satellite) => satellite,
            Err(e) => {
                if let AutoscalerError::InvalidConfig(reason) = &e {
                    entry.error = Some(reason.clone());
                }
                self.persist(&target.namespace, &target.name, entry).await?;
                return Err(e);
            }
        };
        self.persist(&target.namespace, &target.name, entry.clone()).await?;

        if let Some(satellite) = satellite {
            self.await_health(&target, &satellite, entry, shutdown).await?;
        }
        Ok(decision)
    }

    async fn target(&self, autoscaler: &DbClusterAutoScaler) -> Result<Target, AutoscalerError> {
        let namespace = autoscaler.namespace().unwrap_or_else(|| "default".to_string());
        let name = autoscaler.name_any();
        let parent_namespace = autoscaler.spec.cluster.resolve_namespace(&namespace).to_string();
        let parent_name = autoscaler.spec.cluster.name.clone();

        let parent = self
            .client
            .get_cluster(&parent_namespace, &parent_name)
            .await?
            .ok_or_else(|| {
                AutoscalerError::InvalidConfig(format!(
                    "target cluster {}/{} not found",
                    parent_namespace, parent_name
                ))
            })?;
        if parent.spec.component(self.kind).is_none() {
            return Err(AutoscalerError::InvalidConfig(format!(
                "target cluster {}/{} has no {} component",
                parent_namespace, parent_name, self.kind
            )));
        }
        Ok(Target {
            namespace,
            name,
            parent,
            parent_namespace,
            parent_name,
        })
    }

    /// Utilization per rule. A failed or empty query counts as no data for that rule.
    async fn sample(
        &self,
        target: &Target,
        rules: &BTreeMap<String, crds::AutoRule>,
        clusters: Vec<String>,
        duration_seconds: i64,
    ) -> BTreeMap<String, f64> {
        let mut samples = BTreeMap::new();
        for name in rules.keys() {
            let resource: ResourceKind = match name.parse() {
                Ok(resource) => resource,
                Err(e) => {
                    warn!("Autoscaler {}/{} rule {}: {}", target.namespace, target.name, name, e);
                    continue;
                }
            };
            let query = UtilizationQuery {
                namespace: target.parent_namespace.clone(),
                clusters: clusters.clone(),
                component: self.kind,
                resource,
                duration_seconds,
            };
            match self.metrics_client.query_utilization(&query).await {
                Ok(Some(value)) => {
                    self.metrics
                        .utilization
                        .with_label_values(&[target.name.as_str(), self.kind.as_str(), name.as_str()])
                        .set(value);
                    samples.insert(name.clone(), value);
                }
                Ok(None) => debug!("No {} data for {}/{} {}", name, target.namespace, target.name, self.kind),
                Err(e) => warn!(
                    "Utilization query for {}/{} {} {} failed: {}",
                    target.namespace, target.name, self.kind, name, e
                ),
            }
        }
        samples
    }

    /// Apply `decision`. Returns the satellite to wait on, if any.
    #[allow(clippy::too_many_arguments, reason = "one call site, all state of the tick")]
    async fn apply(
        &self,
        autoscaler: &DbClusterAutoScaler,
        target: &Target,
        policy: &Policy,
        current: Option<&DbCluster>,
        decision: &Decision,
        entry: &mut AutoScalerComponentStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<DbCluster>, AutoscalerError> {
        let satellite = match (decision, current) {
            (Decision::Create { replicas }, _) => {
                let desired = satellite::build_satellite(autoscaler, &target.parent, self.kind, policy, *replicas)?;
                scaler::create_satellite(self.client.as_ref(), &desired).await?
            }
            (Decision::ScaleOut { to, .. } | Decision::ScaleIn { to, .. }, Some(current)) => {
                scaler::set_replicas(
                    self.client.as_ref(),
                    &target.parent_namespace,
                    &current.name_any(),
                    self.kind,
                    *to,
                    &self.settings.retry,
                )
                .await?
            }
            (Decision::Decommission, Some(current)) => {
                scaler::delete_satellite(self.client.as_ref(), &target.parent_namespace, &current.name_any()).await?;
                entry.satellite_name = None;
                entry.floor_since = None;
                entry.pending_since = None;
                entry.last_scale_time = Some(now);
                return Ok(None);
            }
            _ => return Ok(None),
        };
        entry.satellite_name = Some(satellite.name_any());
        entry.last_scale_time = Some(now);
        entry.pending_since = Some(now);
        Ok(Some(satellite))
    }

    /// Wait for the satellite to become healthy, clearing the pending marker if it does.
    async fn await_health(
        &self,
        target: &Target,
        satellite: &DbCluster,
        mut entry: AutoScalerComponentStatus,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), AutoscalerError> {
        let name = satellite.name_any();
        let healthy = scaler::wait_for_healthy(
            self.client.as_ref(),
            &target.parent_namespace,
            &name,
            self.kind,
            self.settings.action_timeout,
            self.settings.health_poll_period,
            shutdown,
        )
        .await?;
        if healthy {
            entry.pending_since = None;
            self.persist(&target.namespace, &target.name, entry).await?;
        } else {
            warn!(
                "Satellite {}/{} not healthy after {:?}, holding further decisions",
                target.parent_namespace, name, self.settings.action_timeout
            );
        }
        Ok(())
    }

    async fn status_entry(&self) -> AutoScalerComponentStatus {
        self.status
            .lock()
            .await
            .components
            .get(self.kind.as_str())
            .cloned()
            .unwrap_or_default()
    }

    /// Store `entry` and write the status of autoscaler `namespace/name` if it changed.
    async fn persist(
        &self,
        namespace: &str,
        name: &str,
        entry: AutoScalerComponentStatus,
    ) -> Result<(), AutoscalerError> {
        let mut status = self.status.lock().await;
        if status.components.get(self.kind.as_str()) == Some(&entry) {
            return Ok(());
        }
        status.components.insert(self.kind.as_str().to_string(), entry);
        self.client
            .patch_autoscaler_status(namespace, name, &status)
            .await?;
        Ok(())
    }
}
