//! Worker registry.
//!
//! Tracks one entry per `DbClusterAutoScaler` and one worker task per
//! autoscaled component. Spec updates reach running workers through a watch
//! channel; workers are started, stopped or restarted when the set of
//! components or the metrics endpoint changes.

use crate::error::AutoscalerError;
use crate::metrics::Metrics;
use crate::worker::{Worker, WorkerSettings};
use cluster_client::ClusterClientTrait;
use crds::{ComponentKind, DbClusterAutoScaler, DbClusterAutoScalerStatus};
use kube::ResourceExt;
use monitor_client::{MetricsClientTrait, MetricsError};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Builds a metrics client for a Prometheus URL.
pub type MetricsClientFactory =
    Arc<dyn Fn(&str) -> Result<Arc<dyn MetricsClientTrait>, MetricsError> + Send + Sync>;

pub fn autoscaler_key(autoscaler: &DbClusterAutoScaler) -> String {
    format!(
        "{}/{}",
        autoscaler.namespace().unwrap_or_else(|| "default".to_string()),
        autoscaler.name_any()
    )
}

#[derive(Debug)]
struct WorkerHandle {
    stop: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    fn signal(&self) {
        // No receiver means the worker already exited
        let _res = self.stop.send(());
    }
}

struct Entry {
    spec: watch::Sender<Arc<DbClusterAutoScaler>>,
    metrics_url: String,
    status: Arc<Mutex<DbClusterAutoScalerStatus>>,
    workers: BTreeMap<ComponentKind, WorkerHandle>,
}

impl Entry {
    fn stop_workers(&mut self) -> Vec<JoinHandle<()>> {
        let workers = std::mem::take(&mut self.workers);
        workers
            .into_values()
            .map(|handle| {
                handle.signal();
                handle.task
            })
            .collect()
    }
}

pub struct Registry {
    client: Arc<dyn ClusterClientTrait>,
    metrics: Arc<Metrics>,
    settings: WorkerSettings,
    default_metrics_url: String,
    metrics_factory: MetricsClientFactory,
    entries: HashMap<String, Entry>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("default_metrics_url", &self.default_metrics_url)
            .field("autoscalers", &self.entries.keys().collect::<Vec<_>>())
            .field("workers", &self.worker_count())
            .finish_non_exhaustive()
    }
}

impl Registry {
    pub fn new(
        client: Arc<dyn ClusterClientTrait>,
        metrics: Arc<Metrics>,
        settings: WorkerSettings,
        default_metrics_url: String,
        metrics_factory: MetricsClientFactory,
    ) -> Self {
        Self {
            client,
            metrics,
            settings,
            default_metrics_url,
            metrics_factory,
            entries: HashMap::new(),
        }
    }

    /// Start or update the workers of an autoscaler.
    pub fn apply(&mut self, autoscaler: DbClusterAutoScaler) -> Result<(), AutoscalerError> {
        let key = autoscaler_key(&autoscaler);
        let metrics_url = autoscaler
            .spec
            .metrics_url
            .clone()
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| self.default_metrics_url.clone());
        let wanted: Vec<ComponentKind> = autoscaler.spec.components().map(|(kind, _)| kind).collect();
        let autoscaler = Arc::new(autoscaler);

        let entry = match self.entries.remove(&key) {
            Some(mut entry) => {
                // Workers read the latest spec on their next tick
                entry.spec.send_replace(Arc::clone(&autoscaler));
                if entry.metrics_url != metrics_url {
                    info!("Autoscaler {} metrics endpoint changed to {}, restarting workers", key, metrics_url);
                    drop(entry.stop_workers());
                    entry.metrics_url = metrics_url;
                }
                entry
            }
            None => {
                info!("Tracking autoscaler {}", key);
                let status = autoscaler.status.clone().unwrap_or_default();
                Entry {
                    spec: watch::Sender::new(Arc::clone(&autoscaler)),
                    metrics_url,
                    status: Arc::new(Mutex::new(status)),
                    workers: BTreeMap::new(),
                }
            }
        };
        let entry = self.entries.entry(key.clone()).or_insert(entry);

        let removed: Vec<ComponentKind> = entry
            .workers
            .keys()
            .filter(|kind| !wanted.contains(kind))
            .copied()
            .collect();
        for kind in removed {
            if let Some(handle) = entry.workers.remove(&kind) {
                info!("Autoscaler {} no longer scales {}, stopping worker", key, kind);
                handle.signal();
            }
        }

        let missing: Vec<ComponentKind> = wanted
            .into_iter()
            .filter(|kind| !entry.workers.contains_key(kind))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        let metrics_client = (self.metrics_factory)(&entry.metrics_url)?;
        for kind in missing {
            let worker = Worker {
                client: Arc::clone(&self.client),
                metrics_client: Arc::clone(&metrics_client),
                metrics: Arc::clone(&self.metrics),
                settings: self.settings.clone(),
                kind,
                status: Arc::clone(&entry.status),
            };
            let (stop, stop_rx) = broadcast::channel(1);
            let task = tokio::spawn(worker.run(entry.spec.subscribe(), stop_rx));
            debug!("Started {} worker for autoscaler {}", kind, key);
            entry.workers.insert(kind, WorkerHandle { stop, task });
        }
        Ok(())
    }

    /// Stop the workers of a deleted autoscaler.
    pub fn remove(&mut self, key: &str) {
        if let Some(mut entry) = self.entries.remove(key) {
            info!("Autoscaler {} removed, stopping {} worker(s)", key, entry.workers.len());
            drop(entry.stop_workers());
        }
    }

    /// Remove every autoscaler not in `seen`, after a watch re-list.
    pub fn retain(&mut self, seen: &HashSet<String>) {
        let stale: Vec<String> = self
            .entries
            .keys()
            .filter(|key| !seen.contains(*key))
            .cloned()
            .collect();
        for key in stale {
            self.remove(&key);
        }
    }

    /// Stop every worker and wait for it to exit.
    pub async fn stop_all(&mut self) {
        let tasks: Vec<JoinHandle<()>> = self
            .entries
            .drain()
            .flat_map(|(_, mut entry)| entry.stop_workers())
            .collect();
        info!("Stopping {} autoscaler worker(s)", tasks.len());
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Autoscaler worker panicked: {}", e);
            }
        }
    }

    pub fn worker_count(&self) -> usize {
        self.entries.values().map(|entry| entry.workers.len()).sum()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}
