//! Reconciliation logic for DbCluster resources.
//!
//! Each reconcile walks every component kind in a fixed order:
//! - `component`: binary, ports, start script and secrets per component kind
//! - `adopt`: claiming pre-existing objects that match our labels
//! - `config_map`, `service`, `statefulset`: member resources
//! - `scale`, `failover`, `stores`: replica planning and membership
//! - `state`: the per-component phase
//!
//! Status is written once at the end, and only when it changed.

pub mod adopt;
pub mod component;
pub mod config_map;
pub mod failover;
pub mod scale;
pub mod service;
pub mod state;
pub mod statefulset;
pub mod stores;
mod sync;

#[cfg(test)]
mod reconciler_test;

use crate::config::Config;
use crate::context::ReconcileContext;
use crate::error::ControllerError;
use chrono::{DateTime, Utc};
use cluster_client::{ownership, ClusterClientTrait, ManagedKind, Ownership};
use crds::labels::component_selector;
use crds::{ClusterCondition, ComponentKind, DbCluster, DbClusterStatus, MemberPhase};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub use sync::PAUSED_REASON;

pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_CONFIGURATION_ERROR: &str = "ConfigurationError";
pub const CONDITION_PAUSED: &str = "Paused";

/// Timing knobs of the reconciler.
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub failover_period: Duration,
    pub resync_period: Duration,
    pub progress_period: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ReconcileSettings {
    fn from(config: &Config) -> Self {
        Self {
            failover_period: config.failover_period,
            resync_period: config.resync_period,
            progress_period: config.progress_period,
        }
    }
}

/// Result of one successful reconcile.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    pub requeue_after: Duration,
    pub status_changed: bool,
    /// Components whose phase changed, with the new phase
    pub transitions: Vec<(ComponentKind, MemberPhase)>,
    /// Components skipped because of a configuration error
    pub configuration_errors: Vec<String>,
}

/// Reconciles DbCluster resources.
pub struct Reconciler {
    client: Arc<dyn ClusterClientTrait>,
    settings: ReconcileSettings,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(client: Arc<dyn ClusterClientTrait>, settings: ReconcileSettings) -> Self {
        Self { client, settings }
    }

    pub async fn reconcile(&self, cluster: &DbCluster) -> Result<ReconcileOutcome, ControllerError> {
        self.reconcile_at(cluster, Utc::now()).await
    }

    /// Reconcile `cluster` as of `now`.
    ///
    /// A configuration error in one component is recorded on that component
    /// and the others still reconcile. Any other error aborts the reconcile
    /// and is retried with backoff.
    pub async fn reconcile_at(
        &self,
        cluster: &DbCluster,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, ControllerError> {
        let ctx = ReconcileContext::new(cluster, now)?;
        let previous = cluster.status.clone().unwrap_or_default();
        let mut status = previous.clone();
        let mut configuration_errors = Vec::new();
        let mut transitions = Vec::new();

        let parent_error = match &ctx.parent {
            Some(parent) => match self.client.get_cluster(&parent.namespace, &parent.name).await? {
                Some(_) => None,
                None => Some(format!("parent cluster {}/{} not found", parent.namespace, parent.name)),
            },
            None => None,
        };

        let failover_period = chrono::Duration::from_std(self.settings.failover_period)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));

        for kind in ComponentKind::ALL {
            let prev = previous.component(kind);
            let Some(spec) = cluster.spec.component(kind) else {
                if prev.is_some() && !cluster.spec.paused {
                    self.remove_component(&ctx, kind).await?;
                    status.components.remove(kind.as_str());
                }
                continue;
            };

            let result = match &parent_error {
                Some(message) => Err(ControllerError::InvalidConfig(message.clone())),
                None => sync::sync_component(self.client.as_ref(), &ctx, kind, spec, prev, failover_period).await,
            };
            match result {
                Ok(component) => {
                    if prev.map(|p| p.phase) != Some(component.phase) {
                        info!(cluster = %ctx.key(), "{} is now {:?}", kind, component.phase);
                        transitions.push((kind, component.phase));
                    }
                    status.components.insert(kind.as_str().to_string(), component);
                }
                Err(e) if e.is_configuration() => {
                    warn!(cluster = %ctx.key(), "Skipping {}: {}", kind, e);
                    let mut component = prev.cloned().unwrap_or_default();
                    component.error = Some(e.to_string());
                    status.components.insert(kind.as_str().to_string(), component);
                    configuration_errors.push(format!("{}: {}", kind, e));
                }
                Err(e) => return Err(e),
            }
        }

        status.observed_generation = cluster.metadata.generation;
        set_conditions(&mut status, cluster, &configuration_errors, now);

        let status_changed = cluster.status.as_ref() != Some(&status);
        if status_changed {
            self.client
                .patch_cluster_status(&ctx.namespace, &ctx.name, &status)
                .await?;
        }

        let progressing = status.components.values().any(|c| {
            c.phase != MemberPhase::Normal
                || c.error.is_some()
                || !c.unhealthy_since.is_empty()
                || c.hold_reason.as_deref().is_some_and(|r| r != PAUSED_REASON)
        });
        let requeue_after = if progressing {
            self.settings.progress_period
        } else {
            self.settings.resync_period
        };

        Ok(ReconcileOutcome {
            requeue_after,
            status_changed,
            transitions,
            configuration_errors,
        })
    }

    /// Delete every owned object of a component no longer declared.
    async fn remove_component(&self, ctx: &ReconcileContext<'_>, kind: ComponentKind) -> Result<(), ControllerError> {
        let selector = component_selector(&ctx.name, kind);
        for managed in [ManagedKind::StatefulSet, ManagedKind::Service, ManagedKind::ConfigMap] {
            for object in self.client.list_objects(&ctx.namespace, managed, &selector).await? {
                if ownership(&object, &ctx.owner.uid) != Ownership::Owned {
                    continue;
                }
                info!(cluster = %ctx.key(), "Removing {} {} of undeclared {}", managed, object.name(), kind);
                self.client
                    .delete_object(&ctx.namespace, managed, object.name())
                    .await?;
            }
        }
        Ok(())
    }
}

fn condition(type_: &str, ok: bool, reason: &str, message: Option<String>) -> ClusterCondition {
    ClusterCondition {
        type_: type_.to_string(),
        status: if ok { "True" } else { "False" }.to_string(),
        reason: Some(reason.to_string()),
        message,
        last_transition_time: None,
    }
}

fn set_conditions(
    status: &mut DbClusterStatus,
    cluster: &DbCluster,
    configuration_errors: &[String],
    now: DateTime<Utc>,
) {
    let config_condition = if configuration_errors.is_empty() {
        condition(CONDITION_CONFIGURATION_ERROR, false, "Valid", None)
    } else {
        condition(
            CONDITION_CONFIGURATION_ERROR,
            true,
            "InvalidComponent",
            Some(configuration_errors.join("; ")),
        )
    };
    status.set_condition(config_condition, now);

    let paused = cluster.spec.paused;
    status.set_condition(
        condition(CONDITION_PAUSED, paused, if paused { "Paused" } else { "Active" }, None),
        now,
    );

    let not_ready: Vec<&str> = status
        .components
        .iter()
        .filter(|(_, c)| c.phase != MemberPhase::Normal || c.error.is_some() || c.ready_replicas < c.replicas)
        .map(|(name, _)| name.as_str())
        .collect();
    let ready = if not_ready.is_empty() {
        condition(CONDITION_READY, true, "AllComponentsReady", None)
    } else {
        condition(
            CONDITION_READY,
            false,
            "ComponentsProgressing",
            Some(format!("not ready: {}", not_ready.join(", "))),
        )
    };
    status.set_condition(ready, now);
}
