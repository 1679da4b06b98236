//! Component ConfigMaps
//!
//! Each component gets a `config.toml` rendered from its flat config map and
//! a `start.sh` entry script. `InPlace` components keep a stable name, so a
//! config change never touches the pod template. `RollingUpdate` components
//! use `<cluster>-<component>-<hash>`, so a config change is a template change.

use crate::context::ReconcileContext;
use crate::error::ControllerError;
use crate::reconciler::adopt::get_claimed;
use crate::reconciler::component::ComponentReconciler;
use cluster_client::{content_revision, ownership, ClusterClientTrait, ManagedKind, ManagedObject, Ownership};
use crds::labels::component_selector;
use crds::{ComponentKind, ComponentSpec, RolloutStrategy};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use toml::{Table, Value};
use tracing::{debug, info};

pub const CONFIG_FILE_KEY: &str = "config.toml";
pub const START_SCRIPT_KEY: &str = "start.sh";

/// Parse a flat config value into the most specific TOML scalar.
fn parse_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if let Ok(int) = trimmed.parse::<i64>() {
        return Value::Integer(int);
    }
    if let Ok(float) = trimmed.parse::<f64>() {
        if float.is_finite() {
            return Value::Float(float);
        }
    }
    match trimmed {
        "true" => Value::Boolean(true),
        "false" => Value::Boolean(false),
        _ => Value::String(raw.to_string()),
    }
}

/// Render dotted keys (`raftstore.capacity`) as nested TOML tables.
pub fn render_config_toml(config: &BTreeMap<String, String>) -> Result<String, ControllerError> {
    let mut root = Table::new();
    for (key, raw) in config {
        let mut parts: Vec<&str> = key.split('.').collect();
        let leaf = parts.pop().unwrap_or_default();
        if leaf.is_empty() || parts.iter().any(|p| p.is_empty()) {
            return Err(ControllerError::Render(format!("invalid config key '{}'", key)));
        }
        let mut table = &mut root;
        for part in parts {
            table = table
                .entry(part)
                .or_insert(Value::Table(Table::new()))
                .as_table_mut()
                .ok_or_else(|| {
                    ControllerError::Render(format!("config key '{}' conflicts with a value at '{}'", key, part))
                })?;
        }
        if table.get(leaf).is_some_and(Value::is_table) {
            return Err(ControllerError::Render(format!("config key '{}' conflicts with a table", key)));
        }
        table.insert(leaf.to_string(), parse_value(raw));
    }
    Ok(toml::to_string(&root)?)
}

/// Rendered ConfigMap content and its revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredConfig {
    pub data: BTreeMap<String, String>,
    pub revision: String,
}

pub fn desired_config(
    ctx: &ReconcileContext<'_>,
    kind: ComponentKind,
    spec: &ComponentSpec,
) -> Result<DesiredConfig, ControllerError> {
    let data = BTreeMap::from([
        (CONFIG_FILE_KEY.to_string(), render_config_toml(&spec.config)?),
        (START_SCRIPT_KEY.to_string(), kind.start_script(ctx, spec)),
    ]);
    let revision = content_revision(&data)?;
    Ok(DesiredConfig { data, revision })
}

fn build_config_map(ctx: &ReconcileContext<'_>, kind: ComponentKind, name: &str, data: &BTreeMap<String, String>) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(ctx.namespace.clone()),
            labels: Some(component_selector(&ctx.name, kind)),
            owner_references: Some(vec![ctx.owner.clone()]),
            ..Default::default()
        },
        data: Some(data.clone()),
        ..Default::default()
    }
}

/// Create or update the component ConfigMap and return the name pods should mount.
///
/// A rolling-update component keeps mounting `referenced` (the ConfigMap the
/// current template uses) while its content still matches, so adopting an
/// existing deployment does not roll it.
pub async fn sync_config_map(
    client: &dyn ClusterClientTrait,
    ctx: &ReconcileContext<'_>,
    kind: ComponentKind,
    spec: &ComponentSpec,
    referenced: Option<&str>,
) -> Result<String, ControllerError> {
    let desired = desired_config(ctx, kind, spec)?;
    let stable = kind.resource_name(&ctx.name);

    let name = match spec.rollout_strategy {
        RolloutStrategy::InPlace => stable,
        RolloutStrategy::RollingUpdate => {
            let hashed = format!("{}-{}", stable, desired.revision);
            match referenced.filter(|r| *r != hashed) {
                Some(current) => {
                    let existing = get_claimed(client, ctx, kind, ManagedKind::ConfigMap, current).await?;
                    let unchanged = existing
                        .as_ref()
                        .and_then(ManagedObject::as_config_map)
                        .is_some_and(|cm| cm.data.as_ref() == Some(&desired.data));
                    if unchanged { current.to_string() } else { hashed }
                }
                None => hashed,
            }
        }
    };

    match get_claimed(client, ctx, kind, ManagedKind::ConfigMap, &name).await? {
        None => {
            info!(cluster = %ctx.key(), "Creating ConfigMap {}", name);
            let cm = build_config_map(ctx, kind, &name, &desired.data);
            client.create_object(&ctx.namespace, &cm.into()).await?;
        }
        Some(ManagedObject::ConfigMap(existing)) => {
            let mut next = existing.clone();
            next.data = Some(desired.data.clone());
            if next != existing {
                info!(cluster = %ctx.key(), "Updating ConfigMap {}", name);
                client.replace_object(&ctx.namespace, &next.into()).await?;
            } else {
                debug!("ConfigMap {} up to date", name);
            }
        }
        Some(other) => {
            return Err(ControllerError::Reconciliation(format!(
                "expected ConfigMap {}, found {}",
                name,
                other.kind()
            )));
        }
    }
    Ok(name)
}

/// Delete owned ConfigMaps of a component other than `keep`.
pub async fn collect_garbage(
    client: &dyn ClusterClientTrait,
    ctx: &ReconcileContext<'_>,
    kind: ComponentKind,
    keep: &str,
) -> Result<usize, ControllerError> {
    let selector = component_selector(&ctx.name, kind);
    let mut deleted = 0;
    for object in client.list_objects(&ctx.namespace, ManagedKind::ConfigMap, &selector).await? {
        if object.name() == keep || ownership(&object, &ctx.owner.uid) != Ownership::Owned {
            continue;
        }
        info!(cluster = %ctx.key(), "Deleting stale ConfigMap {}", object.name());
        client
            .delete_object(&ctx.namespace, ManagedKind::ConfigMap, object.name())
            .await?;
        deleted += 1;
    }
    Ok(deleted)
}
