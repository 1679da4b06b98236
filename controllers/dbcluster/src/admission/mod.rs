//! Admission gate for DbCluster objects.
//!
//! `admit` combines defaulting and validation and is what both webhook
//! endpoints call. It never touches the cluster, so it is safe to run
//! concurrently for any number of requests.

pub mod defaulting;
pub mod validation;
pub mod webhook;

use crds::DbCluster;
use kube::core::admission::Operation;
use thiserror::Error;

/// A request the gate refuses, with the reason shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct Rejection(pub String);

/// Validate `object` and compute the defaulting patch, if any.
///
/// Validation sees the object as submitted so a cleared field is rejected
/// rather than refilled.
pub fn admit(
    operation: &Operation,
    object: Option<&DbCluster>,
    old_object: Option<&DbCluster>,
) -> Result<Option<json_patch::Patch>, Rejection> {
    let object = match (operation, object) {
        (Operation::Create | Operation::Update, Some(object)) => object,
        (Operation::Create | Operation::Update, None) => {
            return Err(Rejection("request carries no DbCluster object".to_string()));
        }
        (Operation::Delete | Operation::Connect, _) => return Ok(None),
    };

    validation::validate(operation, object, old_object)?;

    let mut defaulted = object.clone();
    if !defaulting::apply_defaults(&mut defaulted, old_object) {
        return Ok(None);
    }
    let before = serde_json::to_value(object).map_err(|e| Rejection(format!("cannot serialize object: {}", e)))?;
    let after = serde_json::to_value(&defaulted).map_err(|e| Rejection(format!("cannot serialize object: {}", e)))?;
    Ok(Some(json_patch::diff(&before, &after)))
}
