//! Owner references and adoption checks
//!
//! Every resource a cluster produces carries a controller owner reference to
//! it, so deleting the cluster cascades. Pre-existing resources at an expected
//! name are adopted only when their labels match the component selector.

use crate::models::ManagedObject;
use crds::labels::matches_selector;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use std::collections::BTreeMap;

/// Who, if anyone, controls an existing resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ownership {
    /// Controlled by the expected owner
    Owned,
    /// No controller reference; a candidate for adoption
    Orphaned,
    /// Controlled by something else; never touched
    Foreign(String),
}

/// Controller owner reference pointing at `owner`.
///
/// Returns `None` when the owner has not been persisted yet (no uid).
pub fn controller_owner_ref<K>(owner: &K) -> Option<OwnerReference>
where
    K: Resource<DynamicType = ()>,
{
    owner.controller_owner_ref(&())
}

pub fn ownership(object: &ManagedObject, owner_uid: &str) -> Ownership {
    match object
        .owner_references()
        .iter()
        .find(|o| o.controller == Some(true))
    {
        Some(o) if o.uid == owner_uid => Ownership::Owned,
        Some(o) => Ownership::Foreign(format!("{}/{}", o.kind, o.name)),
        None => Ownership::Orphaned,
    }
}

/// An orphan may be adopted only when it carries the component's selector labels.
pub fn can_adopt(object: &ManagedObject, selector: &BTreeMap<String, String>) -> bool {
    let has_controller = object.owner_references().iter().any(|o| o.controller == Some(true));
    !has_controller && matches_selector(object.labels(), selector)
}
