//! Content revisions
//!
//! Short stable hashes of desired content. Used to name rolling-update
//! ConfigMaps and to compare pod templates without relying on server state.

use crate::error::ClusterClientError;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Hex characters kept from the digest
const REVISION_LEN: usize = 10;

/// Hash of the JSON serialization of `value`.
///
/// `BTreeMap`-backed content serializes in key order, so equal content
/// always yields the same revision.
pub fn content_revision<T: Serialize>(value: &T) -> Result<String, ClusterClientError> {
    let bytes = serde_json::to_vec(value)?;
    Ok(hash_bytes(&bytes))
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(REVISION_LEN);
    for byte in digest.iter() {
        if out.len() >= REVISION_LEN {
            break;
        }
        let _ = write!(out, "{:02x}", byte);
    }
    out.truncate(REVISION_LEN);
    out
}
