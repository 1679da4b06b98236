//! Managed-Resource Adapter
//!
//! Typed access to the Kubernetes objects the DBOps controllers manage:
//! StatefulSets, Services and ConfigMaps produced per component, the pods and
//! secrets they read, and the `DbCluster`/`DbClusterAutoScaler` resources.
//!
//! # Features
//!
//! - **Optimistic concurrency**: replaces carry `resourceVersion`; `retry` re-reads on conflict
//! - **Adoption**: pre-existing resources gain an owner reference without a spec change
//! - **Content revisions**: stable hashes for naming and change detection
//! - **Mocking**: `MockClusterClient` (feature `test-util`) simulates the API server

pub mod client;
pub mod error;
pub mod models;
pub mod ownership;
pub mod retry;
pub mod revision;
#[path = "trait.rs"]
pub mod cluster_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::KubeClusterClient;
pub use cluster_trait::ClusterClientTrait;
pub use error::ClusterClientError;
pub use models::*;
pub use ownership::{can_adopt, controller_owner_ref, ownership, Ownership};
pub use retry::{update_cluster_with_retry, RetryConfig};
pub use revision::content_revision;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockClusterClient;
