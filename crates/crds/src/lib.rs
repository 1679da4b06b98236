//! DBOps CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the DBOps controllers:
//! - `DbCluster`: desired and observed state of a database cluster
//! - `DbClusterAutoScaler`: metrics-driven horizontal scaling of a cluster

pub mod autoscaler;
pub mod component;
pub mod db_cluster;
pub mod labels;
pub mod quantity;
pub mod references;

pub use autoscaler::*;
pub use component::*;
pub use db_cluster::*;
pub use references::*;
