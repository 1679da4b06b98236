//! Prints the CRD manifests as a multi-document YAML stream.
//!
//! `cargo run -p crds --bin crdgen > config/crd/dbops.yaml`

use crds::{DbCluster, DbClusterAutoScaler};
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    let crds = [DbCluster::crd(), DbClusterAutoScaler::crd()];
    for crd in &crds {
        println!("---");
        print!("{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
