//! # CRD Generator
//!
//! Prints the CustomResourceDefinitions served by the controller as one
//! multi-document YAML stream.
//!
//! ## Usage
//!
//! ```bash
//! # Generate CRD YAML
//! cargo run --bin crdgen > config/crd/access.yaml
//!
//! # Generate and apply directly
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use kube::CustomResourceExt;
use user_access_controller::crd::{Kubeconfig, User, UserSyncGithub};

fn main() -> anyhow::Result<()> {
    let crds = [User::crd(), Kubeconfig::crd(), UserSyncGithub::crd()];
    for crd in crds {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
