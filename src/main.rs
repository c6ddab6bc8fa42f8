//! # User Access Controller
//!
//! A Kubernetes controller that turns `User` resources into working cluster
//! credentials and, on request, mirrors them into GitHub Actions secrets.
//!
//! ## Overview
//!
//! 1. **Identity** - each `User` gets a ServiceAccount and, on Kubernetes 1.24+, a token Secret
//! 2. **RBAC** - requested ClusterRoles and namespaced Roles become bindings to that ServiceAccount
//! 3. **Kubeconfig** - once the token is issued, a ready-to-use `Kubeconfig` is generated
//! 4. **GitHub mirror** - `UserSyncGithub` pushes the kubeconfig to a repository or environment secret
//!
//! ## Features
//!
//! - **Pruning**: derived objects that are no longer requested are deleted
//! - **Ownership-safe mirroring**: GitHub secrets this controller did not create are never overwritten
//! - **Prometheus metrics**: exposed at `/metrics`
//! - **Health probes**: `/healthz` and `/readyz`

use anyhow::Result;
use user_access_controller::runtime::{initialization::initialize, watch_loop::run_watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;
    run_watch_loop(init.client, init.reconciler, init.server_state).await
}
