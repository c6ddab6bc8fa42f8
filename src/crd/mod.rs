//! # Custom Resource Definitions
//!
//! All resources are cluster scoped and live in `access.octopilot.io/v1alpha1`.
//!
//! - `User` - source identity, drives ServiceAccount and RBAC derivation
//! - `Kubeconfig` - generated client configuration, one per `User`
//! - `UserSyncGithub` - mirrors a `Kubeconfig` into a GitHub Actions secret

mod kubeconfig;
mod status;
mod user;
mod user_sync;

pub use kubeconfig::{
    AuthInfo, ClusterEndpoint, ContextSpec, Kubeconfig, KubeconfigSpec, NamedAuthInfo,
    NamedCluster, NamedContext,
};
pub use status::{conditions_changed, Condition, ConditionUpdate, HasConditions};
pub use user::{NamespaceRole, User, UserSpec, UserStatus};
pub use user_sync::{
    GithubSyncSpec, MirrorOutcome, UserSyncGithub, UserSyncGithubSpec, UserSyncStatus,
};
