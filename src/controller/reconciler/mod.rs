//! # Reconciler
//!
//! Domain policies and the reconcile entry points for each watched kind.
//!
//! - `user`: ServiceAccount, token Secret and RBAC derived from a `User`
//! - `secret`: `Kubeconfig` derived from a populated token Secret
//! - `kubeconfig`: fan-out from a `Kubeconfig` to the syncs mirroring it
//! - `user_sync`: GitHub mirror of a `Kubeconfig`
//!
//! ## Flow
//!
//! 1. A `User` is applied: its ServiceAccount, token Secret and bindings converge
//! 2. The token controller fills the Secret: the user's `Kubeconfig` is derived
//! 3. The `Kubeconfig` changes: every `UserSyncGithub` for that user is enqueued
//! 4. Each sync pushes the rendered kubeconfig to GitHub, once per revision

pub mod kubeconfig;
pub mod reconcile;
pub mod secret;
pub mod types;
pub mod user;
pub mod user_sync;

pub use kubeconfig::dependent_syncs;
pub use reconcile::{backoff_key, reconcile_secret, reconcile_user, reconcile_user_sync};
pub use secret::{CredentialDeriver, CredentialOutcome};
pub use types::{BackoffState, Reconciler, ReconcilerError};
pub use user::IdentityPolicy;
pub use user_sync::MirrorPolicy;
