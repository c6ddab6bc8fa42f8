//! # Provider Modules
//!
//! External stores a generated kubeconfig can be mirrored into.
//!
//! Each store implements `MirrorSecretStore`; the ownership-marker protocol
//! and write throttling on top of it live in `mirror`.

use crate::crd::GithubSyncSpec;
use anyhow::Result;
use async_trait::async_trait;

/// Sealed-box public key of one secret scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopePublicKey {
    pub key_id: String,
    /// Base64 X25519 public key
    pub key: String,
}

/// A secret value encrypted for one scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedSecret {
    pub key_id: String,
    /// Base64 sealed box
    pub encrypted_value: String,
}

/// Secret and variable operations at repository or environment scope
///
/// The scope is `owner/repository`, narrowed to an environment when
/// `GithubSyncSpec::environment` is set.
#[async_trait]
pub trait MirrorSecretStore: Send + Sync {
    /// Whether the environment named by the scope exists; repository scopes always do
    async fn scope_exists(&self, scope: &GithubSyncSpec) -> Result<bool>;

    /// Create the environment named by the scope
    async fn create_scope(&self, scope: &GithubSyncSpec) -> Result<()>;

    async fn secret_exists(&self, scope: &GithubSyncSpec, name: &str) -> Result<bool>;

    async fn public_key(&self, scope: &GithubSyncSpec) -> Result<ScopePublicKey>;

    /// Create or replace a secret
    async fn put_secret(
        &self,
        scope: &GithubSyncSpec,
        name: &str,
        secret: &EncryptedSecret,
    ) -> Result<()>;

    /// Delete a secret; an absent secret counts as deleted
    async fn delete_secret(&self, scope: &GithubSyncSpec, name: &str) -> Result<()>;

    /// Value of a variable; `None` when it does not exist
    async fn get_variable(&self, scope: &GithubSyncSpec, name: &str) -> Result<Option<String>>;

    async fn create_variable(&self, scope: &GithubSyncSpec, name: &str, value: &str) -> Result<()>;

    async fn update_variable(&self, scope: &GithubSyncSpec, name: &str, value: &str) -> Result<()>;

    /// Delete a variable; an absent variable counts as deleted
    async fn delete_variable(&self, scope: &GithubSyncSpec, name: &str) -> Result<()>;
}

pub mod github;
pub mod memory;
pub mod mirror;

pub use github::GithubSecretStore;
pub use memory::{MemorySecretStore, MirrorWrite};
pub use mirror::{ManagedSecrets, MirrorSync, WriteThrottle};
