//! # Mirror Sync
//!
//! Pushes a credential into a `MirrorSecretStore` without ever overwriting a
//! secret this controller did not create.
//!
//! Ownership is recorded store-side in the `ACCESS_MANAGED_SECRETS` variable
//! of the same scope: a comma-separated list of secret names. A name is added
//! before the first write of a new secret and dropped after the secret is
//! deleted. The list is read-modify-written without locking, so duplicates
//! are tolerated and removed on read.

use crate::constants::MANAGED_SECRETS_VARIABLE;
use crate::crd::{GithubSyncSpec, MirrorOutcome};
use crate::provider::github::encryption::seal;
use crate::provider::{EncryptedSecret, MirrorSecretStore, ScopePublicKey};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Parsed owned-secrets marker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagedSecrets(Vec<String>);

impl ManagedSecrets {
    /// Split on `,`, trim, drop empties and duplicates, keep first-seen order
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let mut names: Vec<String> = Vec::new();
        for name in value.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        Self(names)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|n| n == name)
    }

    /// Returns false if already present
    pub fn insert(&mut self, name: &str) -> bool {
        if self.contains(name) {
            return false;
        }
        self.0.push(name.to_string());
        true
    }

    /// Returns false if absent
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|n| n != name);
        self.0.len() != before
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn to_value(&self) -> String {
        self.0.join(",")
    }
}

/// Minimum spacing between consecutive external writes, process wide
#[derive(Debug)]
pub struct WriteThrottle {
    min_interval: Duration,
    last_write: tokio::sync::Mutex<Option<Instant>>,
}

impl WriteThrottle {
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_write: tokio::sync::Mutex::new(None),
        }
    }

    /// Wait until a write is allowed and claim the slot
    ///
    /// Callers queue on the lock, so concurrent writers are spaced out too.
    pub async fn wait(&self) {
        let mut last_write = self.last_write.lock().await;
        if let Some(last) = *last_write {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last_write = Some(Instant::now());
    }
}

/// Marker-guarded push and removal of one secret per scope
pub struct MirrorSync {
    store: Arc<dyn MirrorSecretStore>,
    throttle: WriteThrottle,
}

impl std::fmt::Debug for MirrorSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorSync")
            .field("throttle", &self.throttle)
            .finish_non_exhaustive()
    }
}

impl MirrorSync {
    pub fn new(store: Arc<dyn MirrorSecretStore>, write_delay: Duration) -> Self {
        Self {
            store,
            throttle: WriteThrottle::new(write_delay),
        }
    }

    /// Write `value` to `scope.secret_name` unless a foreign secret holds the name
    ///
    /// # Errors
    /// Any store failure, including a failure to read or update the marker;
    /// a secret is never written without its name on the marker.
    pub async fn push(&self, scope: &GithubSyncSpec, value: &[u8]) -> Result<MirrorOutcome> {
        let name = scope.secret_name.as_str();
        let scope_exists = self
            .store
            .scope_exists(scope)
            .await
            .with_context(|| format!("Failed to look up {}", scope.location()))?;
        if !scope_exists {
            self.throttle.wait().await;
            self.store
                .create_scope(scope)
                .await
                .with_context(|| format!("Failed to prepare {}", scope.location()))?;
        }

        let exists = self.store.secret_exists(scope, name).await?;
        if exists {
            let managed = self.managed(scope).await?;
            if !managed.contains(name) {
                info!(
                    "⏭️  Secret {} exists in {} and is not managed by this controller, skipping",
                    name,
                    scope.location()
                );
                return Ok(MirrorOutcome::Skipped);
            }
            debug!("Secret {} in {} is managed, updating", name, scope.location());
        } else {
            self.mark(scope, name).await?;
        }

        let ScopePublicKey { key_id, key } = self.store.public_key(scope).await?;
        let encrypted_value = seal(value, &key)?;
        self.throttle.wait().await;
        self.store
            .put_secret(scope, name, &EncryptedSecret { key_id, encrypted_value })
            .await?;
        info!("✅ Pushed secret {} to {}", name, scope.location());
        Ok(MirrorOutcome::Pushed)
    }

    /// Delete `scope.secret_name` if the marker lists it, then drop it from the marker
    ///
    /// Returns `Skipped` when the secret is not ours.
    ///
    /// # Errors
    /// Any store failure.
    pub async fn remove(&self, scope: &GithubSyncSpec) -> Result<MirrorOutcome> {
        let name = scope.secret_name.as_str();
        let mut managed = self.managed(scope).await?;
        if !managed.contains(name) {
            info!(
                "Secret {} in {} is not managed by this controller, leaving it in place",
                name,
                scope.location()
            );
            return Ok(MirrorOutcome::Skipped);
        }

        self.throttle.wait().await;
        self.store.delete_secret(scope, name).await?;

        managed.remove(name);
        self.throttle.wait().await;
        if managed.is_empty() {
            self.store
                .delete_variable(scope, MANAGED_SECRETS_VARIABLE)
                .await?;
        } else {
            self.store
                .update_variable(scope, MANAGED_SECRETS_VARIABLE, &managed.to_value())
                .await?;
        }
        info!("🗑️  Removed secret {} from {}", name, scope.location());
        Ok(MirrorOutcome::Removed)
    }

    async fn managed(&self, scope: &GithubSyncSpec) -> Result<ManagedSecrets> {
        let value = self
            .store
            .get_variable(scope, MANAGED_SECRETS_VARIABLE)
            .await
            .with_context(|| format!("Failed to read ownership marker in {}", scope.location()))?;
        Ok(value.as_deref().map(ManagedSecrets::parse).unwrap_or_default())
    }

    /// Record `name` on the marker before its first write
    async fn mark(&self, scope: &GithubSyncSpec, name: &str) -> Result<()> {
        let current = self
            .store
            .get_variable(scope, MANAGED_SECRETS_VARIABLE)
            .await
            .with_context(|| format!("Failed to read ownership marker in {}", scope.location()))?;
        let mut managed = current.as_deref().map(ManagedSecrets::parse).unwrap_or_default();
        if !managed.insert(name) {
            return Ok(());
        }

        self.throttle.wait().await;
        let written = match current {
            Some(_) => {
                self.store
                    .update_variable(scope, MANAGED_SECRETS_VARIABLE, &managed.to_value())
                    .await
            }
            None => {
                self.store
                    .create_variable(scope, MANAGED_SECRETS_VARIABLE, &managed.to_value())
                    .await
            }
        };
        written.with_context(|| format!("Failed to mark {} as managed in {}", name, scope.location()))
    }
}
