//! # In-Memory Secret Store
//!
//! A `MirrorSecretStore` for tests: secrets are sealed against a real key
//! pair so pushed values can be decrypted again, every mutating call is
//! recorded, and failures can be injected per operation.

use crate::crd::GithubSyncSpec;
use crate::provider::{EncryptedSecret, MirrorSecretStore, ScopePublicKey};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use crypto_box::aead::OsRng;
use crypto_box::SecretKey;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A mutating call recorded by `MemorySecretStore`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorWrite {
    CreateScope(String),
    PutSecret(String, String),
    DeleteSecret(String, String),
    CreateVariable(String, String),
    UpdateVariable(String, String),
    DeleteVariable(String, String),
}

#[derive(Debug, Default)]
struct MirrorState {
    environments: BTreeSet<String>,
    secrets: BTreeMap<(String, String), Vec<u8>>,
    variables: BTreeMap<(String, String), String>,
    writes: Vec<MirrorWrite>,
    failures: Vec<&'static str>,
}

impl MirrorState {
    fn take_failure(&mut self, operation: &'static str) -> Result<()> {
        if let Some(pos) = self.failures.iter().position(|op| *op == operation) {
            self.failures.remove(pos);
            return Err(anyhow!("injected {operation} failure"));
        }
        Ok(())
    }

    fn require_scope(&self, scope: &GithubSyncSpec) -> Result<()> {
        if scope.environment.is_empty() || self.environments.contains(&scope_key(scope)) {
            Ok(())
        } else {
            Err(anyhow!("Not found: environment {}", scope.location()))
        }
    }
}

/// In-process `MirrorSecretStore` holding a real sealed-box key pair
pub struct MemorySecretStore {
    secret_key: SecretKey,
    state: Mutex<MirrorState>,
}

impl std::fmt::Debug for MemorySecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySecretStore").finish_non_exhaustive()
    }
}

impl Default for MemorySecretStore {
    fn default() -> Self {
        Self::new()
    }
}

fn scope_key(scope: &GithubSyncSpec) -> String {
    scope.location()
}

impl MemorySecretStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            secret_key: SecretKey::generate(&mut OsRng),
            state: Mutex::new(MirrorState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MirrorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a secret this controller did not write
    pub fn seed_secret(&self, scope: &GithubSyncSpec, name: &str, ciphertext: &[u8]) {
        let mut state = self.lock();
        if !scope.environment.is_empty() {
            state.environments.insert(scope_key(scope));
        }
        state
            .secrets
            .insert((scope_key(scope), name.to_string()), ciphertext.to_vec());
    }

    pub fn seed_variable(&self, scope: &GithubSyncSpec, name: &str, value: &str) {
        self.lock()
            .variables
            .insert((scope_key(scope), name.to_string()), value.to_string());
    }

    /// Decrypted value of a secret written through `put_secret`
    #[must_use]
    pub fn secret_plaintext(&self, scope: &GithubSyncSpec, name: &str) -> Option<Vec<u8>> {
        let sealed = self
            .lock()
            .secrets
            .get(&(scope_key(scope), name.to_string()))
            .cloned()?;
        self.secret_key.unseal(&sealed).ok()
    }

    #[must_use]
    pub fn has_secret(&self, scope: &GithubSyncSpec, name: &str) -> bool {
        self.lock()
            .secrets
            .contains_key(&(scope_key(scope), name.to_string()))
    }

    #[must_use]
    pub fn variable(&self, scope: &GithubSyncSpec, name: &str) -> Option<String> {
        self.lock()
            .variables
            .get(&(scope_key(scope), name.to_string()))
            .cloned()
    }

    #[must_use]
    pub fn writes(&self) -> Vec<MirrorWrite> {
        self.lock().writes.clone()
    }

    /// Writes of secret values only
    #[must_use]
    pub fn secret_writes(&self) -> usize {
        self.lock()
            .writes
            .iter()
            .filter(|w| matches!(w, MirrorWrite::PutSecret(..)))
            .count()
    }

    /// Fail the next call of `operation` (a `MirrorSecretStore` method name)
    pub fn fail_next(&self, operation: &'static str) {
        self.lock().failures.push(operation);
    }
}

#[async_trait]
impl MirrorSecretStore for MemorySecretStore {
    async fn scope_exists(&self, scope: &GithubSyncSpec) -> Result<bool> {
        let mut state = self.lock();
        state.take_failure("scope_exists")?;
        Ok(state.require_scope(scope).is_ok())
    }

    async fn create_scope(&self, scope: &GithubSyncSpec) -> Result<()> {
        let mut state = self.lock();
        state.take_failure("create_scope")?;
        if state.environments.insert(scope_key(scope)) {
            state.writes.push(MirrorWrite::CreateScope(scope_key(scope)));
        }
        Ok(())
    }

    async fn secret_exists(&self, scope: &GithubSyncSpec, name: &str) -> Result<bool> {
        let mut state = self.lock();
        state.take_failure("secret_exists")?;
        state.require_scope(scope)?;
        Ok(state.secrets.contains_key(&(scope_key(scope), name.to_string())))
    }

    async fn public_key(&self, scope: &GithubSyncSpec) -> Result<ScopePublicKey> {
        let mut state = self.lock();
        state.take_failure("public_key")?;
        state.require_scope(scope)?;
        Ok(ScopePublicKey {
            key_id: "memory".to_string(),
            key: STANDARD.encode(self.secret_key.public_key().as_bytes()),
        })
    }

    async fn put_secret(
        &self,
        scope: &GithubSyncSpec,
        name: &str,
        secret: &EncryptedSecret,
    ) -> Result<()> {
        let mut state = self.lock();
        state.take_failure("put_secret")?;
        state.require_scope(scope)?;
        let sealed = STANDARD
            .decode(&secret.encrypted_value)
            .context("encrypted value is not base64")?;
        state.secrets.insert((scope_key(scope), name.to_string()), sealed);
        state
            .writes
            .push(MirrorWrite::PutSecret(scope_key(scope), name.to_string()));
        Ok(())
    }

    async fn delete_secret(&self, scope: &GithubSyncSpec, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.take_failure("delete_secret")?;
        if state
            .secrets
            .remove(&(scope_key(scope), name.to_string()))
            .is_some()
        {
            state
                .writes
                .push(MirrorWrite::DeleteSecret(scope_key(scope), name.to_string()));
        }
        Ok(())
    }

    async fn get_variable(&self, scope: &GithubSyncSpec, name: &str) -> Result<Option<String>> {
        let mut state = self.lock();
        state.take_failure("get_variable")?;
        Ok(state.variables.get(&(scope_key(scope), name.to_string())).cloned())
    }

    async fn create_variable(&self, scope: &GithubSyncSpec, name: &str, value: &str) -> Result<()> {
        let mut state = self.lock();
        state.take_failure("create_variable")?;
        let key = (scope_key(scope), name.to_string());
        if state.variables.contains_key(&key) {
            return Err(anyhow!("Validation failed: variable {name} already exists"));
        }
        state.variables.insert(key, value.to_string());
        state
            .writes
            .push(MirrorWrite::CreateVariable(scope_key(scope), name.to_string()));
        Ok(())
    }

    async fn update_variable(&self, scope: &GithubSyncSpec, name: &str, value: &str) -> Result<()> {
        let mut state = self.lock();
        state.take_failure("update_variable")?;
        let key = (scope_key(scope), name.to_string());
        let Some(current) = state.variables.get_mut(&key) else {
            return Err(anyhow!("Not found: variable {name}"));
        };
        value.clone_into(current);
        state
            .writes
            .push(MirrorWrite::UpdateVariable(scope_key(scope), name.to_string()));
        Ok(())
    }

    async fn delete_variable(&self, scope: &GithubSyncSpec, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.take_failure("delete_variable")?;
        if state
            .variables
            .remove(&(scope_key(scope), name.to_string()))
            .is_some()
        {
            state
                .writes
                .push(MirrorWrite::DeleteVariable(scope_key(scope), name.to_string()));
        }
        Ok(())
    }
}
