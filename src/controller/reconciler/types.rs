//! # Types
//!
//! Core types for the reconciler.

use crate::config::ControllerConfig;
use crate::constants::{
    READY_CONDITION, SECRET_SET_ID, USER_FINALIZER, USER_SET_ID, USER_SYNC_FINALIZER,
    USER_SYNC_SET_ID,
};
use crate::controller::apply::{ApplyError, ObjectKind, ObjectSet, ObjectStore, StoreError};
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::generating::{GeneratingHandler, GeneratingOptions, PolicyError};
use crate::controller::reconciler::{CredentialDeriver, IdentityPolicy, MirrorPolicy};
use crate::crd::{User, UserSyncGithub};
use crate::observability::ReconcileObserver;
use crate::provider::{MirrorSecretStore, MirrorSync};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("{0}")]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Apply(#[from] ApplyError),
    /// A write lost an optimistic-concurrency race; re-read and retry
    #[error("conflict writing {0}")]
    Conflict(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Reconciliation failed: {0}")]
    External(#[from] anyhow::Error),
}

impl ReconcilerError {
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        match self {
            ReconcilerError::Conflict(_) => true,
            ReconcilerError::Apply(err) => err.is_conflict(),
            ReconcilerError::Store(err) => err.is_conflict(),
            _ => false,
        }
    }

    /// Whether retrying without a configuration or spec change can help
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcilerError::Policy(err) => !err.is_terminal(),
            _ => true,
        }
    }
}

/// Backoff state for a specific resource
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_secs, max_secs),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Shared context of every controller
#[derive(Clone)]
pub struct Reconciler {
    pub config: Arc<ControllerConfig>,
    pub store: Arc<dyn ObjectStore>,
    pub users: Arc<GeneratingHandler<User, IdentityPolicy>>,
    pub syncs: Arc<GeneratingHandler<UserSyncGithub, MirrorPolicy>>,
    pub credentials: Arc<CredentialDeriver>,
    pub observer: Arc<dyn ReconcileObserver>,
    // Keyed by `kind/namespace/name`, owned by the error policy
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("github_enabled", &self.config.github_enabled())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Wire every handler against `store`
    ///
    /// `mirror` is the external secret store; `None` disables GitHub
    /// synchronization. `minor_version` is the API server's minor version.
    pub fn new(
        config: ControllerConfig,
        store: Arc<dyn ObjectStore>,
        mirror: Option<Arc<dyn MirrorSecretStore>>,
        minor_version: u32,
        observer: Arc<dyn ReconcileObserver>,
    ) -> Self {
        let config = Arc::new(config);

        let identity = IdentityPolicy::new(
            Arc::clone(&store),
            config.namespace.clone(),
            config.default_cluster_role.clone(),
            minor_version,
        );
        let users = GeneratingHandler::new(
            identity,
            ObjectSet::new(
                Arc::clone(&store),
                USER_SET_ID,
                &[
                    ObjectKind::ServiceAccount,
                    ObjectKind::Secret,
                    ObjectKind::RoleBinding,
                    ObjectKind::ClusterRoleBinding,
                ],
            ),
            Arc::clone(&store),
            GeneratingOptions {
                unique_apply_for_revision: false,
                finalizer: USER_FINALIZER,
                condition: READY_CONDITION,
            },
            Arc::clone(&observer),
        );

        let mirror = mirror.map(|m| MirrorSync::new(m, config.mirror_write_delay()));
        let syncs = GeneratingHandler::new(
            MirrorPolicy::new(Arc::clone(&store), mirror, Arc::clone(&observer)),
            ObjectSet::new(Arc::clone(&store), USER_SYNC_SET_ID, &[]),
            Arc::clone(&store),
            GeneratingOptions {
                unique_apply_for_revision: true,
                finalizer: USER_SYNC_FINALIZER,
                condition: READY_CONDITION,
            },
            Arc::clone(&observer),
        );

        let credentials = CredentialDeriver::new(
            Arc::clone(&store),
            ObjectSet::new(Arc::clone(&store), SECRET_SET_ID, &[ObjectKind::Kubeconfig]),
            &config,
            Arc::clone(&observer),
        );

        Self {
            config,
            store,
            users: Arc::new(users),
            syncs: Arc::new(syncs),
            credentials: Arc::new(credentials),
            observer,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Forget the error history of `key` after a successful reconcile
    pub fn reset_backoff(&self, key: &str) {
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = states.get_mut(key) {
            state.reset();
        }
    }

    /// Drop the error history of `key` once its object is gone
    pub fn forget_backoff(&self, key: &str) {
        self.backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}
