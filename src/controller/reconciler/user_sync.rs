//! # Mirror Policy
//!
//! Mirrors a user's `Kubeconfig` into a GitHub Actions secret. The policy
//! derives no cluster objects; all of its work is the external side effect,
//! which the handler runs at most once per revision of the sync and of the
//! kubeconfig it mirrors.

use crate::controller::apply::{ObjectKey, ObjectKind, ObjectStore, StoreError};
use crate::controller::generating::{Generated, GeneratingPolicy, PolicyError};
use crate::crd::{ConditionUpdate, Kubeconfig, MirrorOutcome, UserSyncGithub, UserSyncStatus};
use crate::observability::ReconcileObserver;
use crate::provider::MirrorSync;
use async_trait::async_trait;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{info, warn};

const DISABLED_MESSAGE: &str = "GitHub synchronization is disabled";

pub struct MirrorPolicy {
    store: Arc<dyn ObjectStore>,
    mirror: Option<MirrorSync>,
    observer: Arc<dyn ReconcileObserver>,
}

impl std::fmt::Debug for MirrorPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorPolicy")
            .field("enabled", &self.mirror.is_some())
            .finish_non_exhaustive()
    }
}

impl MirrorPolicy {
    /// `mirror` is `None` when no GitHub credentials are configured
    pub fn new(
        store: Arc<dyn ObjectStore>,
        mirror: Option<MirrorSync>,
        observer: Arc<dyn ReconcileObserver>,
    ) -> Self {
        Self {
            store,
            mirror,
            observer,
        }
    }

    fn mirror(&self) -> Result<&MirrorSync, PolicyError> {
        self.mirror
            .as_ref()
            .ok_or_else(|| PolicyError::Disabled(DISABLED_MESSAGE.to_string()))
    }

    async fn kubeconfig(&self, user: &str) -> Result<Option<Kubeconfig>, StoreError> {
        let key = ObjectKey::cluster(ObjectKind::Kubeconfig, user);
        match self.store.get(&key).await? {
            Some(object) => Ok(Some(serde_json::from_value(serde_json::to_value(object)?)?)),
            None => Ok(None),
        }
    }

    async fn ready_kubeconfig(&self, user: &str) -> Result<Kubeconfig, PolicyError> {
        self.kubeconfig(user).await?.ok_or_else(|| {
            PolicyError::Transient(format!("kubeconfig for user {user} is not yet ready"))
        })
    }
}

fn validate(sync: &UserSyncGithub) -> Result<(), PolicyError> {
    let mut missing = sync.spec.github.missing_fields();
    if sync.spec.user.is_empty() {
        missing.insert(0, "user");
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(PolicyError::Invalid(format!(
            "missing required fields: {}",
            missing.join(", ")
        )))
    }
}

#[async_trait]
impl GeneratingPolicy<UserSyncGithub> for MirrorPolicy {
    async fn generate(
        &self,
        sync: &UserSyncGithub,
        status: UserSyncStatus,
    ) -> Result<Generated<UserSyncStatus>, PolicyError> {
        self.mirror()?;
        validate(sync)?;
        let kubeconfig = self.ready_kubeconfig(&sync.spec.user).await?;

        let mut generated = Generated::ready(status, Vec::new());
        generated.dependency_revision = kubeconfig.resource_version();
        Ok(generated)
    }

    async fn apply_external(
        &self,
        sync: &UserSyncGithub,
        generated: &mut Generated<UserSyncStatus>,
    ) -> Result<(), PolicyError> {
        let mirror = self.mirror()?;
        let kubeconfig = self.ready_kubeconfig(&sync.spec.user).await?;
        let document = kubeconfig.spec.to_yaml().map_err(|e| {
            PolicyError::External(anyhow::Error::new(e).context("Failed to render kubeconfig"))
        })?;

        let outcome = mirror.push(&sync.spec.github, document.as_bytes()).await?;
        self.observer.mirror_operation(outcome);
        generated.status.last_outcome = Some(outcome);
        generated.condition = match outcome {
            MirrorOutcome::Skipped => ConditionUpdate {
                ok: true,
                reason: "Skipped".to_string(),
                message: format!(
                    "secret {} already exists in {} and is not managed by this controller",
                    sync.spec.github.secret_name,
                    sync.spec.github.location()
                ),
            },
            MirrorOutcome::Pushed | MirrorOutcome::Removed => ConditionUpdate::ready("Pushed"),
        };
        Ok(())
    }

    async fn remove(&self, sync: &UserSyncGithub) -> Result<(), PolicyError> {
        let Some(mirror) = self.mirror.as_ref() else {
            warn!(
                "{}, leaving secret {} of {} in place",
                DISABLED_MESSAGE,
                sync.spec.github.secret_name,
                sync.name_any()
            );
            return Ok(());
        };
        if let Err(err) = validate(sync) {
            info!("Nothing to remove for {}: {}", sync.name_any(), err);
            return Ok(());
        }

        let outcome = mirror.remove(&sync.spec.github).await?;
        self.observer.mirror_operation(outcome);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{GithubSyncSpec, UserSyncGithubSpec};

    #[test]
    fn test_validate_lists_every_missing_field() {
        let sync = UserSyncGithub::new(
            "alice-ci",
            UserSyncGithubSpec {
                user: String::new(),
                github: GithubSyncSpec {
                    owner: "octopilot".into(),
                    ..GithubSyncSpec::default()
                },
            },
        );
        let err = validate(&sync).unwrap_err();
        assert!(err.is_terminal());
        assert_eq!(
            err.to_string(),
            "missing required fields: user, repository, secretName"
        );
    }
}
