//! # Credential Derivation
//!
//! Turns a populated service account token Secret into the owning user's
//! `Kubeconfig`. The Secret is recognised through the object-set annotations
//! stamped on it when the user's children were applied. Clusters before 1.24
//! provision the token Secret themselves; that one is traced back through its
//! ServiceAccount, whose uid must match and which names the user.

use crate::config::ControllerConfig;
use crate::constants::{
    OBJECTSET_ID_ANNOTATION, OWNER_NAME_ANNOTATION, SERVICE_ACCOUNT_NAME_ANNOTATION,
    SERVICE_ACCOUNT_TOKEN_TYPE, SERVICE_ACCOUNT_UID_ANNOTATION, USER_ANNOTATION, USER_SET_ID,
};
use crate::controller::apply::{
    ApplyReport, DesiredObject, ObjectKey, ObjectKind, ObjectSet, ObjectStore, Owner, StoreError,
};
use crate::controller::reconciler::ReconcilerError;
use crate::crd::{
    AuthInfo, ClusterEndpoint, ContextSpec, Kubeconfig, KubeconfigSpec, NamedAuthInfo,
    NamedCluster, NamedContext, User,
};
use crate::observability::ReconcileObserver;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info};

/// What one `derive` call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialOutcome {
    /// Not a token of a user this controller manages
    Ignored(&'static str),
    /// The token controller has not populated the Secret yet
    Waiting,
    Applied(ApplyReport),
}

pub struct CredentialDeriver {
    store: Arc<dyn ObjectStore>,
    objects: ObjectSet,
    context_name: String,
    server: String,
    ca: String,
    observer: Arc<dyn ReconcileObserver>,
}

impl std::fmt::Debug for CredentialDeriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialDeriver")
            .field("objects", &self.objects)
            .field("context_name", &self.context_name)
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

impl CredentialDeriver {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        objects: ObjectSet,
        config: &ControllerConfig,
        observer: Arc<dyn ReconcileObserver>,
    ) -> Self {
        Self {
            store,
            objects,
            context_name: config.context_name.clone(),
            server: config.server.clone(),
            ca: config.ca.clone(),
            observer,
        }
    }

    /// Derive the kubeconfig for the user owning `secret`
    ///
    /// # Errors
    /// Store failures while reading the user, persisting its defaults or
    /// applying the kubeconfig.
    pub async fn derive(&self, secret: &Secret) -> Result<CredentialOutcome, ReconcilerError> {
        let Some(user_name) = self.owning_user(secret).await? else {
            return Ok(CredentialOutcome::Ignored("not a managed token secret"));
        };
        let user_name = user_name.as_str();
        if secret.metadata.deletion_timestamp.is_some() {
            return Ok(CredentialOutcome::Ignored("secret is being deleted"));
        }

        let Some(mut user) = self.fetch_user(user_name).await? else {
            debug!("User {} for secret {} is gone", user_name, secret.name_any());
            return Ok(CredentialOutcome::Ignored("user not found"));
        };
        if !user.spec.is_enabled() {
            return Ok(CredentialOutcome::Ignored("user is disabled"));
        }
        self.backfill_defaults(&mut user).await?;

        let token = secret
            .data
            .as_ref()
            .and_then(|d| d.get("token"))
            .map(|t| String::from_utf8_lossy(&t.0).into_owned())
            .unwrap_or_default();
        if token.is_empty() {
            debug!("Token secret {} not populated yet", secret.name_any());
            return Ok(CredentialOutcome::Waiting);
        }

        let kubeconfig = Kubeconfig::new(user_name, self.kubeconfig_spec(&user, secret, token));
        let desired = DesiredObject::from_resource(ObjectKind::Kubeconfig, &kubeconfig)
            .map_err(StoreError::from)?;
        let report = self.objects.apply(&Owner::of(secret), vec![desired]).await?;
        self.observer.objects_applied(ObjectKind::Kubeconfig, &report);
        if report.changed() {
            info!("🔑 Kubeconfig for user {} is up to date", user_name);
        }
        Ok(CredentialOutcome::Applied(report))
    }

    /// Kubeconfig content for `user` authenticating with `token`
    #[must_use]
    pub fn kubeconfig_spec(&self, user: &User, secret: &Secret, token: String) -> KubeconfigSpec {
        let user_name = user.name_any();
        let context = user.spec.context.clone();
        KubeconfigSpec {
            clusters: vec![NamedCluster {
                name: context.clone(),
                cluster: ClusterEndpoint {
                    server: self.server.clone(),
                    certificate_authority_data: self.certificate_authority(secret),
                },
            }],
            auth_infos: vec![NamedAuthInfo {
                name: user_name.clone(),
                user: AuthInfo { token },
            }],
            contexts: vec![NamedContext {
                name: context.clone(),
                context: ContextSpec {
                    cluster: context.clone(),
                    user: user_name,
                    namespace: user.spec.context_namespace.clone(),
                },
            }],
            current_context: context,
        }
    }

    fn certificate_authority(&self, secret: &Secret) -> String {
        if !self.ca.is_empty() {
            return self.ca.clone();
        }
        secret
            .data
            .as_ref()
            .and_then(|d| d.get("ca.crt"))
            .map(|ca| STANDARD.encode(&ca.0))
            .unwrap_or_default()
    }

    /// Name of the user `secret` authenticates
    ///
    /// Secrets applied by this controller carry their owner; auto-provisioned
    /// ones only name their ServiceAccount.
    async fn owning_user(&self, secret: &Secret) -> Result<Option<String>, StoreError> {
        if secret.type_.as_deref() != Some(SERVICE_ACCOUNT_TOKEN_TYPE) {
            return Ok(None);
        }
        if let Some(name) = managed_owner(secret) {
            return Ok(Some(name.to_string()));
        }

        let annotations = secret.metadata.annotations.clone().unwrap_or_default();
        let (Some(account), Some(uid), Some(namespace)) = (
            annotations.get(SERVICE_ACCOUNT_NAME_ANNOTATION),
            annotations.get(SERVICE_ACCOUNT_UID_ANNOTATION),
            secret.metadata.namespace.as_deref(),
        ) else {
            return Ok(None);
        };
        let key = ObjectKey::namespaced(ObjectKind::ServiceAccount, namespace, account);
        let Some(service_account) = self.store.get(&key).await? else {
            debug!("ServiceAccount {} for secret {} not found", key, secret.name_any());
            return Ok(None);
        };
        if service_account.metadata.uid.as_ref() != Some(uid) {
            debug!("Secret {} belongs to an earlier {}", secret.name_any(), key);
            return Ok(None);
        }
        Ok(service_account
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(USER_ANNOTATION))
            .filter(|name| !name.is_empty())
            .cloned())
    }

    async fn fetch_user(&self, name: &str) -> Result<Option<User>, StoreError> {
        let key = ObjectKey::cluster(ObjectKind::User, name);
        match self.store.get(&key).await? {
            Some(object) => Ok(Some(serde_json::from_value(serde_json::to_value(object)?)?)),
            None => Ok(None),
        }
    }

    /// Persist the context defaults on the user so they stay stable
    async fn backfill_defaults(&self, user: &mut User) -> Result<(), StoreError> {
        let mut patch = serde_json::Map::new();
        if user.spec.context.is_empty() {
            user.spec.context.clone_from(&self.context_name);
            patch.insert("context".into(), user.spec.context.clone().into());
        }
        if user.spec.context_namespace.is_empty() {
            user.spec.context_namespace = user.spec.default_context_namespace();
            patch.insert(
                "contextNamespace".into(),
                user.spec.context_namespace.clone().into(),
            );
        }
        if patch.is_empty() {
            return Ok(());
        }

        let key = ObjectKey::cluster(ObjectKind::User, user.name_any());
        self.store
            .patch_merge(&key, &serde_json::json!({ "spec": patch }))
            .await?;
        info!(
            "Defaulted context {} / namespace {} for user {}",
            user.spec.context,
            user.spec.context_namespace,
            user.name_any()
        );
        Ok(())
    }
}

/// Name of the user whose object set produced `secret`
fn managed_owner(secret: &Secret) -> Option<&str> {
    let annotations = secret.metadata.annotations.as_ref()?;
    if annotations.get(OBJECTSET_ID_ANNOTATION).map(String::as_str) != Some(USER_SET_ID) {
        return None;
    }
    annotations
        .get(OWNER_NAME_ANNOTATION)
        .map(String::as_str)
        .filter(|name| !name.is_empty())
}
