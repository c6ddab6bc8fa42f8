//! Common test utilities for the controller integration tests
//!
//! Wires a `Reconciler` against the in-memory object store and the in-memory
//! GitHub secret store, and seeds the resources most tests start from.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use base64::{engine::general_purpose::STANDARD, Engine as _};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use std::sync::Arc;
use user_access_controller::controller::apply::MemoryStore;
use user_access_controller::observability::ObservedEvent;
use user_access_controller::prelude::*;
use user_access_controller::provider::MemorySecretStore;

pub const NAMESPACE: &str = "access-system";
pub const SERVER: &str = "https://10.0.0.1:6443";
pub const CONTEXT: &str = "prod";

/// Controller configuration used by every test, with write spacing disabled
pub fn config() -> ControllerConfig {
    ControllerConfig {
        namespace: NAMESPACE.to_string(),
        context_name: CONTEXT.to_string(),
        server: SERVER.to_string(),
        mirror_write_delay_ms: 0,
        ..ControllerConfig::default()
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub mirror: Arc<MemorySecretStore>,
    pub observer: Arc<RecordingObserver>,
    pub reconciler: Reconciler,
}

impl Harness {
    /// GitHub enabled, Kubernetes 1.30
    pub fn new() -> Self {
        Self::build(config(), true, 30)
    }

    pub fn build(config: ControllerConfig, github: bool, minor_version: u32) -> Self {
        let store = Arc::new(MemoryStore::new());
        let mirror = Arc::new(MemorySecretStore::new());
        let observer = Arc::new(RecordingObserver::new());

        let object_store: Arc<dyn ObjectStore> = Arc::clone(&store) as Arc<dyn ObjectStore>;
        let mirror_store: Option<Arc<dyn MirrorSecretStore>> =
            github.then(|| Arc::clone(&mirror) as Arc<dyn MirrorSecretStore>);
        let reconciler = Reconciler::new(
            config,
            object_store,
            mirror_store,
            minor_version,
            Arc::clone(&observer) as Arc<dyn ReconcileObserver>,
        );
        Self {
            store,
            mirror,
            observer,
            reconciler,
        }
    }

    pub fn seed_user(&self, name: &str, spec: UserSpec) -> User {
        self.store
            .insert_resource(ObjectKind::User, &User::new(name, spec))
            .expect("Should seed user");
        self.user(name)
    }

    /// Current state of a user, as the watch would deliver it
    pub fn user(&self, name: &str) -> User {
        self.store
            .typed(&user_key(name))
            .expect("User should exist in the store")
    }

    pub fn seed_sync(&self, name: &str, user: &str, github: GithubSyncSpec) -> UserSyncGithub {
        self.store
            .insert_resource(
                ObjectKind::UserSyncGithub,
                &UserSyncGithub::new(
                    name,
                    UserSyncGithubSpec {
                        user: user.to_string(),
                        github,
                    },
                ),
            )
            .expect("Should seed sync");
        self.sync(name)
    }

    pub fn sync(&self, name: &str) -> UserSyncGithub {
        self.store
            .typed(&ObjectKey::cluster(ObjectKind::UserSyncGithub, name))
            .expect("UserSyncGithub should exist in the store")
    }

    pub fn kubeconfig(&self, user: &str) -> Option<Kubeconfig> {
        self.store.typed(&kubeconfig_key(user))
    }

    pub fn token_secret(&self, user: &str) -> Secret {
        self.store
            .typed(&secret_key(user))
            .expect("Token secret should exist in the store")
    }

    /// Play the token controller: fill in the token and CA of a user's Secret
    pub async fn populate_token(&self, user: &str, token: &str) -> Secret {
        let patch = serde_json::json!({
            "data": {
                "token": STANDARD.encode(token),
                "ca.crt": STANDARD.encode("cluster-ca-pem"),
            }
        });
        self.store
            .patch_merge(&secret_key(user), &patch)
            .await
            .expect("Should populate token secret");
        self.token_secret(user)
    }

    /// Play a pre-1.24 token controller: issue a token Secret for the user's
    /// ServiceAccount, bound to `account_uid`
    pub fn seed_issued_token(&self, user: &str, account_uid: &str, token: &str) -> Secret {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(format!("{user}-token-abcde")),
                namespace: Some(NAMESPACE.to_string()),
                annotations: Some(BTreeMap::from([
                    (
                        "kubernetes.io/service-account.name".to_string(),
                        user.to_string(),
                    ),
                    (
                        "kubernetes.io/service-account.uid".to_string(),
                        account_uid.to_string(),
                    ),
                ])),
                ..ObjectMeta::default()
            },
            type_: Some("kubernetes.io/service-account-token".to_string()),
            data: Some(BTreeMap::from([
                ("token".to_string(), ByteString(token.as_bytes().to_vec())),
                ("ca.crt".to_string(), ByteString(b"cluster-ca-pem".to_vec())),
            ])),
            ..Secret::default()
        };
        self.store
            .insert_resource(ObjectKind::Secret, &secret)
            .expect("Should seed issued token secret");
        self.store
            .typed(&ObjectKey::namespaced(
                ObjectKind::Secret,
                NAMESPACE,
                &format!("{user}-token-abcde"),
            ))
            .expect("Issued token secret should exist in the store")
    }

    /// Uid the store assigned to a user's ServiceAccount
    pub fn account_uid(&self, user: &str) -> String {
        self.store
            .snapshot(&ObjectKey::namespaced(ObjectKind::ServiceAccount, NAMESPACE, user))
            .and_then(|account| account.metadata.uid)
            .expect("ServiceAccount should exist with a uid")
    }

    /// Reconcile a user until its kubeconfig exists
    pub async fn provision(&self, name: &str, spec: UserSpec, token: &str) -> Kubeconfig {
        let user = self.seed_user(name, spec);
        self.reconciler
            .users
            .handle(&user)
            .await
            .expect("User reconcile should succeed");
        let secret = self.populate_token(name, token).await;
        self.reconciler
            .credentials
            .derive(&secret)
            .await
            .expect("Credential derivation should succeed");
        self.kubeconfig(name).expect("Kubeconfig should be derived")
    }

    pub fn mirror_outcomes(&self) -> Vec<MirrorOutcome> {
        self.observer
            .events()
            .into_iter()
            .filter_map(|event| match event {
                ObservedEvent::Mirror(outcome) => Some(outcome),
                _ => None,
            })
            .collect()
    }
}

pub fn user_key(name: &str) -> ObjectKey {
    ObjectKey::cluster(ObjectKind::User, name)
}

pub fn secret_key(user: &str) -> ObjectKey {
    ObjectKey::namespaced(ObjectKind::Secret, NAMESPACE, user)
}

pub fn kubeconfig_key(user: &str) -> ObjectKey {
    ObjectKey::cluster(ObjectKind::Kubeconfig, user)
}

pub fn repository(secret_name: &str) -> GithubSyncSpec {
    GithubSyncSpec {
        owner: "octopilot".to_string(),
        repository: "payments".to_string(),
        environment: String::new(),
        secret_name: secret_name.to_string(),
    }
}

pub fn environment(secret_name: &str, environment: &str) -> GithubSyncSpec {
    GithubSyncSpec {
        environment: environment.to_string(),
        ..repository(secret_name)
    }
}

pub fn ready_condition<S: HasConditions>(status: Option<&S>) -> Condition {
    status
        .and_then(|s| s.condition("Ready"))
        .cloned()
        .expect("Ready condition should be set")
}
