//! # Credential Derivation Tests
//!
//! Token Secret to `Kubeconfig`: which Secrets are acted on, when the token
//! is awaited, the defaults persisted on the user and where the CA comes from.

mod common;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::{kubeconfig_key, Harness, CONTEXT, NAMESPACE, SERVER};
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use user_access_controller::prelude::*;

async fn reconcile_user(harness: &Harness, name: &str, spec: UserSpec) {
    let user = harness.seed_user(name, spec);
    harness
        .reconciler
        .users
        .handle(&user)
        .await
        .expect("User reconcile should succeed");
}

#[tokio::test]
async fn test_populated_token_produces_kubeconfig() {
    let harness = Harness::new();
    reconcile_user(
        &harness,
        "alice",
        UserSpec {
            roles: vec![NamespaceRole {
                namespace: "payments".to_string(),
                role: "deployer".to_string(),
                ..NamespaceRole::default()
            }],
            ..UserSpec::default()
        },
    )
    .await;
    let secret = harness.populate_token("alice", "tok-1").await;

    let outcome = harness
        .reconciler
        .credentials
        .derive(&secret)
        .await
        .expect("Derivation should succeed");
    assert!(matches!(outcome, CredentialOutcome::Applied(report) if report.created == 1));

    let kubeconfig = harness.kubeconfig("alice").expect("Kubeconfig should exist");
    let spec = &kubeconfig.spec;
    assert_eq!(spec.current_context, CONTEXT);
    assert_eq!(spec.clusters[0].name, CONTEXT);
    assert_eq!(spec.clusters[0].cluster.server, SERVER);
    assert_eq!(spec.auth_infos[0].name, "alice");
    assert_eq!(spec.auth_infos[0].user.token, "tok-1");
    assert_eq!(spec.contexts[0].context.user, "alice");
    assert_eq!(spec.contexts[0].context.cluster, CONTEXT);
    assert_eq!(spec.contexts[0].context.namespace, "payments");

    // Owned by the namespaced Secret, so no cross-scope owner reference
    let stored = harness
        .store
        .snapshot(&kubeconfig_key("alice"))
        .expect("Kubeconfig should be stored");
    assert!(stored.metadata.owner_references.unwrap_or_default().is_empty());

    let again = harness
        .reconciler
        .credentials
        .derive(&harness.token_secret("alice"))
        .await
        .expect("Derivation should succeed");
    assert!(matches!(again, CredentialOutcome::Applied(report) if !report.changed()));
}

#[tokio::test]
async fn test_context_defaults_are_persisted_on_the_user() {
    let harness = Harness::new();
    reconcile_user(&harness, "alice", UserSpec::default()).await;
    let secret = harness.populate_token("alice", "tok-1").await;
    harness
        .reconciler
        .credentials
        .derive(&secret)
        .await
        .expect("Derivation should succeed");

    let user = harness.user("alice");
    assert_eq!(user.spec.context, CONTEXT);
    assert_eq!(user.spec.context_namespace, "default");
}

#[tokio::test]
async fn test_explicit_context_is_kept() {
    let harness = Harness::new();
    reconcile_user(
        &harness,
        "alice",
        UserSpec {
            context: "staging".to_string(),
            context_namespace: "ops".to_string(),
            ..UserSpec::default()
        },
    )
    .await;
    let secret = harness.populate_token("alice", "tok-1").await;
    harness.store.clear_operations();
    harness
        .reconciler
        .credentials
        .derive(&secret)
        .await
        .expect("Derivation should succeed");

    assert_eq!(
        harness.store.writes_for(ObjectKind::User),
        0,
        "Nothing to backfill"
    );
    let kubeconfig = harness.kubeconfig("alice").expect("Kubeconfig should exist");
    assert_eq!(kubeconfig.spec.current_context, "staging");
    assert_eq!(kubeconfig.spec.contexts[0].context.namespace, "ops");
}

#[tokio::test]
async fn test_empty_token_waits() {
    let harness = Harness::new();
    reconcile_user(&harness, "alice", UserSpec::default()).await;

    let outcome = harness
        .reconciler
        .credentials
        .derive(&harness.token_secret("alice"))
        .await
        .expect("Derivation should succeed");
    assert_eq!(outcome, CredentialOutcome::Waiting);
    assert!(harness.kubeconfig("alice").is_none());
}

#[tokio::test]
async fn test_unmanaged_secret_is_ignored() {
    let harness = Harness::new();
    let secret = Secret {
        metadata: ObjectMeta {
            name: Some("someone".to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..ObjectMeta::default()
        },
        type_: Some("kubernetes.io/service-account-token".to_string()),
        ..Secret::default()
    };

    let outcome = harness
        .reconciler
        .credentials
        .derive(&secret)
        .await
        .expect("Derivation should succeed");
    assert!(matches!(outcome, CredentialOutcome::Ignored(_)));
    assert!(harness.store.operations().is_empty());
}

#[tokio::test]
async fn test_secret_of_disabled_user_is_ignored() {
    let harness = Harness::new();
    reconcile_user(&harness, "alice", UserSpec::default()).await;
    let secret = harness.populate_token("alice", "tok-1").await;
    harness
        .store
        .patch_merge(
            &common::user_key("alice"),
            &serde_json::json!({ "spec": { "enabled": false } }),
        )
        .await
        .expect("Should disable user");

    let outcome = harness
        .reconciler
        .credentials
        .derive(&secret)
        .await
        .expect("Derivation should succeed");
    assert_eq!(outcome, CredentialOutcome::Ignored("user is disabled"));
    assert!(harness.kubeconfig("alice").is_none());
}

#[tokio::test]
async fn test_ca_comes_from_the_secret_without_configuration() {
    let harness = Harness::new();
    let kubeconfig = harness.provision("alice", UserSpec::default(), "tok-1").await;
    assert_eq!(
        kubeconfig.spec.clusters[0].cluster.certificate_authority_data,
        STANDARD.encode("cluster-ca-pem")
    );
}

#[tokio::test]
async fn test_configured_ca_wins_over_the_secret() {
    let config = ControllerConfig {
        ca: "Y29uZmlndXJlZA==".to_string(),
        ..common::config()
    };
    let harness = Harness::build(config, true, 30);
    let kubeconfig = harness.provision("alice", UserSpec::default(), "tok-1").await;
    assert_eq!(
        kubeconfig.spec.clusters[0].cluster.certificate_authority_data,
        "Y29uZmlndXJlZA=="
    );
}

#[tokio::test]
async fn test_token_rotation_updates_the_kubeconfig() {
    let harness = Harness::new();
    let first = harness.provision("alice", UserSpec::default(), "tok-1").await;
    let secret = harness.populate_token("alice", "tok-2").await;

    let outcome = harness
        .reconciler
        .credentials
        .derive(&secret)
        .await
        .expect("Derivation should succeed");
    assert!(matches!(outcome, CredentialOutcome::Applied(report) if report.updated == 1));

    let second = harness.kubeconfig("alice").expect("Kubeconfig should exist");
    assert_eq!(second.spec.auth_infos[0].user.token, "tok-2");
    assert_ne!(first.metadata.resource_version, second.metadata.resource_version);
}

#[tokio::test]
async fn test_issued_token_on_clusters_before_1_24_produces_kubeconfig() {
    let harness = Harness::build(common::config(), true, 23);
    reconcile_user(&harness, "alice", UserSpec::default()).await;
    assert!(harness.store.keys(ObjectKind::Secret).is_empty());

    let uid = harness.account_uid("alice");
    let secret = harness.seed_issued_token("alice", &uid, "tok-legacy");
    let outcome = harness
        .reconciler
        .credentials
        .derive(&secret)
        .await
        .expect("Derivation should succeed");
    assert!(matches!(outcome, CredentialOutcome::Applied(report) if report.created == 1));

    let kubeconfig = harness.kubeconfig("alice").expect("Kubeconfig should exist");
    assert_eq!(kubeconfig.spec.auth_infos[0].name, "alice");
    assert_eq!(kubeconfig.spec.auth_infos[0].user.token, "tok-legacy");
    assert_eq!(
        kubeconfig.spec.clusters[0].cluster.certificate_authority_data,
        STANDARD.encode("cluster-ca-pem")
    );
}

#[tokio::test]
async fn test_issued_token_for_an_earlier_account_is_ignored() {
    let harness = Harness::build(common::config(), true, 23);
    reconcile_user(&harness, "alice", UserSpec::default()).await;

    let secret = harness.seed_issued_token("alice", "uid-of-a-deleted-account", "tok-old");
    let outcome = harness
        .reconciler
        .credentials
        .derive(&secret)
        .await
        .expect("Derivation should succeed");
    assert!(matches!(outcome, CredentialOutcome::Ignored(_)));
    assert!(harness.kubeconfig("alice").is_none());
}

#[tokio::test]
async fn test_issued_token_of_a_foreign_account_is_ignored() {
    let harness = Harness::build(common::config(), true, 23);
    let account = ServiceAccount {
        metadata: ObjectMeta {
            name: Some("ci-bot".to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..ObjectMeta::default()
        },
        ..ServiceAccount::default()
    };
    harness
        .store
        .insert_resource(ObjectKind::ServiceAccount, &account)
        .expect("Should seed service account");

    let uid = harness.account_uid("ci-bot");
    let secret = harness.seed_issued_token("ci-bot", &uid, "tok-bot");
    let outcome = harness
        .reconciler
        .credentials
        .derive(&secret)
        .await
        .expect("Derivation should succeed");
    assert!(matches!(outcome, CredentialOutcome::Ignored(_)));
    assert!(harness.store.keys(ObjectKind::Kubeconfig).is_empty());
}
