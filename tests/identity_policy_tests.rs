//! # Identity Policy Tests
//!
//! End-to-end `User` reconciliation against the in-memory store: principal
//! and token derivation, RBAC bindings, defaults, disabling and removal.

mod common;

use common::{kubeconfig_key, ready_condition, user_key, Harness, NAMESPACE};
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleBinding};
use user_access_controller::prelude::*;

fn role(namespace: &str, role: &str, cluster_role: &str) -> NamespaceRole {
    NamespaceRole {
        namespace: namespace.to_string(),
        role: role.to_string(),
        cluster_role: cluster_role.to_string(),
    }
}

fn role_bindings(harness: &Harness) -> Vec<RoleBinding> {
    harness
        .store
        .keys(ObjectKind::RoleBinding)
        .iter()
        .filter_map(|key| harness.store.typed(key))
        .collect()
}

fn cluster_role_bindings(harness: &Harness) -> Vec<ClusterRoleBinding> {
    harness
        .store
        .keys(ObjectKind::ClusterRoleBinding)
        .iter()
        .filter_map(|key| harness.store.typed(key))
        .collect()
}

#[tokio::test]
async fn test_enabled_user_gets_account_token_and_bindings() {
    let harness = Harness::new();
    let user = harness.seed_user(
        "alice",
        UserSpec {
            cluster_roles: vec!["view".to_string()],
            roles: vec![role("payments", "deployer", "edit")],
            ..UserSpec::default()
        },
    );

    let outcome = harness
        .reconciler
        .users
        .handle(&user)
        .await
        .expect("Reconcile should succeed");
    match outcome {
        HandleOutcome::Applied(report) => assert_eq!(report.created, 5, "{report:?}"),
        other => panic!("Unexpected outcome {other:?}"),
    }

    let account: ServiceAccount = harness
        .store
        .typed(&ObjectKey::namespaced(ObjectKind::ServiceAccount, NAMESPACE, "alice"))
        .expect("ServiceAccount should exist");
    assert_eq!(
        account
            .metadata
            .annotations
            .unwrap_or_default()
            .get("access.octopilot.io/user")
            .map(String::as_str),
        Some("alice")
    );

    let secret = harness.token_secret("alice");
    assert_eq!(
        secret.type_.as_deref(),
        Some("kubernetes.io/service-account-token")
    );

    let crbs = cluster_role_bindings(&harness);
    assert_eq!(crbs.len(), 1);
    assert_eq!(crbs[0].role_ref.name, "view");
    let subjects = crbs[0].subjects.clone().unwrap_or_default();
    assert_eq!(subjects.len(), 1);
    assert_eq!(subjects[0].kind, "ServiceAccount");
    assert_eq!(subjects[0].name, "alice");
    assert_eq!(subjects[0].namespace.as_deref(), Some(NAMESPACE));

    let rbs = role_bindings(&harness);
    assert_eq!(rbs.len(), 2);
    assert!(rbs
        .iter()
        .all(|rb| rb.metadata.namespace.as_deref() == Some("payments")));
    let mut refs: Vec<(String, String)> = rbs
        .iter()
        .map(|rb| (rb.role_ref.kind.clone(), rb.role_ref.name.clone()))
        .collect();
    refs.sort();
    assert_eq!(
        refs,
        vec![
            ("ClusterRole".to_string(), "edit".to_string()),
            ("Role".to_string(), "deployer".to_string()),
        ]
    );

    let user = harness.user("alice");
    assert!(user
        .metadata
        .finalizers
        .clone()
        .unwrap_or_default()
        .contains(&"access.octopilot.io/user-cleanup".to_string()));
    let ready = ready_condition(user.status.as_ref());
    assert!(ready.is_true());
}

#[tokio::test]
async fn test_no_roles_and_no_default_yields_no_bindings() {
    let harness = Harness::new();
    let user = harness.seed_user("alice", UserSpec::default());
    harness
        .reconciler
        .users
        .handle(&user)
        .await
        .expect("Reconcile should succeed");

    assert!(cluster_role_bindings(&harness).is_empty());
    assert!(role_bindings(&harness).is_empty());
    assert_eq!(harness.store.keys(ObjectKind::ServiceAccount).len(), 1);
}

#[tokio::test]
async fn test_default_cluster_role_for_user_without_roles() {
    let config = ControllerConfig {
        default_cluster_role: "view".to_string(),
        ..common::config()
    };
    let harness = Harness::build(config, true, 30);
    let user = harness.seed_user("alice", UserSpec::default());
    harness
        .reconciler
        .users
        .handle(&user)
        .await
        .expect("Reconcile should succeed");

    let crbs = cluster_role_bindings(&harness);
    assert_eq!(crbs.len(), 1, "Exactly one default binding expected");
    assert_eq!(crbs[0].role_ref.kind, "ClusterRole");
    assert_eq!(crbs[0].role_ref.name, "view");
    assert!(role_bindings(&harness).is_empty());
}

#[tokio::test]
async fn test_default_is_not_added_when_roles_are_requested() {
    let config = ControllerConfig {
        default_cluster_role: "view".to_string(),
        ..common::config()
    };
    let harness = Harness::build(config, true, 30);
    let user = harness.seed_user(
        "alice",
        UserSpec {
            roles: vec![role("payments", "deployer", "")],
            ..UserSpec::default()
        },
    );
    harness
        .reconciler
        .users
        .handle(&user)
        .await
        .expect("Reconcile should succeed");

    assert!(cluster_role_bindings(&harness).is_empty());
    assert_eq!(role_bindings(&harness).len(), 1);
}

#[tokio::test]
async fn test_clusters_before_1_24_get_no_token_secret() {
    let harness = Harness::build(common::config(), true, 23);
    let user = harness.seed_user("alice", UserSpec::default());
    harness
        .reconciler
        .users
        .handle(&user)
        .await
        .expect("Reconcile should succeed");

    assert!(harness.store.keys(ObjectKind::Secret).is_empty());
    assert_eq!(harness.store.keys(ObjectKind::ServiceAccount).len(), 1);
}

#[tokio::test]
async fn test_dropping_a_role_prunes_its_bindings() {
    let harness = Harness::new();
    let user = harness.seed_user(
        "alice",
        UserSpec {
            cluster_roles: vec!["view".to_string()],
            roles: vec![role("payments", "deployer", "edit")],
            ..UserSpec::default()
        },
    );
    harness
        .reconciler
        .users
        .handle(&user)
        .await
        .expect("Reconcile should succeed");

    harness
        .store
        .patch_merge(&user_key("alice"), &serde_json::json!({ "spec": { "roles": [] } }))
        .await
        .expect("Should edit user");
    let outcome = harness
        .reconciler
        .users
        .handle(&harness.user("alice"))
        .await
        .expect("Reconcile should succeed");

    match outcome {
        HandleOutcome::Applied(report) => {
            assert_eq!(report.deleted, 2, "{report:?}");
            assert_eq!(report.unchanged, 3, "{report:?}");
        }
        other => panic!("Unexpected outcome {other:?}"),
    }
    assert!(role_bindings(&harness).is_empty());
    assert_eq!(cluster_role_bindings(&harness).len(), 1);
}

#[tokio::test]
async fn test_disabled_user_loses_children_and_kubeconfig() {
    let harness = Harness::new();
    harness
        .provision(
            "alice",
            UserSpec {
                cluster_roles: vec!["view".to_string()],
                ..UserSpec::default()
            },
            "tok-1",
        )
        .await;
    assert!(harness.kubeconfig("alice").is_some());

    harness
        .store
        .patch_merge(&user_key("alice"), &serde_json::json!({ "spec": { "enabled": false } }))
        .await
        .expect("Should disable user");
    let outcome = harness
        .reconciler
        .users
        .handle(&harness.user("alice"))
        .await
        .expect("Disabling is not an error");

    assert!(matches!(outcome, HandleOutcome::Applied(report) if report.deleted == 3));
    assert!(harness.store.snapshot(&kubeconfig_key("alice")).is_none());
    assert!(harness.store.keys(ObjectKind::ServiceAccount).is_empty());
    assert!(harness.store.keys(ObjectKind::Secret).is_empty());
    assert!(cluster_role_bindings(&harness).is_empty());

    let ready = ready_condition(harness.user("alice").status.as_ref());
    assert_eq!(ready.status, "False");
    assert_eq!(ready.reason.as_deref(), Some("Disabled"));
}

#[tokio::test]
async fn test_removal_prunes_children_and_releases_finalizer() {
    let harness = Harness::new();
    harness
        .provision(
            "alice",
            UserSpec {
                roles: vec![role("payments", "deployer", "")],
                ..UserSpec::default()
            },
            "tok-1",
        )
        .await;

    harness
        .store
        .delete(&user_key("alice"))
        .await
        .expect("Delete should be accepted");
    let deleting = harness.user("alice");
    assert!(deleting.metadata.deletion_timestamp.is_some());

    let outcome = harness
        .reconciler
        .users
        .handle(&deleting)
        .await
        .expect("Removal should succeed");
    assert_eq!(outcome, HandleOutcome::Removed);

    assert!(
        harness.store.snapshot(&user_key("alice")).is_none(),
        "User should be gone once its finalizer is released"
    );
    assert!(harness.store.keys(ObjectKind::ServiceAccount).is_empty());
    assert!(harness.store.keys(ObjectKind::Secret).is_empty());
    assert!(role_bindings(&harness).is_empty());
    assert!(harness.store.snapshot(&kubeconfig_key("alice")).is_none());
}
