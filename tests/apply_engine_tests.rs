//! # Apply Engine Tests
//!
//! Object-set semantics against the in-memory store: idempotent re-apply,
//! pruning, write ordering, partial failure and owner isolation.

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleRef};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::sync::Arc;
use user_access_controller::controller::apply::{MemoryStore, StoreOp};
use user_access_controller::prelude::*;

const NAMESPACE: &str = "access-system";

fn owner(name: &str) -> Owner {
    Owner {
        api_version: "access.octopilot.io/v1alpha1".to_string(),
        kind: "User".to_string(),
        name: name.to_string(),
        namespace: None,
        uid: Some(format!("uid-{name}")),
    }
}

fn account(name: &str) -> DesiredObject {
    DesiredObject::from_resource(
        ObjectKind::ServiceAccount,
        &ServiceAccount {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(NAMESPACE.to_string()),
                ..ObjectMeta::default()
            },
            ..ServiceAccount::default()
        },
    )
    .expect("Should encode service account")
}

fn cluster_binding(name: &str, cluster_role: &str) -> DesiredObject {
    DesiredObject::from_resource(
        ObjectKind::ClusterRoleBinding,
        &ClusterRoleBinding {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "ClusterRole".to_string(),
                name: cluster_role.to_string(),
            },
            subjects: None,
        },
    )
    .expect("Should encode cluster role binding")
}

fn account_key(name: &str) -> ObjectKey {
    ObjectKey::namespaced(ObjectKind::ServiceAccount, NAMESPACE, name)
}

fn binding_key(name: &str) -> ObjectKey {
    ObjectKey::cluster(ObjectKind::ClusterRoleBinding, name)
}

fn object_set(store: &Arc<MemoryStore>) -> ObjectSet {
    ObjectSet::new(
        Arc::clone(store) as Arc<dyn ObjectStore>,
        "test-set",
        &[ObjectKind::ServiceAccount, ObjectKind::ClusterRoleBinding],
    )
}

#[tokio::test]
async fn test_second_apply_of_same_set_writes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let set = object_set(&store);

    let first = set
        .apply(&owner("alice"), vec![account("alice"), cluster_binding("alice-view", "view")])
        .await
        .expect("First apply should succeed");
    assert_eq!(first.created, 2);

    store.clear_operations();
    let second = set
        .apply(&owner("alice"), vec![account("alice"), cluster_binding("alice-view", "view")])
        .await
        .expect("Second apply should succeed");
    assert_eq!(second.unchanged, 2);
    assert!(!second.changed(), "Re-apply should be a no-op: {second:?}");
    assert!(
        store.operations().is_empty(),
        "No store writes expected, got {:?}",
        store.operations()
    );
}

#[tokio::test]
async fn test_changed_content_is_updated() {
    let store = Arc::new(MemoryStore::new());
    let set = object_set(&store);
    set.apply(&owner("alice"), vec![cluster_binding("alice-grant", "view")])
        .await
        .expect("Apply should succeed");

    let report = set
        .apply(&owner("alice"), vec![cluster_binding("alice-grant", "edit")])
        .await
        .expect("Apply should succeed");
    assert_eq!(report.updated, 1);

    let binding: ClusterRoleBinding = store
        .typed(&binding_key("alice-grant"))
        .expect("Binding should exist");
    assert_eq!(binding.role_ref.name, "edit");
}

#[tokio::test]
async fn test_objects_dropped_from_the_set_are_pruned() {
    let store = Arc::new(MemoryStore::new());
    let set = object_set(&store);
    set.apply(
        &owner("alice"),
        vec![
            account("alice"),
            cluster_binding("alice-view", "view"),
            cluster_binding("alice-edit", "edit"),
        ],
    )
    .await
    .expect("Apply should succeed");

    let report = set
        .apply(&owner("alice"), vec![account("alice"), cluster_binding("alice-view", "view")])
        .await
        .expect("Apply should succeed");
    assert_eq!(report.deleted, 1);
    assert_eq!(report.unchanged, 2);
    assert!(store.snapshot(&binding_key("alice-edit")).is_none());
    assert!(store.snapshot(&binding_key("alice-view")).is_some());
}

#[tokio::test]
async fn test_principals_are_written_first_and_deleted_last() {
    let store = Arc::new(MemoryStore::new());
    let set = object_set(&store);
    set.apply(&owner("alice"), vec![cluster_binding("alice-view", "view"), account("alice")])
        .await
        .expect("Apply should succeed");
    assert_eq!(
        store.operations(),
        vec![
            StoreOp::Apply(account_key("alice")),
            StoreOp::Apply(binding_key("alice-view")),
        ]
    );

    store.clear_operations();
    set.apply(&owner("alice"), Vec::new())
        .await
        .expect("Empty apply should succeed");
    assert_eq!(
        store.operations(),
        vec![
            StoreOp::Delete(binding_key("alice-view")),
            StoreOp::Delete(account_key("alice")),
        ]
    );
    assert!(store.keys(ObjectKind::ServiceAccount).is_empty());
    assert!(store.keys(ObjectKind::ClusterRoleBinding).is_empty());
}

#[tokio::test]
async fn test_failed_step_aborts_and_next_apply_resumes() {
    let store = Arc::new(MemoryStore::new());
    let set = object_set(&store);
    store.fail_next("apply", binding_key("alice-view"));

    let err = set
        .apply(&owner("alice"), vec![account("alice"), cluster_binding("alice-view", "view")])
        .await
        .expect_err("Injected failure should surface");
    match err {
        ApplyError::Step { verb, key, .. } => {
            assert_eq!(verb, "create");
            assert_eq!(key, binding_key("alice-view"));
        }
        other => panic!("Unexpected error: {other:?}"),
    }
    assert!(store.snapshot(&account_key("alice")).is_some());
    assert!(store.snapshot(&binding_key("alice-view")).is_none());

    let report = set
        .apply(&owner("alice"), vec![account("alice"), cluster_binding("alice-view", "view")])
        .await
        .expect("Retry should succeed");
    assert_eq!(report.created, 1);
    assert_eq!(report.unchanged, 1);
}

#[tokio::test]
async fn test_kind_outside_the_set_is_rejected_before_any_write() {
    let store = Arc::new(MemoryStore::new());
    let set = ObjectSet::new(
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        "accounts-only",
        &[ObjectKind::ServiceAccount],
    );

    let err = set
        .apply(&owner("alice"), vec![account("alice"), cluster_binding("alice-view", "view")])
        .await
        .expect_err("ClusterRoleBinding is not managed by the set");
    assert!(matches!(err, ApplyError::UnmanagedKind { .. }));
    assert!(store.operations().is_empty());
}

#[tokio::test]
async fn test_other_owners_children_are_left_alone() {
    let store = Arc::new(MemoryStore::new());
    let set = object_set(&store);
    set.apply(&owner("bob"), vec![cluster_binding("bob-view", "view")])
        .await
        .expect("Apply should succeed");
    set.apply(&owner("alice"), vec![cluster_binding("alice-view", "view")])
        .await
        .expect("Apply should succeed");

    let report = set
        .apply(&owner("alice"), Vec::new())
        .await
        .expect("Empty apply should succeed");
    assert_eq!(report.deleted, 1);
    assert!(store.snapshot(&binding_key("bob-view")).is_some());
}

#[tokio::test]
async fn test_unlabelled_object_with_the_same_name_is_adopted_not_pruned() {
    let store = Arc::new(MemoryStore::new());
    store
        .insert(account("alice").object)
        .expect("Should seed pre-existing account");
    let set = object_set(&store);

    let report = set
        .apply(&owner("alice"), vec![account("alice")])
        .await
        .expect("Apply should succeed");
    assert_eq!(report.updated, 1, "Unstamped object should be taken over");

    let report = set
        .apply(&owner("alice"), vec![account("alice")])
        .await
        .expect("Apply should succeed");
    assert!(!report.changed());
}

#[tokio::test]
async fn test_children_carry_ownership_metadata() {
    let store = Arc::new(MemoryStore::new());
    let set = object_set(&store);
    set.apply(&owner("alice"), vec![account("alice")])
        .await
        .expect("Apply should succeed");

    let stored = store
        .snapshot(&account_key("alice"))
        .expect("Account should exist");
    let labels = stored.metadata.labels.clone().unwrap_or_default();
    assert_eq!(
        labels.get("objectset.access.octopilot.io/hash"),
        Some(&owner("alice").set_hash("test-set"))
    );
    let annotations = stored.metadata.annotations.clone().unwrap_or_default();
    assert_eq!(
        annotations.get("objectset.access.octopilot.io/owner-name").map(String::as_str),
        Some("alice")
    );
    let references = stored.metadata.owner_references.clone().unwrap_or_default();
    assert_eq!(references.len(), 1);
    assert_eq!(references[0].uid, "uid-alice");
}
