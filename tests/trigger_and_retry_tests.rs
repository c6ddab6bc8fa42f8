//! # Trigger and Retry Tests
//!
//! Kubeconfig fan-out to dependent syncs, and the requeue decisions the
//! runtime makes after a reconcile: conflict, terminal and Fibonacci backoff.

mod common;

use common::{repository, Harness};
use kube_runtime::controller::Action;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use user_access_controller::controller::reconciler::{
    backoff_key, dependent_syncs, reconcile_user_sync,
};
use user_access_controller::prelude::*;
use user_access_controller::runtime::error_policy::handle_reconciliation_error;

#[test]
fn test_kubeconfig_change_enqueues_only_its_syncs() {
    let harness = Harness::new();
    harness.seed_sync("alice-ci", "alice", repository("KUBECONFIG"));
    harness.seed_sync("alice-cd", "alice", repository("KUBECONFIG_CD"));
    harness.seed_sync("bob-ci", "bob", repository("KUBECONFIG"));
    let syncs: Vec<Arc<UserSyncGithub>> = ["alice-ci", "alice-cd", "bob-ci"]
        .into_iter()
        .map(|name| Arc::new(harness.sync(name)))
        .collect();

    let mut names: Vec<String> = dependent_syncs("alice", syncs.clone())
        .into_iter()
        .map(|r| r.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["alice-cd".to_string(), "alice-ci".to_string()]);

    assert!(dependent_syncs("carol", syncs).is_empty());
}

#[tokio::test]
async fn test_retryable_errors_back_off_and_success_resets() {
    let harness = Harness::new();
    let ctx = Arc::new(harness.reconciler.clone());
    let sync = Arc::new(harness.seed_sync("alice-ci", "alice", repository("KUBECONFIG")));

    let err = reconcile_user_sync(Arc::clone(&sync), Arc::clone(&ctx))
        .await
        .expect_err("Kubeconfig is not there yet");
    assert!(err.is_retryable());

    let delays: Vec<Action> = (0..3)
        .map(|_| handle_reconciliation_error(ObjectKind::UserSyncGithub, &sync, &err, &ctx))
        .collect();
    assert_eq!(
        delays,
        vec![
            Action::requeue(Duration::from_secs(5)),
            Action::requeue(Duration::from_secs(5)),
            Action::requeue(Duration::from_secs(10)),
        ]
    );

    harness.provision("alice", UserSpec::default(), "tok-1").await;
    let latest = Arc::new(harness.sync("alice-ci"));
    let action = reconcile_user_sync(Arc::clone(&latest), Arc::clone(&ctx))
        .await
        .expect("Reconcile should succeed once the kubeconfig exists");
    assert_eq!(action, Action::await_change());

    let error_count = ctx
        .backoff_states
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&backoff_key(ObjectKind::UserSyncGithub, latest.as_ref()))
        .map(|state| state.error_count);
    assert_eq!(error_count, Some(0), "Success should reset the backoff");

    let action = handle_reconciliation_error(ObjectKind::UserSyncGithub, &latest, &err, &ctx);
    assert_eq!(action, Action::requeue(Duration::from_secs(5)));
}

#[tokio::test]
async fn test_conflicts_requeue_quickly() {
    let harness = Harness::new();
    let ctx = Arc::new(harness.reconciler.clone());
    let user = Arc::new(harness.seed_user("alice", UserSpec::default()));

    let action = handle_reconciliation_error(
        ObjectKind::User,
        &user,
        &ReconcilerError::Conflict("User alice".to_string()),
        &ctx,
    );
    assert_eq!(action, Action::requeue(Duration::from_millis(500)));
    assert!(
        ctx.backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty(),
        "Conflicts do not count towards the backoff"
    );
}

#[tokio::test]
async fn test_terminal_errors_requeue_at_the_slow_interval() {
    let harness = Harness::new();
    let ctx = Arc::new(harness.reconciler.clone());
    let sync = Arc::new(harness.seed_sync("alice-ci", "alice", repository("")));

    let action = handle_reconciliation_error(
        ObjectKind::UserSyncGithub,
        &sync,
        &ReconcilerError::Policy(PolicyError::Invalid("missing required fields".to_string())),
        &ctx,
    );
    assert_eq!(action, Action::requeue(Duration::from_secs(300)));
}

#[tokio::test]
async fn test_failed_outcome_is_rechecked_later() {
    let harness = Harness::build(common::config(), false, 30);
    let ctx = Arc::new(harness.reconciler.clone());
    let sync = Arc::new(harness.seed_sync("alice-ci", "alice", repository("KUBECONFIG")));

    let action = reconcile_user_sync(sync, ctx)
        .await
        .expect("Disabled synchronization is reported, not raised");
    assert_eq!(action, Action::requeue(Duration::from_secs(300)));
}

#[tokio::test]
async fn test_removed_sync_drops_its_backoff_entry() {
    let harness = Harness::new();
    let ctx = Arc::new(harness.reconciler.clone());
    harness.provision("alice", UserSpec::default(), "tok-1").await;
    let sync = Arc::new(harness.seed_sync("alice-ci", "alice", repository("KUBECONFIG")));
    reconcile_user_sync(Arc::clone(&sync), Arc::clone(&ctx))
        .await
        .expect("Reconcile should succeed");

    let key = backoff_key(ObjectKind::UserSyncGithub, sync.as_ref());
    let err = ReconcilerError::Policy(PolicyError::Transient("GitHub is unavailable".to_string()));
    let action = handle_reconciliation_error(ObjectKind::UserSyncGithub, &sync, &err, &ctx);
    assert_eq!(action, Action::requeue(Duration::from_secs(5)));
    assert!(ctx
        .backoff_states
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .contains_key(&key));

    harness
        .store
        .delete(&ObjectKey::cluster(ObjectKind::UserSyncGithub, "alice-ci"))
        .await
        .expect("Delete should be accepted");
    let action = reconcile_user_sync(Arc::new(harness.sync("alice-ci")), Arc::clone(&ctx))
        .await
        .expect("Removal should succeed");
    assert_eq!(action, Action::await_change());

    assert!(
        !ctx.backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&key),
        "Removed objects should not keep a backoff entry"
    );
}
