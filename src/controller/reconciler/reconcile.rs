//! # Reconcile Entry Points
//!
//! One function per watched kind, called by the runtime. Errors are handled
//! by the error policy, which owns retry backoff.

use crate::controller::apply::ObjectKind;
use crate::controller::generating::HandleOutcome;
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::controller::reconciler::CredentialOutcome;
use crate::crd::{User, UserSyncGithub};
use k8s_openapi::api::core::v1::Secret;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, Instrument};

/// Key of `resource` in the backoff table
pub fn backoff_key<K: Resource<DynamicType = ()>>(kind: ObjectKind, resource: &K) -> String {
    format!(
        "{}/{}/{}",
        kind,
        resource.meta().namespace.as_deref().unwrap_or_default(),
        resource.name_any()
    )
}

pub async fn reconcile_user(
    user: Arc<User>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let name = user.name_any();
    let span = tracing::info_span!("controller.user.reconcile", resource.name = name.as_str());
    observed(ObjectKind::User, user.as_ref(), &ctx, async {
        info!("🔄 Reconciling User: {}", name);
        let outcome = ctx.users.handle(&user).await?;
        Ok(outcome_action(outcome, &ctx, &backoff_key(ObjectKind::User, user.as_ref())))
    })
    .instrument(span)
    .await
}

pub async fn reconcile_secret(
    secret: Arc<Secret>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let name = secret.name_any();
    let namespace = secret.namespace().unwrap_or_default();
    let span = tracing::info_span!(
        "controller.secret.reconcile",
        resource.name = name.as_str(),
        resource.namespace = namespace.as_str()
    );
    observed(ObjectKind::Secret, secret.as_ref(), &ctx, async {
        match ctx.credentials.derive(&secret).await? {
            CredentialOutcome::Ignored(reason) => {
                debug!("Ignoring secret {}: {}", name, reason);
            }
            CredentialOutcome::Waiting => {
                debug!("Waiting for token in secret {}", name);
            }
            CredentialOutcome::Applied(report) => {
                debug!("Kubeconfig from secret {}: {:?}", name, report);
            }
        }
        Ok(Action::await_change())
    })
    .instrument(span)
    .await
}

pub async fn reconcile_user_sync(
    sync: Arc<UserSyncGithub>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let name = sync.name_any();
    let span = tracing::info_span!(
        "controller.usersync.reconcile",
        resource.name = name.as_str(),
        resource.user = sync.spec.user.as_str()
    );
    observed(ObjectKind::UserSyncGithub, sync.as_ref(), &ctx, async {
        info!("🔄 Reconciling UserSyncGithub: {}", name);
        let outcome = ctx.syncs.handle(&sync).await?;
        Ok(outcome_action(
            outcome,
            &ctx,
            &backoff_key(ObjectKind::UserSyncGithub, sync.as_ref()),
        ))
    })
    .instrument(span)
    .await
}

/// Report start and finish, and clear the backoff after a success
async fn observed<K, F>(
    kind: ObjectKind,
    resource: &K,
    ctx: &Reconciler,
    work: F,
) -> Result<Action, ReconcilerError>
where
    K: Resource<DynamicType = ()>,
    F: std::future::Future<Output = Result<Action, ReconcilerError>>,
{
    let start = Instant::now();
    ctx.observer.reconcile_started(kind);
    let result = work.await;
    ctx.observer
        .reconcile_finished(kind, start.elapsed(), result.is_ok());
    if result.is_ok() {
        ctx.reset_backoff(&backoff_key(kind, resource));
    }
    result
}

/// Terminal failures are re-checked at the slow interval; everything else
/// waits for the next change. A removed object takes its backoff entry along.
fn outcome_action(outcome: HandleOutcome, ctx: &Reconciler, key: &str) -> Action {
    match outcome {
        HandleOutcome::Failed => {
            Action::requeue(ctx.config.reconciliation_error_requeue_duration())
        }
        HandleOutcome::Removed => {
            ctx.forget_backoff(key);
            Action::await_change()
        }
        HandleOutcome::Applied(_) | HandleOutcome::Deduplicated => Action::await_change(),
    }
}
