//! # Watch Loop
//!
//! Runs one controller per watched kind until a shutdown signal:
//!
//! - `User`, owning its ServiceAccount, token Secret and bindings
//! - token `Secret`s in the controller namespace
//! - `UserSyncGithub`, re-triggered by changes to the `Kubeconfig` it mirrors

use crate::constants::{OBJECTSET_HASH_LABEL, SERVICE_ACCOUNT_TOKEN_TYPE};
use crate::controller::apply::ObjectKind;
use crate::controller::reconciler::{
    dependent_syncs, reconcile_secret, reconcile_user, reconcile_user_sync, Reconciler,
};
use crate::controller::server::ServerState;
use crate::crd::{Kubeconfig, User, UserSyncGithub};
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleBinding};
use kube::api::Api;
use kube::{Client, ResourceExt};
use kube_runtime::controller::{self, Controller};
use kube_runtime::watcher;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, info, Instrument};

/// Run every controller until shutdown
///
/// # Errors
/// Currently never fails; the signature leaves room for startup checks.
pub async fn run_watch_loop(
    client: Client,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
) -> Result<(), anyhow::Error> {
    let watch_span = tracing::span!(
        tracing::Level::INFO,
        "controller.watch",
        operation = "watch_loop"
    );

    let shutdown_server_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
            shutdown_server_state.set_ready(false);
            info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
        }
    });

    let namespace = reconciler.config.namespace.clone();
    let concurrency = reconciler.config.max_concurrent_reconciliations;
    let owned = || watcher::Config::default().labels(OBJECTSET_HASH_LABEL);

    info!("Starting controllers (namespace {}, concurrency {})", namespace, concurrency);

    let users = Controller::new(Api::<User>::all(client.clone()), watcher::Config::default())
        .owns(Api::<ServiceAccount>::namespaced(client.clone(), &namespace), owned())
        .owns(Api::<Secret>::namespaced(client.clone(), &namespace), owned())
        .owns(Api::<RoleBinding>::all(client.clone()), owned())
        .owns(Api::<ClusterRoleBinding>::all(client.clone()), owned())
        .with_config(controller::Config::default().concurrency(concurrency))
        .shutdown_on_signal()
        .run(
            reconcile_user,
            |obj, error, ctx| handle_reconciliation_error(ObjectKind::User, &obj, error, &ctx),
            Arc::clone(&reconciler),
        )
        .for_each(|result| report(ObjectKind::User, result));

    let token_secrets =
        watcher::Config::default().fields(&format!("type={SERVICE_ACCOUNT_TOKEN_TYPE}"));
    let secrets = Controller::new(
        Api::<Secret>::namespaced(client.clone(), &namespace),
        token_secrets,
    )
    .with_config(controller::Config::default().concurrency(concurrency))
    .shutdown_on_signal()
    .run(
        reconcile_secret,
        |obj, error, ctx| handle_reconciliation_error(ObjectKind::Secret, &obj, error, &ctx),
        Arc::clone(&reconciler),
    )
    .for_each(|result| report(ObjectKind::Secret, result));

    let sync_controller = Controller::new(
        Api::<UserSyncGithub>::all(client.clone()),
        watcher::Config::default(),
    );
    let sync_store = sync_controller.store();
    let syncs = sync_controller
        .watches(
            Api::<Kubeconfig>::all(client.clone()),
            watcher::Config::default(),
            move |kubeconfig: Kubeconfig| {
                dependent_syncs(&kubeconfig.name_any(), sync_store.state())
            },
        )
        .with_config(controller::Config::default().concurrency(concurrency))
        .shutdown_on_signal()
        .run(
            reconcile_user_sync,
            |obj, error, ctx| {
                handle_reconciliation_error(ObjectKind::UserSyncGithub, &obj, error, &ctx)
            },
            Arc::clone(&reconciler),
        )
        .for_each(|result| report(ObjectKind::UserSyncGithub, result));

    async {
        futures::join!(users, secrets, syncs);
    }
    .instrument(watch_span)
    .await;

    server_state.set_ready(false);
    info!("Controller stopped gracefully");
    Ok(())
}

async fn report<T: Debug, E: Debug>(kind: ObjectKind, result: Result<T, E>) {
    match result {
        Ok(object) => debug!(resource.kind = kind.as_str(), "watch.event.success: {:?}", object),
        Err(e) => {
            handle_watch_stream_error(kind, &format!("{e:?}"));
        }
    }
}
