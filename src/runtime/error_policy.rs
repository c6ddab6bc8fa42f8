//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch loops.
//! This module handles reconciliation errors and watch stream errors.

use crate::controller::apply::ObjectKind;
use crate::controller::reconciler::{backoff_key, BackoffState, Reconciler, ReconcilerError};
use crate::observability;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tracing::{error, info, warn};

/// Decide when a failed object is retried
///
/// - conflicts are retried quickly, the object is re-read anyway
/// - terminal failures wait for the slow interval
/// - everything else backs off along a per-object Fibonacci sequence
pub fn handle_reconciliation_error<K>(
    kind: ObjectKind,
    obj: &Arc<K>,
    error: &ReconcilerError,
    ctx: &Arc<Reconciler>,
) -> Action
where
    K: Resource<DynamicType = ()>,
{
    let name = obj.name_any();
    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.kind = kind.as_str(),
        resource.name = name.as_str(),
        error = %error
    );
    let _error_guard = error_span.enter();

    if error.is_conflict() {
        let delay = ctx.config.conflict_requeue_duration();
        info!("🔄 Conflict on {} {}, retrying in {}ms", kind, name, delay.as_millis());
        observability::metrics::increment_requeues_total("conflict");
        return Action::requeue(delay);
    }

    if !error.is_retryable() {
        let delay = ctx.config.reconciliation_error_requeue_duration();
        warn!(
            "{} {} failed terminally, re-checking in {}s: {}",
            kind,
            name,
            delay.as_secs(),
            error
        );
        observability::metrics::increment_requeues_total("terminal");
        return Action::requeue(delay);
    }

    error!("Reconciliation error for {} {}: {:?}", kind, name, error);
    let (backoff_seconds, error_count) = {
        let mut states = ctx
            .backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let state = states
            .entry(backoff_key(kind, obj.as_ref()))
            .or_insert_with(|| {
                BackoffState::new(ctx.config.backoff_min_secs, ctx.config.backoff_max_secs)
            });
        state.increment_error();
        (state.backoff.next_backoff_seconds(), state.error_count)
    };

    let next_trigger_time = chrono::Utc::now()
        + chrono::Duration::seconds(i64::try_from(backoff_seconds).unwrap_or(i64::MAX));
    info!(
        "🔄 Retrying with Fibonacci backoff: {}s (error count: {})",
        backoff_seconds, error_count
    );
    info!(
        "📅 Next retry scheduled: {} (in {}s)",
        next_trigger_time.to_rfc3339(),
        backoff_seconds
    );

    observability::metrics::increment_requeues_total("error-backoff");
    Action::requeue(Duration::from_secs(backoff_seconds))
}

/// Classification of a controller stream error, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    Unauthorized,
    Expired,
    Throttled,
    NotFound,
    Other,
}

impl WatchErrorKind {
    /// Classify from the error's debug rendering
    ///
    /// 404 is checked before 401: a plain-text 404 surfaces as a decode error
    /// that also mentions `WatchFailed`.
    #[must_use]
    pub fn classify(error: &str) -> Self {
        let is_not_found =
            error.contains("ObjectNotFound") || error.contains("404") || error.contains("not found");
        if (error.contains("401") || error.contains("Unauthorized")) && !is_not_found {
            WatchErrorKind::Unauthorized
        } else if error.contains("410")
            || error.contains("too old resource version")
            || error.contains("Expired")
            || error.contains("Gone")
        {
            WatchErrorKind::Expired
        } else if error.contains("429")
            || error.contains("storage is (re)initializing")
            || error.contains("TooManyRequests")
        {
            WatchErrorKind::Throttled
        } else if is_not_found {
            WatchErrorKind::NotFound
        } else {
            WatchErrorKind::Other
        }
    }
}

/// Log a controller stream error the way an operator needs to read it
pub fn handle_watch_stream_error(kind: ObjectKind, error: &str) -> WatchErrorKind {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        resource.kind = kind.as_str(),
        error = %error
    );
    let _error_guard = error_span.enter();

    let class = WatchErrorKind::classify(error);
    match class {
        WatchErrorKind::Unauthorized => {
            error!(
                "❌ {} watch authentication failed (401 Unauthorized) - RBAC may have been revoked or token expired",
                kind
            );
            error!("🔍 Verify the controller ClusterRole and ClusterRoleBinding still exist");
        }
        WatchErrorKind::Expired => {
            warn!("{} watch resource version expired (410), the watch restarts", kind);
        }
        WatchErrorKind::Throttled => {
            warn!("API server is throttling the {} watch (429)", kind);
        }
        WatchErrorKind::NotFound => {
            warn!(
                "{} not found (404) - this may be normal if the object was deleted or the CRD is missing. Error: {}",
                kind, error
            );
        }
        WatchErrorKind::Other => {
            error!("{} controller stream error: {}", kind, error);
        }
    }
    class
}
