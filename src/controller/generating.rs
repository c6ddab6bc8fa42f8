//! # Generating Handler
//!
//! One reusable reconcile algorithm for every source kind:
//!
//! ```text
//! Observed -> Computing -> Applying -> StatusUpdated
//!     \______________________________________ Removed
//! ```
//!
//! A `GeneratingPolicy` computes the desired children and status for a source
//! object; the handler applies them through an `ObjectSet`, runs any external
//! side effect, writes the `Ready` condition and cascades deletion through a
//! finalizer. With `unique_apply_for_revision` the apply step (external side
//! effects included) runs at most once per revision of the source.

use crate::controller::apply::{
    ApplyError, ApplyReport, DesiredObject, ObjectKey, ObjectKind, ObjectSet, ObjectStore, Owner,
    StoreError,
};
use crate::controller::reconciler::ReconcilerError;
use crate::crd::{
    conditions_changed, ConditionUpdate, HasConditions, User, UserStatus, UserSyncGithub,
    UserSyncStatus,
};
use crate::observability::ReconcileObserver;
use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};

/// A cluster-scoped source resource with a conditions-bearing status
pub trait SourceObject:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    type Status: HasConditions + Clone + Default + PartialEq + Debug + Serialize + Send + Sync;

    const KIND: ObjectKind;

    fn current_status(&self) -> Option<&Self::Status>;
}

impl SourceObject for User {
    type Status = UserStatus;
    const KIND: ObjectKind = ObjectKind::User;

    fn current_status(&self) -> Option<&UserStatus> {
        self.status.as_ref()
    }
}

impl SourceObject for UserSyncGithub {
    type Status = UserSyncStatus;
    const KIND: ObjectKind = ObjectKind::UserSyncGithub;

    fn current_status(&self) -> Option<&UserSyncStatus> {
        self.status.as_ref()
    }
}

#[derive(Debug, Error)]
pub enum PolicyError {
    /// A prerequisite is not there yet; retried with backoff
    #[error("{0}")]
    Transient(String),
    /// The feature is switched off; terminal until configuration changes
    #[error("{0}")]
    Disabled(String),
    /// The source object cannot be acted on; terminal until it is edited
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    External(#[from] anyhow::Error),
}

impl PolicyError {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, PolicyError::Disabled(_) | PolicyError::Invalid(_))
    }

    /// Condition reason
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            PolicyError::Transient(_) => "NotReady",
            PolicyError::Disabled(_) => "Disabled",
            PolicyError::Invalid(_) => "Invalid",
            PolicyError::Store(_) => "StoreError",
            PolicyError::External(_) => "ExternalError",
        }
    }
}

/// Output of one policy pass
#[derive(Debug, Clone)]
pub struct Generated<S> {
    pub objects: Vec<DesiredObject>,
    pub status: S,
    pub condition: ConditionUpdate,
    /// Revision of another object the result depends on
    ///
    /// Folded into the dedup fingerprint, so a change there re-runs the apply
    /// step even when the source itself did not change.
    pub dependency_revision: Option<String>,
}

impl<S> Generated<S> {
    pub fn ready(status: S, objects: Vec<DesiredObject>) -> Self {
        Self {
            objects,
            status,
            condition: ConditionUpdate::ready("Applied"),
            dependency_revision: None,
        }
    }
}

#[async_trait]
pub trait GeneratingPolicy<K: SourceObject>: Send + Sync {
    /// Compute desired children and status; must not write anything
    /// except the explicit cleanup its domain requires
    async fn generate(&self, source: &K, status: K::Status)
        -> Result<Generated<K::Status>, PolicyError>;

    /// External side effect run after the children are applied
    async fn apply_external(
        &self,
        _source: &K,
        _generated: &mut Generated<K::Status>,
    ) -> Result<(), PolicyError> {
        Ok(())
    }

    /// Cleanup outside the object set when the source is removed
    async fn remove(&self, _source: &K) -> Result<(), PolicyError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerPhase {
    Observed,
    Computing,
    Applying,
    StatusUpdated,
    Removed,
}

impl HandlerPhase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerPhase::Observed => "observed",
            HandlerPhase::Computing => "computing",
            HandlerPhase::Applying => "applying",
            HandlerPhase::StatusUpdated => "status-updated",
            HandlerPhase::Removed => "removed",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GeneratingOptions {
    /// Run the apply step at most once per source revision
    pub unique_apply_for_revision: bool,
    /// Finalizer guarding the removal path
    pub finalizer: &'static str,
    /// Condition maintained on the source
    pub condition: &'static str,
}

/// What one `handle` call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    Applied(ApplyReport),
    /// Same revision as the last successful apply; only status was propagated
    Deduplicated,
    /// The policy failed terminally; the failure is on the status
    Failed,
    Removed,
}

pub struct GeneratingHandler<K: SourceObject, P> {
    policy: P,
    objects: ObjectSet,
    store: Arc<dyn ObjectStore>,
    options: GeneratingOptions,
    observer: Arc<dyn ReconcileObserver>,
    seen: Mutex<HashMap<String, String>>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: SourceObject, P> Debug for GeneratingHandler<K, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratingHandler")
            .field("kind", &K::KIND)
            .field("objects", &self.objects)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<K, P> GeneratingHandler<K, P>
where
    K: SourceObject,
    P: GeneratingPolicy<K>,
{
    pub fn new(
        policy: P,
        objects: ObjectSet,
        store: Arc<dyn ObjectStore>,
        options: GeneratingOptions,
        observer: Arc<dyn ReconcileObserver>,
    ) -> Self {
        Self {
            policy,
            objects,
            store,
            options,
            observer,
            seen: Mutex::new(HashMap::new()),
            _kind: PhantomData,
        }
    }

    /// Reconcile one source object
    ///
    /// # Errors
    /// Retryable failures: transient policy errors, apply errors and status
    /// conflicts. Terminal policy failures are reported on the status and
    /// returned as `HandleOutcome::Failed`.
    pub async fn handle(&self, source: &K) -> Result<HandleOutcome, ReconcilerError> {
        let name = source.meta().name.clone().unwrap_or_default();
        let span = info_span!(
            "controller.generating.handle",
            resource.kind = K::KIND.as_str(),
            resource.name = name.as_str()
        );
        async move {
            self.enter(HandlerPhase::Observed, &name);
            if source.meta().deletion_timestamp.is_some() {
                return self.remove(source).await;
            }
            let source = self.ensure_finalizer(source).await?;
            self.generate_and_apply(&source).await
        }
        .instrument(span)
        .await
    }

    async fn generate_and_apply(&self, source: &K) -> Result<HandleOutcome, ReconcilerError> {
        let name = source.meta().name.clone().unwrap_or_default();
        let key = source_key::<K>(source);
        let before = source.current_status().cloned().unwrap_or_default();

        self.enter(HandlerPhase::Computing, &name);
        let mut generated = match self.policy.generate(source, before.clone()).await {
            Ok(generated) => generated,
            Err(err) => return self.fail(source, &before, before.clone(), err).await,
        };

        let revision = source.meta().resource_version.clone().unwrap_or_default();
        let dependency = generated.dependency_revision.clone().unwrap_or_default();
        if self.options.unique_apply_for_revision && self.already_applied(&key, &revision, &dependency) {
            debug!("{} {} already applied at revision {}", K::KIND, name, revision);
            self.observer.apply_deduplicated(K::KIND);
            let new_revision = self.write_status(source, &before, &generated.status).await?;
            if let Some(new_revision) = new_revision {
                self.remember(&key, &new_revision, &dependency);
            }
            self.enter(HandlerPhase::StatusUpdated, &name);
            return Ok(HandleOutcome::Deduplicated);
        }

        self.enter(HandlerPhase::Applying, &name);
        let objects = std::mem::take(&mut generated.objects);
        let report = match self.objects.apply(&Owner::of(source), objects).await {
            Ok(report) => report,
            Err(err) => return self.fail_apply(source, &before, generated.status, err).await,
        };
        self.observer.objects_applied(K::KIND, &report);
        if let Err(err) = self.policy.apply_external(source, &mut generated).await {
            return self.fail(source, &before, generated.status, err).await;
        }

        let mut after = generated.status;
        after.set_condition(self.options.condition, &generated.condition, &now());
        let new_revision = self.write_status(source, &before, &after).await?;
        self.remember(&key, new_revision.as_deref().unwrap_or(&revision), &dependency);
        self.enter(HandlerPhase::StatusUpdated, &name);
        Ok(HandleOutcome::Applied(report))
    }

    async fn fail(
        &self,
        source: &K,
        before: &K::Status,
        mut after: K::Status,
        err: PolicyError,
    ) -> Result<HandleOutcome, ReconcilerError> {
        let name = source.meta().name.clone().unwrap_or_default();
        warn!("{} {} policy failed ({}): {}", K::KIND, name, err.reason(), err);
        after.set_condition(
            self.options.condition,
            &ConditionUpdate::failed(err.reason(), err.to_string()),
            &now(),
        );
        self.write_status(source, before, &after).await?;
        self.observer.policy_failed(K::KIND, err.is_terminal());
        if err.is_terminal() {
            Ok(HandleOutcome::Failed)
        } else {
            Err(ReconcilerError::Policy(err))
        }
    }

    async fn fail_apply(
        &self,
        source: &K,
        before: &K::Status,
        mut after: K::Status,
        err: ApplyError,
    ) -> Result<HandleOutcome, ReconcilerError> {
        warn!("{} apply failed: {}", K::KIND, err);
        after.set_condition(
            self.options.condition,
            &ConditionUpdate::failed("ApplyFailed", err.to_string()),
            &now(),
        );
        self.write_status(source, before, &after).await?;
        Err(ReconcilerError::Apply(err))
    }

    /// Cascade-delete every child, run policy cleanup, release the finalizer
    async fn remove(&self, source: &K) -> Result<HandleOutcome, ReconcilerError> {
        let name = source.meta().name.clone().unwrap_or_default();
        let report = self.objects.apply(&Owner::of(source), Vec::new()).await?;
        self.observer.objects_applied(K::KIND, &report);
        self.policy.remove(source).await?;
        self.forget(&source_key::<K>(source));

        let finalizers = source.meta().finalizers.clone().unwrap_or_default();
        if finalizers.iter().any(|f| f == self.options.finalizer) {
            let remaining: Vec<String> = finalizers
                .into_iter()
                .filter(|f| f != self.options.finalizer)
                .collect();
            self.patch_finalizers(source, remaining).await?;
        }
        self.enter(HandlerPhase::Removed, &name);
        info!("🗑️  {} {} removed, {} children pruned", K::KIND, name, report.deleted);
        Ok(HandleOutcome::Removed)
    }

    async fn ensure_finalizer(&self, source: &K) -> Result<K, ReconcilerError> {
        let mut finalizers = source.meta().finalizers.clone().unwrap_or_default();
        if finalizers.iter().any(|f| f == self.options.finalizer) {
            return Ok(source.clone());
        }
        finalizers.push(self.options.finalizer.to_string());
        let updated = self.patch_finalizers(source, finalizers).await?;
        decode::<K>(updated).map_err(|e| ReconcilerError::Store(StoreError::Serialization(e)))
    }

    async fn patch_finalizers(
        &self,
        source: &K,
        finalizers: Vec<String>,
    ) -> Result<DynamicObject, ReconcilerError> {
        let key = object_key::<K>(source);
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": source.meta().resource_version,
            }
        });
        self.store.patch_merge(&key, &patch).await.map_err(|err| {
            if err.is_conflict() {
                ReconcilerError::Conflict(key.to_string())
            } else {
                ReconcilerError::Store(err)
            }
        })
    }

    /// Write `after` if it differs from `before` in anything but timestamps
    ///
    /// Returns the resource version produced by the write.
    async fn write_status(
        &self,
        source: &K,
        before: &K::Status,
        after: &K::Status,
    ) -> Result<Option<String>, ReconcilerError> {
        if !status_changed(before, after) {
            return Ok(None);
        }
        let key = object_key::<K>(source);
        let value = serde_json::to_value(after).map_err(StoreError::from)?;
        match self
            .store
            .patch_status(&key, source.meta().resource_version.as_deref(), &value)
            .await
        {
            Ok(updated) => Ok(updated.metadata.resource_version),
            Err(err) if err.is_conflict() => Err(ReconcilerError::Conflict(key.to_string())),
            Err(err) => Err(ReconcilerError::Store(err)),
        }
    }

    fn enter(&self, phase: HandlerPhase, name: &str) {
        debug!(phase = phase.as_str(), "{} {} -> {}", K::KIND, name, phase.as_str());
    }

    fn already_applied(&self, key: &str, revision: &str, dependency: &str) -> bool {
        let seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        seen.get(key).is_some_and(|v| *v == fingerprint(revision, dependency))
    }

    fn remember(&self, key: &str, revision: &str, dependency: &str) {
        if !self.options.unique_apply_for_revision {
            return;
        }
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), fingerprint(revision, dependency));
    }

    fn forget(&self, key: &str) {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

fn fingerprint(revision: &str, dependency: &str) -> String {
    format!("{revision}|{dependency}")
}

fn object_key<K: SourceObject>(source: &K) -> ObjectKey {
    ObjectKey {
        kind: K::KIND,
        namespace: source.meta().namespace.clone(),
        name: source.meta().name.clone().unwrap_or_default(),
    }
}

fn source_key<K: SourceObject>(source: &K) -> String {
    object_key::<K>(source).to_string()
}

fn status_changed<S: HasConditions + Clone + PartialEq>(before: &S, after: &S) -> bool {
    let mut a = before.clone();
    let mut b = after.clone();
    a.conditions_mut().clear();
    b.conditions_mut().clear();
    a != b || conditions_changed(before.conditions(), after.conditions())
}

fn decode<K: DeserializeOwned>(object: DynamicObject) -> Result<K, serde_json::Error> {
    serde_json::from_value(serde_json::to_value(object)?)
}

pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}
