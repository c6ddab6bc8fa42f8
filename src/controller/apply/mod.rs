//! # Object-Set Apply Engine
//!
//! Converges the cluster to exactly the desired set of objects for one owner.
//!
//! Ownership lives on the children: every applied object carries the owner's
//! set-hash label plus id/owner annotations, so the previously applied set is
//! recovered with a label selector and no object outlives its removal from
//! the desired set. A second apply of the same desired set writes nothing.

mod cluster;
mod memory;
mod object;
mod plan;
mod store;

pub use cluster::KubeObjectStore;
pub use memory::{MemoryStore, StoreOp};
pub use object::{DesiredObject, ObjectKey, ObjectKind, Owner};
pub use plan::{ApplyPlan, ApplyStep, ExistingObject};
pub use store::{ObjectStore, StoreError};

use crate::constants::{
    APPLIED_HASH_ANNOTATION, OBJECTSET_HASH_LABEL, OBJECTSET_ID_ANNOTATION, OWNER_GVK_ANNOTATION,
    OWNER_NAMESPACE_ANNOTATION, OWNER_NAME_ANNOTATION,
};
use kube::api::DynamicObject;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("failed to {verb} {key}: {source}")]
    Step {
        verb: &'static str,
        key: ObjectKey,
        #[source]
        source: StoreError,
    },
    #[error("failed to list owned {kind} objects: {source}")]
    List {
        kind: ObjectKind,
        #[source]
        source: StoreError,
    },
    #[error("{key} is not a kind managed by object set {set_id}")]
    UnmanagedKind { key: ObjectKey, set_id: String },
    #[error("failed to encode {key}: {source}")]
    Encode {
        key: ObjectKey,
        #[source]
        source: serde_json::Error,
    },
}

impl ApplyError {
    /// Whether the underlying store reported a conflict
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, ApplyError::Step { source, .. } if source.is_conflict())
    }
}

/// Counts of what an apply changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

impl ApplyReport {
    #[must_use]
    pub fn changed(&self) -> bool {
        self.created + self.updated + self.deleted > 0
    }
}

/// The objects one controller derives per owner
#[derive(Clone)]
pub struct ObjectSet {
    store: Arc<dyn ObjectStore>,
    set_id: &'static str,
    kinds: Vec<ObjectKind>,
}

impl std::fmt::Debug for ObjectSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectSet")
            .field("set_id", &self.set_id)
            .field("kinds", &self.kinds)
            .finish_non_exhaustive()
    }
}

impl ObjectSet {
    pub fn new(store: Arc<dyn ObjectStore>, set_id: &'static str, kinds: &[ObjectKind]) -> Self {
        Self {
            store,
            set_id,
            kinds: kinds.to_vec(),
        }
    }

    /// Converge `owner`'s children to `desired`
    ///
    /// The first failing step aborts the batch and is returned; steps already
    /// taken stay in place and the next call resumes from there.
    ///
    /// # Errors
    /// `ApplyError` naming the object and operation that failed.
    pub async fn apply(
        &self,
        owner: &Owner,
        desired: Vec<DesiredObject>,
    ) -> Result<ApplyReport, ApplyError> {
        let set_hash = owner.set_hash(self.set_id);

        let mut stamped = Vec::with_capacity(desired.len());
        for object in desired {
            if !self.kinds.contains(&object.key.kind) {
                return Err(ApplyError::UnmanagedKind {
                    key: object.key,
                    set_id: self.set_id.to_string(),
                });
            }
            stamped.push(self.stamp(owner, &set_hash, object)?);
        }

        let existing = self.existing(&set_hash, &stamped).await?;
        let plan = ApplyPlan::compute(stamped, &existing, |d| annotation(&d.object, APPLIED_HASH_ANNOTATION));

        let mut report = ApplyReport {
            unchanged: plan.unchanged.len(),
            ..ApplyReport::default()
        };
        if plan.is_noop() {
            debug!(
                "object set {} for {} is up to date ({} objects)",
                self.set_id, owner.name, report.unchanged
            );
            return Ok(report);
        }

        for step in plan.into_steps() {
            let verb = step.verb();
            let result = match &step {
                ApplyStep::Create(d) | ApplyStep::Update(d) => {
                    self.store.apply(&d.key, &d.object).await.map(|_| ())
                }
                ApplyStep::Delete(key) => self.store.delete(key).await,
            };
            if let Err(source) = result {
                return Err(ApplyError::Step {
                    verb,
                    key: step.key().clone(),
                    source,
                });
            }
            info!("✅ {} {} (set {}, owner {})", verb, step.key(), self.set_id, owner.name);
            match step {
                ApplyStep::Create(_) => report.created += 1,
                ApplyStep::Update(_) => report.updated += 1,
                ApplyStep::Delete(_) => report.deleted += 1,
            }
        }
        Ok(report)
    }

    /// Label, annotate and hash one desired object
    fn stamp(
        &self,
        owner: &Owner,
        set_hash: &str,
        mut desired: DesiredObject,
    ) -> Result<DesiredObject, ApplyError> {
        let meta = &mut desired.object.metadata;
        meta.labels
            .get_or_insert_with(BTreeMap::new)
            .insert(OBJECTSET_HASH_LABEL.to_string(), set_hash.to_string());

        let annotations = meta.annotations.get_or_insert_with(BTreeMap::new);
        annotations.insert(OBJECTSET_ID_ANNOTATION.to_string(), self.set_id.to_string());
        annotations.insert(OWNER_GVK_ANNOTATION.to_string(), owner.gvk());
        annotations.insert(OWNER_NAME_ANNOTATION.to_string(), owner.name.clone());
        if let Some(ns) = &owner.namespace {
            annotations.insert(OWNER_NAMESPACE_ANNOTATION.to_string(), ns.clone());
        }
        annotations.remove(APPLIED_HASH_ANNOTATION);

        if let Some(reference) = owner.owner_reference(meta.namespace.as_deref()) {
            let references = meta.owner_references.get_or_insert_with(Vec::new);
            references.retain(|r| r.uid != reference.uid);
            references.push(reference);
        }

        let encoded = serde_json::to_vec(&desired.object).map_err(|source| ApplyError::Encode {
            key: desired.key.clone(),
            source,
        })?;
        let hash = format!("{:x}", Sha256::digest(&encoded));
        desired
            .object
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(APPLIED_HASH_ANNOTATION.to_string(), hash);
        Ok(desired)
    }

    /// Everything labelled with this owner's set hash, plus desired objects
    /// that already exist without it
    async fn existing(
        &self,
        set_hash: &str,
        desired: &[DesiredObject],
    ) -> Result<BTreeMap<ObjectKey, ExistingObject>, ApplyError> {
        let mut existing = BTreeMap::new();
        for kind in &self.kinds {
            let owned = self
                .store
                .list_labelled(*kind, OBJECTSET_HASH_LABEL, set_hash)
                .await
                .map_err(|source| ApplyError::List { kind: *kind, source })?;
            for object in owned {
                if let Some(key) = ObjectKey::of(&object) {
                    existing.insert(
                        key,
                        ExistingObject {
                            applied_hash: annotation(&object, APPLIED_HASH_ANNOTATION),
                            owned: true,
                        },
                    );
                }
            }
        }

        for object in desired {
            if existing.contains_key(&object.key) {
                continue;
            }
            let current = self
                .store
                .get(&object.key)
                .await
                .map_err(|source| ApplyError::Step {
                    verb: "get",
                    key: object.key.clone(),
                    source,
                })?;
            if let Some(current) = current {
                existing.insert(
                    object.key.clone(),
                    ExistingObject {
                        applied_hash: annotation(&current, APPLIED_HASH_ANNOTATION),
                        owned: false,
                    },
                );
            }
        }
        Ok(existing)
    }
}

fn annotation(object: &DynamicObject, name: &str) -> Option<String> {
    object.metadata.annotations.as_ref()?.get(name).cloned()
}
