//! # In-Memory Object Store
//!
//! An `ObjectStore` with just enough API server behaviour for tests:
//! resource versions, uids, finalizer-gated deletion, status preconditions
//! and an operation log.

use super::object::{ObjectKey, ObjectKind};
use super::store::{ObjectStore, StoreError};
use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A write recorded by `MemoryStore`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Apply(ObjectKey),
    PatchMerge(ObjectKey),
    PatchStatus(ObjectKey),
    Delete(ObjectKey),
}

impl StoreOp {
    #[must_use]
    pub fn key(&self) -> &ObjectKey {
        match self {
            StoreOp::Apply(k) | StoreOp::PatchMerge(k) | StoreOp::PatchStatus(k) | StoreOp::Delete(k) => k,
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<ObjectKey, DynamicObject>,
    revision: u64,
    operations: Vec<StoreOp>,
    failures: Vec<(&'static str, ObjectKey)>,
}

impl MemoryState {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn take_failure(&mut self, verb: &'static str, key: &ObjectKey) -> Result<(), StoreError> {
        if let Some(pos) = self
            .failures
            .iter()
            .position(|(v, k)| *v == verb && k == key)
        {
            self.failures.remove(pos);
            return Err(StoreError::Other(format!("injected {verb} failure for {key}")));
        }
        Ok(())
    }

    fn store(&mut self, key: ObjectKey, mut object: DynamicObject) -> DynamicObject {
        object.metadata.resource_version = Some(self.next_revision());
        if object.metadata.uid.is_none() {
            object.metadata.uid = Some(format!("uid-{}", self.revision));
        }
        let gone = object.metadata.deletion_timestamp.is_some()
            && object
                .metadata
                .finalizers
                .as_ref()
                .is_none_or(Vec::is_empty);
        if gone {
            self.objects.remove(&key);
        } else {
            self.objects.insert(key, object.clone());
        }
        object
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an object without recording an operation
    pub fn insert(&self, object: DynamicObject) -> Option<DynamicObject> {
        let key = ObjectKey::of(&object)?;
        Some(self.lock().store(key, object))
    }

    /// Seed a typed resource without recording an operation
    ///
    /// # Errors
    /// Fails if the resource cannot be converted to a dynamic object.
    pub fn insert_resource<K>(&self, kind: ObjectKind, resource: &K) -> Result<DynamicObject, StoreError>
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let desired = super::object::DesiredObject::from_resource(kind, resource)?;
        Ok(self.lock().store(desired.key, desired.object))
    }

    #[must_use]
    pub fn snapshot(&self, key: &ObjectKey) -> Option<DynamicObject> {
        self.lock().objects.get(key).cloned()
    }

    /// Current state decoded as a typed resource
    #[must_use]
    pub fn typed<K: DeserializeOwned>(&self, key: &ObjectKey) -> Option<K> {
        let object = self.snapshot(key)?;
        serde_json::to_value(object)
            .ok()
            .and_then(|v| serde_json::from_value(v).ok())
    }

    #[must_use]
    pub fn keys(&self, kind: ObjectKind) -> Vec<ObjectKey> {
        self.lock()
            .objects
            .keys()
            .filter(|k| k.kind == kind)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn operations(&self) -> Vec<StoreOp> {
        self.lock().operations.clone()
    }

    /// Number of writes against objects of `kind`
    #[must_use]
    pub fn writes_for(&self, kind: ObjectKind) -> usize {
        self.lock()
            .operations
            .iter()
            .filter(|op| op.key().kind == kind)
            .count()
    }

    pub fn clear_operations(&self) {
        self.lock().operations.clear();
    }

    /// Make the next `verb` ("apply", "patch", "status", "delete") on `key` fail
    pub fn fail_next(&self, verb: &'static str, key: ObjectKey) {
        self.lock().failures.push((verb, key));
    }

    /// Simulate a write by another client, moving the resource version
    pub fn touch(&self, key: &ObjectKey) {
        let mut state = self.lock();
        if let Some(object) = state.objects.get(key).cloned() {
            state.store(key.clone(), object);
        }
    }
}

fn merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (k, v) in patch {
                if v.is_null() {
                    target.remove(k);
                } else {
                    merge(target.entry(k.clone()).or_insert(Value::Null), v);
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

fn merged(object: &DynamicObject, patch: &Value) -> Result<DynamicObject, StoreError> {
    let mut value = serde_json::to_value(object)?;
    merge(&mut value, patch);
    Ok(serde_json::from_value(value)?)
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, StoreError> {
        Ok(self.snapshot(key))
    }

    async fn list_labelled(
        &self,
        kind: ObjectKind,
        label: &str,
        value: &str,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        Ok(self
            .lock()
            .objects
            .iter()
            .filter(|(key, object)| {
                key.kind == kind
                    && object
                        .metadata
                        .labels
                        .as_ref()
                        .and_then(|labels| labels.get(label))
                        .is_some_and(|v| v == value)
            })
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn apply(
        &self,
        key: &ObjectKey,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let mut state = self.lock();
        state.take_failure("apply", key)?;
        state.operations.push(StoreOp::Apply(key.clone()));

        let mut next = object.clone();
        if let Some(current) = state.objects.get(key) {
            next.metadata.uid.clone_from(&current.metadata.uid);
            next.metadata.deletion_timestamp.clone_from(&current.metadata.deletion_timestamp);
            if next.metadata.finalizers.is_none() {
                next.metadata.finalizers.clone_from(&current.metadata.finalizers);
            }
            if next.data.get("status").is_none() {
                if let (Some(status), Some(data)) =
                    (current.data.get("status"), next.data.as_object_mut())
                {
                    data.insert("status".into(), status.clone());
                }
            }
        }
        Ok(state.store(key.clone(), next))
    }

    async fn patch_merge(
        &self,
        key: &ObjectKey,
        patch: &Value,
    ) -> Result<DynamicObject, StoreError> {
        let mut state = self.lock();
        state.take_failure("patch", key)?;
        let current = state
            .objects
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        let next = merged(current, patch)?;
        state.operations.push(StoreOp::PatchMerge(key.clone()));
        Ok(state.store(key.clone(), next))
    }

    async fn patch_status(
        &self,
        key: &ObjectKey,
        resource_version: Option<&str>,
        status: &Value,
    ) -> Result<DynamicObject, StoreError> {
        let mut state = self.lock();
        state.take_failure("status", key)?;
        let current = state
            .objects
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if resource_version.is_some() && current.metadata.resource_version.as_deref() != resource_version {
            return Err(StoreError::Conflict(key.to_string()));
        }
        let next = merged(current, &serde_json::json!({ "status": status }))?;
        state.operations.push(StoreOp::PatchStatus(key.clone()));
        Ok(state.store(key.clone(), next))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.take_failure("delete", key)?;
        let Some(current) = state.objects.get(key).cloned() else {
            return Ok(());
        };
        state.operations.push(StoreOp::Delete(key.clone()));
        let has_finalizers = current
            .metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| !f.is_empty());
        if has_finalizers {
            if current.metadata.deletion_timestamp.is_none() {
                let next = merged(
                    &current,
                    &serde_json::json!({ "metadata": { "deletionTimestamp": "2026-01-01T00:00:00Z" } }),
                )?;
                state.store(key.clone(), next);
            }
        } else {
            state.objects.remove(key);
        }
        Ok(())
    }
}
