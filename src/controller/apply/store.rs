//! # Object Store
//!
//! The narrow slice of the cluster API the engine needs. `KubeObjectStore`
//! is the production implementation; `MemoryStore` backs the tests.

use super::object::{ObjectKey, ObjectKind};
use async_trait::async_trait;
use kube::api::DynamicObject;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("conflict writing {0}: the object was modified")]
    Conflict(String),
    #[error("Kubernetes API error: {0}")]
    Kube(#[source] Box<kube::Error>),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    /// Map a kube error, classifying 404 and 409 responses
    pub(crate) fn from_kube(key: &ObjectKey, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ref api_err) if api_err.code == 404 => {
                StoreError::NotFound(key.to_string())
            }
            kube::Error::Api(ref api_err) if api_err.code == 409 => {
                StoreError::Conflict(key.to_string())
            }
            other => StoreError::Kube(Box::new(other)),
        }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch current state; `None` when absent
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, StoreError>;

    /// All objects of `kind`, in every namespace, labelled `label=value`
    async fn list_labelled(
        &self,
        kind: ObjectKind,
        label: &str,
        value: &str,
    ) -> Result<Vec<DynamicObject>, StoreError>;

    /// Create or replace the fields this controller manages
    async fn apply(&self, key: &ObjectKey, object: &DynamicObject)
        -> Result<DynamicObject, StoreError>;

    /// JSON merge patch of the main resource
    async fn patch_merge(
        &self,
        key: &ObjectKey,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject, StoreError>;

    /// Replace the status block
    ///
    /// With `resource_version` set the write fails with `StoreError::Conflict`
    /// if the object changed since it was read.
    async fn patch_status(
        &self,
        key: &ObjectKey,
        resource_version: Option<&str>,
        status: &serde_json::Value,
    ) -> Result<DynamicObject, StoreError>;

    /// Delete; an absent object counts as deleted
    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError>;
}
