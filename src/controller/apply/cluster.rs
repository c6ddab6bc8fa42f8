//! # Kubernetes Object Store
//!
//! `ObjectStore` over `kube::Api<DynamicObject>`, using server-side apply.

use super::object::{ObjectKey, ObjectKind};
use super::store::{ObjectStore, StoreError};
use crate::constants::FIELD_MANAGER;
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::Client;
use tracing::debug;

#[derive(Clone)]
pub struct KubeObjectStore {
    client: Client,
}

impl std::fmt::Debug for KubeObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeObjectStore").finish_non_exhaustive()
    }
}

impl KubeObjectStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, kind: ObjectKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = kind.api_resource();
        match namespace {
            Some(ns) if kind.is_namespaced() => {
                Api::namespaced_with(self.client.clone(), ns, &resource)
            }
            _ => Api::all_with(self.client.clone(), &resource),
        }
    }

    fn api_for(&self, key: &ObjectKey) -> Api<DynamicObject> {
        self.api(key.kind, key.namespace.as_deref())
    }
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, StoreError> {
        self.api_for(key)
            .get_opt(&key.name)
            .await
            .map_err(|e| StoreError::from_kube(key, e))
    }

    async fn list_labelled(
        &self,
        kind: ObjectKind,
        label: &str,
        value: &str,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        let params = ListParams::default().labels(&format!("{label}={value}"));
        let list = self
            .api(kind, None)
            .list(&params)
            .await
            .map_err(|e| StoreError::Kube(Box::new(e)))?;
        Ok(list.items)
    }

    async fn apply(
        &self,
        key: &ObjectKey,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        debug!("server-side apply {}", key);
        self.api_for(key)
            .patch(
                &key.name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(object),
            )
            .await
            .map_err(|e| StoreError::from_kube(key, e))
    }

    async fn patch_merge(
        &self,
        key: &ObjectKey,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject, StoreError> {
        self.api_for(key)
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| StoreError::from_kube(key, e))
    }

    async fn patch_status(
        &self,
        key: &ObjectKey,
        resource_version: Option<&str>,
        status: &serde_json::Value,
    ) -> Result<DynamicObject, StoreError> {
        // resourceVersion in a merge patch acts as a precondition
        let mut patch = serde_json::json!({ "status": status });
        if let Some(rv) = resource_version {
            patch["metadata"] = serde_json::json!({ "resourceVersion": rv });
        }
        self.api_for(key)
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| StoreError::from_kube(key, e))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        match self
            .api_for(key)
            .delete(&key.name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => {
                debug!("{} already absent", key);
                Ok(())
            }
            Err(e) => Err(StoreError::from_kube(key, e)),
        }
    }
}
