//! # Object Model
//!
//! Kinds, keys and owners as seen by the apply engine. Every object travels
//! as a `DynamicObject` so one store implementation serves all kinds.

use crate::crd::{Kubeconfig, User, UserSyncGithub};
use k8s_openapi::api::core::v1 as core;
use k8s_openapi::api::rbac::v1 as rbac;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{ApiResource, DynamicObject, TypeMeta};
use kube::Resource;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

/// Every kind this controller reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    ServiceAccount,
    Secret,
    RoleBinding,
    ClusterRoleBinding,
    Kubeconfig,
    User,
    UserSyncGithub,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 7] = [
        ObjectKind::ServiceAccount,
        ObjectKind::Secret,
        ObjectKind::RoleBinding,
        ObjectKind::ClusterRoleBinding,
        ObjectKind::Kubeconfig,
        ObjectKind::User,
        ObjectKind::UserSyncGithub,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::ServiceAccount => "ServiceAccount",
            ObjectKind::Secret => "Secret",
            ObjectKind::RoleBinding => "RoleBinding",
            ObjectKind::ClusterRoleBinding => "ClusterRoleBinding",
            ObjectKind::Kubeconfig => "Kubeconfig",
            ObjectKind::User => "User",
            ObjectKind::UserSyncGithub => "UserSyncGithub",
        }
    }

    #[must_use]
    pub fn from_kind(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == kind)
    }

    /// Apply order: principals first, then what references them
    ///
    /// Deletes run in the reverse order.
    #[must_use]
    pub fn priority(self) -> u8 {
        match self {
            ObjectKind::ServiceAccount => 0,
            ObjectKind::Secret => 1,
            ObjectKind::RoleBinding | ObjectKind::ClusterRoleBinding => 2,
            ObjectKind::Kubeconfig | ObjectKind::User | ObjectKind::UserSyncGithub => 3,
        }
    }

    #[must_use]
    pub fn is_namespaced(self) -> bool {
        matches!(
            self,
            ObjectKind::ServiceAccount | ObjectKind::Secret | ObjectKind::RoleBinding
        )
    }

    #[must_use]
    pub fn api_resource(self) -> ApiResource {
        match self {
            ObjectKind::ServiceAccount => ApiResource::erase::<core::ServiceAccount>(&()),
            ObjectKind::Secret => ApiResource::erase::<core::Secret>(&()),
            ObjectKind::RoleBinding => ApiResource::erase::<rbac::RoleBinding>(&()),
            ObjectKind::ClusterRoleBinding => ApiResource::erase::<rbac::ClusterRoleBinding>(&()),
            ObjectKind::Kubeconfig => ApiResource::erase::<Kubeconfig>(&()),
            ObjectKind::User => ApiResource::erase::<User>(&()),
            ObjectKind::UserSyncGithub => ApiResource::erase::<UserSyncGithub>(&()),
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one object in the cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub kind: ObjectKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn cluster(kind: ObjectKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: None,
            name: name.into(),
        }
    }

    pub fn namespaced(kind: ObjectKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Key of a `DynamicObject`, when its kind is one we know
    #[must_use]
    pub fn of(object: &DynamicObject) -> Option<Self> {
        let kind = ObjectKind::from_kind(&object.types.as_ref()?.kind)?;
        Some(Self {
            kind,
            namespace: object.metadata.namespace.clone(),
            name: object.metadata.name.clone()?,
        })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// One object the current policy pass wants to exist
#[derive(Debug, Clone)]
pub struct DesiredObject {
    pub key: ObjectKey,
    pub object: DynamicObject,
}

impl DesiredObject {
    /// Convert a typed resource
    ///
    /// # Errors
    /// Fails if the resource cannot be represented as JSON or has no name.
    pub fn from_resource<K>(kind: ObjectKind, resource: &K) -> Result<Self, serde_json::Error>
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let mut object: DynamicObject = serde_json::from_value(serde_json::to_value(resource)?)?;
        object.types = Some(TypeMeta {
            api_version: K::api_version(&()).into_owned(),
            kind: K::kind(&()).into_owned(),
        });
        let name = object.metadata.name.clone().ok_or_else(|| {
            <serde_json::Error as serde::de::Error>::custom(format!("{kind} without a name"))
        })?;
        let key = ObjectKey {
            kind,
            namespace: object.metadata.namespace.clone(),
            name,
        };
        Ok(Self { key, object })
    }
}

/// The source object an object set belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
    pub uid: Option<String>,
}

impl Owner {
    pub fn of<K: Resource<DynamicType = ()>>(resource: &K) -> Self {
        let meta = resource.meta();
        Self {
            api_version: K::api_version(&()).into_owned(),
            kind: K::kind(&()).into_owned(),
            name: meta.name.clone().unwrap_or_default(),
            namespace: meta.namespace.clone(),
            uid: meta.uid.clone(),
        }
    }

    /// `group/version, Kind=Kind`
    #[must_use]
    pub fn gvk(&self) -> String {
        format!("{}, Kind={}", self.api_version, self.kind)
    }

    /// Label value shared by everything `set_id` applied for this owner
    ///
    /// Hex SHA-256 clipped to 40 characters so it is a valid label value.
    #[must_use]
    pub fn set_hash(&self, set_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(set_id.as_bytes());
        hasher.update(b"/");
        hasher.update(self.gvk().as_bytes());
        hasher.update(b"/");
        hasher.update(self.namespace.as_deref().unwrap_or_default().as_bytes());
        hasher.update(b"/");
        hasher.update(self.name.as_bytes());
        let hex = format!("{:x}", hasher.finalize());
        hex[..40].to_string()
    }

    /// Owner reference for a child in `child_namespace`
    ///
    /// `None` when the owner has no uid yet, or when Kubernetes scoping rules
    /// forbid the reference (a namespaced owner of a cluster-scoped child, or
    /// of a child in another namespace).
    #[must_use]
    pub fn owner_reference(&self, child_namespace: Option<&str>) -> Option<OwnerReference> {
        let uid = self.uid.clone()?;
        let allowed = match self.namespace.as_deref() {
            None => true,
            Some(owner_ns) => child_namespace == Some(owner_ns),
        };
        allowed.then(|| OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid,
            controller: Some(true),
            block_owner_deletion: Some(true),
        })
    }
}
