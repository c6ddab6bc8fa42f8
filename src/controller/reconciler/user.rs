//! # Identity Policy
//!
//! Derives a `User`'s principal and RBAC bindings:
//!
//! - a ServiceAccount named after the user in the controller namespace
//! - a token Secret for it, on clusters that no longer create one (1.24+)
//! - one ClusterRoleBinding per `clusterRoles` entry
//! - per `roles` entry, a RoleBinding to `role` and another to `clusterRole`
//! - the default ClusterRole when the user requests nothing at all
//!
//! A disabled user derives nothing and loses its kubeconfig.

use crate::constants::{
    SERVICE_ACCOUNT_NAME_ANNOTATION, SERVICE_ACCOUNT_TOKEN_TYPE, TOKEN_SECRET_MIN_MINOR_VERSION,
    USER_ANNOTATION,
};
use crate::controller::apply::{DesiredObject, ObjectKey, ObjectKind, ObjectStore, StoreError};
use crate::controller::generating::{Generated, GeneratingPolicy, PolicyError};
use crate::controller::naming::binding_name;
use crate::crd::{ConditionUpdate, User, UserStatus};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

pub struct IdentityPolicy {
    store: Arc<dyn ObjectStore>,
    namespace: String,
    default_cluster_role: String,
    minor_version: u32,
}

impl std::fmt::Debug for IdentityPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityPolicy")
            .field("namespace", &self.namespace)
            .field("default_cluster_role", &self.default_cluster_role)
            .field("minor_version", &self.minor_version)
            .finish_non_exhaustive()
    }
}

impl IdentityPolicy {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        namespace: String,
        default_cluster_role: String,
        minor_version: u32,
    ) -> Self {
        Self {
            store,
            namespace,
            default_cluster_role,
            minor_version,
        }
    }

    /// Everything an enabled `user` should own
    ///
    /// # Errors
    /// Fails only if a derived object cannot be encoded.
    pub fn desired_objects(&self, user: &User) -> Result<Vec<DesiredObject>, serde_json::Error> {
        let name = user.name_any();
        let mut objects = vec![DesiredObject::from_resource(
            ObjectKind::ServiceAccount,
            &ServiceAccount {
                metadata: ObjectMeta {
                    name: Some(name.clone()),
                    namespace: Some(self.namespace.clone()),
                    annotations: Some(BTreeMap::from([(
                        USER_ANNOTATION.to_string(),
                        name.clone(),
                    )])),
                    ..ObjectMeta::default()
                },
                ..ServiceAccount::default()
            },
        )?];

        if self.minor_version >= TOKEN_SECRET_MIN_MINOR_VERSION {
            objects.push(DesiredObject::from_resource(
                ObjectKind::Secret,
                &Secret {
                    metadata: ObjectMeta {
                        name: Some(name.clone()),
                        namespace: Some(self.namespace.clone()),
                        annotations: Some(BTreeMap::from([(
                            SERVICE_ACCOUNT_NAME_ANNOTATION.to_string(),
                            name.clone(),
                        )])),
                        ..ObjectMeta::default()
                    },
                    type_: Some(SERVICE_ACCOUNT_TOKEN_TYPE.to_string()),
                    ..Secret::default()
                },
            )?);
        }

        objects.extend(self.bindings(user)?);
        Ok(objects)
    }

    fn bindings(&self, user: &User) -> Result<Vec<DesiredObject>, serde_json::Error> {
        let name = user.name_any();
        let subjects = vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: name.clone(),
            namespace: Some(self.namespace.clone()),
            api_group: None,
        }];
        let spec = &user.spec;

        let mut cluster_roles: Vec<&str> = spec.cluster_roles.iter().map(String::as_str).collect();
        if spec.cluster_roles.is_empty() && spec.roles.is_empty() {
            if self.default_cluster_role.is_empty() {
                return Ok(Vec::new());
            }
            cluster_roles.push(&self.default_cluster_role);
        }

        let mut objects = Vec::new();
        for cluster_role in cluster_roles {
            objects.push(DesiredObject::from_resource(
                ObjectKind::ClusterRoleBinding,
                &ClusterRoleBinding {
                    metadata: ObjectMeta {
                        name: Some(binding_name(&name, "", cluster_role, "")),
                        ..ObjectMeta::default()
                    },
                    role_ref: role_ref("ClusterRole", cluster_role),
                    subjects: Some(subjects.clone()),
                },
            )?);
        }

        for request in &spec.roles {
            if request.namespace.is_empty()
                || (request.role.is_empty() && request.cluster_role.is_empty())
            {
                continue;
            }
            if !request.role.is_empty() {
                objects.push(role_binding(
                    binding_name(&name, &request.namespace, "", &request.role),
                    &request.namespace,
                    role_ref("Role", &request.role),
                    &subjects,
                )?);
            }
            if !request.cluster_role.is_empty() {
                objects.push(role_binding(
                    binding_name(&name, &request.namespace, &request.cluster_role, ""),
                    &request.namespace,
                    role_ref("ClusterRole", &request.cluster_role),
                    &subjects,
                )?);
            }
        }
        Ok(objects)
    }

    /// The kubeconfig is owned by the token Secret, so pruning never reaches it
    async fn delete_kubeconfig(&self, user: &str) -> Result<(), StoreError> {
        let key = ObjectKey::cluster(ObjectKind::Kubeconfig, user);
        if self.store.get(&key).await?.is_none() {
            return Ok(());
        }
        self.store.delete(&key).await?;
        info!("🗑️  Deleted kubeconfig for user {}", user);
        Ok(())
    }
}

fn role_ref(kind: &str, name: &str) -> RoleRef {
    RoleRef {
        api_group: RBAC_API_GROUP.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

fn role_binding(
    name: String,
    namespace: &str,
    role_ref: RoleRef,
    subjects: &[Subject],
) -> Result<DesiredObject, serde_json::Error> {
    DesiredObject::from_resource(
        ObjectKind::RoleBinding,
        &RoleBinding {
            metadata: ObjectMeta {
                name: Some(name),
                namespace: Some(namespace.to_string()),
                ..ObjectMeta::default()
            },
            role_ref,
            subjects: Some(subjects.to_vec()),
        },
    )
}

#[async_trait]
impl GeneratingPolicy<User> for IdentityPolicy {
    async fn generate(
        &self,
        user: &User,
        status: UserStatus,
    ) -> Result<Generated<UserStatus>, PolicyError> {
        let name = user.name_any();
        if !user.spec.is_enabled() {
            if let Err(err) = self.delete_kubeconfig(&name).await {
                warn!("Failed to delete kubeconfig of disabled user {}: {}", name, err);
            }
            return Ok(Generated {
                objects: Vec::new(),
                status,
                condition: ConditionUpdate::failed("Disabled", "user is disabled"),
                dependency_revision: None,
            });
        }

        let objects = self
            .desired_objects(user)
            .map_err(|e| PolicyError::Store(StoreError::Serialization(e)))?;
        Ok(Generated::ready(status, objects))
    }

    async fn remove(&self, user: &User) -> Result<(), PolicyError> {
        self.delete_kubeconfig(&user.name_any()).await?;
        Ok(())
    }
}
