//! # User
//!
//! The source identity. Everything this controller derives hangs off a `User`.

use super::status::{Condition, HasConditions};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// User Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: access.octopilot.io/v1alpha1
/// kind: User
/// metadata:
///   name: alice
/// spec:
///   clusterRoles: [view]
///   roles:
///     - namespace: payments
///       role: deployer
///     - namespace: payments
///       clusterRole: edit
/// ```
#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[kube(
    kind = "User",
    group = "access.octopilot.io",
    version = "v1alpha1",
    status = "UserStatus",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Enabled", "type":"boolean", "jsonPath":".spec.enabled"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct UserSpec {
    /// Absent means enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// ClusterRoles bound cluster-wide
    #[serde(default)]
    pub cluster_roles: Vec<String>,
    /// Roles or ClusterRoles bound within a namespace
    #[serde(default)]
    pub roles: Vec<NamespaceRole>,
    /// Context name in the generated kubeconfig
    /// Backfilled from controller configuration when empty
    #[serde(default)]
    pub context: String,
    /// Namespace of the generated kubeconfig context
    /// Backfilled from the first namespaced role, then `default`
    #[serde(default)]
    pub context_namespace: String,
}

/// A namespaced role request
///
/// `role` and `cluster_role` are independent; setting both yields two RoleBindings.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceRole {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub cluster_role: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl HasConditions for UserStatus {
    fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }
}

impl UserSpec {
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// Namespace the kubeconfig context should point at when none is set
    #[must_use]
    pub fn default_context_namespace(&self) -> String {
        if !self.context_namespace.is_empty() {
            return self.context_namespace.clone();
        }
        self.roles
            .iter()
            .map(|r| r.namespace.as_str())
            .find(|ns| !ns.is_empty())
            .unwrap_or(crate::constants::FALLBACK_CONTEXT_NAMESPACE)
            .to_string()
    }
}
