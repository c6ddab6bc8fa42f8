//! # UserSyncGithub
//!
//! Requests that a user's generated kubeconfig be mirrored into a GitHub
//! Actions secret, at repository scope or inside an environment.

use super::status::{Condition, HasConditions};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// # Example
///
/// ```yaml
/// apiVersion: access.octopilot.io/v1alpha1
/// kind: UserSyncGithub
/// metadata:
///   name: alice-deploy
/// spec:
///   user: alice
///   github:
///     owner: octopilot
///     repository: payments
///     environment: production
///     secretName: KUBECONFIG
/// ```
#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[kube(
    kind = "UserSyncGithub",
    group = "access.octopilot.io",
    version = "v1alpha1",
    status = "UserSyncStatus",
    printcolumn = r#"{"name":"User", "type":"string", "jsonPath":".spec.user"}"#,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Outcome", "type":"string", "jsonPath":".status.lastOutcome"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct UserSyncGithubSpec {
    /// Name of the `User` whose kubeconfig is mirrored
    pub user: String,
    #[serde(default)]
    pub github: GithubSyncSpec,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GithubSyncSpec {
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub repository: String,
    /// Repository scope when empty
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub secret_name: String,
}

impl GithubSyncSpec {
    /// Names of required fields that are empty
    #[must_use]
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("owner", &self.owner),
            ("repository", &self.repository),
            ("secretName", &self.secret_name),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(field, _)| field)
        .collect()
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.missing_fields().is_empty()
    }

    /// `owner/repository[/environment]`, for logs
    #[must_use]
    pub fn location(&self) -> String {
        if self.environment.is_empty() {
            format!("{}/{}", self.owner, self.repository)
        } else {
            format!("{}/{}/{}", self.owner, self.repository, self.environment)
        }
    }
}

/// Result of the last mirror pass
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub enum MirrorOutcome {
    /// The secret was written
    Pushed,
    /// A same-named secret exists that this controller did not create
    Skipped,
    /// The mirrored secret was deleted
    Removed,
}

impl MirrorOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MirrorOutcome::Pushed => "pushed",
            MirrorOutcome::Skipped => "skipped",
            MirrorOutcome::Removed => "removed",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserSyncStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<MirrorOutcome>,
}

impl HasConditions for UserSyncStatus {
    fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }
}
