//! # Kubeconfig
//!
//! Generated client configuration for a `User`. The spec mirrors the kubectl
//! kubeconfig layout so that rendering it yields a usable file.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[kube(kind = "Kubeconfig", group = "access.octopilot.io", version = "v1alpha1")]
pub struct KubeconfigSpec {
    #[serde(default)]
    pub clusters: Vec<NamedCluster>,
    #[serde(default, rename = "users")]
    pub auth_infos: Vec<NamedAuthInfo>,
    #[serde(default)]
    pub contexts: Vec<NamedContext>,
    #[serde(default, rename = "current-context")]
    pub current_context: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: ClusterEndpoint,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub struct ClusterEndpoint {
    pub server: String,
    /// Base64 PEM bundle
    #[serde(default, rename = "certificate-authority-data")]
    pub certificate_authority_data: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub struct NamedAuthInfo {
    pub name: String,
    pub user: AuthInfo,
}

#[derive(Clone, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub struct AuthInfo {
    #[serde(default)]
    pub token: String,
}

impl std::fmt::Debug for AuthInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthInfo").field("token", &"***").finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub struct NamedContext {
    pub name: String,
    pub context: ContextSpec,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub struct ContextSpec {
    pub cluster: String,
    pub user: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KubeconfigDocument<'a> {
    api_version: &'static str,
    kind: &'static str,
    #[serde(flatten)]
    spec: &'a KubeconfigSpec,
}

impl KubeconfigSpec {
    /// Render as a kubectl-compatible YAML document
    ///
    /// The buffer holds a bearer token and is wiped on drop.
    pub fn to_yaml(&self) -> Result<Zeroizing<String>, serde_yaml::Error> {
        let document = KubeconfigDocument {
            api_version: "v1",
            kind: "Config",
            spec: self,
        };
        serde_yaml::to_string(&document).map(Zeroizing::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_uses_kubectl_field_names() {
        let spec = KubeconfigSpec {
            clusters: vec![NamedCluster {
                name: "prod".into(),
                cluster: ClusterEndpoint {
                    server: "https://10.0.0.1:6443".into(),
                    certificate_authority_data: "Q0E=".into(),
                },
            }],
            auth_infos: vec![NamedAuthInfo {
                name: "alice".into(),
                user: AuthInfo {
                    token: "tok".into(),
                },
            }],
            contexts: vec![NamedContext {
                name: "prod".into(),
                context: ContextSpec {
                    cluster: "prod".into(),
                    user: "alice".into(),
                    namespace: "payments".into(),
                },
            }],
            current_context: "prod".into(),
        };

        let yaml = spec.to_yaml().unwrap();
        assert!(yaml.contains("apiVersion: v1"));
        assert!(yaml.contains("kind: Config"));
        assert!(yaml.contains("current-context: prod"));
        assert!(yaml.contains("certificate-authority-data: Q0E="));
        assert!(yaml.contains("users:"));
        assert!(!format!("{spec:?}").contains("tok\""));
    }
}
