//! # GitHub Actions Secret Store
//!
//! `MirrorSecretStore` over the GitHub REST API, for github.com or a GitHub
//! Enterprise Server (`{url}/api/v3`). Authenticates with a bearer token.
//!
//! Scopes map onto these endpoints:
//! - repository: `/repos/{owner}/{repo}/actions/{secrets,variables}`
//! - environment: `/repos/{owner}/{repo}/environments/{env}/{secrets,variables}`
//!
//! References:
//! - [Actions secrets](https://docs.github.com/en/rest/actions/secrets)
//! - [Actions variables](https://docs.github.com/en/rest/actions/variables)
//! - [Deployment environments](https://docs.github.com/en/rest/deployments/environments)

pub mod encryption;
mod requests;
mod responses;

use crate::constants::{GITHUB_API_VERSION, GITHUB_USER_AGENT};
use crate::crd::GithubSyncSpec;
use crate::provider::{EncryptedSecret, MirrorSecretStore, ScopePublicKey};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use tracing::{info_span, warn, Instrument};

use requests::{
    CreateEnvironmentRequest, CreateVariableRequest, PutSecretRequest, UpdateVariableRequest,
};
use responses::{ErrorResponse, PublicKeyResponse, VariableResponse};

/// GitHub REST client
pub struct GithubSecretStore {
    http_client: Client,
    base_url: Url,
    token: String,
}

impl std::fmt::Debug for GithubSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubSecretStore")
            .field("base_url", &self.base_url.as_str())
            .field("token", &"***")
            .finish_non_exhaustive()
    }
}

impl GithubSecretStore {
    /// # Errors
    /// Fails if `api_url` is not an absolute URL or the HTTP client cannot be built.
    pub fn new(api_url: &str, token: impl Into<String>) -> Result<Self> {
        let base_url =
            Url::parse(api_url).with_context(|| format!("Invalid GitHub API URL: {api_url}"))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("GitHub API URL cannot be a base: {api_url}"));
        }
        let http_client = Client::builder()
            .user_agent(GITHUB_USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            base_url,
            token: token.into(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// `/repos/{owner}/{repo}/{actions | environments/{env}}/{tail...}`
    fn scope_url(&self, scope: &GithubSyncSpec, tail: &[&str]) -> Result<Url> {
        let mut segments = vec!["repos", scope.owner.as_str(), scope.repository.as_str()];
        if scope.environment.is_empty() {
            segments.push("actions");
        } else {
            segments.extend(["environments", scope.environment.as_str()]);
        }
        segments.extend_from_slice(tail);
        self.url(&segments)
    }

    /// `/repos/{owner}/{repo}/environments/{env}`
    fn environment_url(&self, scope: &GithubSyncSpec) -> Result<Url> {
        self.url(&[
            "repos",
            &scope.owner,
            &scope.repository,
            "environments",
            &scope.environment,
        ])
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("GitHub API URL cannot be a base: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn make_request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.http_client
            .request(method, url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        request
            .send()
            .await
            .with_context(|| format!("Failed to {what}"))
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(handle_error_response(status, &body).context(format!("Failed to {what}")))
    }
}

/// Map a non-success response to an error carrying GitHub's message
fn handle_error_response(status: StatusCode, body: &str) -> anyhow::Error {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map(|e| match e.documentation_url {
            Some(url) => format!("{} ({url})", e.message),
            None => e.message,
        })
        .unwrap_or_else(|_| body.to_string());
    match status.as_u16() {
        401 => anyhow!("Unauthorized: {message}"),
        403 => anyhow!("Permission denied: {message}"),
        404 => anyhow!("Not found: {message}"),
        422 => anyhow!("Validation failed: {message}"),
        _ => anyhow!("GitHub API error ({status}): {message}"),
    }
}

#[async_trait]
impl MirrorSecretStore for GithubSecretStore {
    async fn scope_exists(&self, scope: &GithubSyncSpec) -> Result<bool> {
        if scope.environment.is_empty() {
            return Ok(true);
        }
        let url = self.environment_url(scope)?;
        let response = self
            .send(self.make_request(Method::GET, url), "get environment")
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check(response, "get environment").await?;
        Ok(true)
    }

    async fn create_scope(&self, scope: &GithubSyncSpec) -> Result<()> {
        let span = info_span!(
            "github.environment.create",
            repository = %format!("{}/{}", scope.owner, scope.repository),
            environment = scope.environment.as_str()
        );
        async move {
            warn!(
                "Environment {} not found in {}/{}, creating it",
                scope.environment, scope.owner, scope.repository
            );
            let url = self.environment_url(scope)?;
            let response = self
                .send(
                    self.make_request(Method::PUT, url)
                        .json(&CreateEnvironmentRequest::default()),
                    "create environment",
                )
                .await?;
            Self::check(response, "create environment").await?;
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn secret_exists(&self, scope: &GithubSyncSpec, name: &str) -> Result<bool> {
        let span = info_span!("github.secret.get", scope = %scope.location(), secret.name = name);
        async move {
            let url = self.scope_url(scope, &["secrets", name])?;
            let response = self
                .send(self.make_request(Method::GET, url), "get secret")
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(false);
            }
            Self::check(response, "get secret").await?;
            Ok(true)
        }
        .instrument(span)
        .await
    }

    async fn public_key(&self, scope: &GithubSyncSpec) -> Result<ScopePublicKey> {
        let span = info_span!("github.secret.public_key", scope = %scope.location());
        async move {
            let url = self.scope_url(scope, &["secrets", "public-key"])?;
            let response = self
                .send(self.make_request(Method::GET, url), "get public key")
                .await?;
            let key: PublicKeyResponse = Self::check(response, "get public key")
                .await?
                .json()
                .await
                .context("Failed to parse public key response")?;
            Ok(ScopePublicKey {
                key_id: key.key_id,
                key: key.key,
            })
        }
        .instrument(span)
        .await
    }

    async fn put_secret(
        &self,
        scope: &GithubSyncSpec,
        name: &str,
        secret: &EncryptedSecret,
    ) -> Result<()> {
        let span = info_span!("github.secret.put", scope = %scope.location(), secret.name = name);
        async move {
            let url = self.scope_url(scope, &["secrets", name])?;
            let body = PutSecretRequest {
                encrypted_value: &secret.encrypted_value,
                key_id: &secret.key_id,
            };
            let response = self
                .send(self.make_request(Method::PUT, url).json(&body), "put secret")
                .await?;
            Self::check(response, "put secret").await?;
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn delete_secret(&self, scope: &GithubSyncSpec, name: &str) -> Result<()> {
        let span = info_span!("github.secret.delete", scope = %scope.location(), secret.name = name);
        async move {
            let url = self.scope_url(scope, &["secrets", name])?;
            let response = self
                .send(self.make_request(Method::DELETE, url), "delete secret")
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(());
            }
            Self::check(response, "delete secret").await?;
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn get_variable(&self, scope: &GithubSyncSpec, name: &str) -> Result<Option<String>> {
        let span = info_span!("github.variable.get", scope = %scope.location(), variable.name = name);
        async move {
            let url = self.scope_url(scope, &["variables", name])?;
            let response = self
                .send(self.make_request(Method::GET, url), "get variable")
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let variable: VariableResponse = Self::check(response, "get variable")
                .await?
                .json()
                .await
                .context("Failed to parse variable response")?;
            Ok(Some(variable.value))
        }
        .instrument(span)
        .await
    }

    async fn create_variable(&self, scope: &GithubSyncSpec, name: &str, value: &str) -> Result<()> {
        let span = info_span!("github.variable.create", scope = %scope.location(), variable.name = name);
        async move {
            let url = self.scope_url(scope, &["variables"])?;
            let body = CreateVariableRequest { name, value };
            let response = self
                .send(self.make_request(Method::POST, url).json(&body), "create variable")
                .await?;
            Self::check(response, "create variable").await?;
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn update_variable(&self, scope: &GithubSyncSpec, name: &str, value: &str) -> Result<()> {
        let span = info_span!("github.variable.update", scope = %scope.location(), variable.name = name);
        async move {
            let url = self.scope_url(scope, &["variables", name])?;
            let body = UpdateVariableRequest { name, value };
            let response = self
                .send(self.make_request(Method::PATCH, url).json(&body), "update variable")
                .await?;
            Self::check(response, "update variable").await?;
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn delete_variable(&self, scope: &GithubSyncSpec, name: &str) -> Result<()> {
        let span = info_span!("github.variable.delete", scope = %scope.location(), variable.name = name);
        async move {
            let url = self.scope_url(scope, &["variables", name])?;
            let response = self
                .send(self.make_request(Method::DELETE, url), "delete variable")
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(());
            }
            Self::check(response, "delete variable").await?;
            Ok(())
        }
        .instrument(span)
        .await
    }
}
