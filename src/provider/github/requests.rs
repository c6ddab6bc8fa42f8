//! # Request Types
//!
//! GitHub Actions REST API request bodies.
//!
//! References:
//! - [Actions secrets](https://docs.github.com/en/rest/actions/secrets)
//! - [Actions variables](https://docs.github.com/en/rest/actions/variables)

use serde::Serialize;

/// Body of `PUT .../secrets/{secret_name}`
#[derive(Debug, Serialize)]
pub struct PutSecretRequest<'a> {
    /// Base64 sealed box
    pub encrypted_value: &'a str,
    /// Id of the public key the value was sealed for
    pub key_id: &'a str,
}

/// Body of `POST .../variables`
#[derive(Debug, Serialize)]
pub struct CreateVariableRequest<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

/// Body of `PATCH .../variables/{name}`
#[derive(Debug, Serialize)]
pub struct UpdateVariableRequest<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

/// Body of `PUT /repos/{owner}/{repo}/environments/{environment_name}`
///
/// Every protection rule is optional; an empty body creates an
/// unprotected environment.
#[derive(Debug, Default, Serialize)]
pub struct CreateEnvironmentRequest {}
