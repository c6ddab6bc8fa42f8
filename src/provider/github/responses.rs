//! # Response Types
//!
//! GitHub Actions REST API response bodies this client reads.

use serde::Deserialize;

/// `GET .../secrets/public-key`
#[derive(Debug, Deserialize)]
pub struct PublicKeyResponse {
    pub key_id: String,
    /// Base64 X25519 public key
    pub key: String,
}

/// `GET .../variables/{name}`
#[derive(Debug, Deserialize)]
pub struct VariableResponse {
    #[allow(dead_code, reason = "part of the response contract, kept for debug output")]
    pub name: String,
    pub value: String,
}

/// Error body returned with non-success statuses
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(default)]
    pub documentation_url: Option<String>,
}
