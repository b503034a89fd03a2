//! Token verification seam for the external auth service.
//!
//! The auth service owns token issue/validate/revoke; everything in this
//! workspace only ever asks "who is this token?".  [`HttpTokenVerifier`]
//! calls the real service; [`StaticTokenVerifier`] is an in-process double
//! for tests and local development.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Claims resolved from a valid token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
    pub email: String,
    /// Ordered role names, most significant first.
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("auth service unreachable: {0}")]
    Unavailable(String),
    #[error("auth service returned malformed response: {0}")]
    Malformed(String),
}

/// Resolves bearer tokens to identities.
///
/// `Ok(None)` means the token is known-invalid (expired, revoked, garbage);
/// `Err` means the verdict could not be obtained at all.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Option<Identity>, AuthError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ValidateRequest<'a> {
    token: &'a str,
}

#[derive(Debug, Deserialize)]
struct ValidateResponse {
    valid: bool,
    #[serde(default)]
    user: Option<Identity>,
}

/// Verifier backed by the auth service's `POST /api/v1/tokens/validate`.
pub struct HttpTokenVerifier {
    client: reqwest::Client,
    validate_url: String,
}

impl HttpTokenVerifier {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            validate_url: format!("{}/api/v1/tokens/validate", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl TokenVerifier for HttpTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Option<Identity>, AuthError> {
        let response = self
            .client
            .post(&self.validate_url)
            .json(&ValidateRequest { token })
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(None);
        }
        let body: ValidateResponse = response
            .error_for_status()
            .map_err(|e| AuthError::Unavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::Malformed(e.to_string()))?;

        match body {
            ValidateResponse { valid: true, user: Some(user) } => Ok(Some(user)),
            ValidateResponse { valid: true, user: None } => Err(AuthError::Malformed(
                "valid verdict without user claims".to_owned(),
            )),
            _ => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Static implementation (tests, local development)
// ---------------------------------------------------------------------------

/// Verifier over a fixed token -> identity table.
#[derive(Debug, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, Identity>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, identity: Identity) -> Self {
        self.tokens.insert(token.into(), identity);
        self
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Option<Identity>, AuthError> {
        Ok(self.tokens.get(token).cloned())
    }
}

/// Convenience constructor for a plain user identity.
pub fn identity(user_id: &str, username: &str) -> Identity {
    Identity {
        user_id: user_id.to_owned(),
        username: username.to_owned(),
        email: format!("{username}@example.com"),
        roles: vec!["user".to_owned()],
    }
}
