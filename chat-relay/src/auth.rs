//! Credential verification.
//!
//! Bearer tokens are resolved to a [`UserId`] by a [`TokenAuthenticator`].
//! The relay ships with [`PrefixTokenAuthenticator`], which accepts tokens of
//! the form `<prefix><userId>`; deployments with a real identity provider
//! plug their own implementation into [`crate::server::ChatRelay`].

use crate::http::ApiError;
use crate::server::ChatRelay;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chat_types::UserId;
use std::sync::Arc;

/// Authentication failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No credential was presented.
    #[error("missing token")]
    MissingToken,
    /// The credential could not be verified.
    #[error("invalid token")]
    InvalidToken,
    /// The credential is valid but names a different identity.
    #[error("token does not match {claimed}")]
    IdentityMismatch {
        /// Identity the client claimed.
        claimed: String,
    },
}

/// Resolves a bearer token to the identity it authenticates.
pub trait TokenAuthenticator: Send + Sync {
    /// Verify `token` and return its user.
    fn authenticate(&self, token: &str) -> Result<UserId, AuthError>;

    /// Verify `token` and require it to belong to `claimed`.
    fn authenticate_as(&self, token: &str, claimed: &str) -> Result<UserId, AuthError> {
        let user = self.authenticate(token)?;
        if user.as_str() == claimed.trim() {
            Ok(user)
        } else {
            Err(AuthError::IdentityMismatch {
                claimed: claimed.to_string(),
            })
        }
    }
}

/// Accepts `<prefix><userId>` tokens.
#[derive(Debug, Clone)]
pub struct PrefixTokenAuthenticator {
    prefix: String,
}

impl PrefixTokenAuthenticator {
    /// Create an authenticator for tokens starting with `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl TokenAuthenticator for PrefixTokenAuthenticator {
    fn authenticate(&self, token: &str) -> Result<UserId, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let user = token
            .strip_prefix(self.prefix.as_str())
            .ok_or(AuthError::InvalidToken)?;
        UserId::parse(user).map_err(|_| AuthError::InvalidToken)
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") {
        Some(token.trim()).filter(|t| !t.is_empty())
    } else {
        None
    }
}

/// Authenticated caller of an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub UserId);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let relay = parts
            .extensions
            .get::<Arc<ChatRelay>>()
            .cloned()
            .ok_or_else(|| ApiError::Internal("relay extension missing".to_string()))?;

        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
            .ok_or(ApiError::Unauthorized(AuthError::MissingToken))?;

        relay
            .authenticator()
            .authenticate(token)
            .map(AuthenticatedUser)
            .map_err(ApiError::Unauthorized)
    }
}
