//! HTTP error responses.

use crate::auth::AuthError;
use crate::error::StorageError;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chat_types::ErrorResponse;
use serde::de::DeserializeOwned;

/// Error returned by HTTP handlers.
///
/// Rendered as an [`ErrorResponse`] JSON body. Internal failures are logged
/// and reported with a generic message.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed or incomplete request.
    #[error("{0}")]
    BadRequest(String),

    /// Missing or invalid credential.
    #[error("unauthorized: {0}")]
    Unauthorized(AuthError),

    /// Authenticated caller acting on someone else's behalf.
    #[error("{0}")]
    Forbidden(String),

    /// Nothing matches the request.
    #[error("{0}")]
    NotFound(String),

    /// Storage failure, mapped by kind.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Anything else that must not reach the client verbatim.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Status code and client-facing message.
    fn parts(&self) -> (StatusCode, String) {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Storage(StorageError::Validation { field, reason }) => {
                (StatusCode::BAD_REQUEST, format!("{field} {reason}"))
            }
            ApiError::Storage(StorageError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, "Not found".to_string())
            }
            ApiError::Storage(StorageError::AlreadyConsumed { .. }) => {
                (StatusCode::CONFLICT, "Already used".to_string())
            }
            ApiError::Storage(StorageError::Expired { .. }) => {
                (StatusCode::GONE, "Expired".to_string())
            }
            ApiError::Storage(_) | ApiError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// JSON request body that rejects with a 400 [`ErrorResponse`].
///
/// Drop-in for [`Json`] on handlers whose bodies carry required fields.
#[derive(Debug)]
pub struct JsonBody<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.parts();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected ({}): {}", status, self);
        }
        (status, Json(ErrorResponse::new(message))).into_response()
    }
}
