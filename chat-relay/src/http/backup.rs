//! Encrypted backup upload and download.
//!
//! Blobs are stored and returned as opaque bytes.

use super::ApiError;
use crate::auth::AuthenticatedUser;
use crate::server::ChatRelay;
use crate::storage::BackupStore;
use axum::extract::Multipart;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chat_types::StatusResponse;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Multipart field carrying the backup blob.
pub const BACKUP_FIELD: &str = "backupFile";

/// `POST /backup`
pub async fn upload_handler(
    AuthenticatedUser(caller): AuthenticatedUser,
    Extension(relay): Extension<Arc<ChatRelay>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<StatusResponse>), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        if field.name() != Some(BACKUP_FIELD) {
            continue;
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        let id = relay.storage().put(caller.as_str(), &bytes).await?;
        relay.metrics().backups_stored.fetch_add(1, Ordering::Relaxed);

        return Ok((StatusCode::CREATED, Json(StatusResponse::created(id))));
    }

    Err(ApiError::BadRequest("No file uploaded".to_string()))
}

/// `GET /backup/latest`
pub async fn latest_handler(
    AuthenticatedUser(caller): AuthenticatedUser,
    Extension(relay): Extension<Arc<ChatRelay>>,
) -> Result<Response, ApiError> {
    match relay.storage().get_latest(caller.as_str()).await? {
        Some(bytes) => Ok(([(CONTENT_TYPE, "application/octet-stream")], bytes).into_response()),
        None => Err(ApiError::NotFound("No backup found".to_string())),
    }
}
