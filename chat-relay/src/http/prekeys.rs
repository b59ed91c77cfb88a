//! Prekey publish and bundle endpoints.

use super::{ApiError, JsonBody};
use crate::auth::AuthenticatedUser;
use crate::error::StorageError;
use crate::server::ChatRelay;
use crate::storage::PreKeyStore;
use axum::extract::{Path, Query};
use axum::{Extension, Json};
use chat_types::{PreKeyBundle, PublishPreKeyRequest, StatusResponse, UserId};
use serde::Deserialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Optional device scope for a bundle request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleQuery {
    /// Only use keys published by this device.
    pub device_id: Option<String>,
}

/// `POST /prekeys/publish`
pub async fn publish_handler(
    AuthenticatedUser(caller): AuthenticatedUser,
    Extension(relay): Extension<Arc<ChatRelay>>,
    JsonBody(req): JsonBody<PublishPreKeyRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let owner = UserId::parse(&req.user_id).map_err(StorageError::from)?;
    if owner != caller {
        tracing::warn!("{} attempted to publish prekeys for {}", caller, owner);
        return Err(ApiError::Forbidden(
            "Cannot publish prekeys for another user".to_string(),
        ));
    }

    relay.storage().publish(&req).await?;
    relay.metrics().prekeys_published.fetch_add(1, Ordering::Relaxed);

    Ok(Json(StatusResponse::ok()))
}

/// `GET /prekeys/bundle/:user_id`
pub async fn bundle_handler(
    AuthenticatedUser(_caller): AuthenticatedUser,
    Path(user_id): Path<String>,
    Query(query): Query<BundleQuery>,
    Extension(relay): Extension<Arc<ChatRelay>>,
) -> Result<Json<PreKeyBundle>, ApiError> {
    let bundle = relay
        .storage()
        .get_bundle(&user_id, query.device_id.as_deref())
        .await
        .map_err(|e| match e {
            StorageError::NotFound { .. } => ApiError::NotFound("No prekeys for user".to_string()),
            other => other.into(),
        })?;

    let metrics = relay.metrics();
    metrics.bundles_served.fetch_add(1, Ordering::Relaxed);
    if bundle.has_one_time_key() {
        metrics.one_time_keys_claimed.fetch_add(1, Ordering::Relaxed);
    } else {
        tracing::info!("One-time keys exhausted for {}/{}", bundle.user_id, bundle.device_id);
    }

    Ok(Json(bundle))
}
