//! Invite code endpoints.

use super::{ApiError, JsonBody};
use crate::auth::AuthenticatedUser;
use crate::error::StorageError;
use crate::server::ChatRelay;
use crate::storage::InviteStore;
use axum::{Extension, Json};
use chat_types::{
    InviteConsumeRequest, InviteConsumeResponse, InviteCreateRequest, InviteCreateResponse, UserId,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// `POST /invites/create`
pub async fn create_handler(
    AuthenticatedUser(caller): AuthenticatedUser,
    Extension(relay): Extension<Arc<ChatRelay>>,
    JsonBody(req): JsonBody<InviteCreateRequest>,
) -> Result<Json<InviteCreateResponse>, ApiError> {
    let owner = UserId::parse(&req.user_id).map_err(StorageError::from)?;
    if owner != caller {
        return Err(ApiError::Forbidden(
            "Cannot create invites for another user".to_string(),
        ));
    }

    let ttl = Duration::from_secs(relay.config().invites.ttl_secs);
    let invite = relay.storage().create_invite(owner.as_str(), ttl).await?;
    relay.metrics().invites_created.fetch_add(1, Ordering::Relaxed);

    Ok(Json(InviteCreateResponse {
        code: invite.code,
        expires_at: invite.expires_at,
    }))
}

/// `POST /invites/consume`
pub async fn consume_handler(
    AuthenticatedUser(caller): AuthenticatedUser,
    Extension(relay): Extension<Arc<ChatRelay>>,
    JsonBody(req): JsonBody<InviteConsumeRequest>,
) -> Result<Json<InviteConsumeResponse>, ApiError> {
    let owner_user_id = relay
        .storage()
        .consume_invite(&req.code)
        .await
        .map_err(|e| match e {
            StorageError::NotFound { .. } => ApiError::NotFound("Invalid code".to_string()),
            other => other.into(),
        })?;

    relay.metrics().invites_consumed.fetch_add(1, Ordering::Relaxed);
    tracing::info!("{} redeemed an invite from {}", caller, owner_user_id);

    Ok(Json(InviteConsumeResponse { owner_user_id }))
}
