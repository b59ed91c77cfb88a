//! Invite code request and response bodies.

use serde::{Deserialize, Serialize};

/// Request to mint a short-lived invite code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteCreateRequest {
    /// Owner of the invite; must match the caller.
    pub user_id: String,
}

/// A freshly minted invite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteCreateResponse {
    /// Single-use invite code.
    pub code: String,
    /// Expiry, milliseconds since the Unix epoch.
    pub expires_at: i64,
}

/// Request to redeem an invite code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteConsumeRequest {
    /// The code to redeem.
    pub code: String,
}

/// Result of a successful redemption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteConsumeResponse {
    /// The user who created the invite.
    pub owner_user_id: String,
}
