//! Storage layer for chat-relay.
//!
//! Provides the prekey bundle store, the encrypted backup store and the
//! invite store. All three are implemented by [`SqliteStorage`].

mod sqlite;

pub use sqlite::SqliteStorage;

use crate::error::StorageError;
use async_trait::async_trait;
use chat_types::{PreKeyBundle, PublishPreKeyRequest};
use std::time::Duration;

/// Server half of the X3DH key agreement.
#[async_trait]
pub trait PreKeyStore: Send + Sync {
    /// Store a device's key bundle.
    ///
    /// Creates the user and device if absent (an existing device keeps its
    /// original `deviceKey`), appends a signed prekey and the batch of
    /// one-time keys. The whole publish lands atomically or not at all.
    async fn publish(&self, req: &PublishPreKeyRequest) -> Result<(), StorageError>;

    /// Assemble a bundle for `user_id`, claiming one one-time key.
    ///
    /// Uses the most recent signed prekey of `device_id`, or of any of the
    /// user's devices when no device is given. The one-time key fields are
    /// empty when every key of that device has already been claimed.
    async fn get_bundle(
        &self,
        user_id: &str,
        device_id: Option<&str>,
    ) -> Result<PreKeyBundle, StorageError>;

    /// Count unclaimed one-time keys for a device.
    async fn available_one_time_keys(
        &self,
        user_id: &str,
        device_id: &str,
    ) -> Result<u64, StorageError>;
}

/// Opaque encrypted backup blobs, latest wins.
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Store a blob for `owner`. Returns the record id.
    async fn put(&self, owner: &str, bytes: &[u8]) -> Result<String, StorageError>;

    /// Fetch the most recently stored blob for `owner`.
    async fn get_latest(&self, owner: &str) -> Result<Option<Vec<u8>>, StorageError>;
}

/// Lifecycle of an invite code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InviteState {
    /// Redeemable.
    Pending,
    /// Redeemed exactly once.
    Consumed,
    /// Past its expiry without being redeemed.
    Expired,
}

/// A stored invite code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invite {
    /// The code handed to the invitee.
    pub code: String,
    /// User who minted the invite.
    pub owner: String,
    /// Expiry, milliseconds since the Unix epoch.
    pub expires_at: i64,
    /// Current state.
    pub state: InviteState,
}

/// Short-lived single-use invite codes.
#[async_trait]
pub trait InviteStore: Send + Sync {
    /// Mint a new invite for `owner`, valid for `ttl`.
    async fn create_invite(&self, owner: &str, ttl: Duration) -> Result<Invite, StorageError>;

    /// Redeem an invite, returning its owner.
    ///
    /// At most one caller ever succeeds for a given code. Fails with
    /// `NotFound`, `AlreadyConsumed` or `Expired` otherwise.
    async fn consume_invite(&self, code: &str) -> Result<String, StorageError>;

    /// Look up an invite and its current state.
    async fn invite(&self, code: &str) -> Result<Option<Invite>, StorageError>;

    /// Delete invites that expired more than `retention` ago.
    ///
    /// Returns the number of invites deleted.
    async fn purge_expired_invites(&self, retention: Duration) -> Result<u64, StorageError>;
}
