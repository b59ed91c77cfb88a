//! Prekey publish and bundle bodies for the X3DH handshake.
//!
//! Field names follow the camelCase JSON used by the mobile clients.

use serde::{Deserialize, Serialize};

/// A device's upload of its key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishPreKeyRequest {
    /// Owner of the device.
    pub user_id: String,
    /// Publishing device.
    pub device_id: String,
    /// Long-term identity public key (base64).
    pub identity_key: String,
    /// Device public key (base64).
    pub device_key: String,
    /// Device-local id of the signed prekey.
    pub signed_pre_key_id: i32,
    /// Signed prekey (base64).
    pub signed_pre_key: String,
    /// Signature over the signed prekey (base64).
    pub signed_pre_key_sig: String,
    /// Batch of single-use prekeys.
    #[serde(default)]
    pub one_time_pre_keys: Vec<OneTimePreKey>,
}

/// A single-use public prekey as uploaded by a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneTimePreKey {
    /// Device-local key id.
    pub key_id: i32,
    /// Public key (base64).
    pub public_key: String,
}

/// Public key material needed to start a session with one device.
///
/// The one-time key fields are absent when the device has run out of
/// unclaimed one-time keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreKeyBundle {
    /// Target user.
    pub user_id: String,
    /// Device the bundle was resolved to.
    pub device_id: String,
    /// Identity public key.
    pub identity_key: String,
    /// Signed prekey id.
    pub signed_pre_key_id: i32,
    /// Signed prekey.
    pub signed_pre_key: String,
    /// Signature over the signed prekey.
    pub signed_pre_key_sig: String,
    /// Claimed one-time key id, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_time_pre_key_id: Option<i32>,
    /// Claimed one-time key, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_time_pre_key: Option<String>,
}

impl PreKeyBundle {
    /// Whether a one-time key was claimed for this bundle.
    pub fn has_one_time_key(&self) -> bool {
        self.one_time_pre_key_id.is_some()
    }
}
