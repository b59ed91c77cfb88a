//! # chat-types
//!
//! Wire format types for the SecureChat prekey and signaling server.
//!
//! This crate provides the types shared between the server and its tests:
//! - [`UserId`], [`DeviceId`] - Validated identity types
//! - [`SignalEnvelope`] - Relay frame forwarded between connected peers
//! - [`PublishPreKeyRequest`], [`PreKeyBundle`] - X3DH key material exchange
//! - Invite and response bodies for the HTTP surface
//! - [`TypesError`] - Error types
//!
//! Key material is carried as opaque (base64) strings. Nothing in this crate
//! decodes or validates it.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod ids;
mod invites;
mod prekeys;
mod responses;

pub use envelope::SignalEnvelope;
pub use error::TypesError;
pub use ids::{DeviceId, UserId, MAX_ID_LEN};
pub use invites::{
    InviteConsumeRequest, InviteConsumeResponse, InviteCreateRequest, InviteCreateResponse,
};
pub use prekeys::{OneTimePreKey, PreKeyBundle, PublishPreKeyRequest};
pub use responses::{ErrorResponse, StatusResponse};
