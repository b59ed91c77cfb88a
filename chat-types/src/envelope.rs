//! Envelope - the relay frame forwarded between connected peers.

use serde::{Deserialize, Serialize};

use crate::TypesError;

/// A signaling envelope carried in a WebSocket text frame.
///
/// The relay only reads `to`. `type` and `payload` are opaque and forwarded
/// verbatim; `from` is always overwritten with the authenticated sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalEnvelope {
    /// Target identity
    #[serde(default)]
    pub to: Option<String>,
    /// Sender identity (client-supplied values are discarded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Free-form tag ("offer", "answer", "ice", ...)
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque payload
    pub payload: String,
}

impl SignalEnvelope {
    /// Create an envelope addressed to `to`.
    pub fn new(to: impl Into<String>, kind: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            to: Some(to.into()),
            from: None,
            kind: kind.into(),
            payload: payload.into(),
        }
    }

    /// Decode an envelope from a JSON text frame.
    pub fn parse(text: &str) -> Result<Self, TypesError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode for forwarding.
    pub fn to_json(&self) -> Result<String, TypesError> {
        Ok(serde_json::to_string(self)?)
    }

    /// The trimmed recipient, or `None` when absent or blank.
    pub fn recipient(&self) -> Option<&str> {
        self.to
            .as_deref()
            .map(str::trim)
            .filter(|to| !to.is_empty())
    }

    /// Replace `from` with the authenticated sender identity.
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.from = Some(sender.into());
        self
    }
}
