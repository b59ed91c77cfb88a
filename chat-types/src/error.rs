//! Error types for SecureChat wire types.

use thiserror::Error;

/// Errors produced while parsing or validating wire types.
#[derive(Debug, Error)]
pub enum TypesError {
    /// An identifier was blank or too long.
    #[error("invalid {field}: {reason}")]
    InvalidIdentifier {
        /// Name of the offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// JSON encoding or decoding failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
