//! Error types for chat-relay.

/// Main error type for chat-relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A required field is missing or malformed. Nothing was written.
    #[error("invalid {field}: {reason}")]
    Validation {
        /// The offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// No matching record.
    #[error("not found: {what}")]
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// Invite code was already redeemed.
    #[error("invite already used: {code}")]
    AlreadyConsumed {
        /// The invite code.
        code: String,
    },

    /// Invite code is past its expiry.
    #[error("invite expired: {code}")]
    Expired {
        /// The invite code.
        code: String,
    },

    /// Transaction kept conflicting after every retry.
    #[error("transient store error after {attempts} attempts: {source}")]
    Transient {
        /// Attempts made.
        attempts: u32,
        /// Last underlying error.
        source: sqlx::Error,
    },
}

impl From<chat_types::TypesError> for StorageError {
    fn from(err: chat_types::TypesError) -> Self {
        match err {
            chat_types::TypesError::InvalidIdentifier { field, reason } => {
                StorageError::Validation { field, reason }
            }
            other => StorageError::Validation {
                field: "body",
                reason: other.to_string(),
            },
        }
    }
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_identifier_becomes_validation_error() {
        let err: StorageError = chat_types::UserId::parse("  ").unwrap_err().into();
        assert!(matches!(err, StorageError::Validation { field: "userId", .. }));
    }

    #[test]
    fn config_error_wraps_into_relay_error() {
        let mut config = crate::config::Config::default();
        config.storage.max_attempts = 0;
        let err: RelayError = config.validate().unwrap_err().into();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn storage_error_wraps_into_relay_error() {
        let err: RelayError = StorageError::NotFound {
            what: "prekeys for alice".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "storage error: not found: prekeys for alice");
    }
}
