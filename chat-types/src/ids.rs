//! Identity types for SecureChat.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TypesError;

/// Maximum length (in characters) of a user or device identifier.
pub const MAX_ID_LEN: usize = 64;

fn validate(field: &'static str, raw: &str) -> Result<String, TypesError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TypesError::InvalidIdentifier {
            field,
            reason: "must not be blank".to_string(),
        });
    }
    if trimmed.chars().count() > MAX_ID_LEN {
        return Err(TypesError::InvalidIdentifier {
            field,
            reason: format!("longer than {MAX_ID_LEN} characters"),
        });
    }
    Ok(trimmed.to_string())
}

/// An externally authenticated user identity.
///
/// Stable and unique; surrounding whitespace is stripped on parse.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Parse and validate a user identifier.
    pub fn parse(raw: &str) -> Result<Self, TypesError> {
        validate("userId", raw).map(Self)
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

/// A device identifier, unique per device.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Parse and validate a device identifier.
    pub fn parse(raw: &str) -> Result<Self, TypesError> {
        validate("deviceId", raw).map(Self)
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_trims_whitespace() {
        let id = UserId::parse("  alice \n").unwrap();
        assert_eq!(id.as_str(), "alice");
        assert_eq!(id.to_string(), "alice");
    }

    #[test]
    fn blank_identifiers_rejected() {
        assert!(UserId::parse("").is_err());
        assert!(UserId::parse("   ").is_err());
        assert!(DeviceId::parse("\t").is_err());
    }

    #[test]
    fn overlong_identifiers_rejected() {
        let at_limit = "a".repeat(MAX_ID_LEN);
        assert!(UserId::parse(&at_limit).is_ok());

        let too_long = "a".repeat(MAX_ID_LEN + 1);
        let err = DeviceId::parse(&too_long).unwrap_err();
        assert!(err.to_string().contains("deviceId"));
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        // 64 three-byte characters is still within the limit
        let name = "日".repeat(MAX_ID_LEN);
        assert!(UserId::parse(&name).is_ok());
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = DeviceId::parse("phone1").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"phone1\"");
    }
}
