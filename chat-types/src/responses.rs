//! Generic HTTP response bodies.

use serde::{Deserialize, Serialize};

/// Body returned with every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable reason; never contains internal details.
    pub error: String,
}

impl ErrorResponse {
    /// Create an error body.
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Acknowledgement body for write operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Always `"ok"` on success.
    pub status: String,
    /// Identifier of the created record, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl StatusResponse {
    /// A plain `{"status":"ok"}` body.
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            id: None,
        }
    }

    /// `{"status":"ok","id":...}`.
    pub fn created(id: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            id: Some(id.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_status_has_no_id() {
        let json = serde_json::to_string(&StatusResponse::ok()).unwrap();
        assert_eq!(json, r#"{"status":"ok"}"#);
    }

    #[test]
    fn error_body_shape() {
        let json = serde_json::to_string(&ErrorResponse::new("Invalid code")).unwrap();
        assert_eq!(json, r#"{"error":"Invalid code"}"#);
    }
}
