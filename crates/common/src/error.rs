//! Error types for Docuchat

use thiserror::Error;

/// Result type alias using Docuchat Error
pub type Result<T> = std::result::Result<T, Error>;

/// Docuchat error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Push delivery failed: {0}")]
    PushDelivery(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Unknown or already-settled approval request.
    pub fn unknown_auth_request(id: &str) -> Self {
        Error::NotFound {
            kind: "auth request".to_string(),
            id: id.to_string(),
        }
    }

    /// Whether the caller sent something we cannot act on, as opposed to a server fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::NotFound { .. } | Error::InvalidRequest(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_auth_request_is_client_error() {
        let err = Error::unknown_auth_request("auth_1_abc");
        assert!(err.is_client_error());
        assert_eq!(
            err.to_string(),
            "Resource not found: auth request with id auth_1_abc"
        );
    }

    #[test]
    fn test_delivery_failure_is_not_client_error() {
        assert!(!Error::PushDelivery("gone".into()).is_client_error());
        assert!(!Error::Upstream("HTTP 502".into()).is_client_error());
    }
}
