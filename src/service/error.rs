//! Service-specific error types.

use thiserror::Error;

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors that can occur while talking to the tabular query service.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    /// The service rejected the credential (401/403).
    #[error("authentication rejected (HTTP {status}): {message}")]
    Unauthorized {
        status: u16,
        /// Raw service message.
        message: String,
    },

    /// Any other non-2xx response.
    #[error("service rejected the request (HTTP {status}): {message}")]
    Rejected {
        status: u16,
        /// Raw service message.
        message: String,
    },

    /// A 2xx response carrying an `error` body.
    #[error("service reported an error: {0}")]
    Reported(String),

    /// Connection, DNS or TLS failure.
    #[error("request failed: {0}")]
    Transport(String),

    /// Request timed out waiting for response.
    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    /// Response body did not match the expected shape.
    #[error("failed to decode service response: {0}")]
    Decode(String),
}

impl ServiceError {
    /// Check if the credential was rejected.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// HTTP status, when the service answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { status, .. } | Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Classify a non-2xx response.
pub fn classify_status(status: u16, body: &str) -> ServiceError {
    let message = match body.trim() {
        "" => format!("HTTP {status} with empty body"),
        text => text.to_string(),
    };
    match status {
        401 | 403 => ServiceError::Unauthorized { status, message },
        _ => ServiceError::Rejected { status, message },
    }
}
