//! Error types for the conferencing access layer

use thiserror::Error;

/// Result type for conferencing-server operations
pub type ConferenceResult<T> = Result<T, ConferenceError>;

/// Errors that can occur while talking to the conferencing server
#[derive(Debug, Error)]
pub enum ConferenceError {
    /// Transport-level failure (DNS, TCP, TLS, request aborted)
    #[error("Network error: {reason}")]
    Network { reason: String },

    /// The server answered with a non-success status
    #[error("Server rejected {operation} with status {status}")]
    Rejected { operation: String, status: u16 },

    /// No credential is held for the conference alias
    #[error("No active token for conference '{alias}'")]
    MissingToken { alias: String },

    /// The server's payload did not match any known shape
    #[error("Protocol error: {reason}")]
    Protocol { reason: String },

    /// A dial request completed but created no participants
    #[error("No route created for destination '{destination}'")]
    NoRouteCreated { destination: String },

    /// The push event stream ended or went dormant
    #[error("Event stream error: {reason}")]
    Stream { reason: String },

    /// JSON encode/decode failure
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl ConferenceError {
    /// Create a network error
    pub fn network(reason: impl Into<String>) -> Self {
        Self::Network {
            reason: reason.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    /// Create a stream error
    pub fn stream(reason: impl Into<String>) -> Self {
        Self::Stream {
            reason: reason.into(),
        }
    }

    /// Whether a retry of the same operation can reasonably succeed
    ///
    /// Network and stream failures are transient by nature; 5xx responses
    /// indicate temporary server trouble. Everything else needs a changed
    /// request (or a fresh token) before retrying makes sense.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Stream { .. } => true,
            Self::Rejected { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ConferenceError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverability_classification() {
        assert!(ConferenceError::network("connection reset").is_recoverable());
        assert!(ConferenceError::stream("dormant").is_recoverable());
        assert!(ConferenceError::Rejected {
            operation: "dial".into(),
            status: 503
        }
        .is_recoverable());
        assert!(!ConferenceError::Rejected {
            operation: "request_token".into(),
            status: 403
        }
        .is_recoverable());
        assert!(!ConferenceError::NoRouteCreated {
            destination: "ext@example.com".into()
        }
        .is_recoverable());
    }
}
