//! Error types for the orchestration engine

use confline_conference_core::ConferenceError;
use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while orchestrating a session
///
/// The taxonomy mirrors how the engine reacts: token acquisition and the
/// first leg are fatal to `start` (phase goes to `Error`, no automatic
/// retry); an exhausted external dial is non-fatal (phase reverts, one retry
/// is scheduled); everything transport-level self-heals below this layer and
/// never appears here.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Credential acquisition failed; the session never came up
    #[error("Token acquisition failed: {source}")]
    TokenAcquisition {
        #[source]
        source: ConferenceError,
    },

    /// The load-bearing contact-center leg could not be placed
    #[error("First leg dial to '{destination}' failed: {source}")]
    FirstLegFailed {
        destination: String,
        #[source]
        source: ConferenceError,
    },

    /// Every candidate for the external leg was rejected
    #[error("External dial exhausted {attempts} candidate(s) for '{destination}': {last_error}")]
    DialExhausted {
        destination: String,
        attempts: usize,
        last_error: String,
    },

    /// Operation is not valid in the current phase
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// Access-layer failure outside the cases above
    #[error(transparent)]
    Conference(#[from] ConferenceError),
}

impl EngineError {
    /// Create an invalid-state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }
}
