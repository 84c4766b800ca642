//! Error types for terminology operations.

use fhirkit_foundation::FoundationError;
use thiserror::Error;

/// Terminology-specific errors.
#[derive(Debug, Error)]
pub enum TerminologyError {
    /// A referenced value set is not known to the service.
    #[error("Value set not found: {0}")]
    ValueSetNotFound(String),

    /// A referenced code system is not known to the service.
    #[error("Code system not found: {0}")]
    CodeSystemNotFound(String),

    /// A remote terminology server returned a failure or malformed payload.
    #[error("Terminology server error: {0}")]
    Server(String),

    /// Foundation error (IO, JSON, HTTP plumbing).
    #[error(transparent)]
    Foundation(#[from] FoundationError),
}

impl From<serde_json::Error> for TerminologyError {
    fn from(err: serde_json::Error) -> Self {
        TerminologyError::Foundation(FoundationError::Serialization(err))
    }
}

/// Result type for terminology operations.
pub type Result<T> = std::result::Result<T, TerminologyError>;
