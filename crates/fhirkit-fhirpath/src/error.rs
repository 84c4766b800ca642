//! Error types for FHIRPath parsing and evaluation.

use fhirkit_foundation::FoundationError;
use thiserror::Error;

/// Result type for FHIRPath operations
pub type FhirPathResult<T> = Result<T, FhirPathError>;

/// Errors that can occur during FHIRPath parsing and evaluation.
///
/// Most runtime conditions in FHIRPath resolve to the empty collection
/// rather than an error; these variants cover the cases the language
/// requires to surface — syntax failures, `single()` on a multi-element
/// collection, failed `as` casts, and unknown functions.
#[derive(Error, Debug)]
pub enum FhirPathError {
    /// Syntax error in the FHIRPath expression with location
    #[error("Syntax error in FHIRPath expression at column {column}: {message}")]
    SyntaxError { column: usize, message: String },

    /// Type error during evaluation (e.g., failed `as` cast)
    #[error("Type error: {message}")]
    TypeError { message: String },

    /// Function not found or invalid function call
    #[error("Function error: {message}")]
    FunctionError { message: String },

    /// General evaluation error
    #[error("Evaluation error: {message}")]
    EvaluationError { message: String },

    /// Foundation error (covers IO, JSON, etc.)
    #[error(transparent)]
    Foundation(#[from] FoundationError),
}

impl FhirPathError {
    /// Create a syntax error at a specific column
    pub fn syntax_error(column: usize, message: impl Into<String>) -> Self {
        Self::SyntaxError {
            column,
            message: message.into(),
        }
    }

    /// Create a type error
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::TypeError {
            message: message.into(),
        }
    }

    /// Create a function error
    pub fn function_error(message: impl Into<String>) -> Self {
        Self::FunctionError {
            message: message.into(),
        }
    }

    /// Create an evaluation error
    pub fn evaluation_error(message: impl Into<String>) -> Self {
        Self::EvaluationError {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for FhirPathError {
    fn from(err: serde_json::Error) -> Self {
        FhirPathError::Foundation(FoundationError::Serialization(err))
    }
}
