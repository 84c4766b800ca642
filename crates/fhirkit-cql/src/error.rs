//! Error types for CQL operations.
//!
//! Four error kinds surface to callers: parse, compile, reference, and
//! execution errors. Everything else (arithmetic on incompatible types,
//! division by zero, precision-incompatible dates) resolves to null so
//! library authors can write total functions over heterogenous data.

use fhirkit_fhirpath::FhirPathError;
use thiserror::Error;

/// CQL-specific errors.
#[derive(Debug, Error)]
pub enum CqlError {
    /// Source text failed lexing or parsing.
    #[error("CQL parse error at line {line}, column {column}: {message}")]
    ParseError {
        message: String,
        line: usize,
        column: usize,
    },

    /// Source parsed but refers to unknown names, duplicates a definition,
    /// or forms an include cycle.
    #[error("CQL compile error: {0}")]
    CompileError(String),

    /// Evaluation referenced a name unknown at runtime.
    #[error("Reference error: {0}")]
    ReferenceError(String),

    /// A type mismatch that cannot be coerced to null.
    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// Library not found in the library manager.
    #[error("Library not found: {0}")]
    LibraryNotFound(String),

    /// JSON serialization/deserialization error (ELM round-trips).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CqlError {
    pub fn parse_error(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self::ParseError {
            message: message.into(),
            line,
            column,
        }
    }

    pub fn compile_error(message: impl Into<String>) -> Self {
        Self::CompileError(message.into())
    }

    pub fn reference_error(message: impl Into<String>) -> Self {
        Self::ReferenceError(message.into())
    }

    pub fn execution_error(message: impl Into<String>) -> Self {
        Self::ExecutionError(message.into())
    }
}

impl From<FhirPathError> for CqlError {
    fn from(err: FhirPathError) -> Self {
        match err {
            FhirPathError::SyntaxError { column, message } => CqlError::ParseError {
                message,
                line: 1,
                column,
            },
            other => CqlError::ExecutionError(other.to_string()),
        }
    }
}

/// Result type for CQL operations.
pub type Result<T> = std::result::Result<T, CqlError>;
