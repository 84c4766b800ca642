//! Error types for UCUM operations.

use thiserror::Error;

/// UCUM-specific errors.
#[derive(Debug, Error)]
pub enum UcumError {
    /// A unit string could not be parsed.
    #[error("Cannot parse unit '{unit}': {message}")]
    UnitParse { unit: String, message: String },

    /// Units are not dimensionally compatible for conversion.
    #[error("Cannot convert '{from}' to '{to}': incompatible dimensions")]
    IncompatibleUnits { from: String, to: String },

    /// Arithmetic failure during conversion (overflow, division by zero).
    #[error("Conversion error: {0}")]
    Conversion(String),
}

impl UcumError {
    pub fn unit_parse(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnitParse {
            unit: unit.into(),
            message: message.into(),
        }
    }

    pub fn incompatible(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::IncompatibleUnits {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Result type for UCUM operations.
pub type Result<T> = std::result::Result<T, UcumError>;
