//! ELM JSON loading and shape validation.

use super::library::{ElmDocument, ElmLibrary};
use crate::error::{CqlError, Result};

/// Loads ELM JSON into typed models.
///
/// Lenient on unknown fields; strict on the `type` discriminator of
/// expression nodes (unknown node types surface when evaluated, not here,
/// so a library with one exotic definition can still serve its others).
pub struct ElmLoader;

impl ElmLoader {
    /// Parse an ELM JSON string.
    pub fn load_json(source: &str) -> Result<ElmLibrary> {
        let document: ElmDocument = serde_json::from_str(source)?;
        Self::validate(&document.library)?;
        Ok(document.library)
    }

    /// Parse an already-deserialized ELM value.
    pub fn load_value(source: serde_json::Value) -> Result<ElmLibrary> {
        let document: ElmDocument = serde_json::from_value(source)?;
        Self::validate(&document.library)?;
        Ok(document.library)
    }

    /// Read an ELM JSON file.
    pub fn load_file(path: impl AsRef<std::path::Path>) -> Result<ElmLibrary> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CqlError::execution_error(format!("cannot read ELM file: {e}")))?;
        Self::load_json(&content)
    }

    fn validate(library: &ElmLibrary) -> Result<()> {
        if let Some(statements) = &library.statements {
            for def in &statements.def {
                if def.name().is_none() {
                    return Err(CqlError::execution_error(
                        "ELM statement definition without a name",
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_minimal_library() {
        let library = ElmLoader::load_json(
            r#"{"library": {"identifier": {"id": "T"}, "statements": {"def": [
                {"type": "ExpressionDef", "name": "X",
                 "expression": {"type": "Null"}}
            ]}}}"#,
        )
        .unwrap();
        assert_eq!(library.key(), "T");
    }

    #[test]
    fn test_missing_name_rejected() {
        let result = ElmLoader::load_json(
            r#"{"library": {"statements": {"def": [
                {"type": "ExpressionDef", "expression": {"type": "Null"}}
            ]}}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(ElmLoader::load_json("{not json").is_err());
    }
}
