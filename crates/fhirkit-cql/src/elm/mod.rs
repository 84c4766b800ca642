//! ELM: the canonical serialized form of compiled CQL.
//!
//! - [`library`] / [`expression`]: typed serde models of the ELM JSON
//! - [`translator`]: compiled CQL library → ELM document
//! - [`loader`]: ELM JSON → typed models
//! - [`interpreter`]: direct evaluation of loaded ELM

pub mod expression;
pub mod interpreter;
pub mod library;
pub mod loader;
pub mod translator;

pub use interpreter::ElmEvaluator;
pub use library::{ElmDocument, ElmLibrary};
pub use loader::ElmLoader;
pub use translator::ElmTranslator;

use crate::error::Result;
use crate::evaluator::CqlEvaluator;

impl CqlEvaluator {
    /// Compile CQL source and serialize it to an ELM document.
    pub fn to_elm(&mut self, source: &str) -> Result<ElmDocument> {
        let library = self.compile(source)?;
        let manager = self.manager();
        let manager = manager.read().unwrap();
        let mut translator = ElmTranslator::with_manager(&library, &manager);
        Ok(translator.translate())
    }

    /// Compile CQL source to ELM JSON text.
    pub fn to_elm_json(&mut self, source: &str) -> Result<String> {
        let document = self.to_elm(source)?;
        serde_json::to_string_pretty(&document).map_err(Into::into)
    }
}
