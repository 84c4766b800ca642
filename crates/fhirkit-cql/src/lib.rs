//! # fhirkit-cql
//!
//! CQL (Clinical Quality Language) capabilities for the fhirkit workspace:
//!
//! - a nom-based CQL parser and AST
//! - a compiler producing frozen, shareable libraries
//! - a tree-walking evaluator over the shared FHIRPath value model, with
//!   queries, retrieves, interval/temporal algebra, UCUM-backed quantity
//!   arithmetic, and terminology integration
//! - CQL-to-ELM translation plus an ELM loader and interpreter for
//!   executing serialized libraries without reparsing
//!
//! ```
//! use fhirkit_cql::CqlEvaluator;
//! use fhirkit_fhirpath::FhirPathValue;
//!
//! let mut evaluator = CqlEvaluator::new();
//! evaluator.compile("library T define X: 1 + 2 * 3").unwrap();
//! let result = evaluator.evaluate_definition("X", None, None).unwrap();
//! assert_eq!(result, FhirPathValue::Integer(7));
//! ```

pub mod compiler;
pub mod context;
pub mod datasource;
pub mod elm;
pub mod error;
pub mod evaluator;
pub mod library;
pub mod parser;

pub use compiler::CqlCompiler;
pub use context::CqlContext;
pub use datasource::{
    DataSource, InMemoryDataSource, PatientBundleDataSource, RetrieveContext, RetrieveFilter,
};
pub use elm::{ElmDocument, ElmEvaluator, ElmLibrary, ElmLoader, ElmTranslator};
pub use error::{CqlError, Result};
pub use evaluator::CqlEvaluator;
pub use library::{Library, LibraryManager};
pub use parser::CqlParser;
