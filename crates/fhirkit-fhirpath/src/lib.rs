//! # fhirkit-fhirpath
//!
//! FHIRPath expression parser and evaluator for FHIR resources.
//!
//! FHIRPath is a path/query language over tree-shaped healthcare resources;
//! every expression evaluates to an ordered collection. This crate provides
//! the parser (nom combinators), the runtime value model shared with the CQL
//! evaluator, and a tree-walking evaluator with three-valued logic, lazy
//! higher-order functions, and a name-keyed function registry.
//!
//! ```
//! use fhirkit_fhirpath::FhirPath;
//! use serde_json::json;
//!
//! let fhirpath = FhirPath::new();
//! let patient = json!({
//!     "resourceType": "Patient",
//!     "name": [{"given": ["John", "William"], "family": "Smith"}]
//! });
//! let given = fhirpath.evaluate("Patient.name.given", Some(&patient)).unwrap();
//! assert_eq!(given.len(), 2);
//! ```

pub mod ast;
pub mod error;
pub mod evaluator;
pub mod fhirpath;
pub mod model;
pub mod parser;

pub use error::{FhirPathError, FhirPathResult};
pub use evaluator::{EvaluationContext, FhirPathEvaluator, FunctionContext, FunctionRegistry};
pub use fhirpath::FhirPath;
pub use model::{
    Code, Collection, Concept, DateTimePrecision, FhirDate, FhirDateTime, FhirPathValue, FhirTime,
    Interval, Quantity, Ratio,
};
pub use parser::FhirPathParser;
