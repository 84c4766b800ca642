//! FHIRPath evaluation engine.

pub mod context;
pub mod engine;
pub mod functions;
pub mod operations;

pub use context::{EvaluationContext, TraceLog};
pub use engine::FhirPathEvaluator;
pub use functions::{FunctionContext, FunctionRegistry};
