//! Runtime value model shared by the FHIRPath and CQL evaluators.

pub mod code;
pub mod datetime;
pub mod interval;
pub mod quantity;
pub mod value;

pub use code::{Code, Concept};
pub use datetime::{DateTimePrecision, FhirDate, FhirDateTime, FhirTime};
pub use interval::Interval;
pub use quantity::{Quantity, Ratio};
pub use value::{Collection, FhirPathValue};
