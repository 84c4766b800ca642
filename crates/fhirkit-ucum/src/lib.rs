//! UCUM unit parser and converter.
//!
//! Implements parsing and conversion of UCUM (Unified Code for Units of
//! Measure) codes for clinical calculations: dimensional analysis over the
//! seven base dimensions, SI prefixes on metric units, compound units joined
//! by `.` and `/` with integer exponents, and affine conversions for
//! temperature scales.
//!
//! ```
//! use fhirkit_ucum::UcumConverter;
//! use rust_decimal::Decimal;
//!
//! let converter = UcumConverter::new();
//! let mg = converter.convert(Decimal::ONE, "g", "mg").unwrap();
//! assert_eq!(mg, Decimal::from(1000));
//! ```

pub mod converter;
pub mod definitions;
pub mod error;

pub use converter::{ParsedUnit, UcumConverter};
pub use definitions::Dimension;
pub use error::{Result, UcumError};
