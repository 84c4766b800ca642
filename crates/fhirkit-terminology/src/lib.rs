//! # fhirkit-terminology
//!
//! Terminology services for clinical logic: does a code belong to a value
//! set, does one code subsume another, and what is in a value set's
//! expansion.
//!
//! Two implementations are provided: [`InMemoryTerminologyService`], a store
//! loaded programmatically or from JSON files, and [`FhirTerminologyClient`],
//! a thin proxy to an external FHIR terminology server.

pub mod error;
pub mod models;
pub mod remote;
pub mod service;

pub use error::{Result, TerminologyError};
pub use models::{
    CodeSystem, CodeSystemConcept, Compose, ConceptFilter, ConceptReference, ConceptSet,
    Expansion, ExpansionContains, SubsumptionOutcome, ValidateCodeResult, ValueSet,
};
pub use remote::FhirTerminologyClient;
pub use service::{InMemoryTerminologyService, TerminologyService};
