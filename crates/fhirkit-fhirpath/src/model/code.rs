//! Terminology value types: codes and concepts.

use std::fmt;

/// A code from a code system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Code {
    pub code: String,
    pub system: Option<String>,
    pub version: Option<String>,
    pub display: Option<String>,
}

impl Code {
    pub fn new(code: impl Into<String>, system: Option<String>) -> Self {
        Code {
            code: code.into(),
            system,
            ..Default::default()
        }
    }

    /// Code equivalence ignores version and display.
    pub fn equivalent(&self, other: &Code) -> bool {
        self.code == other.code && self.system == other.system
    }

    /// Code equality matches system and code; versions must agree when both
    /// are present.
    pub fn equals(&self, other: &Code) -> bool {
        if !self.equivalent(other) {
            return false;
        }
        match (&self.version, &other.version) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.system {
            Some(system) => write!(f, "{system}|{}", self.code),
            None => write!(f, "{}", self.code),
        }
    }
}

/// A concept: one meaning expressed as codes from multiple systems.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Concept {
    pub codes: Vec<Code>,
    pub display: Option<String>,
}

impl Concept {
    pub fn new(codes: Vec<Code>, display: Option<String>) -> Self {
        Concept { codes, display }
    }

    /// Two concepts are equivalent when any of their codes are.
    pub fn equivalent(&self, other: &Concept) -> bool {
        self.codes
            .iter()
            .any(|a| other.codes.iter().any(|b| a.equivalent(b)))
    }
}
