//! Serde models for the FHIR terminology resources this crate consumes.
//!
//! These are deliberately partial: only the fields the expansion, membership
//! and subsumption algorithms read. Unknown fields are accepted and ignored.

use serde::{Deserialize, Serialize};

/// A FHIR ValueSet (subset).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueSet {
    #[serde(default = "value_set_resource_type")]
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compose: Option<Compose>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expansion: Option<Expansion>,
}

fn value_set_resource_type() -> String {
    "ValueSet".to_string()
}

/// Compose rules: include minus exclude.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Compose {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<ConceptSet>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<ConceptSet>,
}

/// One include/exclude rule: enumerated concepts, a whole code system, or a
/// filtered slice of one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConceptSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub concept: Vec<ConceptReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<ConceptFilter>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConceptReference {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

/// A compose filter; `is-a` is the one the in-memory service evaluates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConceptFilter {
    pub property: String,
    pub op: String,
    pub value: String,
}

/// A frozen expansion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Expansion {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contains: Vec<ExpansionContains>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpansionContains {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

/// A FHIR CodeSystem (subset). Concepts may nest, which is where the
/// subsumption hierarchy comes from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeSystem {
    #[serde(default = "code_system_resource_type")]
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub concept: Vec<CodeSystemConcept>,
}

fn code_system_resource_type() -> String {
    "CodeSystem".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeSystemConcept {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub concept: Vec<CodeSystemConcept>,
}

/// Outcome of a `$subsumes` check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubsumptionOutcome {
    Equivalent,
    Subsumes,
    SubsumedBy,
    NotSubsumed,
}

impl SubsumptionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equivalent => "equivalent",
            Self::Subsumes => "subsumes",
            Self::SubsumedBy => "subsumed-by",
            Self::NotSubsumed => "not-subsumed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "equivalent" => Some(Self::Equivalent),
            "subsumes" => Some(Self::Subsumes),
            "subsumed-by" => Some(Self::SubsumedBy),
            "not-subsumed" => Some(Self::NotSubsumed),
            _ => None,
        }
    }
}

/// Result of a `$validate-code` check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidateCodeResult {
    pub result: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_set_deserializes_with_unknown_fields() {
        let vs: ValueSet = serde_json::from_value(json!({
            "resourceType": "ValueSet",
            "url": "http://example.org/vs",
            "publisher": "ignored",
            "compose": {
                "include": [{"system": "http://example.org/cs", "concept": [{"code": "a"}]}]
            }
        }))
        .unwrap();
        assert_eq!(vs.url.as_deref(), Some("http://example.org/vs"));
        assert_eq!(vs.compose.unwrap().include[0].concept[0].code, "a");
    }

    #[test]
    fn test_subsumption_outcome_round_trip() {
        for outcome in [
            SubsumptionOutcome::Equivalent,
            SubsumptionOutcome::Subsumes,
            SubsumptionOutcome::SubsumedBy,
            SubsumptionOutcome::NotSubsumed,
        ] {
            assert_eq!(SubsumptionOutcome::parse(outcome.as_str()), Some(outcome));
        }
    }
}
