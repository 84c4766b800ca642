//! The terminology service contract and the in-memory implementation.

use crate::error::{Result, TerminologyError};
use crate::models::{
    CodeSystem, CodeSystemConcept, Expansion, ExpansionContains, SubsumptionOutcome, ValidateCodeResult,
    ValueSet,
};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// The three questions clinical logic asks of terminology, plus expansion.
pub trait TerminologyService: Send + Sync {
    /// Validate a code against a value set.
    fn validate_code(
        &self,
        valueset_url: &str,
        valueset_version: Option<&str>,
        code: &str,
        system: Option<&str>,
    ) -> Result<ValidateCodeResult>;

    /// Is the code a member of the value set?
    fn member_of(&self, code: &str, system: Option<&str>, valueset_url: &str) -> Result<bool>;

    /// Subsumption between two codes of one code system.
    fn subsumes(&self, code_a: &str, code_b: &str, system_url: &str)
        -> Result<SubsumptionOutcome>;

    /// Expand a value set, optionally filtered by a substring over code and
    /// display, with paging.
    fn expand(
        &self,
        valueset_url: &str,
        filter: Option<&str>,
        offset: usize,
        count: Option<usize>,
    ) -> Result<ValueSet>;

    /// Fetch a value set definition by URL (and optionally version).
    fn get_value_set(&self, url: &str, version: Option<&str>) -> Option<ValueSet>;
}

/// In-memory terminology store.
///
/// Value sets are indexed by URL and by `url|version`; code systems carry a
/// prebuilt parent index for subsumption.
#[derive(Debug, Default)]
pub struct InMemoryTerminologyService {
    value_sets: HashMap<String, ValueSet>,
    code_systems: HashMap<String, CodeSystem>,
    /// url -> code -> parent code (None for roots)
    parent_index: HashMap<String, HashMap<String, Option<String>>>,
    /// url -> flattened (code, display) in definition order
    flat_concepts: HashMap<String, Vec<(String, Option<String>)>>,
}

impl InMemoryTerminologyService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_value_set(&mut self, value_set: ValueSet) {
        let Some(url) = value_set.url.clone() else {
            return;
        };
        if let Some(version) = &value_set.version {
            self.value_sets
                .insert(format!("{url}|{version}"), value_set.clone());
        }
        self.value_sets.insert(url, value_set);
    }

    pub fn add_value_set_from_json(&mut self, json: &serde_json::Value) -> Result<()> {
        let value_set: ValueSet = serde_json::from_value(json.clone())?;
        self.add_value_set(value_set);
        Ok(())
    }

    pub fn add_code_system(&mut self, code_system: CodeSystem) {
        let Some(url) = code_system.url.clone() else {
            return;
        };
        let mut parents = HashMap::new();
        let mut flat = Vec::new();
        index_concepts(&code_system.concept, None, &mut parents, &mut flat);
        self.parent_index.insert(url.clone(), parents);
        self.flat_concepts.insert(url.clone(), flat);
        self.code_systems.insert(url, code_system);
    }

    /// Load a ValueSet or CodeSystem from a JSON file.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let json: serde_json::Value = fhirkit_foundation::io::read_json_value(&path)?;
        match json.get("resourceType").and_then(|v| v.as_str()) {
            Some("ValueSet") => self.add_value_set_from_json(&json),
            Some("CodeSystem") => {
                let code_system: CodeSystem = serde_json::from_value(json)?;
                self.add_code_system(code_system);
                Ok(())
            }
            other => Err(TerminologyError::Server(format!(
                "unsupported resource type in {}: {:?}",
                path.as_ref().display(),
                other
            ))),
        }
    }

    /// Load every `*.json` file in a directory; invalid files are skipped.
    /// Returns the number of resources loaded.
    pub fn load_directory(&mut self, directory: impl AsRef<Path>) -> Result<usize> {
        let mut loaded = 0;
        for entry in std::fs::read_dir(directory).map_err(fhirkit_foundation::FoundationError::Io)? {
            let entry = entry.map_err(fhirkit_foundation::FoundationError::Io)?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                match self.load_file(&path) {
                    Ok(()) => loaded += 1,
                    Err(err) => debug!(path = %path.display(), %err, "skipping file"),
                }
            }
        }
        Ok(loaded)
    }

    /// All `(system, code, display)` triples a value set selects, applying
    /// the include/exclude composition.
    fn codes_in_value_set(&self, value_set: &ValueSet) -> Vec<(String, String, Option<String>)> {
        let mut codes: Vec<(String, String, Option<String>)> = Vec::new();

        // A frozen expansion is authoritative when present
        if let Some(expansion) = &value_set.expansion {
            for item in &expansion.contains {
                if let (Some(system), Some(code)) = (&item.system, &item.code) {
                    codes.push((system.clone(), code.clone(), item.display.clone()));
                }
            }
            if !codes.is_empty() {
                return codes;
            }
        }

        let Some(compose) = &value_set.compose else {
            return codes;
        };

        for include in &compose.include {
            let system = include.system.clone().unwrap_or_default();
            if !include.concept.is_empty() {
                for concept in &include.concept {
                    push_unique(
                        &mut codes,
                        (system.clone(), concept.code.clone(), concept.display.clone()),
                    );
                }
            } else if !include.filter.is_empty() {
                for filter in &include.filter {
                    if filter.property == "concept" && filter.op == "is-a" {
                        for (code, display) in self.descendants_or_self(&system, &filter.value) {
                            push_unique(&mut codes, (system.clone(), code, display));
                        }
                    }
                }
            } else {
                // Whole code system, including nested concepts
                if let Some(flat) = self.flat_concepts.get(&system) {
                    for (code, display) in flat {
                        push_unique(&mut codes, (system.clone(), code.clone(), display.clone()));
                    }
                }
            }
        }

        for exclude in &compose.exclude {
            let system = exclude.system.clone().unwrap_or_default();
            if !exclude.concept.is_empty() {
                for concept in &exclude.concept {
                    codes.retain(|(s, c, _)| !(s == &system && c == &concept.code));
                }
            } else {
                codes.retain(|(s, _, _)| s != &system);
            }
        }

        codes
    }

    /// The code and every code beneath it in the hierarchy.
    fn descendants_or_self(&self, system: &str, root: &str) -> Vec<(String, Option<String>)> {
        let Some(parents) = self.parent_index.get(system) else {
            return Vec::new();
        };
        let Some(flat) = self.flat_concepts.get(system) else {
            return Vec::new();
        };
        flat.iter()
            .filter(|(code, _)| {
                let mut current = Some(code.clone());
                while let Some(c) = current {
                    if c == root {
                        return true;
                    }
                    current = parents.get(&c).cloned().flatten();
                }
                false
            })
            .cloned()
            .collect()
    }
}

fn push_unique(
    codes: &mut Vec<(String, String, Option<String>)>,
    entry: (String, String, Option<String>),
) {
    if !codes.iter().any(|(s, c, _)| s == &entry.0 && c == &entry.1) {
        codes.push(entry);
    }
}

fn index_concepts(
    concepts: &[CodeSystemConcept],
    parent: Option<&str>,
    parents: &mut HashMap<String, Option<String>>,
    flat: &mut Vec<(String, Option<String>)>,
) {
    for concept in concepts {
        parents.insert(concept.code.clone(), parent.map(str::to_string));
        flat.push((concept.code.clone(), concept.display.clone()));
        index_concepts(&concept.concept, Some(&concept.code), parents, flat);
    }
}

impl TerminologyService for InMemoryTerminologyService {
    fn validate_code(
        &self,
        valueset_url: &str,
        valueset_version: Option<&str>,
        code: &str,
        system: Option<&str>,
    ) -> Result<ValidateCodeResult> {
        let Some(value_set) = self.get_value_set(valueset_url, valueset_version) else {
            return Ok(ValidateCodeResult {
                result: false,
                message: Some("Value set not found".to_string()),
                display: None,
            });
        };

        let codes = self.codes_in_value_set(&value_set);
        let matched = codes.iter().find(|(vs_system, vs_code, _)| {
            vs_code == code && system.map(|s| s == vs_system).unwrap_or(true)
        });

        Ok(match matched {
            Some((_, _, display)) => ValidateCodeResult {
                result: true,
                message: None,
                display: display.clone(),
            },
            None => ValidateCodeResult {
                result: false,
                message: Some(format!("Code '{code}' not found in value set")),
                display: None,
            },
        })
    }

    fn member_of(&self, code: &str, system: Option<&str>, valueset_url: &str) -> Result<bool> {
        let Some(value_set) = self.get_value_set(valueset_url, None) else {
            return Ok(false);
        };
        Ok(self.codes_in_value_set(&value_set).iter().any(
            |(vs_system, vs_code, _)| {
                vs_code == code && system.map(|s| s == vs_system).unwrap_or(true)
            },
        ))
    }

    fn subsumes(
        &self,
        code_a: &str,
        code_b: &str,
        system_url: &str,
    ) -> Result<SubsumptionOutcome> {
        if code_a == code_b {
            return Ok(SubsumptionOutcome::Equivalent);
        }
        let Some(parents) = self.parent_index.get(system_url) else {
            return Err(TerminologyError::CodeSystemNotFound(system_url.to_string()));
        };

        let ancestor_of = |descendant: &str, ancestor: &str| -> bool {
            let mut current = parents.get(descendant).cloned().flatten();
            while let Some(code) = current {
                if code == ancestor {
                    return true;
                }
                current = parents.get(&code).cloned().flatten();
            }
            false
        };

        if ancestor_of(code_b, code_a) {
            Ok(SubsumptionOutcome::Subsumes)
        } else if ancestor_of(code_a, code_b) {
            Ok(SubsumptionOutcome::SubsumedBy)
        } else {
            Ok(SubsumptionOutcome::NotSubsumed)
        }
    }

    fn expand(
        &self,
        valueset_url: &str,
        filter: Option<&str>,
        offset: usize,
        count: Option<usize>,
    ) -> Result<ValueSet> {
        let Some(value_set) = self.get_value_set(valueset_url, None) else {
            return Err(TerminologyError::ValueSetNotFound(valueset_url.to_string()));
        };

        let mut codes = self.codes_in_value_set(&value_set);

        if let Some(filter) = filter {
            let needle = filter.to_lowercase();
            codes.retain(|(_, code, display)| {
                code.to_lowercase().contains(&needle)
                    || display
                        .as_deref()
                        .map(|d| d.to_lowercase().contains(&needle))
                        .unwrap_or(false)
            });
        }

        let total = codes.len();
        let page: Vec<ExpansionContains> = codes
            .into_iter()
            .skip(offset)
            .take(count.unwrap_or(usize::MAX))
            .map(|(system, code, display)| ExpansionContains {
                system: Some(system),
                code: Some(code),
                display,
            })
            .collect();

        Ok(ValueSet {
            expansion: Some(Expansion {
                total: Some(total),
                contains: page,
            }),
            ..value_set
        })
    }

    fn get_value_set(&self, url: &str, version: Option<&str>) -> Option<ValueSet> {
        if let Some(version) = version {
            if let Some(vs) = self.value_sets.get(&format!("{url}|{version}")) {
                return Some(vs.clone());
            }
        }
        self.value_sets.get(url).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service_with_hierarchy() -> InMemoryTerminologyService {
        let mut service = InMemoryTerminologyService::new();
        let code_system: CodeSystem = serde_json::from_value(json!({
            "resourceType": "CodeSystem",
            "url": "http://example.org/cs",
            "concept": [
                {"code": "A", "display": "A", "concept": [
                    {"code": "A1", "display": "A one"},
                    {"code": "A2", "display": "A two", "concept": [{"code": "A2a"}]}
                ]},
                {"code": "B", "display": "B", "concept": [{"code": "B1"}]}
            ]
        }))
        .unwrap();
        service.add_code_system(code_system);
        service
    }

    #[test]
    fn test_subsumption_hierarchy() {
        let service = service_with_hierarchy();
        let system = "http://example.org/cs";

        assert_eq!(
            service.subsumes("A", "A", system).unwrap(),
            SubsumptionOutcome::Equivalent
        );
        assert_eq!(
            service.subsumes("A", "A1", system).unwrap(),
            SubsumptionOutcome::Subsumes
        );
        // transitive through A2
        assert_eq!(
            service.subsumes("A", "A2a", system).unwrap(),
            SubsumptionOutcome::Subsumes
        );
        assert_eq!(
            service.subsumes("A1", "A", system).unwrap(),
            SubsumptionOutcome::SubsumedBy
        );
        assert_eq!(
            service.subsumes("A", "B", system).unwrap(),
            SubsumptionOutcome::NotSubsumed
        );
    }

    #[test]
    fn test_subsumption_reflexivity_for_all_codes() {
        let service = service_with_hierarchy();
        for code in ["A", "A1", "A2", "A2a", "B", "B1"] {
            assert_eq!(
                service.subsumes(code, code, "http://example.org/cs").unwrap(),
                SubsumptionOutcome::Equivalent
            );
        }
    }

    #[test]
    fn test_whole_system_inclusion_and_exclude() {
        let mut service = service_with_hierarchy();
        service.add_value_set(
            serde_json::from_value(json!({
                "resourceType": "ValueSet",
                "url": "http://example.org/vs",
                "compose": {
                    "include": [{"system": "http://example.org/cs"}],
                    "exclude": [{"system": "http://example.org/cs", "concept": [{"code": "B1"}]}]
                }
            }))
            .unwrap(),
        );

        let expanded = service.expand("http://example.org/vs", None, 0, None).unwrap();
        let expansion = expanded.expansion.unwrap();
        assert_eq!(expansion.total, Some(5)); // six concepts minus B1
        assert!(expansion
            .contains
            .iter()
            .all(|c| c.code.as_deref() != Some("B1")));
    }

    #[test]
    fn test_expansion_filter_and_paging() {
        let mut service = service_with_hierarchy();
        service.add_value_set(
            serde_json::from_value(json!({
                "resourceType": "ValueSet",
                "url": "http://example.org/vs",
                "compose": {"include": [{"system": "http://example.org/cs"}]}
            }))
            .unwrap(),
        );

        let filtered = service
            .expand("http://example.org/vs", Some("one"), 0, None)
            .unwrap();
        let expansion = filtered.expansion.unwrap();
        assert_eq!(expansion.total, Some(1));
        assert_eq!(expansion.contains[0].code.as_deref(), Some("A1"));

        let paged = service
            .expand("http://example.org/vs", None, 1, Some(2))
            .unwrap();
        let expansion = paged.expansion.unwrap();
        assert_eq!(expansion.total, Some(6));
        assert_eq!(expansion.contains.len(), 2);
    }

    #[test]
    fn test_member_of_enumerated_value_set() {
        let mut service = InMemoryTerminologyService::new();
        service.add_value_set(
            serde_json::from_value(json!({
                "resourceType": "ValueSet",
                "url": "http://example.org/diabetes",
                "compose": {"include": [{
                    "system": "http://snomed.info/sct",
                    "concept": [{"code": "44054006", "display": "Type 2 diabetes"}]
                }]}
            }))
            .unwrap(),
        );

        assert!(service
            .member_of("44054006", Some("http://snomed.info/sct"), "http://example.org/diabetes")
            .unwrap());
        assert!(!service
            .member_of("12345", Some("http://snomed.info/sct"), "http://example.org/diabetes")
            .unwrap());
        // wrong system does not match
        assert!(!service
            .member_of("44054006", Some("http://loinc.org"), "http://example.org/diabetes")
            .unwrap());
    }

    #[test]
    fn test_validate_code_reports_display() {
        let mut service = service_with_hierarchy();
        service.add_value_set(
            serde_json::from_value(json!({
                "resourceType": "ValueSet",
                "url": "http://example.org/vs",
                "compose": {"include": [{"system": "http://example.org/cs"}]}
            }))
            .unwrap(),
        );

        let result = service
            .validate_code("http://example.org/vs", None, "A1", Some("http://example.org/cs"))
            .unwrap();
        assert!(result.result);
        assert_eq!(result.display.as_deref(), Some("A one"));

        let missing = service
            .validate_code("http://example.org/vs", None, "Z", None)
            .unwrap();
        assert!(!missing.result);
        assert!(missing.message.is_some());
    }

    #[test]
    fn test_is_a_filter_include() {
        let mut service = service_with_hierarchy();
        service.add_value_set(
            serde_json::from_value(json!({
                "resourceType": "ValueSet",
                "url": "http://example.org/under-a",
                "compose": {"include": [{
                    "system": "http://example.org/cs",
                    "filter": [{"property": "concept", "op": "is-a", "value": "A"}]
                }]}
            }))
            .unwrap(),
        );

        let expanded = service.expand("http://example.org/under-a", None, 0, None).unwrap();
        let codes: Vec<_> = expanded
            .expansion
            .unwrap()
            .contains
            .iter()
            .filter_map(|c| c.code.clone())
            .collect();
        assert_eq!(codes, vec!["A", "A1", "A2", "A2a"]);
    }
}
