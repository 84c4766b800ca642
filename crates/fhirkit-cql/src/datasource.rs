//! Pluggable data sources backing the CQL retrieve.
//!
//! A data source returns resources of a type, scoped to the evaluation
//! context's patient via the reference-path table, and optionally filtered
//! by the codes found at a code path.

use fhirkit_foundation::json::values_at_path;
use fhirkit_fhirpath::Code;
use fhirkit_terminology::TerminologyService;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// The scope a retrieve runs under: the current context resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrieveContext {
    pub resource_type: String,
    pub resource_id: String,
}

impl RetrieveContext {
    pub fn new(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }

    pub fn from_resource(resource: &Value) -> Option<Self> {
        Some(Self::new(
            resource.get("resourceType")?.as_str()?,
            resource.get("id")?.as_str()?,
        ))
    }

    fn reference(&self) -> String {
        format!("{}/{}", self.resource_type, self.resource_id)
    }
}

/// Terminology filter for a retrieve: enumerated codes or a value set URL.
#[derive(Debug, Clone, Default)]
pub struct RetrieveFilter {
    pub code_path: Option<String>,
    pub codes: Vec<Code>,
    pub valueset: Option<String>,
}

impl RetrieveFilter {
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty() && self.valueset.is_none()
    }
}

/// Produces resources to satisfy a CQL retrieve.
pub trait DataSource: Send + Sync {
    /// Resources of `resource_type`, scoped to the context and filtered by
    /// the terminology filter. Order is the source's natural order.
    fn retrieve(
        &self,
        resource_type: &str,
        filter: &RetrieveFilter,
        context: Option<&RetrieveContext>,
    ) -> Vec<Value>;

    /// Resolve a `"ResourceType/id"` reference.
    fn resolve_reference(&self, reference: &str) -> Option<Value>;
}

/// The JSON path holding the patient reference for a resource type.
pub fn patient_reference_path(resource_type: &str) -> &'static str {
    match resource_type {
        "AllergyIntolerance" | "Immunization" => "patient.reference",
        // Condition, Observation, Encounter, Procedure, MedicationRequest,
        // ServiceRequest, DiagnosticReport, CarePlan, and the long tail
        _ => "subject.reference",
    }
}

/// In-memory data source indexing resources by type and id.
#[derive(Default)]
pub struct InMemoryDataSource {
    by_type: HashMap<String, Vec<Value>>,
    by_id: HashMap<String, Value>,
    terminology: Option<Arc<dyn TerminologyService>>,
}

impl InMemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unwrap a FHIR Bundle into an indexed data source.
    pub fn from_bundle(bundle: &Value) -> Self {
        let mut source = Self::new();
        source.add_bundle(bundle);
        source
    }

    /// Value-set filtering needs a terminology service; without one a
    /// value-set filter matches nothing.
    pub fn set_terminology(&mut self, terminology: Arc<dyn TerminologyService>) {
        self.terminology = Some(terminology);
    }

    pub fn add_resource(&mut self, resource: Value) {
        let Some(resource_type) = resource.get("resourceType").and_then(Value::as_str) else {
            return;
        };
        if let Some(id) = resource.get("id").and_then(Value::as_str) {
            self.by_id
                .insert(format!("{resource_type}/{id}"), resource.clone());
        }
        self.by_type
            .entry(resource_type.to_string())
            .or_default()
            .push(resource);
    }

    pub fn add_resources(&mut self, resources: impl IntoIterator<Item = Value>) {
        for resource in resources {
            self.add_resource(resource);
        }
    }

    pub fn add_bundle(&mut self, bundle: &Value) {
        let entries = bundle
            .get("entry")
            .and_then(Value::as_array)
            .into_iter()
            .flatten();
        for entry in entries {
            if let Some(resource) = entry.get("resource") {
                self.add_resource(resource.clone());
            }
        }
    }

    /// The ids of every resource of a type, in insertion order.
    pub fn resource_types(&self) -> Vec<&str> {
        self.by_type.keys().map(String::as_str).collect()
    }

    fn in_scope(&self, resource: &Value, context: &RetrieveContext) -> bool {
        let resource_type = resource.get("resourceType").and_then(Value::as_str);
        // Retrieving the context type itself returns the context resource
        if resource_type == Some(context.resource_type.as_str()) {
            return resource.get("id").and_then(Value::as_str) == Some(&context.resource_id);
        }
        let path = patient_reference_path(resource_type.unwrap_or_default());
        let reference = context.reference();
        values_at_path(resource, path)
            .iter()
            .any(|v| v.as_str() == Some(reference.as_str()))
    }

    fn matches_filter(&self, resource: &Value, filter: &RetrieveFilter) -> bool {
        if filter.is_empty() {
            return true;
        }
        let Some(path) = filter.code_path.as_deref() else {
            return true;
        };
        let candidates = codings_at_path(resource, path);
        if candidates.is_empty() {
            return false;
        }

        if !filter.codes.is_empty() {
            return candidates.iter().any(|(system, code)| {
                filter.codes.iter().any(|wanted| {
                    wanted.code == *code
                        && match (&wanted.system, system) {
                            (Some(ws), Some(s)) => ws == s,
                            _ => true,
                        }
                })
            });
        }

        if let (Some(valueset), Some(terminology)) = (&filter.valueset, &self.terminology) {
            return candidates.iter().any(|(system, code)| {
                terminology
                    .member_of(code, system.as_deref(), valueset)
                    .unwrap_or(false)
            });
        }
        false
    }
}

/// Collect `(system, code)` pairs at a path: CodeableConcepts contribute
/// every coding, bare Codings contribute themselves, strings are
/// system-less codes.
fn codings_at_path(resource: &Value, path: &str) -> Vec<(Option<String>, String)> {
    let mut pairs = Vec::new();
    for value in values_at_path(resource, path) {
        match value {
            Value::Object(map) => {
                if let Some(codings) = map.get("coding").and_then(Value::as_array) {
                    for coding in codings {
                        if let Some(code) = coding.get("code").and_then(Value::as_str) {
                            pairs.push((
                                coding
                                    .get("system")
                                    .and_then(Value::as_str)
                                    .map(str::to_string),
                                code.to_string(),
                            ));
                        }
                    }
                } else if let Some(code) = map.get("code").and_then(Value::as_str) {
                    pairs.push((
                        map.get("system").and_then(Value::as_str).map(str::to_string),
                        code.to_string(),
                    ));
                }
            }
            Value::String(code) => pairs.push((None, code.clone())),
            _ => {}
        }
    }
    pairs
}

impl DataSource for InMemoryDataSource {
    fn retrieve(
        &self,
        resource_type: &str,
        filter: &RetrieveFilter,
        context: Option<&RetrieveContext>,
    ) -> Vec<Value> {
        let Some(resources) = self.by_type.get(resource_type) else {
            return Vec::new();
        };
        let result: Vec<Value> = resources
            .iter()
            .filter(|resource| {
                context
                    .map(|ctx| self.in_scope(resource, ctx))
                    .unwrap_or(true)
                    && self.matches_filter(resource, filter)
            })
            .cloned()
            .collect();
        debug!(resource_type, count = result.len(), "retrieve");
        result
    }

    fn resolve_reference(&self, reference: &str) -> Option<Value> {
        self.by_id.get(reference).cloned()
    }
}

/// A data source over a single patient's bundle.
///
/// Extracts the sole Patient resource at construction and scopes every
/// retrieve to it, so callers need not supply a context.
pub struct PatientBundleDataSource {
    inner: InMemoryDataSource,
    patient: RetrieveContext,
}

impl PatientBundleDataSource {
    pub fn from_bundle(bundle: &Value) -> Option<Self> {
        let inner = InMemoryDataSource::from_bundle(bundle);
        let patients = inner.by_type.get("Patient")?;
        if patients.len() != 1 {
            return None;
        }
        let patient = RetrieveContext::from_resource(&patients[0])?;
        Some(Self { inner, patient })
    }

    pub fn patient(&self) -> Option<Value> {
        self.inner
            .resolve_reference(&format!("Patient/{}", self.patient.resource_id))
    }

    pub fn set_terminology(&mut self, terminology: Arc<dyn TerminologyService>) {
        self.inner.set_terminology(terminology);
    }
}

impl DataSource for PatientBundleDataSource {
    fn retrieve(
        &self,
        resource_type: &str,
        filter: &RetrieveFilter,
        _context: Option<&RetrieveContext>,
    ) -> Vec<Value> {
        self.inner.retrieve(resource_type, filter, Some(&self.patient))
    }

    fn resolve_reference(&self, reference: &str) -> Option<Value> {
        self.inner.resolve_reference(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_source() -> InMemoryDataSource {
        let mut source = InMemoryDataSource::new();
        source.add_resources([
            json!({"resourceType": "Patient", "id": "p1"}),
            json!({"resourceType": "Patient", "id": "p2"}),
            json!({
                "resourceType": "Condition", "id": "c1",
                "subject": {"reference": "Patient/p1"},
                "code": {"coding": [{"system": "http://snomed.info/sct", "code": "44054006"}]}
            }),
            json!({
                "resourceType": "Condition", "id": "c2",
                "subject": {"reference": "Patient/p2"},
                "code": {"coding": [{"system": "http://snomed.info/sct", "code": "38341003"}]}
            }),
            json!({
                "resourceType": "Immunization", "id": "i1",
                "patient": {"reference": "Patient/p1"}
            }),
        ]);
        source
    }

    #[test]
    fn test_retrieve_scoped_to_context() {
        let source = sample_source();
        let context = RetrieveContext::new("Patient", "p1");
        let conditions = source.retrieve("Condition", &RetrieveFilter::default(), Some(&context));
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0]["id"], "c1");

        // patient-reference path table: Immunization uses patient.reference
        let immunizations =
            source.retrieve("Immunization", &RetrieveFilter::default(), Some(&context));
        assert_eq!(immunizations.len(), 1);

        // retrieving the context type returns the context resource only
        let patients = source.retrieve("Patient", &RetrieveFilter::default(), Some(&context));
        assert_eq!(patients.len(), 1);
        assert_eq!(patients[0]["id"], "p1");
    }

    #[test]
    fn test_retrieve_filtered_by_codes() {
        let source = sample_source();
        let filter = RetrieveFilter {
            code_path: Some("code".to_string()),
            codes: vec![Code {
                code: "44054006".to_string(),
                system: Some("http://snomed.info/sct".to_string()),
                ..Code::default()
            }],
            valueset: None,
        };
        let conditions = source.retrieve("Condition", &filter, None);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0]["id"], "c1");
    }

    #[test]
    fn test_retrieve_filtered_by_valueset() {
        let mut source = sample_source();
        let mut terminology = fhirkit_terminology::InMemoryTerminologyService::new();
        terminology.add_value_set(
            serde_json::from_value(json!({
                "resourceType": "ValueSet",
                "url": "http://example.org/vs/diabetes",
                "compose": {"include": [{
                    "system": "http://snomed.info/sct",
                    "concept": [{"code": "44054006"}]
                }]}
            }))
            .unwrap(),
        );
        source.set_terminology(Arc::new(terminology));

        let filter = RetrieveFilter {
            code_path: Some("code".to_string()),
            codes: Vec::new(),
            valueset: Some("http://example.org/vs/diabetes".to_string()),
        };
        let conditions = source.retrieve("Condition", &filter, None);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0]["id"], "c1");
    }

    #[test]
    fn test_resolve_reference() {
        let source = sample_source();
        assert!(source.resolve_reference("Patient/p1").is_some());
        assert!(source.resolve_reference("Patient/p9").is_none());
    }

    #[test]
    fn test_patient_bundle_auto_scopes() {
        let bundle = json!({
            "resourceType": "Bundle",
            "entry": [
                {"resource": {"resourceType": "Patient", "id": "p1"}},
                {"resource": {
                    "resourceType": "Condition", "id": "c1",
                    "subject": {"reference": "Patient/p1"}
                }},
                {"resource": {
                    "resourceType": "Condition", "id": "c2",
                    "subject": {"reference": "Patient/other"}
                }}
            ]
        });
        let source = PatientBundleDataSource::from_bundle(&bundle).unwrap();
        let conditions = source.retrieve("Condition", &RetrieveFilter::default(), None);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0]["id"], "c1");
        assert_eq!(source.patient().unwrap()["id"], "p1");
    }
}
