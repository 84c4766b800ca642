//! Retrieve with context scoping and terminology filters.

use fhirkit_cql::{CqlEvaluator, InMemoryDataSource};
use fhirkit_fhirpath::FhirPathValue;
use fhirkit_terminology::InMemoryTerminologyService;
use serde_json::json;
use std::sync::Arc;

fn data_source() -> InMemoryDataSource {
    let mut source = InMemoryDataSource::new();
    source.add_resources([
        json!({"resourceType": "Patient", "id": "p1", "birthDate": "1980-06-15"}),
        json!({"resourceType": "Patient", "id": "p2"}),
        json!({
            "resourceType": "Condition", "id": "c1",
            "subject": {"reference": "Patient/p1"},
            "code": {"coding": [{"system": "http://snomed.info/sct", "code": "44054006",
                                 "display": "Type 2 diabetes"}]}
        }),
        json!({
            "resourceType": "Condition", "id": "c2",
            "subject": {"reference": "Patient/p2"},
            "code": {"coding": [{"system": "http://snomed.info/sct", "code": "38341003"}]}
        }),
    ]);
    source
}

fn terminology() -> InMemoryTerminologyService {
    let mut service = InMemoryTerminologyService::new();
    service.add_value_set(
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
    service
}

fn ids(value: &FhirPathValue) -> Vec<String> {
    let FhirPathValue::Collection(items) = value else {
        panic!("expected collection, got {value:?}");
    };
    items
        .iter()
        .filter_map(|item| {
            item.to_json()
                .get("id")
                .and_then(|id| id.as_str())
                .map(str::to_string)
        })
        .collect()
}

#[test]
fn test_retrieve_scoped_to_context_resource() {
    let mut evaluator = CqlEvaluator::new();
    evaluator.set_data_source(Arc::new(data_source()));
    evaluator
        .compile("library T using FHIR context Patient define Conditions: [Condition]")
        .unwrap();

    let p1 = json!({"resourceType": "Patient", "id": "p1"});
    let result = evaluator
        .evaluate_definition("Conditions", Some(&p1), None)
        .unwrap();
    assert_eq!(ids(&result), vec!["c1"]);

    // no context resource: everything comes back
    let unscoped = evaluator.evaluate_definition("Conditions", None, None).unwrap();
    assert_eq!(ids(&unscoped), vec!["c1", "c2"]);
}

#[test]
fn test_retrieve_filtered_by_valueset() {
    let mut evaluator = CqlEvaluator::new();
    let mut source = data_source();
    source.set_terminology(Arc::new(terminology()));
    evaluator.set_data_source(Arc::new(source));
    evaluator.set_terminology(Arc::new(terminology()));
    evaluator
        .compile(
            r#"
            library T
            using FHIR
            valueset "Diabetes": 'http://example.org/vs/diabetes'
            define DiabetesConditions: [Condition: "Diabetes"]
            "#,
        )
        .unwrap();

    let result = evaluator
        .evaluate_definition("DiabetesConditions", None, None)
        .unwrap();
    assert_eq!(ids(&result), vec!["c1"]);
}

#[test]
fn test_retrieve_filtered_by_code() {
    let mut evaluator = CqlEvaluator::new();
    evaluator.set_data_source(Arc::new(data_source()));
    evaluator
        .compile(
            r#"
            library T
            using FHIR
            codesystem "SNOMED": 'http://snomed.info/sct'
            code "Hypertension": '38341003' from "SNOMED"
            define Matches: [Condition: code ~ "Hypertension"]
            "#,
        )
        .unwrap();

    let result = evaluator.evaluate_definition("Matches", None, None).unwrap();
    assert_eq!(ids(&result), vec!["c2"]);
}

#[test]
fn test_retrieve_in_query_with_navigation() {
    let mut evaluator = CqlEvaluator::new();
    evaluator.set_data_source(Arc::new(data_source()));
    evaluator
        .compile(
            r#"
            library T
            using FHIR
            context Patient
            define ActivePatientsConditions:
                from [Condition] C
                where exists C.code.coding
                return C.id
            "#,
        )
        .unwrap();

    let p1 = json!({"resourceType": "Patient", "id": "p1"});
    let result = evaluator
        .evaluate_definition("ActivePatientsConditions", Some(&p1), None)
        .unwrap();
    assert_eq!(
        result,
        FhirPathValue::Collection(vec![FhirPathValue::String("c1".into())])
    );
}

#[test]
fn test_membership_in_valueset_operator() {
    let mut evaluator = CqlEvaluator::new();
    evaluator.set_terminology(Arc::new(terminology()));
    evaluator
        .compile(
            r#"
            library T
            codesystem "SNOMED": 'http://snomed.info/sct'
            valueset "Diabetes": 'http://example.org/vs/diabetes'
            code "T2D": '44054006' from "SNOMED"
            code "HTN": '38341003' from "SNOMED"
            define InSet: "T2D" in "Diabetes"
            define NotInSet: "HTN" in "Diabetes"
            "#,
        )
        .unwrap();

    assert_eq!(
        evaluator.evaluate_definition("InSet", None, None).unwrap(),
        FhirPathValue::Boolean(true)
    );
    assert_eq!(
        evaluator.evaluate_definition("NotInSet", None, None).unwrap(),
        FhirPathValue::Boolean(false)
    );
}

#[test]
fn test_code_equivalence_ignores_version_and_display() {
    let mut evaluator = CqlEvaluator::new();
    evaluator
        .compile(
            r#"
            library T
            codesystem "SNOMED": 'http://snomed.info/sct'
            code "A": '44054006' from "SNOMED" display 'Type 2 diabetes'
            code "B": '44054006' from "SNOMED"
            define Equivalent: "A" ~ "B"
            "#,
        )
        .unwrap();
    assert_eq!(
        evaluator.evaluate_definition("Equivalent", None, None).unwrap(),
        FhirPathValue::Boolean(true)
    );
}

#[test]
fn test_subsumption_functions() {
    let mut terminology = InMemoryTerminologyService::new();
    terminology.add_code_system(
        serde_json::from_value(json!({
            "resourceType": "CodeSystem",
            "url": "http://example.org/cs",
            "concept": [
                {"code": "A", "concept": [{"code": "A1"}, {"code": "A2"}]},
                {"code": "B", "concept": [{"code": "B1"}]}
            ]
        }))
        .unwrap(),
    );

    let mut evaluator = CqlEvaluator::new();
    evaluator.set_terminology(Arc::new(terminology));
    evaluator
        .compile(
            r#"
            library T
            codesystem "CS": 'http://example.org/cs'
            code "Parent": 'A' from "CS"
            code "Child": 'A1' from "CS"
            code "Other": 'B' from "CS"
            define ParentSubsumesChild: Subsumes("Parent", "Child")
            define ChildSubsumedByParent: SubsumedBy("Child", "Parent")
            define Unrelated: Subsumes("Parent", "Other")
            "#,
        )
        .unwrap();

    assert_eq!(
        evaluator
            .evaluate_definition("ParentSubsumesChild", None, None)
            .unwrap(),
        FhirPathValue::Boolean(true)
    );
    assert_eq!(
        evaluator
            .evaluate_definition("ChildSubsumedByParent", None, None)
            .unwrap(),
        FhirPathValue::Boolean(true)
    );
    assert_eq!(
        evaluator.evaluate_definition("Unrelated", None, None).unwrap(),
        FhirPathValue::Boolean(false)
    );
}
