//! Library management: includes, access levels, versions, memoization.

use fhirkit_cql::{CqlError, CqlEvaluator};
use fhirkit_fhirpath::FhirPathValue;

#[test]
fn test_cross_library_reference() {
    let mut evaluator = CqlEvaluator::new();
    evaluator
        .compile("library Common version '1.0' define Shared: 42")
        .unwrap();
    evaluator
        .compile(
            r#"
            library Main
            include Common version '1.0' called Cmn
            define X: Cmn.Shared + 1
            "#,
        )
        .unwrap();
    assert_eq!(
        evaluator.evaluate_definition("X", None, None).unwrap(),
        FhirPathValue::Integer(43)
    );
}

#[test]
fn test_private_definitions_not_resolvable_across_libraries() {
    let mut evaluator = CqlEvaluator::new();
    evaluator
        .compile(
            r#"
            library Common version '1.0'
            define private Hidden: 1
            define Exposed: Hidden + 1
            "#,
        )
        .unwrap();
    evaluator
        .compile(
            r#"
            library Main
            include Common version '1.0' called Cmn
            define UsesExposed: Cmn.Exposed
            define UsesHidden: Cmn.Hidden
            "#,
        )
        .unwrap();

    // public definitions may use private siblings
    assert_eq!(
        evaluator.evaluate_definition("UsesExposed", None, None).unwrap(),
        FhirPathValue::Integer(2)
    );
    // but cross-library resolution of private definitions fails
    let err = evaluator
        .evaluate_definition("UsesHidden", None, None)
        .unwrap_err();
    assert!(matches!(err, CqlError::ReferenceError(_)));
}

#[test]
fn test_cross_library_terminology_and_functions() {
    let mut evaluator = CqlEvaluator::new();
    evaluator
        .compile(
            r#"
            library Terms version '1.0'
            codesystem "CS": 'http://example.org/cs'
            code "C1": 'c-1' from "CS"
            define function Triple(x Integer): x * 3
            "#,
        )
        .unwrap();
    evaluator
        .compile(
            r#"
            library Main
            include Terms version '1.0' called T
            define TheCode: T."C1"
            define Tripled: T.Triple(5)
            "#,
        )
        .unwrap();

    let FhirPathValue::Code(code) = evaluator
        .evaluate_definition("TheCode", None, None)
        .unwrap()
    else {
        panic!("expected code");
    };
    assert_eq!(code.code, "c-1");
    assert_eq!(code.system.as_deref(), Some("http://example.org/cs"));

    assert_eq!(
        evaluator.evaluate_definition("Tripled", None, None).unwrap(),
        FhirPathValue::Integer(15)
    );
}

#[test]
fn test_version_selection() {
    let mut evaluator = CqlEvaluator::new();
    evaluator
        .compile("library Common version '1.0' define V: 1")
        .unwrap();
    evaluator
        .compile("library Common version '2.0' define V: 2")
        .unwrap();
    evaluator
        .compile(
            r#"
            library Main
            include Common version '1.0' called Old
            define X: Old.V
            "#,
        )
        .unwrap();
    assert_eq!(
        evaluator.evaluate_definition("X", None, None).unwrap(),
        FhirPathValue::Integer(1)
    );
}

#[test]
fn test_definitions_memoized_within_call() {
    // A definition chain sharing a base is consistent: the memoized base
    // evaluates once per top-level call, so both references agree.
    let mut evaluator = CqlEvaluator::new();
    evaluator
        .compile(
            r#"
            library T
            define Base: Now()
            define Pair: Tuple { first: Base, second: Base }
            define Same: Pair.first = Pair.second
            "#,
        )
        .unwrap();
    assert_eq!(
        evaluator.evaluate_definition("Same", None, None).unwrap(),
        FhirPathValue::Boolean(true)
    );
}

#[test]
fn test_context_resource_reference() {
    let mut evaluator = CqlEvaluator::new();
    evaluator
        .compile(
            r#"
            library T
            using FHIR
            context Patient
            define BirthDate: Patient.birthDate
            "#,
        )
        .unwrap();
    let patient = serde_json::json!({"resourceType": "Patient", "id": "p1", "birthDate": "1980-06-15"});
    assert_eq!(
        evaluator
            .evaluate_definition("BirthDate", Some(&patient), None)
            .unwrap(),
        FhirPathValue::String("1980-06-15".into())
    );
}
