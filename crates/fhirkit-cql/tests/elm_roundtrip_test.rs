//! CQL → ELM → evaluation round trips.
//!
//! For every serialized construct, evaluating the ELM through the
//! interpreter must equal evaluating the CQL directly.

use fhirkit_cql::{CqlEvaluator, ElmEvaluator, InMemoryDataSource};
use fhirkit_fhirpath::FhirPathValue;
use serde_json::json;
use std::sync::Arc;

/// Evaluate a definition both ways and assert agreement.
fn round_trip(source: &str, name: &str) -> FhirPathValue {
    let mut cql = CqlEvaluator::new();
    let elm_json = cql.to_elm_json(source).unwrap_or_else(|e| panic!("to_elm failed: {e}"));
    let direct = cql
        .evaluate_definition(name, None, None)
        .unwrap_or_else(|e| panic!("CQL evaluate failed: {e}"));

    let mut elm = ElmEvaluator::new();
    elm.load(&elm_json).unwrap_or_else(|e| panic!("ELM load failed: {e}"));
    let via_elm = elm
        .evaluate_definition(name, None, None)
        .unwrap_or_else(|e| panic!("ELM evaluate failed: {e}"));

    assert_eq!(direct, via_elm, "round trip diverged for {name}\n{elm_json}");
    via_elm
}

#[test]
fn test_literal_round_trips() {
    assert_eq!(
        round_trip("library T define X: 42", "X"),
        FhirPathValue::Integer(42)
    );
    assert_eq!(
        round_trip("library T define X: 'text'", "X"),
        FhirPathValue::String("text".into())
    );
    assert_eq!(
        round_trip("library T define X: true", "X"),
        FhirPathValue::Boolean(true)
    );
    assert_eq!(
        round_trip("library T define X: null", "X"),
        FhirPathValue::Null
    );
    round_trip("library T define X: 3.14", "X");
    round_trip("library T define X: 5 'mg'", "X");
    round_trip("library T define X: @2024-03-15", "X");
}

#[test]
fn test_arithmetic_round_trips() {
    assert_eq!(
        round_trip("library T define X: 1 + 2 * 3", "X"),
        FhirPathValue::Integer(7)
    );
    round_trip("library T define X: 10 / 4", "X");
    round_trip("library T define X: 10 div 3", "X");
    round_trip("library T define X: 10 mod 3", "X");
    round_trip("library T define X: 2 ^ 8", "X");
    round_trip("library T define X: -(5)", "X");
    round_trip("library T define X: 'a' + 'b'", "X");
}

#[test]
fn test_comparison_and_logic_round_trips() {
    for source in [
        "library T define X: 1 < 2",
        "library T define X: 2 <= 2",
        "library T define X: 'a' = 'a'",
        "library T define X: 1 != 2",
        "library T define X: 'a' ~ 'A'",
        "library T define X: true and false",
        "library T define X: true or null",
        "library T define X: true xor true",
        "library T define X: false implies null",
        "library T define X: not false",
        "library T define X: null is null",
        "library T define X: 5 is not null",
    ] {
        round_trip(source, "X");
    }
}

#[test]
fn test_conditional_round_trips() {
    assert_eq!(
        round_trip("library T define X: if 1 < 2 then 'a' else 'b'", "X"),
        FhirPathValue::String("a".into())
    );
    round_trip(
        "library T define X: case when 1 > 2 then 'a' when 2 > 1 then 'b' else 'c' end",
        "X",
    );
    round_trip("library T define X: case 2 when 1 then 'a' when 2 then 'b' else 'c' end", "X");
}

#[test]
fn test_list_round_trip() {
    let result = round_trip("library T define S: {1, 2, 3, 4, 5}", "S");
    assert_eq!(
        result,
        FhirPathValue::Collection(
            (1..=5).map(FhirPathValue::Integer).collect()
        )
    );
    round_trip("library T define X: {1, 2} union {2, 3}", "X");
    round_trip("library T define X: Count({1, 2, 3})", "X");
    round_trip("library T define X: Sum({1, 2, 3})", "X");
    round_trip("library T define X: Max({3, 1, 2})", "X");
    round_trip("library T define X: First({9, 8})", "X");
    round_trip("library T define X: exists {1}", "X");
    round_trip("library T define X: distinct {1, 1, 2}", "X");
}

#[test]
fn test_interval_round_trips() {
    round_trip("library T define X: Interval[1, 10)", "X");
    round_trip("library T define X: 3 in Interval[1, 5]", "X");
    round_trip("library T define X: Interval[1, 5] overlaps Interval[4, 8]", "X");
    round_trip("library T define X: Interval[1, 5] before Interval[6, 8]", "X");
    round_trip("library T define X: start of Interval[3, 9]", "X");
    round_trip("library T define X: width of Interval[3, 9]", "X");
    round_trip(
        "library T define X: @2024-03-15 same year as @2024-12-01",
        "X",
    );
    round_trip("library T define X: years between @2020-01-01 and @2024-06-01", "X");
}

#[test]
fn test_tuple_round_trip() {
    let result = round_trip(
        "library T define X: Tuple { name: 'John', age: 40 }",
        "X",
    );
    let FhirPathValue::Tuple(tuple) = result else {
        panic!("expected tuple");
    };
    assert_eq!(tuple.get("age"), Some(&FhirPathValue::Integer(40)));
}

#[test]
fn test_reference_round_trips() {
    let source = r#"
        library T
        parameter Threshold Integer default 10
        define Base: 2
        define Derived: Base * Threshold
    "#;
    assert_eq!(
        round_trip(source, "Derived"),
        FhirPathValue::Integer(20)
    );
}

#[test]
fn test_function_round_trips() {
    let source = r#"
        library T
        define function Double(x Integer): x * 2
        define X: Double(21)
    "#;
    assert_eq!(round_trip(source, "X"), FhirPathValue::Integer(42));
}

#[test]
fn test_query_round_trips() {
    let source = r#"
        library T
        define N: {1, 2, 3, 4, 5}
        define Evens: from N e where e mod 2 = 0 return e
    "#;
    assert_eq!(
        round_trip(source, "Evens"),
        FhirPathValue::Collection(vec![FhirPathValue::Integer(2), FhirPathValue::Integer(4)])
    );

    round_trip(
        "library T define X: from {3, 1, 2} v return v sort desc",
        "X",
    );
    round_trip(
        "library T define X: from {1, 2, 2} v return distinct v",
        "X",
    );
    round_trip(
        "library T define X: from {1, 2, 3} v let d: v * 2 where d > 2 return d",
        "X",
    );
    round_trip(
        "library T define X: from {1, 2, 3, 4} N aggregate R starting 0: R + N",
        "X",
    );
}

#[test]
fn test_sort_by_field_round_trips() {
    let source = r#"
        library T
        define People: {
            Tuple { name: 'b', age: 30 },
            Tuple { name: 'a', age: 40 }
        }
        define Sorted: from People p return p sort by age desc
    "#;
    round_trip(source, "Sorted");
}

#[test]
fn test_retrieve_round_trip_with_datasource() {
    let source = r#"
        library T
        using FHIR
        context Patient
        define Conditions: [Condition]
    "#;

    let mut data = InMemoryDataSource::new();
    data.add_resources([
        json!({"resourceType": "Patient", "id": "p1"}),
        json!({
            "resourceType": "Condition", "id": "c1",
            "subject": {"reference": "Patient/p1"}
        }),
    ]);
    let data: Arc<InMemoryDataSource> = Arc::new(data);
    let patient = json!({"resourceType": "Patient", "id": "p1"});

    let mut cql = CqlEvaluator::new();
    cql.set_data_source(data.clone());
    let elm_json = cql.to_elm_json(source).unwrap();
    let direct = cql
        .evaluate_definition("Conditions", Some(&patient), None)
        .unwrap();

    let mut elm = ElmEvaluator::new();
    elm.set_data_source(data);
    elm.load(&elm_json).unwrap();
    let via_elm = elm
        .evaluate_definition("Conditions", Some(&patient), None)
        .unwrap();

    assert_eq!(direct, via_elm);
    let FhirPathValue::Collection(items) = via_elm else {
        panic!("expected collection");
    };
    assert_eq!(items.len(), 1);
}

#[test]
fn test_elm_node_shapes_match_specification() {
    let mut cql = CqlEvaluator::new();
    let document = cql.to_elm("library T define X: 1 + 2").unwrap();
    let serialized = serde_json::to_value(&document).unwrap();

    let def = &serialized["library"]["statements"]["def"][0];
    assert_eq!(def["name"], "X");
    let expr = &def["expression"];
    assert_eq!(expr["type"], "Add");
    assert_eq!(
        expr["operand"][0]["valueType"],
        "{urn:hl7-org:elm-types:r1}Integer"
    );
    assert_eq!(expr["operand"][0]["value"], "1");
}

#[test]
fn test_elm_json_reload_round_trip() {
    // serialize, reload, re-serialize: stable
    let mut cql = CqlEvaluator::new();
    let json_text = cql
        .to_elm_json("library R version '1.0' define S: {1, 2, 3}")
        .unwrap();
    let reloaded = fhirkit_cql::ElmLoader::load_json(&json_text).unwrap();
    assert_eq!(reloaded.key(), "R|1.0");
    let reserialized =
        serde_json::to_string_pretty(&fhirkit_cql::ElmDocument { library: reloaded }).unwrap();
    assert_eq!(json_text, reserialized);
}
