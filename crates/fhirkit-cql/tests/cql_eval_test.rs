//! End-to-end evaluation of CQL definitions.

use fhirkit_cql::CqlEvaluator;
use fhirkit_fhirpath::{FhirPathValue, Quantity};
use rust_decimal::Decimal;
use std::str::FromStr;

fn eval(source: &str, name: &str) -> FhirPathValue {
    let mut evaluator = CqlEvaluator::new();
    evaluator.compile(source).unwrap_or_else(|e| panic!("compile failed: {e}"));
    evaluator
        .evaluate_definition(name, None, None)
        .unwrap_or_else(|e| panic!("evaluate {name} failed: {e}"))
}

#[test]
fn test_arithmetic_precedence() {
    assert_eq!(
        eval("library T define X: 1 + 2 * 3", "X"),
        FhirPathValue::Integer(7)
    );
}

#[test]
fn test_division_promotes_to_decimal() {
    assert_eq!(
        eval("library T define X: 1 / 2", "X"),
        FhirPathValue::Decimal(Decimal::from_str("0.5").unwrap())
    );
    assert_eq!(
        eval("library T define X: 7 div 2", "X"),
        FhirPathValue::Integer(3)
    );
    // division by zero is null
    assert_eq!(eval("library T define X: 1 / 0", "X"), FhirPathValue::Null);
}

#[test]
fn test_definitions_reference_definitions() {
    let source = r#"
        library T
        define A: 2
        define B: A * 10
        define C: A + B
    "#;
    assert_eq!(eval(source, "C"), FhirPathValue::Integer(22));
}

#[test]
fn test_three_valued_logic() {
    assert_eq!(
        eval("library T define X: true and null", "X"),
        FhirPathValue::Null
    );
    assert_eq!(
        eval("library T define X: false and null", "X"),
        FhirPathValue::Boolean(false)
    );
    assert_eq!(
        eval("library T define X: null or true", "X"),
        FhirPathValue::Boolean(true)
    );
    assert_eq!(
        eval("library T define X: false implies null", "X"),
        FhirPathValue::Boolean(true)
    );
    assert_eq!(
        eval("library T define X: not null", "X"),
        FhirPathValue::Null
    );
}

#[test]
fn test_exists_on_empty_is_false() {
    assert_eq!(
        eval("library T define X: exists {}", "X"),
        FhirPathValue::Boolean(false)
    );
    assert_eq!(
        eval("library T define X: exists {1}", "X"),
        FhirPathValue::Boolean(true)
    );
}

#[test]
fn test_if_and_case() {
    assert_eq!(
        eval("library T define X: if 2 > 1 then 'yes' else 'no'", "X"),
        FhirPathValue::String("yes".into())
    );
    // null condition selects the else branch
    assert_eq!(
        eval("library T define X: if null then 'yes' else 'no'", "X"),
        FhirPathValue::String("no".into())
    );
    let source = r#"
        library T
        define Grade: case
            when 95 >= 90 then 'A'
            when 95 >= 80 then 'B'
            else 'F'
        end
        define Selected: case 2 when 1 then 'one' when 2 then 'two' else 'many' end
    "#;
    assert_eq!(eval(source, "Grade"), FhirPathValue::String("A".into()));
    assert_eq!(eval(source, "Selected"), FhirPathValue::String("two".into()));
}

#[test]
fn test_null_tests() {
    assert_eq!(
        eval("library T define X: null is null", "X"),
        FhirPathValue::Boolean(true)
    );
    assert_eq!(
        eval("library T define X: 5 is not null", "X"),
        FhirPathValue::Boolean(true)
    );
    assert_eq!(
        eval("library T define X: Coalesce(null, 2, 3)", "X"),
        FhirPathValue::Integer(2)
    );
}

#[test]
fn test_quantity_arithmetic_with_conversion() {
    let result = eval("library T define X: 1 'g' + 500 'mg'", "X");
    assert_eq!(
        result,
        FhirPathValue::Quantity(Quantity::new(Decimal::from_str("1.5").unwrap(), "g"))
    );

    // incompatible dimensions are null
    assert_eq!(
        eval("library T define X: 1 'g' + 1 'mL'", "X"),
        FhirPathValue::Null
    );

    // affine temperature units cannot be added
    assert_eq!(
        eval("library T define X: 37 'Cel' + 1 'Cel'", "X"),
        FhirPathValue::Null
    );
    // but compare through conversion
    assert_eq!(
        eval("library T define X: 37 'Cel' = 98.6 '[degF]'", "X"),
        FhirPathValue::Boolean(true)
    );
}

#[test]
fn test_list_operations() {
    assert_eq!(
        eval("library T define X: Count({1, 2, 3})", "X"),
        FhirPathValue::Integer(3)
    );
    assert_eq!(
        eval("library T define X: Sum({1, 2, 3})", "X"),
        FhirPathValue::Integer(6)
    );
    assert_eq!(
        eval("library T define X: {1, 2} union {2, 3}", "X"),
        FhirPathValue::Collection(vec![
            FhirPathValue::Integer(1),
            FhirPathValue::Integer(2),
            FhirPathValue::Integer(3),
        ])
    );
    assert_eq!(
        eval("library T define X: {1, 2, 3} except {2}", "X"),
        FhirPathValue::Collection(vec![FhirPathValue::Integer(1), FhirPathValue::Integer(3)])
    );
    assert_eq!(
        eval("library T define X: 2 in {1, 2, 3}", "X"),
        FhirPathValue::Boolean(true)
    );
    assert_eq!(
        eval("library T define X: First({7, 8})", "X"),
        FhirPathValue::Integer(7)
    );
    assert_eq!(
        eval("library T define X: {10, 20}[1]", "X"),
        FhirPathValue::Integer(20)
    );
}

#[test]
fn test_method_style_invocation() {
    assert_eq!(
        eval("library T define X: {1, 2, 3}.count()", "X"),
        FhirPathValue::Integer(3)
    );
    assert_eq!(
        eval("library T define X: 'hello'.upper()", "X"),
        FhirPathValue::String("HELLO".into())
    );
}

#[test]
fn test_tuples() {
    let source = "library T define Person: Tuple { name: 'John', age: 40 } define Name: Person.name";
    assert_eq!(eval(source, "Name"), FhirPathValue::String("John".into()));
}

#[test]
fn test_parameters_with_defaults() {
    let source = r#"
        library T
        parameter Threshold Integer default 10
        define AboveThreshold: 15 > Threshold
    "#;
    assert_eq!(eval(source, "AboveThreshold"), FhirPathValue::Boolean(true));

    // caller-supplied parameter wins over the default
    let mut evaluator = CqlEvaluator::new();
    evaluator.compile(source).unwrap();
    let mut parameters = std::collections::HashMap::new();
    parameters.insert("Threshold".to_string(), FhirPathValue::Integer(20));
    let result = evaluator
        .evaluate_definition("AboveThreshold", None, Some(parameters))
        .unwrap();
    assert_eq!(result, FhirPathValue::Boolean(false));
}

#[test]
fn test_user_functions_and_overloads() {
    let source = r#"
        library T
        define function Double(x Integer): x * 2
        define function Add(x Integer, y Integer): x + y
        define X: Double(21)
        define Y: Add(Double(2), 3)
    "#;
    assert_eq!(eval(source, "X"), FhirPathValue::Integer(42));
    assert_eq!(eval(source, "Y"), FhirPathValue::Integer(7));
}

#[test]
fn test_fluent_functions() {
    let source = r#"
        library T
        define fluent function doubled(x Integer): x * 2
        define X: 21.doubled()
    "#;
    assert_eq!(eval(source, "X"), FhirPathValue::Integer(42));
}

#[test]
fn test_string_operators() {
    assert_eq!(
        eval("library T define X: 'a' + 'b'", "X"),
        FhirPathValue::String("ab".into())
    );
    assert_eq!(
        eval("library T define X: 'a' & null & 'b'", "X"),
        FhirPathValue::String("ab".into())
    );
}

#[test]
fn test_unknown_definition_is_reference_error() {
    let mut evaluator = CqlEvaluator::new();
    evaluator.compile("library T define X: 1").unwrap();
    let err = evaluator.evaluate_definition("Nope", None, None).unwrap_err();
    assert!(matches!(err, fhirkit_cql::CqlError::ReferenceError(_)));
}

#[test]
fn test_evaluate_all_definitions_buckets_errors() {
    let source = r#"
        library T
        define Good: 1 + 1
        define Bad: NoSuchName
    "#;
    let mut evaluator = CqlEvaluator::new();
    evaluator.compile(source).unwrap();
    let results = evaluator.evaluate_all_definitions(None, None).unwrap();
    assert_eq!(results.get("Good"), Some(&FhirPathValue::Integer(2)));
    let FhirPathValue::Tuple(errors) = results.get("_errors").unwrap() else {
        panic!("expected error bucket");
    };
    assert!(errors.contains_key("Bad"));
}

#[test]
fn test_evaluate_expression_ad_hoc() {
    let mut evaluator = CqlEvaluator::new();
    evaluator.compile("library T define N: 20").unwrap();
    assert_eq!(
        evaluator.evaluate_expression("N + 22", None).unwrap(),
        FhirPathValue::Integer(42)
    );
}

#[test]
fn test_singleton_from_errors_on_many() {
    let mut evaluator = CqlEvaluator::new();
    evaluator
        .compile("library T define X: singleton from {1, 2}")
        .unwrap();
    let err = evaluator.evaluate_definition("X", None, None).unwrap_err();
    assert!(matches!(err, fhirkit_cql::CqlError::ExecutionError(_)));
}
