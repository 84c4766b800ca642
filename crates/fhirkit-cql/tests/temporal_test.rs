//! Temporal arithmetic, interval algebra, and precision-qualified
//! comparison through full CQL evaluation.

use fhirkit_cql::CqlEvaluator;
use fhirkit_fhirpath::{FhirDate, FhirPathValue};

fn eval(source: &str, name: &str) -> FhirPathValue {
    let mut evaluator = CqlEvaluator::new();
    evaluator.compile(source).unwrap_or_else(|e| panic!("compile failed: {e}"));
    evaluator
        .evaluate_definition(name, None, None)
        .unwrap_or_else(|e| panic!("evaluate {name} failed: {e}"))
}

fn boolean(source: &str) -> FhirPathValue {
    eval(&format!("library T define X: {source}"), "X")
}

#[test]
fn test_date_plus_calendar_duration() {
    assert_eq!(
        eval("library T define Y: @2024-03-15 + 1 year", "Y"),
        FhirPathValue::Date(FhirDate::from_ymd(2025, 3, 15))
    );
    assert_eq!(
        eval("library T define Y: @2024-01-31 + 1 month", "Y"),
        FhirPathValue::Date(FhirDate::from_ymd(2024, 2, 29))
    );
    assert_eq!(
        eval("library T define Y: @2024-03-15 - 2 weeks", "Y"),
        FhirPathValue::Date(FhirDate::from_ymd(2024, 3, 1))
    );
}

#[test]
fn test_point_comparisons() {
    assert_eq!(
        boolean("@2024-03-15 before @2024-04-01"),
        FhirPathValue::Boolean(true)
    );
    assert_eq!(
        boolean("@2024-03-15 same as @2024-03-15"),
        FhirPathValue::Boolean(true)
    );
    assert_eq!(
        boolean("@2024-03-15 on or before @2024-03-15"),
        FhirPathValue::Boolean(true)
    );
    // mixed precision with an equal prefix is unknown
    assert_eq!(boolean("@2024-03 before @2024-03-15"), FhirPathValue::Null);
}

#[test]
fn test_precision_qualified_comparison() {
    assert_eq!(
        boolean("@2024-03-15 same year as @2024-11-01"),
        FhirPathValue::Boolean(true)
    );
    assert_eq!(
        boolean("@2024-03-15 same month as @2024-04-15"),
        FhirPathValue::Boolean(false)
    );
    // coercing to day when only month precision exists is unknown
    assert_eq!(
        boolean("@2024-03 same day as @2024-03-15"),
        FhirPathValue::Null
    );
}

#[test]
fn test_interval_operators() {
    assert_eq!(
        boolean("Interval[1, 5] overlaps Interval[4, 8]"),
        FhirPathValue::Boolean(true)
    );
    assert_eq!(
        boolean("Interval[1, 5] before Interval[6, 10]"),
        FhirPathValue::Boolean(true)
    );
    assert_eq!(
        boolean("Interval[3, 4] during Interval[1, 10]"),
        FhirPathValue::Boolean(true)
    );
    assert_eq!(
        boolean("Interval[1, 10] properly includes Interval[1, 10]"),
        FhirPathValue::Boolean(false)
    );
    assert_eq!(
        boolean("Interval[1, 5] meets Interval[6, 10]"),
        FhirPathValue::Boolean(true)
    );
    assert_eq!(
        boolean("Interval[1, 4] starts Interval[1, 10]"),
        FhirPathValue::Boolean(true)
    );
    // open bound: [1,5) before [5,8]
    assert_eq!(
        boolean("Interval[1, 5) before Interval[5, 8]"),
        FhirPathValue::Boolean(true)
    );
}

#[test]
fn test_point_in_interval() {
    assert_eq!(
        boolean("3 in Interval[1, 5]"),
        FhirPathValue::Boolean(true)
    );
    assert_eq!(
        boolean("5 in Interval[1, 5)"),
        FhirPathValue::Boolean(false)
    );
    assert_eq!(
        boolean("Interval[1, 5] contains 3"),
        FhirPathValue::Boolean(true)
    );
    assert_eq!(
        boolean("@2024-06-01 during Interval[@2024-01-01, @2024-12-31]"),
        FhirPathValue::Boolean(true)
    );
}

#[test]
fn test_unbounded_interval_endpoints() {
    assert_eq!(
        boolean("Interval[5, null] includes Interval[6, 100]"),
        FhirPathValue::Boolean(true)
    );
    assert_eq!(
        boolean("3 in Interval[null, 10]"),
        FhirPathValue::Boolean(true)
    );
}

#[test]
fn test_interval_accessors() {
    assert_eq!(
        eval("library T define X: start of Interval[3, 9]", "X"),
        FhirPathValue::Integer(3)
    );
    assert_eq!(
        eval("library T define X: end of Interval[3, 9]", "X"),
        FhirPathValue::Integer(9)
    );
    assert_eq!(
        eval("library T define X: width of Interval[3, 9]", "X"),
        FhirPathValue::Integer(6)
    );
    // open integer bounds step inward
    assert_eq!(
        eval("library T define X: start of Interval(3, 9]", "X"),
        FhirPathValue::Integer(4)
    );
}

#[test]
fn test_duration_and_difference() {
    assert_eq!(
        eval(
            "library T define X: years between @2020-06-15 and @2024-06-14",
            "X"
        ),
        FhirPathValue::Integer(3)
    );
    assert_eq!(
        eval(
            "library T define X: days between @2024-03-01 and @2024-03-15",
            "X"
        ),
        FhirPathValue::Integer(14)
    );
    assert_eq!(
        eval(
            "library T define X: difference in years between @2023-12-31 and @2024-01-01",
            "X"
        ),
        FhirPathValue::Integer(1)
    );
}

#[test]
fn test_component_extraction() {
    assert_eq!(
        eval("library T define X: year from @2024-03-15", "X"),
        FhirPathValue::Integer(2024)
    );
    assert_eq!(
        eval("library T define X: month from @2024-03-15", "X"),
        FhirPathValue::Integer(3)
    );
    // component beyond the value's precision is null
    assert_eq!(
        eval("library T define X: day from @2024-03", "X"),
        FhirPathValue::Null
    );
}

#[test]
fn test_within_phrase() {
    assert_eq!(
        boolean("@2024-03-10 within 7 days of @2024-03-15"),
        FhirPathValue::Boolean(true)
    );
    assert_eq!(
        boolean("@2024-03-01 within 7 days of @2024-03-15"),
        FhirPathValue::Boolean(false)
    );
}

#[test]
fn test_starts_offset_phrase() {
    assert_eq!(
        boolean("Interval[@2024-03-12, @2024-03-20] starts 3 days before @2024-03-15"),
        FhirPathValue::Boolean(true)
    );
}

#[test]
fn test_between() {
    assert_eq!(boolean("5 between 1 and 10"), FhirPathValue::Boolean(true));
    assert_eq!(boolean("15 between 1 and 10"), FhirPathValue::Boolean(false));
}

#[test]
fn test_date_constructor_and_age() {
    assert_eq!(
        eval("library T define X: Date(2024, 3, 15)", "X"),
        FhirPathValue::Date(FhirDate::from_ymd(2024, 3, 15))
    );
    assert_eq!(
        eval(
            "library T define X: AgeInYearsAt(@1980-06-15, @2024-06-14)",
            "X"
        ),
        FhirPathValue::Integer(43)
    );
}
