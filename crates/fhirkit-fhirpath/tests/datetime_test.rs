//! Temporal literals, precision-aware comparison, and calendar arithmetic.

use fhirkit_fhirpath::{FhirDate, FhirPath, FhirPathValue};

fn eval(expression: &str) -> Vec<FhirPathValue> {
    FhirPath::new().evaluate(expression, None).unwrap()
}

#[test]
fn test_date_comparison_same_precision() {
    assert_eq!(
        eval("@2024-03-15 < @2024-04-01"),
        vec![FhirPathValue::Boolean(true)]
    );
    assert_eq!(
        eval("@2024-03-15 = @2024-03-15"),
        vec![FhirPathValue::Boolean(true)]
    );
}

#[test]
fn test_mixed_precision_comparison_is_empty() {
    // equal common prefix, different precision: unknown
    assert!(eval("@2024-03 = @2024-03-15").is_empty());
    assert!(eval("@2024-03 < @2024-03-15").is_empty());
    // but a difference before precision runs out is known
    assert_eq!(
        eval("@2024-03 < @2025-01-01"),
        vec![FhirPathValue::Boolean(true)]
    );
}

#[test]
fn test_equivalence_ignores_precision() {
    assert_eq!(
        eval("@2024-03 ~ @2024-03-15"),
        vec![FhirPathValue::Boolean(true)]
    );
    assert_eq!(
        eval("@2024-03 ~ @2024-04-15"),
        vec![FhirPathValue::Boolean(false)]
    );
}

#[test]
fn test_calendar_arithmetic() {
    assert_eq!(
        eval("@2024-03-15 + 1 year"),
        vec![FhirPathValue::Date(FhirDate::from_ymd(2025, 3, 15))]
    );
    // month-end clamping
    assert_eq!(
        eval("@2024-01-31 + 1 month"),
        vec![FhirPathValue::Date(FhirDate::from_ymd(2024, 2, 29))]
    );
    assert_eq!(
        eval("@2024-03-15 - 2 weeks"),
        vec![FhirPathValue::Date(FhirDate::from_ymd(2024, 3, 1))]
    );
}

#[test]
fn test_insufficient_precision_arithmetic_is_empty() {
    // adding days to a year-month value has no defined result
    assert!(eval("@2024-03 + 10 days").is_empty());
}

#[test]
fn test_datetime_timezone_comparison() {
    assert_eq!(
        eval("@2024-03-15T23:30:00+02:00 = @2024-03-15T21:30:00Z"),
        vec![FhirPathValue::Boolean(true)]
    );
}

#[test]
fn test_datetime_hour_arithmetic_carries_date() {
    let result = eval("@2024-03-15T23:00:00 + 2 hours");
    let FhirPathValue::DateTime(dt) = &result[0] else {
        panic!("expected datetime");
    };
    assert_eq!(dt.date, FhirDate::from_ymd(2024, 3, 16));
    assert_eq!(dt.hour, Some(1));
}

#[test]
fn test_time_literal_comparison() {
    assert_eq!(
        eval("@T10:30 < @T11:00"),
        vec![FhirPathValue::Boolean(true)]
    );
    assert!(eval("@T10:30 = @T10:30:00").is_empty());
}
