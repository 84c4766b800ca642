//! Built-in CQL functions that are not user definitions.
//!
//! Most names forward to the shared function registry (with the first
//! argument as the input collection); the handful with CQL-specific
//! shapes — constructors, `Coalesce`, age calculation — are implemented
//! here.

use crate::error::{CqlError, Result};
use fhirkit_fhirpath::model::datetime::DateTimePrecision;
use fhirkit_fhirpath::{
    EvaluationContext, FhirDate, FhirDateTime, FhirPathValue, FhirTime, FunctionContext,
    FunctionRegistry,
};
use fhirkit_ucum::UcumConverter;

use super::operators;

/// Dispatch a built-in by name. `arguments` are already evaluated.
pub fn call(
    name: &str,
    arguments: &[FhirPathValue],
    registry: &FunctionRegistry,
    converter: &UcumConverter,
) -> Result<FhirPathValue> {
    match name {
        "Coalesce" => Ok(arguments
            .iter()
            .find(|v| !v.is_empty())
            .cloned()
            .unwrap_or(FhirPathValue::Null)),

        "Date" => Ok(date_constructor(arguments)),
        "DateTime" => Ok(datetime_constructor(arguments)),
        "Time" => Ok(time_constructor(arguments)),

        "AgeInYears" => age_between(arguments.first(), None, DateTimePrecision::Year),
        "AgeInMonths" => age_between(arguments.first(), None, DateTimePrecision::Month),
        "AgeInYearsAt" => {
            age_between(arguments.first(), arguments.get(1), DateTimePrecision::Year)
        }
        "AgeInMonthsAt" => {
            age_between(arguments.first(), arguments.get(1), DateTimePrecision::Month)
        }
        "CalculateAgeInYears" => age_between(arguments.first(), None, DateTimePrecision::Year),
        "CalculateAgeInYearsAt" => {
            age_between(arguments.first(), arguments.get(1), DateTimePrecision::Year)
        }

        "Width" => Ok(match arguments.first() {
            Some(FhirPathValue::Interval(interval)) => {
                operators::interval_width(interval, converter)
            }
            _ => FhirPathValue::Null,
        }),

        _ => {
            // Everything else forwards to the registry under its FHIRPath
            // name: Count -> count, ToString -> toString.
            let registry_name = registry_name(name);
            if !registry.contains(&registry_name) {
                return Err(CqlError::reference_error(format!(
                    "unknown function: {name}"
                )));
            }
            let (input, rest) = match arguments.split_first() {
                Some((first, rest)) => (first.clone().into_collection(), rest),
                None => (Vec::new(), &[] as &[FhirPathValue]),
            };
            let args: Vec<Vec<FhirPathValue>> = rest
                .iter()
                .map(|v| v.clone().into_collection())
                .collect();
            let evaluation = EvaluationContext::empty();
            let context = FunctionContext {
                evaluation: &evaluation,
                converter,
            };
            let result = registry
                .call(&registry_name, &context, &input, &args)
                .map_err(|e| CqlError::execution_error(e.to_string()))?;
            Ok(FhirPathValue::from_collection(result))
        }
    }
}

/// CQL names are capitalized; the registry uses FHIRPath casing.
fn registry_name(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn integer_arg(arguments: &[FhirPathValue], index: usize) -> Option<i64> {
    arguments.get(index).and_then(|v| v.as_integer())
}

fn date_constructor(arguments: &[FhirPathValue]) -> FhirPathValue {
    let Some(year) = integer_arg(arguments, 0) else {
        return FhirPathValue::Null;
    };
    let Ok(year) = i32::try_from(year) else {
        return FhirPathValue::Null;
    };
    FhirPathValue::Date(FhirDate::new(
        year,
        integer_arg(arguments, 1).map(|m| m as u32),
        integer_arg(arguments, 2).map(|d| d as u32),
    ))
}

fn datetime_constructor(arguments: &[FhirPathValue]) -> FhirPathValue {
    let FhirPathValue::Date(date) = date_constructor(arguments) else {
        return FhirPathValue::Null;
    };
    FhirPathValue::DateTime(FhirDateTime {
        date,
        hour: integer_arg(arguments, 3).map(|h| h as u32),
        minute: integer_arg(arguments, 4).map(|m| m as u32),
        second: integer_arg(arguments, 5).map(|s| s as u32),
        millisecond: integer_arg(arguments, 6).map(|ms| ms as u32),
        tz_offset_minutes: None,
    })
}

fn time_constructor(arguments: &[FhirPathValue]) -> FhirPathValue {
    let Some(hour) = integer_arg(arguments, 0) else {
        return FhirPathValue::Null;
    };
    FhirPathValue::Time(FhirTime::new(
        hour as u32,
        integer_arg(arguments, 1).map(|m| m as u32),
        integer_arg(arguments, 2).map(|s| s as u32),
        integer_arg(arguments, 3).map(|ms| ms as u32),
    ))
}

/// Age from a birth date to an as-of point (today when absent).
fn age_between(
    birth: Option<&FhirPathValue>,
    as_of: Option<&FhirPathValue>,
    precision: DateTimePrecision,
) -> Result<FhirPathValue> {
    let Some(birth) = birth else {
        return Ok(FhirPathValue::Null);
    };
    let birth = coerce_to_date(birth);
    if birth.is_null() {
        return Ok(FhirPathValue::Null);
    }
    let as_of = match as_of {
        Some(value) => coerce_to_date(value),
        None => {
            let now = chrono::Local::now();
            use chrono::Datelike;
            FhirPathValue::Date(FhirDate::from_ymd(now.year(), now.month(), now.day()))
        }
    };
    Ok(operators::duration_between(&birth, &as_of, precision))
}

fn coerce_to_date(value: &FhirPathValue) -> FhirPathValue {
    match value {
        FhirPathValue::Date(_) | FhirPathValue::DateTime(_) => value.clone(),
        FhirPathValue::String(s) => s
            .parse::<FhirDate>()
            .map(FhirPathValue::Date)
            .unwrap_or(FhirPathValue::Null),
        _ => FhirPathValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> FunctionRegistry {
        FunctionRegistry::new()
    }

    #[test]
    fn test_coalesce() {
        let result = call(
            "Coalesce",
            &[
                FhirPathValue::Null,
                FhirPathValue::Integer(2),
                FhirPathValue::Integer(3),
            ],
            &registry(),
            &UcumConverter::new(),
        )
        .unwrap();
        assert_eq!(result, FhirPathValue::Integer(2));
    }

    #[test]
    fn test_date_constructor_partial() {
        let full = call(
            "Date",
            &[
                FhirPathValue::Integer(2024),
                FhirPathValue::Integer(3),
                FhirPathValue::Integer(15),
            ],
            &registry(),
            &UcumConverter::new(),
        )
        .unwrap();
        assert_eq!(full, FhirPathValue::Date(FhirDate::from_ymd(2024, 3, 15)));

        let year_only = call(
            "Date",
            &[FhirPathValue::Integer(2024)],
            &registry(),
            &UcumConverter::new(),
        )
        .unwrap();
        assert_eq!(year_only, FhirPathValue::Date(FhirDate::new(2024, None, None)));
    }

    #[test]
    fn test_registry_forwarding() {
        let list = FhirPathValue::Collection(vec![
            FhirPathValue::Integer(1),
            FhirPathValue::Integer(2),
            FhirPathValue::Integer(3),
        ]);
        let count = call("Count", &[list.clone()], &registry(), &UcumConverter::new()).unwrap();
        assert_eq!(count, FhirPathValue::Integer(3));

        let first = call("First", &[list], &registry(), &UcumConverter::new()).unwrap();
        assert_eq!(first, FhirPathValue::Integer(1));
    }

    #[test]
    fn test_age_at() {
        let age = call(
            "AgeInYearsAt",
            &[
                FhirPathValue::Date(FhirDate::from_ymd(1980, 6, 15)),
                FhirPathValue::Date(FhirDate::from_ymd(2024, 6, 14)),
            ],
            &registry(),
            &UcumConverter::new(),
        )
        .unwrap();
        assert_eq!(age, FhirPathValue::Integer(43));
    }

    #[test]
    fn test_unknown_function_is_reference_error() {
        let err = call("Nonexistent", &[], &registry(), &UcumConverter::new()).unwrap_err();
        assert!(matches!(err, CqlError::ReferenceError(_)));
    }
}
