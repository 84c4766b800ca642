//! Conversion functions (`toX` / `convertsToX`).

use super::{singleton, FunctionContext, FunctionRegistry};
use crate::error::FhirPathResult;
use crate::model::{Collection, FhirPathValue, Quantity, Ratio};
use rust_decimal::Decimal;
use std::str::FromStr;

pub fn register(registry: &mut FunctionRegistry) {
    registry.register("toBoolean", |_, input, _| Ok(to_boolean(input)));
    registry.register("toInteger", |_, input, _| Ok(to_integer(input)));
    registry.register("toDecimal", |_, input, _| Ok(to_decimal(input)));
    registry.register("toString", |_, input, _| Ok(to_string(input)));
    registry.register("toQuantity", |_, input, _| Ok(to_quantity(input)));
    registry.register("toDate", |_, input, _| Ok(to_date(input)));
    registry.register("toDateTime", |_, input, _| Ok(to_datetime(input)));
    registry.register("toTime", |_, input, _| Ok(to_time(input)));
    registry.register("toRatio", |_, input, _| Ok(to_ratio(input)));

    registry.register("convertsToBoolean", |ctx, input, _| converts(ctx, input, to_boolean));
    registry.register("convertsToInteger", |ctx, input, _| converts(ctx, input, to_integer));
    registry.register("convertsToDecimal", |ctx, input, _| converts(ctx, input, to_decimal));
    registry.register("convertsToString", |ctx, input, _| converts(ctx, input, to_string));
    registry.register("convertsToQuantity", |ctx, input, _| converts(ctx, input, to_quantity));
    registry.register("convertsToDate", |ctx, input, _| converts(ctx, input, to_date));
    registry.register("convertsToDateTime", |ctx, input, _| converts(ctx, input, to_datetime));
    registry.register("convertsToTime", |ctx, input, _| converts(ctx, input, to_time));
}

fn converts(
    _ctx: &FunctionContext<'_>,
    input: &Collection,
    conversion: fn(&Collection) -> Collection,
) -> FhirPathResult<Collection> {
    if singleton(input).is_none() {
        return Ok(Vec::new());
    }
    Ok(vec![FhirPathValue::Boolean(!conversion(input).is_empty())])
}

fn to_boolean(input: &Collection) -> Collection {
    let result = match singleton(input) {
        Some(FhirPathValue::Boolean(b)) => Some(*b),
        Some(FhirPathValue::Integer(1)) => Some(true),
        Some(FhirPathValue::Integer(0)) => Some(false),
        Some(FhirPathValue::Decimal(d)) if *d == Decimal::ONE => Some(true),
        Some(FhirPathValue::Decimal(d)) if d.is_zero() => Some(false),
        Some(FhirPathValue::String(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" | "1.0" => Some(true),
            "false" | "f" | "no" | "n" | "0" | "0.0" => Some(false),
            _ => None,
        },
        _ => None,
    };
    result.map(FhirPathValue::Boolean).into_iter().collect()
}

fn to_integer(input: &Collection) -> Collection {
    let result = match singleton(input) {
        Some(FhirPathValue::Integer(i)) | Some(FhirPathValue::Long(i)) => Some(*i),
        Some(FhirPathValue::Boolean(b)) => Some(*b as i64),
        Some(FhirPathValue::String(s)) => s.parse::<i64>().ok(),
        _ => None,
    };
    result.map(FhirPathValue::Integer).into_iter().collect()
}

fn to_decimal(input: &Collection) -> Collection {
    let result = match singleton(input) {
        Some(FhirPathValue::Boolean(b)) => Some(Decimal::from(*b as i64)),
        Some(FhirPathValue::String(s)) => Decimal::from_str(s).ok(),
        Some(value) => value.as_decimal(),
        None => None,
    };
    result.map(FhirPathValue::Decimal).into_iter().collect()
}

fn to_string(input: &Collection) -> Collection {
    match singleton(input) {
        Some(FhirPathValue::Object(_)) | Some(FhirPathValue::Collection(_)) | None => Vec::new(),
        Some(value) => vec![FhirPathValue::String(value.display_value())],
    }
}

fn to_quantity(input: &Collection) -> Collection {
    let result = match singleton(input) {
        Some(FhirPathValue::Quantity(q)) => Some(q.clone()),
        Some(FhirPathValue::String(s)) => parse_quantity_string(s),
        Some(FhirPathValue::Boolean(b)) => Some(Quantity::dimensionless(Decimal::from(*b as i64))),
        Some(value) => value.as_decimal().map(Quantity::dimensionless),
        None => None,
    };
    result.map(FhirPathValue::Quantity).into_iter().collect()
}

/// Parse `"5 'mg'"` or a bare number.
fn parse_quantity_string(s: &str) -> Option<Quantity> {
    let s = s.trim();
    if let Ok(value) = Decimal::from_str(s) {
        return Some(Quantity::dimensionless(value));
    }
    let (number, rest) = s.split_once(char::is_whitespace)?;
    let value = Decimal::from_str(number.trim()).ok()?;
    let unit = rest.trim().trim_matches('\'');
    if unit.is_empty() {
        return Some(Quantity::dimensionless(value));
    }
    Some(Quantity::new(value, unit))
}

fn to_date(input: &Collection) -> Collection {
    let result = match singleton(input) {
        Some(FhirPathValue::Date(d)) => Some(*d),
        Some(FhirPathValue::DateTime(dt)) => Some(dt.date),
        Some(FhirPathValue::String(s)) => s.parse().ok(),
        _ => None,
    };
    result.map(FhirPathValue::Date).into_iter().collect()
}

fn to_datetime(input: &Collection) -> Collection {
    let result = match singleton(input) {
        Some(FhirPathValue::DateTime(dt)) => Some(*dt),
        Some(FhirPathValue::Date(d)) => Some(crate::model::FhirDateTime::from_date(*d)),
        Some(FhirPathValue::String(s)) => s.parse().ok(),
        _ => None,
    };
    result.map(FhirPathValue::DateTime).into_iter().collect()
}

fn to_time(input: &Collection) -> Collection {
    let result = match singleton(input) {
        Some(FhirPathValue::Time(t)) => Some(*t),
        Some(FhirPathValue::String(s)) => s.trim_start_matches('T').parse().ok(),
        _ => None,
    };
    result.map(FhirPathValue::Time).into_iter().collect()
}

fn to_ratio(input: &Collection) -> Collection {
    let result = match singleton(input) {
        Some(FhirPathValue::Ratio(r)) => Some(r.clone()),
        Some(FhirPathValue::String(s)) => parse_ratio_string(s),
        _ => None,
    };
    result.map(FhirPathValue::Ratio).into_iter().collect()
}

/// Parse `"5 'mg' : 10 'mL'"`.
fn parse_ratio_string(s: &str) -> Option<Ratio> {
    let (numerator, denominator) = s.split_once(':')?;
    Some(Ratio::new(
        parse_quantity_string(numerator)?,
        parse_quantity_string(denominator)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::context::EvaluationContext;
    use fhirkit_ucum::UcumConverter;

    fn call(name: &str, input: FhirPathValue) -> Collection {
        let registry = FunctionRegistry::new();
        let evaluation = EvaluationContext::empty();
        let converter = UcumConverter::new();
        let ctx = FunctionContext {
            evaluation: &evaluation,
            converter: &converter,
        };
        registry.call(name, &ctx, &vec![input], &[]).unwrap()
    }

    #[test]
    fn test_to_boolean() {
        assert_eq!(
            call("toBoolean", FhirPathValue::String("TRUE".into())),
            vec![FhirPathValue::Boolean(true)]
        );
        assert_eq!(
            call("toBoolean", FhirPathValue::Integer(0)),
            vec![FhirPathValue::Boolean(false)]
        );
        assert!(call("toBoolean", FhirPathValue::String("maybe".into())).is_empty());
    }

    #[test]
    fn test_to_integer_and_decimal() {
        assert_eq!(
            call("toInteger", FhirPathValue::String("42".into())),
            vec![FhirPathValue::Integer(42)]
        );
        assert!(call("toInteger", FhirPathValue::String("4.2".into())).is_empty());
        assert_eq!(
            call("toDecimal", FhirPathValue::Integer(2)),
            vec![FhirPathValue::Decimal(Decimal::from(2))]
        );
    }

    #[test]
    fn test_converts_to() {
        assert_eq!(
            call("convertsToInteger", FhirPathValue::String("42".into())),
            vec![FhirPathValue::Boolean(true)]
        );
        assert_eq!(
            call("convertsToInteger", FhirPathValue::String("x".into())),
            vec![FhirPathValue::Boolean(false)]
        );
    }

    #[test]
    fn test_to_quantity_from_string() {
        assert_eq!(
            call("toQuantity", FhirPathValue::String("5 'mg'".into())),
            vec![FhirPathValue::Quantity(Quantity::new(Decimal::from(5), "mg"))]
        );
    }

    #[test]
    fn test_to_date_family() {
        assert_eq!(
            call("toDate", FhirPathValue::String("2024-03-15".into())),
            vec![FhirPathValue::Date("2024-03-15".parse().unwrap())]
        );
        assert_eq!(
            call("toTime", FhirPathValue::String("10:30".into())),
            vec![FhirPathValue::Time("10:30".parse().unwrap())]
        );
    }
}
