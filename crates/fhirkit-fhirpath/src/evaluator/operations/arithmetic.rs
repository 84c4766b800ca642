//! Arithmetic operations, including date and quantity arithmetic.
//!
//! All failure modes here (overflow, division by zero, incompatible units,
//! insufficient date precision) resolve to the empty collection rather than
//! errors.

use crate::ast::{AdditiveOperator, MultiplicativeOperator, PolarityOperator};
use crate::error::FhirPathResult;
use crate::model::datetime::DateTimePrecision;
use crate::model::{Collection, FhirPathValue, Quantity};
use fhirkit_ucum::UcumConverter;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Evaluates the arithmetic operator family over collections.
pub struct ArithmeticEvaluator;

impl ArithmeticEvaluator {
    pub fn evaluate_additive(
        left: &Collection,
        operator: &AdditiveOperator,
        right: &Collection,
        converter: &UcumConverter,
    ) -> FhirPathResult<Collection> {
        if let AdditiveOperator::Concatenate = operator {
            // & treats empty as ""
            let l = singleton(left).map(|v| v.display_value()).unwrap_or_default();
            let r = singleton(right).map(|v| v.display_value()).unwrap_or_default();
            return Ok(vec![FhirPathValue::String(format!("{l}{r}"))]);
        }

        let (Some(l), Some(r)) = (singleton(left), singleton(right)) else {
            return Ok(Vec::new());
        };
        let result = match operator {
            AdditiveOperator::Plus => add_values(l, r, converter),
            AdditiveOperator::Minus => subtract_values(l, r, converter),
            AdditiveOperator::Concatenate => unreachable!(),
        };
        Ok(result.into_collection())
    }

    pub fn evaluate_multiplicative(
        left: &Collection,
        operator: &MultiplicativeOperator,
        right: &Collection,
    ) -> FhirPathResult<Collection> {
        let (Some(l), Some(r)) = (singleton(left), singleton(right)) else {
            return Ok(Vec::new());
        };
        let result = match operator {
            MultiplicativeOperator::Multiply => multiply_values(l, r),
            MultiplicativeOperator::Divide => divide_values(l, r),
            MultiplicativeOperator::Div => truncated_divide_values(l, r),
            MultiplicativeOperator::Mod => modulo_values(l, r),
        };
        Ok(result.into_collection())
    }

    pub fn evaluate_polarity(
        operator: &PolarityOperator,
        operand: &Collection,
    ) -> FhirPathResult<Collection> {
        let Some(value) = singleton(operand) else {
            return Ok(Vec::new());
        };
        let result = match operator {
            PolarityOperator::Plus => match value {
                FhirPathValue::Integer(_)
                | FhirPathValue::Long(_)
                | FhirPathValue::Decimal(_)
                | FhirPathValue::Quantity(_) => value.clone(),
                _ => FhirPathValue::Null,
            },
            PolarityOperator::Minus => negate_value(value),
        };
        Ok(result.into_collection())
    }
}

/// Scalar addition: numbers, strings, quantities, date + duration.
pub fn add_values(
    left: &FhirPathValue,
    right: &FhirPathValue,
    converter: &UcumConverter,
) -> FhirPathValue {
    use FhirPathValue::*;
    match (left, right) {
        (String(a), String(b)) => String(format!("{a}{b}")),
        (Quantity(a), Quantity(b)) => a
            .add(b, converter)
            .map(Quantity)
            .unwrap_or(Null),
        (Date(_), Quantity(_))
        | (DateTime(_), Quantity(_))
        | (Time(_), Quantity(_)) => add_duration(left, right, 1),
        (Quantity(_), Date(_)) | (Quantity(_), DateTime(_)) | (Quantity(_), Time(_)) => {
            add_duration(right, left, 1)
        }
        _ => numeric_binary(left, right, i64::checked_add, |a, b| a.checked_add(b)),
    }
}

/// Scalar subtraction.
pub fn subtract_values(
    left: &FhirPathValue,
    right: &FhirPathValue,
    converter: &UcumConverter,
) -> FhirPathValue {
    use FhirPathValue::*;
    match (left, right) {
        (Quantity(a), Quantity(b)) => a
            .subtract(b, converter)
            .map(Quantity)
            .unwrap_or(Null),
        (Date(_), Quantity(_))
        | (DateTime(_), Quantity(_))
        | (Time(_), Quantity(_)) => add_duration(left, right, -1),
        _ => numeric_binary(left, right, i64::checked_sub, |a, b| a.checked_sub(b)),
    }
}

/// Scalar multiplication.
pub fn multiply_values(left: &FhirPathValue, right: &FhirPathValue) -> FhirPathValue {
    use FhirPathValue::*;
    match (left, right) {
        (Quantity(a), Quantity(b)) => Quantity(a.multiply(b)),
        (Quantity(q), other) | (other, Quantity(q)) => match other.as_decimal() {
            Some(n) => Quantity(crate::model::Quantity::new(q.value * n, q.unit.clone())),
            None => Null,
        },
        _ => numeric_binary(left, right, i64::checked_mul, |a, b| a.checked_mul(b)),
    }
}

/// Scalar division: always decimal; division by zero is empty.
pub fn divide_values(left: &FhirPathValue, right: &FhirPathValue) -> FhirPathValue {
    use FhirPathValue::*;
    match (left, right) {
        (Quantity(a), Quantity(b)) => a.divide(b).map(Quantity).unwrap_or(Null),
        (Quantity(q), other) => match other.as_decimal() {
            Some(n) if !n.is_zero() => {
                Quantity(crate::model::Quantity::new(q.value / n, q.unit.clone()))
            }
            _ => Null,
        },
        _ => match (left.as_decimal(), right.as_decimal()) {
            (Some(a), Some(b)) if !b.is_zero() => a.checked_div(b).map(Decimal).unwrap_or(Null),
            _ => Null,
        },
    }
}

/// `div`: integer division truncated toward zero.
pub fn truncated_divide_values(left: &FhirPathValue, right: &FhirPathValue) -> FhirPathValue {
    use FhirPathValue::*;
    match (left, right) {
        (Integer(a), Integer(b)) | (Long(a), Long(b)) | (Integer(a), Long(b)) | (Long(a), Integer(b)) => {
            a.checked_div(*b).map(Integer).unwrap_or(Null)
        }
        _ => match (left.as_decimal(), right.as_decimal()) {
            (Some(a), Some(b)) if !b.is_zero() => match a.checked_div(b) {
                Some(quotient) => quotient.trunc().to_i64().map(Integer).unwrap_or(Null),
                None => Null,
            },
            _ => Null,
        },
    }
}

/// `mod`: remainder, matching the sign behavior of truncated division.
pub fn modulo_values(left: &FhirPathValue, right: &FhirPathValue) -> FhirPathValue {
    use FhirPathValue::*;
    match (left, right) {
        (Integer(a), Integer(b)) | (Long(a), Long(b)) | (Integer(a), Long(b)) | (Long(a), Integer(b)) => {
            a.checked_rem(*b).map(Integer).unwrap_or(Null)
        }
        _ => match (left.as_decimal(), right.as_decimal()) {
            (Some(a), Some(b)) if !b.is_zero() => a.checked_rem(b).map(Decimal).unwrap_or(Null),
            _ => Null,
        },
    }
}

/// Exponentiation; fractional exponents go through the decimal `powd`.
pub fn power_values(left: &FhirPathValue, right: &FhirPathValue) -> FhirPathValue {
    use rust_decimal::MathematicalOps;
    use FhirPathValue::*;
    match (left, right) {
        (Integer(base), Integer(exp)) if *exp >= 0 => u32::try_from(*exp)
            .ok()
            .and_then(|e| base.checked_pow(e))
            .map(Integer)
            .unwrap_or(Null),
        _ => match (left.as_decimal(), right.as_decimal()) {
            (Some(base), Some(exp)) => base.checked_powd(exp).map(Decimal).unwrap_or(Null),
            _ => Null,
        },
    }
}

/// Negation of a numeric or quantity value.
pub fn negate_value(value: &FhirPathValue) -> FhirPathValue {
    use FhirPathValue::*;
    match value {
        Integer(i) => i.checked_neg().map(Integer).unwrap_or(Null),
        Long(i) => i.checked_neg().map(Long).unwrap_or(Null),
        Decimal(d) => Decimal(-*d),
        Quantity(q) => Quantity(crate::model::Quantity::new(-q.value, q.unit.clone())),
        _ => Null,
    }
}

/// Date/DateTime/Time plus a signed calendar duration quantity.
///
/// The unit must be a calendar keyword or its UCUM code; anything else, or a
/// precision the value does not carry, yields empty.
fn add_duration(temporal: &FhirPathValue, quantity: &FhirPathValue, sign: i64) -> FhirPathValue {
    use FhirPathValue::*;
    let Quantity(q) = quantity else {
        return Null;
    };
    let Some(unit) = DateTimePrecision::from_unit(&q.unit) else {
        return Null;
    };
    let Some(amount) = q.value.trunc().to_i64() else {
        return Null;
    };
    let amount = amount * sign;
    match temporal {
        Date(d) => d.add_duration(amount, unit).map(Date).unwrap_or(Null),
        DateTime(dt) => dt.add_duration(amount, unit).map(DateTime).unwrap_or(Null),
        Time(t) => t.add_duration(amount, unit).map(Time).unwrap_or(Null),
        _ => Null,
    }
}

/// Apply an operation with integer/decimal promotion. Integer pairs stay
/// integral (Long if either side is Long); anything decimal promotes.
fn numeric_binary(
    left: &FhirPathValue,
    right: &FhirPathValue,
    int_op: fn(i64, i64) -> Option<i64>,
    dec_op: fn(Decimal, Decimal) -> Option<Decimal>,
) -> FhirPathValue {
    use FhirPathValue::*;
    match (left, right) {
        (Integer(a), Integer(b)) => int_op(*a, *b).map(Integer).unwrap_or(Null),
        (Long(a), Long(b)) | (Long(a), Integer(b)) | (Integer(a), Long(b)) => {
            int_op(*a, *b).map(Long).unwrap_or(Null)
        }
        _ => match (left.as_decimal(), right.as_decimal()) {
            (Some(a), Some(b)) => dec_op(a, b).map(Decimal).unwrap_or(Null),
            _ => Null,
        },
    }
}

fn singleton(collection: &Collection) -> Option<&FhirPathValue> {
    match collection.len() {
        1 => Some(&collection[0]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FhirDate;
    use std::str::FromStr;

    fn converter() -> UcumConverter {
        UcumConverter::new()
    }

    fn int(i: i64) -> FhirPathValue {
        FhirPathValue::Integer(i)
    }

    fn dec(s: &str) -> FhirPathValue {
        FhirPathValue::Decimal(Decimal::from_str(s).unwrap())
    }

    #[test]
    fn test_integer_addition_stays_integral() {
        assert_eq!(add_values(&int(1), &int(2), &converter()), int(3));
        assert_eq!(add_values(&int(1), &dec("0.5"), &converter()), dec("1.5"));
    }

    #[test]
    fn test_division_is_decimal() {
        assert_eq!(divide_values(&int(1), &int(2)), dec("0.5"));
        assert_eq!(divide_values(&int(1), &int(0)), FhirPathValue::Null);
        assert_eq!(truncated_divide_values(&int(7), &int(2)), int(3));
        assert_eq!(modulo_values(&int(7), &int(2)), int(1));
    }

    #[test]
    fn test_overflow_is_empty() {
        assert_eq!(
            add_values(&int(i64::MAX), &int(1), &converter()),
            FhirPathValue::Null
        );
    }

    #[test]
    fn test_date_plus_calendar_duration() {
        let date = FhirPathValue::Date(FhirDate::from_ymd(2024, 3, 15));
        let year = FhirPathValue::Quantity(Quantity::new(Decimal::ONE, "year"));
        assert_eq!(
            add_values(&date, &year, &converter()),
            FhirPathValue::Date(FhirDate::from_ymd(2025, 3, 15))
        );

        let week = FhirPathValue::Quantity(Quantity::new(Decimal::from(2), "weeks"));
        assert_eq!(
            subtract_values(&date, &week, &converter()),
            FhirPathValue::Date(FhirDate::from_ymd(2024, 3, 1))
        );
    }

    #[test]
    fn test_date_plus_non_calendar_unit_is_empty() {
        let date = FhirPathValue::Date(FhirDate::from_ymd(2024, 3, 15));
        let grams = FhirPathValue::Quantity(Quantity::new(Decimal::ONE, "g"));
        assert_eq!(add_values(&date, &grams, &converter()), FhirPathValue::Null);
    }

    #[test]
    fn test_quantity_arithmetic() {
        let c = converter();
        let g = FhirPathValue::Quantity(Quantity::new(Decimal::ONE, "g"));
        let mg = FhirPathValue::Quantity(Quantity::new(Decimal::from(500), "mg"));
        assert_eq!(
            add_values(&g, &mg, &c),
            FhirPathValue::Quantity(Quantity::new(Decimal::from_str("1.5").unwrap(), "g"))
        );
    }

    #[test]
    fn test_power() {
        assert_eq!(power_values(&int(2), &int(10)), int(1024));
        let sqrt = power_values(&int(4), &dec("0.5"));
        let FhirPathValue::Decimal(d) = sqrt else {
            panic!("expected decimal");
        };
        assert!((d - Decimal::from(2)).abs() < Decimal::from_str("1e-20").unwrap());
    }
}
