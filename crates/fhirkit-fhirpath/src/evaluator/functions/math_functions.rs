//! Math functions over singleton numeric inputs.

use super::{arg_value, singleton, FunctionRegistry};
use crate::evaluator::operations::arithmetic;
use crate::model::{Collection, FhirPathValue, Quantity};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, MathematicalOps};

pub fn register(registry: &mut FunctionRegistry) {
    registry.register("abs", |_, input, _| {
        Ok(match singleton(input) {
            Some(FhirPathValue::Integer(i)) => {
                i.checked_abs().map(FhirPathValue::Integer).into_iter().collect()
            }
            Some(FhirPathValue::Long(i)) => {
                i.checked_abs().map(FhirPathValue::Long).into_iter().collect()
            }
            Some(FhirPathValue::Decimal(d)) => vec![FhirPathValue::Decimal(d.abs())],
            Some(FhirPathValue::Quantity(q)) => vec![FhirPathValue::Quantity(Quantity::new(
                q.value.abs(),
                q.unit.clone(),
            ))],
            _ => Vec::new(),
        })
    });

    registry.register("ceiling", |_, input, _| {
        Ok(map_decimal(input, |d| d.ceil().to_i64().map(FhirPathValue::Integer)))
    });
    registry.register("floor", |_, input, _| {
        Ok(map_decimal(input, |d| d.floor().to_i64().map(FhirPathValue::Integer)))
    });
    registry.register("truncate", |_, input, _| {
        Ok(map_decimal(input, |d| d.trunc().to_i64().map(FhirPathValue::Integer)))
    });

    registry.register("round", |_, input, args| {
        let precision = arg_value(args, 0)
            .and_then(|v| v.as_integer())
            .unwrap_or(0)
            .max(0) as u32;
        Ok(map_decimal(input, |d| {
            Some(FhirPathValue::Decimal(d.round_dp(precision)))
        }))
    });

    registry.register("exp", |_, input, _| {
        Ok(map_decimal(input, |d| d.checked_exp().map(FhirPathValue::Decimal)))
    });
    registry.register("ln", |_, input, _| {
        Ok(map_decimal(input, |d| {
            if d <= Decimal::ZERO {
                None
            } else {
                d.checked_ln().map(FhirPathValue::Decimal)
            }
        }))
    });
    registry.register("log", |_, input, args| {
        let Some(base) = arg_value(args, 0).and_then(|v| v.as_decimal()) else {
            return Ok(Vec::new());
        };
        Ok(map_decimal(input, move |d| {
            if d <= Decimal::ZERO || base <= Decimal::ZERO || base == Decimal::ONE {
                return None;
            }
            let numerator = d.checked_ln()?;
            let denominator = base.checked_ln()?;
            numerator.checked_div(denominator).map(FhirPathValue::Decimal)
        }))
    });

    registry.register("power", |_, input, args| {
        let (Some(base), Some(exponent)) = (singleton(input), arg_value(args, 0)) else {
            return Ok(Vec::new());
        };
        Ok(arithmetic::power_values(base, exponent).into_collection())
    });

    registry.register("sqrt", |_, input, _| {
        Ok(map_decimal(input, |d| {
            if d < Decimal::ZERO {
                None
            } else {
                d.sqrt().map(FhirPathValue::Decimal)
            }
        }))
    });
}

fn map_decimal(
    input: &Collection,
    f: impl FnOnce(Decimal) -> Option<FhirPathValue>,
) -> Collection {
    singleton(input)
        .and_then(|v| v.as_decimal())
        .and_then(f)
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::context::EvaluationContext;
    use crate::evaluator::functions::FunctionContext;
    use fhirkit_ucum::UcumConverter;
    use std::str::FromStr;

    fn call(name: &str, input: FhirPathValue, args: &[FhirPathValue]) -> Collection {
        let registry = FunctionRegistry::new();
        let evaluation = EvaluationContext::empty();
        let converter = UcumConverter::new();
        let ctx = FunctionContext {
            evaluation: &evaluation,
            converter: &converter,
        };
        let args: Vec<Collection> = args.iter().map(|a| vec![a.clone()]).collect();
        registry.call(name, &ctx, &vec![input], &args).unwrap()
    }

    fn dec(s: &str) -> FhirPathValue {
        FhirPathValue::Decimal(Decimal::from_str(s).unwrap())
    }

    #[test]
    fn test_rounding_family() {
        assert_eq!(call("ceiling", dec("1.1"), &[]), vec![FhirPathValue::Integer(2)]);
        assert_eq!(call("floor", dec("-1.1"), &[]), vec![FhirPathValue::Integer(-2)]);
        assert_eq!(call("truncate", dec("-1.9"), &[]), vec![FhirPathValue::Integer(-1)]);
        assert_eq!(
            call("round", dec("3.14159"), &[FhirPathValue::Integer(2)]),
            vec![dec("3.14")]
        );
    }

    #[test]
    fn test_abs() {
        assert_eq!(
            call("abs", FhirPathValue::Integer(-5), &[]),
            vec![FhirPathValue::Integer(5)]
        );
        let q = FhirPathValue::Quantity(Quantity::new(Decimal::from(-3), "mg"));
        assert_eq!(
            call("abs", q, &[]),
            vec![FhirPathValue::Quantity(Quantity::new(Decimal::from(3), "mg"))]
        );
    }

    #[test]
    fn test_ln_of_nonpositive_is_empty() {
        assert!(call("ln", dec("0"), &[]).is_empty());
        assert!(call("sqrt", dec("-1"), &[]).is_empty());
    }

    #[test]
    fn test_log_and_power() {
        let result = call("log", dec("8"), &[dec("2")]);
        let FhirPathValue::Decimal(d) = &result[0] else {
            panic!("expected decimal");
        };
        assert!((*d - Decimal::from(3)).abs() < Decimal::from_str("1e-15").unwrap());

        assert_eq!(
            call("power", FhirPathValue::Integer(2), &[FhirPathValue::Integer(8)]),
            vec![FhirPathValue::Integer(256)]
        );
    }
}
