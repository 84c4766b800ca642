//! Collection functions, plus the operator-symbol entries the CQL
//! evaluator dispatches through.

use super::{singleton, FunctionContext, FunctionRegistry};
use crate::ast::{
    AdditiveOperator, EqualityOperator, InequalityOperator, MembershipOperator,
    MultiplicativeOperator, OrOperator,
};
use crate::error::{FhirPathError, FhirPathResult};
use crate::evaluator::operations::{
    arithmetic, collection::contains_value, collection::distinct, ArithmeticEvaluator,
    CollectionEvaluator, ComparisonEvaluator,
};
use crate::model::{Collection, FhirPathValue};

pub fn register(registry: &mut FunctionRegistry) {
    registry.register("empty", |_, input, _| {
        Ok(vec![FhirPathValue::Boolean(input.is_empty())])
    });
    registry.register("exists", |_, input, _| {
        Ok(vec![FhirPathValue::Boolean(!input.is_empty())])
    });
    registry.register("not", |_, input, _| {
        Ok(match ComparisonEvaluator::to_boolean(input) {
            Some(b) => vec![FhirPathValue::Boolean(!b)],
            None => Vec::new(),
        })
    });
    registry.register("count", |_, input, _| {
        Ok(vec![FhirPathValue::Integer(input.len() as i64)])
    });

    registry.register("allTrue", |_, input, _| Ok(vec![bool_scan(input, true, true)]));
    registry.register("allFalse", |_, input, _| Ok(vec![bool_scan(input, false, true)]));
    registry.register("anyTrue", |_, input, _| Ok(vec![bool_scan(input, true, false)]));
    registry.register("anyFalse", |_, input, _| Ok(vec![bool_scan(input, false, false)]));

    registry.register("distinct", |ctx, input, _| Ok(distinct(input, ctx.converter)));
    registry.register("isDistinct", |ctx, input, _| {
        let deduped = distinct(input, ctx.converter);
        Ok(vec![FhirPathValue::Boolean(deduped.len() == input.len())])
    });

    registry.register("subsetOf", |ctx, input, args| {
        let other = args.first().cloned().unwrap_or_default();
        let result = input
            .iter()
            .all(|item| contains_value(&other, item, ctx.converter));
        Ok(vec![FhirPathValue::Boolean(result)])
    });
    registry.register("supersetOf", |ctx, input, args| {
        let other = args.first().cloned().unwrap_or_default();
        let result = other
            .iter()
            .all(|item| contains_value(input, item, ctx.converter));
        Ok(vec![FhirPathValue::Boolean(result)])
    });

    registry.register("first", |_, input, _| {
        Ok(input.first().cloned().into_iter().collect())
    });
    registry.register("last", |_, input, _| {
        Ok(input.last().cloned().into_iter().collect())
    });
    registry.register("tail", |_, input, _| {
        Ok(input.iter().skip(1).cloned().collect())
    });
    registry.register("skip", |_, input, args| {
        let n = integer_arg(args, 0).unwrap_or(0).max(0) as usize;
        Ok(input.iter().skip(n).cloned().collect())
    });
    registry.register("take", |_, input, args| {
        let n = integer_arg(args, 0).unwrap_or(0).max(0) as usize;
        Ok(input.iter().take(n).cloned().collect())
    });

    registry.register("intersect", |ctx, input, args| {
        let other = args.first().cloned().unwrap_or_default();
        let mut result = Vec::new();
        for item in input {
            if contains_value(&other, item, ctx.converter)
                && !contains_value(&result, item, ctx.converter)
            {
                result.push(item.clone());
            }
        }
        Ok(result)
    });
    registry.register("exclude", |ctx, input, args| {
        let other = args.first().cloned().unwrap_or_default();
        Ok(input
            .iter()
            .filter(|item| !contains_value(&other, item, ctx.converter))
            .cloned()
            .collect())
    });
    registry.register("union", |ctx, input, args| {
        let other = args.first().cloned().unwrap_or_default();
        CollectionEvaluator::evaluate_union(input, &other, ctx.converter)
    });
    registry.register("combine", |_, input, args| {
        let mut result = input.clone();
        if let Some(other) = args.first() {
            result.extend(other.iter().cloned());
        }
        Ok(result)
    });

    registry.register("single", |_, input, _| match input.len() {
        0 => Ok(Vec::new()),
        1 => Ok(input.clone()),
        n => Err(FhirPathError::evaluation_error(format!(
            "single() requires a singleton, got {n} elements"
        ))),
    });

    registry.register("trace", |ctx, input, args| {
        let name = super::arg_value(args, 0)
            .map(|v| v.display_value())
            .unwrap_or_else(|| "trace".to_string());
        let rendered = input
            .iter()
            .map(|v| v.display_value())
            .collect::<Vec<_>>()
            .join(", ");
        ctx.evaluation.add_trace_log(name, rendered);
        Ok(input.clone())
    });

    // Aggregates shared with the CQL evaluator
    registry.register("sum", |ctx, input, _| Ok(sum(input, ctx)));
    registry.register("avg", |ctx, input, _| {
        if input.is_empty() {
            return Ok(Vec::new());
        }
        let total = sum(input, ctx);
        let Some(total) = total.first() else {
            return Ok(Vec::new());
        };
        Ok(
            arithmetic::divide_values(total, &FhirPathValue::Integer(input.len() as i64))
                .into_collection(),
        )
    });
    registry.register("min", |ctx, input, _| Ok(extreme(input, ctx, true)));
    registry.register("max", |ctx, input, _| Ok(extreme(input, ctx, false)));

    register_operator_entries(registry);
}

/// `allTrue` / `allFalse` / `anyTrue` / `anyFalse` share one scan.
fn bool_scan(input: &Collection, target: bool, all: bool) -> FhirPathValue {
    let mut matched = input
        .iter()
        .map(|v| v.as_boolean().map(|b| b == target).unwrap_or(false));
    FhirPathValue::Boolean(if all {
        matched.all(|m| m)
    } else {
        matched.any(|m| m)
    })
}

fn sum(input: &Collection, ctx: &FunctionContext<'_>) -> Collection {
    if input.is_empty() {
        return Vec::new();
    }
    let mut total = input[0].clone();
    for item in &input[1..] {
        total = arithmetic::add_values(&total, item, ctx.converter);
        if total.is_null() {
            return Vec::new();
        }
    }
    total.into_collection()
}

fn extreme(input: &Collection, ctx: &FunctionContext<'_>, minimum: bool) -> Collection {
    let mut best: Option<&FhirPathValue> = None;
    for item in input {
        best = Some(match best {
            None => item,
            Some(current) => match item.compare(current, ctx.converter) {
                Some(std::cmp::Ordering::Less) if minimum => item,
                Some(std::cmp::Ordering::Greater) if !minimum => item,
                Some(_) => current,
                None => return Vec::new(),
            },
        });
    }
    best.cloned().into_iter().collect()
}

fn integer_arg(arguments: &[Collection], index: usize) -> Option<i64> {
    super::arg_value(arguments, index).and_then(|v| v.as_integer())
}

/// Operator-symbol entries: input is the left operand, the first argument
/// is the right operand.
fn register_operator_entries(registry: &mut FunctionRegistry) {
    registry.register("=", |ctx, input, args| {
        ComparisonEvaluator::evaluate_equality(
            input,
            &EqualityOperator::Equal,
            &right(args),
            ctx.converter,
        )
    });
    registry.register("!=", |ctx, input, args| {
        ComparisonEvaluator::evaluate_equality(
            input,
            &EqualityOperator::NotEqual,
            &right(args),
            ctx.converter,
        )
    });
    registry.register("~", |ctx, input, args| {
        ComparisonEvaluator::evaluate_equality(
            input,
            &EqualityOperator::Equivalent,
            &right(args),
            ctx.converter,
        )
    });
    registry.register("!~", |ctx, input, args| {
        ComparisonEvaluator::evaluate_equality(
            input,
            &EqualityOperator::NotEquivalent,
            &right(args),
            ctx.converter,
        )
    });
    registry.register("<", |ctx, input, args| {
        ComparisonEvaluator::evaluate_inequality(
            input,
            &InequalityOperator::Less,
            &right(args),
            ctx.converter,
        )
    });
    registry.register("<=", |ctx, input, args| {
        ComparisonEvaluator::evaluate_inequality(
            input,
            &InequalityOperator::LessOrEqual,
            &right(args),
            ctx.converter,
        )
    });
    registry.register(">", |ctx, input, args| {
        ComparisonEvaluator::evaluate_inequality(
            input,
            &InequalityOperator::Greater,
            &right(args),
            ctx.converter,
        )
    });
    registry.register(">=", |ctx, input, args| {
        ComparisonEvaluator::evaluate_inequality(
            input,
            &InequalityOperator::GreaterOrEqual,
            &right(args),
            ctx.converter,
        )
    });
    registry.register("in", |ctx, input, args| {
        ComparisonEvaluator::evaluate_membership(
            input,
            &MembershipOperator::In,
            &right(args),
            ctx.converter,
        )
    });
    registry.register("+", |ctx, input, args| {
        ArithmeticEvaluator::evaluate_additive(
            input,
            &AdditiveOperator::Plus,
            &right(args),
            ctx.converter,
        )
    });
    registry.register("-", |ctx, input, args| {
        ArithmeticEvaluator::evaluate_additive(
            input,
            &AdditiveOperator::Minus,
            &right(args),
            ctx.converter,
        )
    });
    registry.register("&", |ctx, input, args| {
        ArithmeticEvaluator::evaluate_additive(
            input,
            &AdditiveOperator::Concatenate,
            &right(args),
            ctx.converter,
        )
    });
    registry.register("*", |_, input, args| {
        ArithmeticEvaluator::evaluate_multiplicative(
            input,
            &MultiplicativeOperator::Multiply,
            &right(args),
        )
    });
    registry.register("/", |_, input, args| {
        ArithmeticEvaluator::evaluate_multiplicative(
            input,
            &MultiplicativeOperator::Divide,
            &right(args),
        )
    });
    registry.register("div", |_, input, args| {
        ArithmeticEvaluator::evaluate_multiplicative(
            input,
            &MultiplicativeOperator::Div,
            &right(args),
        )
    });
    registry.register("mod", |_, input, args| {
        ArithmeticEvaluator::evaluate_multiplicative(
            input,
            &MultiplicativeOperator::Mod,
            &right(args),
        )
    });
    registry.register("^", |_, input, args| {
        let (Some(l), Some(r)) = (singleton(input), super::arg_value(args, 0)) else {
            return Ok(Vec::new());
        };
        Ok(arithmetic::power_values(l, r).into_collection())
    });
    registry.register("|", |ctx, input, args| {
        CollectionEvaluator::evaluate_union(input, &right(args), ctx.converter)
    });
    registry.register("xor", |_, input, args| {
        ComparisonEvaluator::evaluate_or(input, &OrOperator::Xor, &right(args))
    });
}

fn right(arguments: &[Collection]) -> Collection {
    arguments.first().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::context::EvaluationContext;
    use fhirkit_ucum::UcumConverter;

    fn call(name: &str, input: Collection, args: &[Collection]) -> Collection {
        let registry = FunctionRegistry::new();
        let evaluation = EvaluationContext::empty();
        let converter = UcumConverter::new();
        let ctx = FunctionContext {
            evaluation: &evaluation,
            converter: &converter,
        };
        registry.call(name, &ctx, &input, args).unwrap()
    }

    fn ints(values: &[i64]) -> Collection {
        values.iter().map(|i| FhirPathValue::Integer(*i)).collect()
    }

    #[test]
    fn test_basic_collection_functions() {
        assert_eq!(call("count", ints(&[1, 2, 3]), &[]), ints(&[3]));
        assert_eq!(call("first", ints(&[1, 2]), &[]), ints(&[1]));
        assert_eq!(call("tail", ints(&[1, 2, 3]), &[]), ints(&[2, 3]));
        assert_eq!(call("skip", ints(&[1, 2, 3]), &[ints(&[1])]), ints(&[2, 3]));
        assert_eq!(call("take", ints(&[1, 2, 3]), &[ints(&[2])]), ints(&[1, 2]));
        assert_eq!(
            call("empty", Vec::new(), &[]),
            vec![FhirPathValue::Boolean(true)]
        );
    }

    #[test]
    fn test_set_functions() {
        assert_eq!(
            call("distinct", ints(&[1, 2, 1, 3]), &[]),
            ints(&[1, 2, 3])
        );
        assert_eq!(
            call("intersect", ints(&[1, 2, 3]), &[ints(&[2, 3, 4])]),
            ints(&[2, 3])
        );
        assert_eq!(
            call("exclude", ints(&[1, 2, 3]), &[ints(&[2])]),
            ints(&[1, 3])
        );
        assert_eq!(
            call("subsetOf", ints(&[1, 2]), &[ints(&[1, 2, 3])]),
            vec![FhirPathValue::Boolean(true)]
        );
    }

    #[test]
    fn test_single_errors_on_many() {
        let registry = FunctionRegistry::new();
        let evaluation = EvaluationContext::empty();
        let converter = UcumConverter::new();
        let ctx = FunctionContext {
            evaluation: &evaluation,
            converter: &converter,
        };
        assert!(registry.call("single", &ctx, &ints(&[1, 2]), &[]).is_err());
        assert!(registry.call("single", &ctx, &Vec::new(), &[]).unwrap().is_empty());
    }

    #[test]
    fn test_aggregate_helpers() {
        assert_eq!(call("sum", ints(&[1, 2, 3]), &[]), ints(&[6]));
        assert_eq!(call("min", ints(&[3, 1, 2]), &[]), ints(&[1]));
        assert_eq!(call("max", ints(&[3, 1, 2]), &[]), ints(&[3]));
        let avg = call("avg", ints(&[1, 2]), &[]);
        assert_eq!(
            avg,
            vec![FhirPathValue::Decimal(rust_decimal::Decimal::from_str_exact("1.5").unwrap())]
        );
    }

    #[test]
    fn test_operator_entries() {
        assert_eq!(
            call("=", ints(&[2]), &[ints(&[2])]),
            vec![FhirPathValue::Boolean(true)]
        );
        assert_eq!(call("+", ints(&[2]), &[ints(&[3])]), ints(&[5]));
        assert_eq!(
            call("|", ints(&[1, 2]), &[ints(&[2, 3])]),
            ints(&[1, 2, 3])
        );
    }
}
