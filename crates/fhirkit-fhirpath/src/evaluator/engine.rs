//! Core FHIRPath expression walker.

use crate::ast::*;
use crate::error::{FhirPathError, FhirPathResult};
use crate::evaluator::context::EvaluationContext;
use crate::evaluator::functions::{FunctionContext, FunctionRegistry};
use crate::evaluator::operations::{
    ArithmeticEvaluator, CollectionEvaluator, ComparisonEvaluator, TypeEvaluator,
};
use crate::model::{Collection, FhirPathValue, Quantity};
use fhirkit_ucum::UcumConverter;
use serde_json::Value;
use std::sync::Arc;

/// Tree-walking FHIRPath evaluator.
///
/// Stateless apart from the shared function registry and unit converter, so
/// one evaluator can serve many concurrent evaluations, each with its own
/// [`EvaluationContext`].
pub struct FhirPathEvaluator {
    registry: FunctionRegistry,
    converter: Arc<UcumConverter>,
}

impl FhirPathEvaluator {
    pub fn new() -> Self {
        Self {
            registry: FunctionRegistry::new(),
            converter: Arc::new(UcumConverter::new()),
        }
    }

    /// Share an existing unit converter (and its parse cache).
    pub fn with_converter(converter: Arc<UcumConverter>) -> Self {
        Self {
            registry: FunctionRegistry::new(),
            converter,
        }
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.registry
    }

    pub fn converter(&self) -> &UcumConverter {
        &self.converter
    }

    /// Evaluate a parsed expression against an input collection.
    pub fn evaluate(
        &self,
        expression: &FhirPathExpression,
        input: &Collection,
        context: &EvaluationContext,
    ) -> FhirPathResult<Collection> {
        self.evaluate_expression(&expression.root, input, context)
    }

    pub fn evaluate_expression(
        &self,
        expression: &Expression,
        input: &Collection,
        context: &EvaluationContext,
    ) -> FhirPathResult<Collection> {
        match expression {
            Expression::Term(term) => self.evaluate_term(term, input, context),
            Expression::Invocation { left, invocation } => {
                let left_result = self.evaluate_expression(left, input, context)?;
                self.apply_invocation(&left_result, invocation, context)
            }
            Expression::Indexer { left, index } => {
                let left_result = self.evaluate_expression(left, input, context)?;
                let index_result = self.evaluate_expression(index, input, context)?;
                CollectionEvaluator::evaluate_indexer(&left_result, &index_result)
            }
            Expression::Polarity { operator, operand } => {
                let operand_result = self.evaluate_expression(operand, input, context)?;
                ArithmeticEvaluator::evaluate_polarity(operator, &operand_result)
            }
            Expression::Multiplicative {
                left,
                operator,
                right,
            } => {
                let left_result = self.evaluate_expression(left, input, context)?;
                let right_result = self.evaluate_expression(right, input, context)?;
                ArithmeticEvaluator::evaluate_multiplicative(&left_result, operator, &right_result)
            }
            Expression::Additive {
                left,
                operator,
                right,
            } => {
                let left_result = self.evaluate_expression(left, input, context)?;
                let right_result = self.evaluate_expression(right, input, context)?;
                ArithmeticEvaluator::evaluate_additive(
                    &left_result,
                    operator,
                    &right_result,
                    &self.converter,
                )
            }
            Expression::Type {
                left,
                operator,
                type_specifier,
            } => {
                let left_result = self.evaluate_expression(left, input, context)?;
                TypeEvaluator::evaluate_type_operation(&left_result, operator, type_specifier)
            }
            Expression::Union { left, right } => {
                let left_result = self.evaluate_expression(left, input, context)?;
                let right_result = self.evaluate_expression(right, input, context)?;
                CollectionEvaluator::evaluate_union(&left_result, &right_result, &self.converter)
            }
            Expression::Inequality {
                left,
                operator,
                right,
            } => {
                let left_result = self.evaluate_expression(left, input, context)?;
                let right_result = self.evaluate_expression(right, input, context)?;
                ComparisonEvaluator::evaluate_inequality(
                    &left_result,
                    operator,
                    &right_result,
                    &self.converter,
                )
            }
            Expression::Equality {
                left,
                operator,
                right,
            } => {
                let left_result = self.evaluate_expression(left, input, context)?;
                let right_result = self.evaluate_expression(right, input, context)?;
                ComparisonEvaluator::evaluate_equality(
                    &left_result,
                    operator,
                    &right_result,
                    &self.converter,
                )
            }
            Expression::Membership {
                left,
                operator,
                right,
            } => {
                let left_result = self.evaluate_expression(left, input, context)?;
                let right_result = self.evaluate_expression(right, input, context)?;
                ComparisonEvaluator::evaluate_membership(
                    &left_result,
                    operator,
                    &right_result,
                    &self.converter,
                )
            }
            Expression::And { left, right } => {
                let left_result = self.evaluate_expression(left, input, context)?;
                let right_result = self.evaluate_expression(right, input, context)?;
                ComparisonEvaluator::evaluate_and(&left_result, &right_result)
            }
            Expression::Or {
                left,
                operator,
                right,
            } => {
                let left_result = self.evaluate_expression(left, input, context)?;
                let right_result = self.evaluate_expression(right, input, context)?;
                ComparisonEvaluator::evaluate_or(&left_result, operator, &right_result)
            }
            Expression::Implies { left, right } => {
                let left_result = self.evaluate_expression(left, input, context)?;
                let right_result = self.evaluate_expression(right, input, context)?;
                ComparisonEvaluator::evaluate_implies(&left_result, &right_result)
            }
        }
    }

    fn evaluate_term(
        &self,
        term: &Term,
        input: &Collection,
        context: &EvaluationContext,
    ) -> FhirPathResult<Collection> {
        match term {
            Term::Literal(literal) => Ok(evaluate_literal(literal)),
            Term::Invocation(invocation) => self.apply_invocation(input, invocation, context),
            Term::ExternalConstant(name) => {
                if let Some(value) = context.constants.get(name) {
                    return Ok(value.clone().into_collection());
                }
                match name.as_str() {
                    "context" | "resource" => Ok(context.root.clone().into_collection()),
                    _ => Ok(Vec::new()),
                }
            }
            Term::Parenthesized(expression) => {
                self.evaluate_expression(expression, input, context)
            }
        }
    }

    /// Apply a member access, function call, or `$` variable to a collection.
    pub fn apply_invocation(
        &self,
        target: &Collection,
        invocation: &Invocation,
        context: &EvaluationContext,
    ) -> FhirPathResult<Collection> {
        match invocation {
            Invocation::Member(name) => Ok(navigate_member(target, name)),
            Invocation::Function { name, parameters } => {
                self.evaluate_function(target, name, parameters, context)
            }
            Invocation::This => Ok(match &context.this_value {
                Some(value) => value.clone().into_collection(),
                None => target.clone(),
            }),
            Invocation::Index => Ok(context
                .index_value
                .map(FhirPathValue::Integer)
                .into_iter()
                .collect()),
            Invocation::Total => Ok(context
                .total_value
                .clone()
                .map(FhirPathValue::into_collection)
                .unwrap_or_default()),
        }
    }

    fn evaluate_function(
        &self,
        input: &Collection,
        name: &str,
        parameters: &[Expression],
        context: &EvaluationContext,
    ) -> FhirPathResult<Collection> {
        // Lazy functions re-evaluate their argument AST per item with $this
        // and $index pushed; everything else gets pre-evaluated arguments.
        match name {
            "where" => return self.evaluate_where(input, parameters, context),
            "select" => return self.evaluate_select(input, parameters, context),
            "repeat" => return self.evaluate_repeat(input, parameters, context),
            "all" => return self.evaluate_all(input, parameters, context),
            "exists" if !parameters.is_empty() => {
                return self.evaluate_exists(input, parameters, context)
            }
            "aggregate" => return self.evaluate_aggregate(input, parameters, context),
            "ofType" | "is" | "as" => {
                let Some(specifier) = parameters.first().and_then(type_specifier_of) else {
                    return Err(FhirPathError::function_error(format!(
                        "{name}() requires a type argument"
                    )));
                };
                return match name {
                    "ofType" => Ok(TypeEvaluator::evaluate_of_type(input, specifier.name())),
                    "is" => TypeEvaluator::evaluate_type_operation(
                        input,
                        &TypeOperator::Is,
                        &specifier,
                    ),
                    _ => TypeEvaluator::evaluate_type_operation(
                        input,
                        &TypeOperator::As,
                        &specifier,
                    ),
                };
            }
            _ => {}
        }

        let mut arguments = Vec::with_capacity(parameters.len());
        for parameter in parameters {
            arguments.push(self.evaluate_expression(parameter, input, context)?);
        }
        let function_context = FunctionContext {
            evaluation: context,
            converter: &self.converter,
        };
        self.registry
            .call(name, &function_context, input, &arguments)
    }

    fn evaluate_where(
        &self,
        input: &Collection,
        parameters: &[Expression],
        context: &EvaluationContext,
    ) -> FhirPathResult<Collection> {
        let Some(criteria) = parameters.first() else {
            return Ok(input.clone());
        };
        let mut result = Vec::new();
        for (index, item) in input.iter().enumerate() {
            let child = context.with_this(item.clone(), index as i64);
            let focus = vec![item.clone()];
            let outcome = self.evaluate_expression(criteria, &focus, &child)?;
            if ComparisonEvaluator::to_boolean(&outcome) == Some(true) {
                result.push(item.clone());
            }
        }
        Ok(result)
    }

    fn evaluate_select(
        &self,
        input: &Collection,
        parameters: &[Expression],
        context: &EvaluationContext,
    ) -> FhirPathResult<Collection> {
        let Some(projection) = parameters.first() else {
            return Ok(input.clone());
        };
        let mut result = Vec::new();
        for (index, item) in input.iter().enumerate() {
            let child = context.with_this(item.clone(), index as i64);
            let focus = vec![item.clone()];
            result.extend(self.evaluate_expression(projection, &focus, &child)?);
        }
        Ok(result)
    }

    /// Breadth-first transitive closure of the projection, de-duplicated so
    /// cyclic references terminate.
    fn evaluate_repeat(
        &self,
        input: &Collection,
        parameters: &[Expression],
        context: &EvaluationContext,
    ) -> FhirPathResult<Collection> {
        let Some(projection) = parameters.first() else {
            return Ok(Vec::new());
        };
        let mut result: Collection = Vec::new();
        let mut frontier = input.clone();

        while !frontier.is_empty() {
            let mut next = Vec::new();
            for (index, item) in frontier.iter().enumerate() {
                let child = context.with_this(item.clone(), index as i64);
                let focus = vec![item.clone()];
                for produced in self.evaluate_expression(projection, &focus, &child)? {
                    let seen = result
                        .iter()
                        .chain(next.iter())
                        .any(|existing| existing.equals(&produced, &self.converter) == Some(true));
                    if !seen {
                        next.push(produced);
                    }
                }
            }
            result.extend(next.iter().cloned());
            frontier = next;
        }
        Ok(result)
    }

    fn evaluate_all(
        &self,
        input: &Collection,
        parameters: &[Expression],
        context: &EvaluationContext,
    ) -> FhirPathResult<Collection> {
        let Some(criteria) = parameters.first() else {
            // all() without criteria requires every item to be true
            let all = input
                .iter()
                .all(|item| item.as_boolean().unwrap_or(false));
            return Ok(vec![FhirPathValue::Boolean(all)]);
        };
        for (index, item) in input.iter().enumerate() {
            let child = context.with_this(item.clone(), index as i64);
            let focus = vec![item.clone()];
            let outcome = self.evaluate_expression(criteria, &focus, &child)?;
            if ComparisonEvaluator::to_boolean(&outcome) != Some(true) {
                return Ok(vec![FhirPathValue::Boolean(false)]);
            }
        }
        Ok(vec![FhirPathValue::Boolean(true)])
    }

    fn evaluate_exists(
        &self,
        input: &Collection,
        parameters: &[Expression],
        context: &EvaluationContext,
    ) -> FhirPathResult<Collection> {
        let criteria = &parameters[0];
        for (index, item) in input.iter().enumerate() {
            let child = context.with_this(item.clone(), index as i64);
            let focus = vec![item.clone()];
            let outcome = self.evaluate_expression(criteria, &focus, &child)?;
            if ComparisonEvaluator::to_boolean(&outcome) == Some(true) {
                return Ok(vec![FhirPathValue::Boolean(true)]);
            }
        }
        Ok(vec![FhirPathValue::Boolean(false)])
    }

    /// `aggregate(aggregator [, init])` folds with `$this`, `$index`,
    /// `$total`.
    fn evaluate_aggregate(
        &self,
        input: &Collection,
        parameters: &[Expression],
        context: &EvaluationContext,
    ) -> FhirPathResult<Collection> {
        let Some(aggregator) = parameters.first() else {
            return Err(FhirPathError::function_error(
                "aggregate() requires an aggregator expression",
            ));
        };
        let mut total: Collection = match parameters.get(1) {
            Some(init) => self.evaluate_expression(init, input, context)?,
            None => Vec::new(),
        };
        for (index, item) in input.iter().enumerate() {
            let child = context
                .with_this(item.clone(), index as i64)
                .with_total(FhirPathValue::from_collection(total));
            let focus = vec![item.clone()];
            total = self.evaluate_expression(aggregator, &focus, &child)?;
        }
        Ok(total)
    }
}

impl Default for FhirPathEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// Literal to runtime value; the null literal `{}` is the empty collection.
fn evaluate_literal(literal: &Literal) -> Collection {
    match literal {
        Literal::Null => Vec::new(),
        Literal::Boolean(b) => vec![FhirPathValue::Boolean(*b)],
        Literal::String(s) => vec![FhirPathValue::String(s.clone())],
        Literal::Integer(i) => vec![FhirPathValue::Integer(*i)],
        Literal::Long(i) => vec![FhirPathValue::Long(*i)],
        Literal::Decimal(d) => vec![FhirPathValue::Decimal(*d)],
        Literal::Date(d) => vec![FhirPathValue::Date(*d)],
        Literal::DateTime(dt) => vec![FhirPathValue::DateTime(*dt)],
        Literal::Time(t) => vec![FhirPathValue::Time(*t)],
        Literal::Quantity { value, unit } => vec![FhirPathValue::Quantity(Quantity::new(
            *value,
            unit.as_deref().unwrap_or("1"),
        ))],
    }
}

/// Navigate a member name over each item of a collection.
///
/// Resources matching the name as their `resourceType` pass through (type
/// filter); object members flatten arrays one level; absent members
/// contribute nothing.
pub fn navigate_member(collection: &Collection, name: &str) -> Collection {
    let mut result = Vec::new();
    for item in collection {
        match item {
            FhirPathValue::Object(Value::Object(map)) => {
                if item.resource_type() == Some(name) {
                    result.push(item.clone());
                    continue;
                }
                match map.get(name) {
                    Some(Value::Array(items)) => {
                        result.extend(items.iter().map(FhirPathValue::from_json));
                    }
                    Some(Value::Null) | None => {}
                    Some(value) => result.push(FhirPathValue::from_json(value)),
                }
            }
            FhirPathValue::Tuple(entries) => {
                if let Some(value) = entries.get(name) {
                    result.extend(value.clone().into_collection());
                }
            }
            FhirPathValue::Quantity(q) => match name {
                "value" => result.push(FhirPathValue::Decimal(q.value)),
                "unit" | "code" => result.push(FhirPathValue::String(q.unit.clone())),
                _ => {}
            },
            FhirPathValue::Ratio(r) => match name {
                "numerator" => result.push(FhirPathValue::Quantity(r.numerator.clone())),
                "denominator" => result.push(FhirPathValue::Quantity(r.denominator.clone())),
                _ => {}
            },
            FhirPathValue::Code(c) => match name {
                "code" => result.push(FhirPathValue::String(c.code.clone())),
                "system" => {
                    if let Some(system) = &c.system {
                        result.push(FhirPathValue::String(system.clone()));
                    }
                }
                "version" => {
                    if let Some(version) = &c.version {
                        result.push(FhirPathValue::String(version.clone()));
                    }
                }
                "display" => {
                    if let Some(display) = &c.display {
                        result.push(FhirPathValue::String(display.clone()));
                    }
                }
                _ => {}
            },
            FhirPathValue::Concept(concept) => match name {
                "codes" => result.extend(concept.codes.iter().cloned().map(FhirPathValue::Code)),
                "display" => {
                    if let Some(display) = &concept.display {
                        result.push(FhirPathValue::String(display.clone()));
                    }
                }
                _ => {}
            },
            FhirPathValue::Interval(interval) => match name {
                "low" => result.extend(interval.low.clone().into_collection()),
                "high" => result.extend(interval.high.clone().into_collection()),
                "lowClosed" => result.push(FhirPathValue::Boolean(interval.low_closed)),
                "highClosed" => result.push(FhirPathValue::Boolean(interval.high_closed)),
                _ => {}
            },
            FhirPathValue::Collection(items) => {
                result.extend(navigate_member(items, name));
            }
            _ => {}
        }
    }
    result
}

/// Recover a type specifier from an argument expression of `is`/`as`/
/// `ofType`, which the grammar parses as an ordinary member chain.
fn type_specifier_of(expression: &Expression) -> Option<TypeSpecifier> {
    fn collect(expression: &Expression, names: &mut Vec<String>) -> bool {
        match expression {
            Expression::Term(Term::Invocation(Invocation::Member(name))) => {
                names.push(name.clone());
                true
            }
            Expression::Invocation {
                left,
                invocation: Invocation::Member(name),
            } => {
                if !collect(left, names) {
                    return false;
                }
                names.push(name.clone());
                true
            }
            _ => false,
        }
    }

    let mut names = Vec::new();
    if collect(expression, &mut names) && !names.is_empty() {
        Some(TypeSpecifier {
            qualified_name: names,
        })
    } else {
        None
    }
}
