//! The CQL evaluator.
//!
//! Compiles libraries through [`CqlCompiler`] and evaluates definitions and
//! ad-hoc expressions against a context resource, a data source, and a
//! terminology service. Expression evaluation is a tree walk over the CQL
//! AST sharing the FHIRPath crate's value model, operator implementations,
//! and function registry.

pub mod builtins;
pub mod operators;
pub mod query;

use crate::context::CqlContext;
use crate::datasource::{DataSource, RetrieveContext, RetrieveFilter};
use crate::error::{CqlError, Result};
use crate::library::{Library, LibraryManager};
use crate::parser::ast::{self, BinaryOperator, NullTest, UnaryOperator};
use crate::parser::CqlParser;
use fhirkit_fhirpath::evaluator::engine::navigate_member;
use fhirkit_fhirpath::evaluator::operations::{
    arithmetic, collection as collection_ops, types as type_ops, TypeEvaluator,
};
use fhirkit_fhirpath::{
    Code, EvaluationContext, FhirPathEvaluator, FhirPathValue, FunctionContext, Interval, Quantity,
};
use fhirkit_terminology::{SubsumptionOutcome, TerminologyService};
use indexmap::IndexMap;
use operators::IntervalOp;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::compiler::CqlCompiler;

/// Compiles CQL and evaluates definitions against clinical data.
pub struct CqlEvaluator {
    compiler: CqlCompiler,
    manager: Arc<RwLock<LibraryManager>>,
    fhirpath: FhirPathEvaluator,
    parser: CqlParser,
    data_source: Option<Arc<dyn DataSource>>,
    terminology: Option<Arc<dyn TerminologyService>>,
    current: Option<Arc<Library>>,
}

impl CqlEvaluator {
    pub fn new() -> Self {
        let compiler = CqlCompiler::new();
        let manager = compiler.manager();
        Self {
            compiler,
            manager,
            fhirpath: FhirPathEvaluator::new(),
            parser: CqlParser::new(),
            data_source: None,
            terminology: None,
            current: None,
        }
    }

    pub fn set_data_source(&mut self, data_source: Arc<dyn DataSource>) {
        self.data_source = Some(data_source);
    }

    pub fn set_terminology(&mut self, terminology: Arc<dyn TerminologyService>) {
        self.terminology = Some(terminology);
    }

    pub fn manager(&self) -> Arc<RwLock<LibraryManager>> {
        self.manager.clone()
    }

    /// Compile a library and make it current.
    pub fn compile(&mut self, source: &str) -> Result<Arc<Library>> {
        let library = self.compiler.compile(source)?;
        self.current = Some(library.clone());
        Ok(library)
    }

    pub fn current_library(&self) -> Option<Arc<Library>> {
        self.current.clone()
    }

    /// Evaluate a named definition in the current library.
    pub fn evaluate_definition(
        &self,
        name: &str,
        resource: Option<&Value>,
        parameters: Option<HashMap<String, FhirPathValue>>,
    ) -> Result<FhirPathValue> {
        let library = self
            .current
            .clone()
            .ok_or_else(|| CqlError::reference_error("no library compiled"))?;
        self.evaluate_definition_in(&library, name, resource, parameters)
    }

    /// Evaluate a named definition in a specific library.
    pub fn evaluate_definition_in(
        &self,
        library: &Arc<Library>,
        name: &str,
        resource: Option<&Value>,
        parameters: Option<HashMap<String, FhirPathValue>>,
    ) -> Result<FhirPathValue> {
        let mut context = self.new_context(library, resource, parameters)?;
        if !library.definitions.contains_key(name) {
            return Err(CqlError::reference_error(format!(
                "definition not found: {name}"
            )));
        }
        self.evaluate_definition_value(library, name, &mut context)
    }

    /// Evaluate every definition, bucketing per-definition errors under
    /// `_errors` so a single bad definition never fails the whole call.
    pub fn evaluate_all_definitions(
        &self,
        resource: Option<&Value>,
        parameters: Option<HashMap<String, FhirPathValue>>,
    ) -> Result<IndexMap<String, FhirPathValue>> {
        let library = self
            .current
            .clone()
            .ok_or_else(|| CqlError::reference_error("no library compiled"))?;
        let mut context = self.new_context(&library, resource, parameters)?;

        let mut results = IndexMap::new();
        let mut errors: IndexMap<String, FhirPathValue> = IndexMap::new();
        for name in library.definitions.keys() {
            match self.evaluate_definition_value(&library, name, &mut context) {
                Ok(value) => {
                    results.insert(name.clone(), value);
                }
                Err(err) => {
                    errors.insert(name.clone(), FhirPathValue::String(err.to_string()));
                }
            }
        }
        if !errors.is_empty() {
            results.insert("_errors".to_string(), FhirPathValue::Tuple(errors));
        }
        Ok(results)
    }

    /// Evaluate an ad-hoc expression in the scope of the current library.
    pub fn evaluate_expression(
        &self,
        source: &str,
        resource: Option<&Value>,
    ) -> Result<FhirPathValue> {
        let library = self.current.clone().unwrap_or_default();
        let expression = self.parser.parse_expression(source)?;
        let mut context = self.new_context(&library, resource, None)?;
        self.eval(&expression, &mut context)
    }

    fn new_context(
        &self,
        library: &Arc<Library>,
        resource: Option<&Value>,
        parameters: Option<HashMap<String, FhirPathValue>>,
    ) -> Result<CqlContext> {
        let resource_value = resource.map(FhirPathValue::from_json);
        let mut context = CqlContext::new(library.clone(), resource_value);

        // Parameters: caller-supplied wins, otherwise the default is
        // evaluated once in a context with no resource. Frozen thereafter.
        let supplied = parameters.unwrap_or_default();
        for (name, info) in &library.parameters {
            if let Some(value) = supplied.get(name) {
                context.parameters.insert(name.clone(), value.clone());
                continue;
            }
            if let Some(default) = &info.default {
                let mut default_context = CqlContext::new(library.clone(), None);
                let value = self.eval(default, &mut default_context)?;
                context.parameters.insert(name.clone(), value);
            }
        }
        // Unknown extra parameters are accepted verbatim
        for (name, value) in supplied {
            context.parameters.entry(name).or_insert(value);
        }
        Ok(context)
    }

    /// Evaluate a definition with memoization keyed by (library, name,
    /// resource identity).
    fn evaluate_definition_value(
        &self,
        library: &Arc<Library>,
        name: &str,
        context: &mut CqlContext,
    ) -> Result<FhirPathValue> {
        let key = library.identifier.key();
        if let Some(cached) = context.memo_get(&key, name) {
            return Ok(cached.clone());
        }
        let Some(definition) = library.definitions.get(name) else {
            return Err(CqlError::reference_error(format!(
                "definition not found: {name}"
            )));
        };

        // Evaluate in the defining library's scope
        let caller_library = std::mem::replace(&mut context.library, library.clone());
        let result = self.eval(&definition.expression, context);
        context.library = caller_library;

        let value = result?;
        context.memo_put(&key, name, value.clone());
        Ok(value)
    }

    fn converter(&self) -> &fhirkit_ucum::UcumConverter {
        self.fhirpath.converter()
    }

    // ========================================================================
    // Expression walker
    // ========================================================================

    pub(crate) fn eval(
        &self,
        expression: &ast::Expression,
        context: &mut CqlContext,
    ) -> Result<FhirPathValue> {
        use ast::Expression as E;
        match expression {
            E::Literal(literal) => Ok(self.eval_literal(literal)),
            E::Identifier(name) => self.eval_identifier(name, context),
            E::QualifiedIdentifier { qualifier, name } => {
                self.eval_qualified(qualifier, name, context)
            }
            E::Unary { op, operand } => {
                let value = self.eval(operand, context)?;
                self.eval_unary(*op, value)
            }
            E::Binary {
                op,
                left,
                right,
                precision,
            } => self.eval_binary(*op, left, right, *precision, context),
            E::Between { operand, low, high } => {
                let value = self.eval(operand, context)?;
                let low = self.eval(low, context)?;
                let high = self.eval(high, context)?;
                Ok(self.between(&value, &low, &high))
            }
            E::Within {
                left,
                quantity,
                right,
            } => {
                let left = self.eval(left, context)?;
                let quantity = self.eval(quantity, context)?;
                let right = self.eval(right, context)?;
                Ok(self.within(&left, &quantity, &right))
            }
            E::DateTimeComponent { precision, operand } => {
                let value = self.eval(operand, context)?;
                Ok(component_from_value(&value, *precision))
            }
            E::DurationBetween {
                precision,
                low,
                high,
                difference,
            } => {
                let low = self.eval(low, context)?;
                let high = self.eval(high, context)?;
                Ok(if *difference {
                    operators::difference_between(&low, &high, *precision)
                } else {
                    operators::duration_between(&low, &high, *precision)
                })
            }
            E::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let condition = self.eval(condition, context)?;
                if to_bool(&condition) == Some(true) {
                    self.eval(then_branch, context)
                } else {
                    self.eval(else_branch, context)
                }
            }
            E::Case {
                comparand,
                items,
                else_branch,
            } => self.eval_case(comparand.as_deref(), items, else_branch, context),
            E::FunctionCall {
                library,
                name,
                arguments,
            } => self.eval_function_call(library.as_deref(), name, arguments, context),
            E::MethodCall {
                source,
                name,
                arguments,
            } => self.eval_method_call(source, name, arguments, context),
            E::Member { source, name } => {
                let value = self.eval(source, context)?;
                Ok(self.member(&value, name))
            }
            E::Index { source, index } => {
                let source = self.eval(source, context)?;
                let index = self.eval(index, context)?;
                let result = collection_ops::CollectionEvaluator::evaluate_indexer(
                    &source.into_collection(),
                    &index.into_collection(),
                )?;
                Ok(FhirPathValue::from_collection(result))
            }
            E::Is {
                operand,
                type_specifier,
                negated,
            } => {
                let value = self.eval(operand, context)?;
                if value.is_empty() {
                    return Ok(FhirPathValue::Null);
                }
                let name = type_specifier.simple_name().unwrap_or_default();
                let is = type_ops::is_type(&value, name);
                Ok(FhirPathValue::Boolean(if *negated { !is } else { is }))
            }
            E::As {
                operand,
                type_specifier,
            } => {
                let value = self.eval(operand, context)?;
                let specifier = fhirkit_fhirpath::ast::TypeSpecifier {
                    qualified_name: vec![type_specifier
                        .simple_name()
                        .unwrap_or_default()
                        .to_string()],
                };
                let result = TypeEvaluator::evaluate_type_operation(
                    &value.into_collection(),
                    &fhirkit_fhirpath::ast::TypeOperator::As,
                    &specifier,
                )?;
                Ok(FhirPathValue::from_collection(result))
            }
            E::NullTest {
                operand,
                test,
                negated,
            } => {
                let value = self.eval(operand, context)?;
                let result = match test {
                    NullTest::Null => value.is_null(),
                    NullTest::True => value == FhirPathValue::Boolean(true),
                    NullTest::False => value == FhirPathValue::Boolean(false),
                };
                Ok(FhirPathValue::Boolean(if *negated { !result } else { result }))
            }
            E::Interval(selector) => self.eval_interval_selector(selector, context),
            E::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    let value = self.eval(item, context)?;
                    // Collections never contain null
                    if !value.is_null() {
                        values.push(value);
                    }
                }
                Ok(FhirPathValue::Collection(values))
            }
            E::Tuple(entries) => {
                let mut values = IndexMap::new();
                for (name, expression) in entries {
                    values.insert(name.clone(), self.eval(expression, context)?);
                }
                Ok(FhirPathValue::Tuple(values))
            }
            E::Query(query) => self.evaluate_query(query, context),
            E::Retrieve(retrieve) => self.evaluate_retrieve(retrieve, context),
        }
    }

    fn eval_literal(&self, literal: &ast::Literal) -> FhirPathValue {
        match literal {
            ast::Literal::Null => FhirPathValue::Null,
            ast::Literal::Boolean(b) => FhirPathValue::Boolean(*b),
            ast::Literal::Integer(i) => FhirPathValue::Integer(*i),
            ast::Literal::Long(i) => FhirPathValue::Long(*i),
            ast::Literal::Decimal(d) => FhirPathValue::Decimal(*d),
            ast::Literal::String(s) => FhirPathValue::String(s.clone()),
            ast::Literal::Date(d) => FhirPathValue::Date(*d),
            ast::Literal::DateTime(dt) => FhirPathValue::DateTime(*dt),
            ast::Literal::Time(t) => FhirPathValue::Time(*t),
            ast::Literal::Quantity { value, unit } => {
                FhirPathValue::Quantity(Quantity::new(*value, unit.clone()))
            }
            ast::Literal::Ratio {
                numerator,
                denominator,
            } => FhirPathValue::Ratio(fhirkit_fhirpath::Ratio::new(
                Quantity::new(numerator.0, numerator.1.clone()),
                Quantity::new(denominator.0, denominator.1.clone()),
            )),
        }
    }

    fn eval_identifier(&self, name: &str, context: &mut CqlContext) -> Result<FhirPathValue> {
        // Sort keys resolve against the element being sorted first
        if let Some(element) = context.sort_element.clone() {
            let members = navigate_member(&element.into_collection(), name);
            if !members.is_empty() {
                return Ok(FhirPathValue::from_collection(members));
            }
        }

        if let Some(value) = context.lookup(name) {
            return Ok(value.clone());
        }

        let library = context.library.clone();
        if library.definitions.contains_key(name) {
            return self.evaluate_definition_value(&library, name, context);
        }
        if let Some(value) = context.parameters.get(name) {
            return Ok(value.clone());
        }
        if let Some(code) = library.codes.get(name) {
            return Ok(FhirPathValue::Code(code.clone()));
        }
        if let Some(concept) = library.concepts.get(name) {
            return Ok(FhirPathValue::Concept(concept.clone()));
        }
        if let Some(valueset) = library.valuesets.get(name) {
            return Ok(FhirPathValue::String(valueset.id.clone()));
        }
        if let Some(codesystem) = library.codesystems.get(name) {
            return Ok(FhirPathValue::String(codesystem.id.clone()));
        }

        // The context name (e.g. Patient) denotes the context resource
        if let Some(resource) = &context.resource {
            if resource.resource_type() == Some(name) {
                return Ok(resource.clone());
            }
        }

        Err(CqlError::reference_error(format!(
            "could not resolve identifier: {name}"
        )))
    }

    fn eval_qualified(
        &self,
        qualifier: &str,
        name: &str,
        context: &mut CqlContext,
    ) -> Result<FhirPathValue> {
        let library = context.library.clone();
        if let Some(include) = library.includes.get(qualifier) {
            let target = self
                .manager
                .read()
                .unwrap()
                .get(&include.name, include.version.as_deref())
                .ok_or_else(|| CqlError::LibraryNotFound(include.name.clone()))?;

            if let Some(definition) = target.definitions.get(name) {
                if definition.access == ast::AccessModifier::Private {
                    return Err(CqlError::reference_error(format!(
                        "definition {qualifier}.{name} is private"
                    )));
                }
                return self.evaluate_definition_value(&target, name, context);
            }
            if let Some(code) = target.codes.get(name) {
                return Ok(FhirPathValue::Code(code.clone()));
            }
            if let Some(concept) = target.concepts.get(name) {
                return Ok(FhirPathValue::Concept(concept.clone()));
            }
            if let Some(valueset) = target.valuesets.get(name) {
                return Ok(FhirPathValue::String(valueset.id.clone()));
            }
            return Err(CqlError::reference_error(format!(
                "could not resolve {qualifier}.{name}"
            )));
        }

        // Not an include alias: qualifier is a value, name is a member
        let value = self.eval_identifier(qualifier, context)?;
        Ok(self.member(&value, name))
    }

    fn member(&self, value: &FhirPathValue, name: &str) -> FhirPathValue {
        let members = navigate_member(&value.clone().into_collection(), name);
        FhirPathValue::from_collection(members)
    }

    fn eval_unary(&self, op: UnaryOperator, value: FhirPathValue) -> Result<FhirPathValue> {
        Ok(match op {
            UnaryOperator::Not => match to_bool(&value) {
                Some(b) => FhirPathValue::Boolean(!b),
                None => FhirPathValue::Null,
            },
            UnaryOperator::Negate => arithmetic::negate_value(&value),
            UnaryOperator::Exists => FhirPathValue::Boolean(!value.is_empty()),
            UnaryOperator::Distinct => FhirPathValue::Collection(collection_ops::distinct(
                &value.into_collection(),
                self.converter(),
            )),
            UnaryOperator::Flatten => {
                let mut flat = Vec::new();
                for item in value.into_collection() {
                    flat.extend(item.into_collection());
                }
                FhirPathValue::Collection(flat)
            }
            UnaryOperator::Singleton => {
                let mut items = value.into_collection();
                match items.len() {
                    0 => FhirPathValue::Null,
                    1 => items.remove(0),
                    n => {
                        return Err(CqlError::execution_error(format!(
                            "singleton from a collection of {n} elements"
                        )))
                    }
                }
            }
            UnaryOperator::Start => match &value {
                FhirPathValue::Interval(interval) => operators::interval_boundary(interval, true),
                FhirPathValue::Null => FhirPathValue::Null,
                point => point.clone(),
            },
            UnaryOperator::End => match &value {
                FhirPathValue::Interval(interval) => operators::interval_boundary(interval, false),
                FhirPathValue::Null => FhirPathValue::Null,
                point => point.clone(),
            },
            UnaryOperator::Width => match &value {
                FhirPathValue::Interval(interval) => {
                    operators::interval_width(interval, self.converter())
                }
                _ => FhirPathValue::Null,
            },
            UnaryOperator::PointFrom => match &value {
                FhirPathValue::Interval(interval) => {
                    let low = operators::interval_boundary(interval, true);
                    let high = operators::interval_boundary(interval, false);
                    if low.equals(&high, self.converter()) == Some(true) {
                        low
                    } else {
                        return Err(CqlError::execution_error(
                            "point from a non-unit interval",
                        ));
                    }
                }
                _ => FhirPathValue::Null,
            },
            UnaryOperator::Predecessor => operators::step_value(&value, false),
            UnaryOperator::Successor => operators::step_value(&value, true),
        })
    }

    fn eval_binary(
        &self,
        op: BinaryOperator,
        left: &ast::Expression,
        right: &ast::Expression,
        precision: Option<fhirkit_fhirpath::DateTimePrecision>,
        context: &mut CqlContext,
    ) -> Result<FhirPathValue> {
        use BinaryOperator as B;

        // Value-set membership needs the unevaluated right side
        if op == B::In {
            if let Some(url) = self.valueset_url_of(right, context) {
                let value = self.eval(left, context)?;
                return self.member_of_valueset(&value, &url);
            }
        }

        let left_value = self.eval(left, context)?;
        let right_value = self.eval(right, context)?;

        let converter = self.converter();
        Ok(match op {
            B::Add => arithmetic::add_values(&left_value, &right_value, converter),
            B::Subtract => arithmetic::subtract_values(&left_value, &right_value, converter),
            B::Multiply => arithmetic::multiply_values(&left_value, &right_value),
            B::Divide => arithmetic::divide_values(&left_value, &right_value),
            B::TruncatedDivide => arithmetic::truncated_divide_values(&left_value, &right_value),
            B::Modulo => arithmetic::modulo_values(&left_value, &right_value),
            B::Power => arithmetic::power_values(&left_value, &right_value),
            B::Concatenate => {
                let result = arithmetic::ArithmeticEvaluator::evaluate_additive(
                    &left_value.into_collection(),
                    &fhirkit_fhirpath::ast::AdditiveOperator::Concatenate,
                    &right_value.into_collection(),
                    converter,
                )?;
                FhirPathValue::from_collection(result)
            }

            B::Equal => three_valued(both_non_null(&left_value, &right_value, || {
                left_value.equals(&right_value, converter)
            })),
            B::NotEqual => three_valued(both_non_null(&left_value, &right_value, || {
                left_value.equals(&right_value, converter).map(|b| !b)
            })),
            B::Equivalent => {
                FhirPathValue::Boolean(left_value.equivalent(&right_value, converter))
            }
            B::NotEquivalent => {
                FhirPathValue::Boolean(!left_value.equivalent(&right_value, converter))
            }
            B::Less | B::LessOrEqual | B::Greater | B::GreaterOrEqual => {
                let Some(ordering) =
                    operators::point_cmp(&left_value, &right_value, precision, converter)
                else {
                    return Ok(FhirPathValue::Null);
                };
                use std::cmp::Ordering;
                FhirPathValue::Boolean(match op {
                    B::Less => ordering == Ordering::Less,
                    B::LessOrEqual => ordering != Ordering::Greater,
                    B::Greater => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                })
            }

            B::And => kleene_and(to_bool(&left_value), to_bool(&right_value)),
            B::Or => kleene_or(to_bool(&left_value), to_bool(&right_value)),
            B::Xor => match (to_bool(&left_value), to_bool(&right_value)) {
                (Some(a), Some(b)) => FhirPathValue::Boolean(a != b),
                _ => FhirPathValue::Null,
            },
            B::Implies => match (to_bool(&left_value), to_bool(&right_value)) {
                (Some(false), _) => FhirPathValue::Boolean(true),
                (_, Some(true)) => FhirPathValue::Boolean(true),
                (Some(true), Some(false)) => FhirPathValue::Boolean(false),
                _ => FhirPathValue::Null,
            },

            B::In => self.membership(&left_value, &right_value, precision, false),
            B::Contains => self.membership(&right_value, &left_value, precision, true),

            B::Union => {
                let result = collection_ops::CollectionEvaluator::evaluate_union(
                    &left_value.into_collection(),
                    &right_value.into_collection(),
                    converter,
                )?;
                FhirPathValue::Collection(result)
            }
            B::Intersect => {
                let right_items = right_value.into_collection();
                let mut result = Vec::new();
                for item in left_value.into_collection() {
                    if collection_ops::contains_value(&right_items, &item, converter)
                        && !collection_ops::contains_value(&result, &item, converter)
                    {
                        result.push(item);
                    }
                }
                FhirPathValue::Collection(result)
            }
            B::Except => {
                let right_items = right_value.into_collection();
                let result: Vec<FhirPathValue> = left_value
                    .into_collection()
                    .into_iter()
                    .filter(|item| {
                        !collection_ops::contains_value(&right_items, item, converter)
                    })
                    .collect();
                FhirPathValue::Collection(result)
            }

            B::Includes => operators::evaluate_interval_op(
                IntervalOp::Includes,
                &left_value,
                &right_value,
                precision,
                converter,
            ),
            B::IncludedIn => operators::evaluate_interval_op(
                IntervalOp::IncludedIn,
                &left_value,
                &right_value,
                precision,
                converter,
            ),
            B::ProperlyIncludes => operators::evaluate_interval_op(
                IntervalOp::ProperlyIncludes,
                &left_value,
                &right_value,
                precision,
                converter,
            ),
            B::ProperlyIncludedIn => operators::evaluate_interval_op(
                IntervalOp::ProperlyIncludedIn,
                &left_value,
                &right_value,
                precision,
                converter,
            ),
            B::Overlaps => operators::evaluate_interval_op(
                IntervalOp::Overlaps,
                &left_value,
                &right_value,
                precision,
                converter,
            ),
            B::OverlapsBefore => operators::evaluate_interval_op(
                IntervalOp::OverlapsBefore,
                &left_value,
                &right_value,
                precision,
                converter,
            ),
            B::OverlapsAfter => operators::evaluate_interval_op(
                IntervalOp::OverlapsAfter,
                &left_value,
                &right_value,
                precision,
                converter,
            ),
            B::Meets => operators::evaluate_interval_op(
                IntervalOp::Meets,
                &left_value,
                &right_value,
                precision,
                converter,
            ),
            B::MeetsBefore => operators::evaluate_interval_op(
                IntervalOp::MeetsBefore,
                &left_value,
                &right_value,
                precision,
                converter,
            ),
            B::MeetsAfter => operators::evaluate_interval_op(
                IntervalOp::MeetsAfter,
                &left_value,
                &right_value,
                precision,
                converter,
            ),
            B::Starts => operators::evaluate_interval_op(
                IntervalOp::Starts,
                &left_value,
                &right_value,
                precision,
                converter,
            ),
            B::Ends => operators::evaluate_interval_op(
                IntervalOp::Ends,
                &left_value,
                &right_value,
                precision,
                converter,
            ),
            B::Before => operators::evaluate_interval_op(
                IntervalOp::Before,
                &left_value,
                &right_value,
                precision,
                converter,
            ),
            B::After => operators::evaluate_interval_op(
                IntervalOp::After,
                &left_value,
                &right_value,
                precision,
                converter,
            ),
            B::SameAs => operators::evaluate_interval_op(
                IntervalOp::SameAs,
                &left_value,
                &right_value,
                precision,
                converter,
            ),
            B::SameOrBefore => operators::evaluate_interval_op(
                IntervalOp::SameOrBefore,
                &left_value,
                &right_value,
                precision,
                converter,
            ),
            B::SameOrAfter => operators::evaluate_interval_op(
                IntervalOp::SameOrAfter,
                &left_value,
                &right_value,
                precision,
                converter,
            ),
        })
    }

    /// `in`/`contains` over lists and intervals.
    fn membership(
        &self,
        member: &FhirPathValue,
        collection: &FhirPathValue,
        precision: Option<fhirkit_fhirpath::DateTimePrecision>,
        _contains: bool,
    ) -> FhirPathValue {
        if member.is_null() {
            return FhirPathValue::Null;
        }
        match collection {
            FhirPathValue::Interval(_) => operators::evaluate_interval_op(
                IntervalOp::IncludedIn,
                member,
                collection,
                precision,
                self.converter(),
            ),
            FhirPathValue::Null => FhirPathValue::Boolean(false),
            other => {
                let items = other.clone().into_collection();
                FhirPathValue::Boolean(collection_ops::contains_value(
                    &items,
                    member,
                    self.converter(),
                ))
            }
        }
    }

    /// If the expression syntactically names a value set, its URL.
    fn valueset_url_of(
        &self,
        expression: &ast::Expression,
        context: &CqlContext,
    ) -> Option<String> {
        match expression {
            ast::Expression::Identifier(name) => context
                .library
                .valuesets
                .get(name)
                .map(|vs| vs.id.clone()),
            ast::Expression::QualifiedIdentifier { qualifier, name } => {
                let include = context.library.includes.get(qualifier)?;
                let target = self
                    .manager
                    .read()
                    .unwrap()
                    .get(&include.name, include.version.as_deref())?;
                target.valuesets.get(name).map(|vs| vs.id.clone())
            }
            _ => None,
        }
    }

    /// Terminology membership for a code-ish value.
    fn member_of_valueset(&self, value: &FhirPathValue, url: &str) -> Result<FhirPathValue> {
        let Some(terminology) = &self.terminology else {
            return Ok(FhirPathValue::Null);
        };
        let codes = codes_of(value);
        if codes.is_empty() {
            return Ok(FhirPathValue::Null);
        }
        for code in codes {
            let member = terminology
                .member_of(&code.code, code.system.as_deref(), url)
                .map_err(|e| CqlError::execution_error(e.to_string()))?;
            if member {
                return Ok(FhirPathValue::Boolean(true));
            }
        }
        Ok(FhirPathValue::Boolean(false))
    }

    fn eval_case(
        &self,
        comparand: Option<&ast::Expression>,
        items: &[ast::CaseItem],
        else_branch: &ast::Expression,
        context: &mut CqlContext,
    ) -> Result<FhirPathValue> {
        let comparand_value = comparand
            .map(|expression| self.eval(expression, context))
            .transpose()?;
        for item in items {
            let when = self.eval(&item.when, context)?;
            let selected = match &comparand_value {
                Some(comparand) => comparand.equals(&when, self.converter()) == Some(true),
                None => to_bool(&when) == Some(true),
            };
            if selected {
                return self.eval(&item.then, context);
            }
        }
        self.eval(else_branch, context)
    }

    fn eval_function_call(
        &self,
        library: Option<&str>,
        name: &str,
        arguments: &[ast::Expression],
        context: &mut CqlContext,
    ) -> Result<FhirPathValue> {
        if let Some(alias) = library {
            let current = context.library.clone();
            if let Some(include) = current.includes.get(alias) {
                let target = self
                    .manager
                    .read()
                    .unwrap()
                    .get(&include.name, include.version.as_deref())
                    .ok_or_else(|| CqlError::LibraryNotFound(include.name.clone()))?;
                let Some(function) = target.function(name, arguments.len()) else {
                    return Err(CqlError::reference_error(format!(
                        "function not found: {alias}.{name}/{}",
                        arguments.len()
                    )));
                };
                if function.access == ast::AccessModifier::Private {
                    return Err(CqlError::reference_error(format!(
                        "function {alias}.{name} is private"
                    )));
                }
                let function = function.clone();
                return self.call_user_function(&target, &function, arguments, context);
            }
            // Not an include: treat as member-style call on a value
            let source = ast::Expression::Identifier(alias.to_string());
            return self.eval_method_call(&source, name, arguments, context);
        }

        // Terminology operators backed by the terminology service
        if matches!(name, "Subsumes" | "SubsumedBy") && arguments.len() == 2 {
            let a = self.eval(&arguments[0], context)?;
            let b = self.eval(&arguments[1], context)?;
            return self.subsumption(name, &a, &b);
        }

        let current = context.library.clone();
        if let Some(function) = current.function(name, arguments.len()) {
            let function = function.clone();
            return self.call_user_function(&current, &function, arguments, context);
        }

        let mut values = Vec::with_capacity(arguments.len());
        for argument in arguments {
            values.push(self.eval(argument, context)?);
        }
        builtins::call(name, &values, self.fhirpath.registry(), self.converter())
    }

    fn eval_method_call(
        &self,
        source: &ast::Expression,
        name: &str,
        arguments: &[ast::Expression],
        context: &mut CqlContext,
    ) -> Result<FhirPathValue> {
        let source_value = self.eval(source, context)?;

        // Fluent user functions get the source as their first operand
        let current = context.library.clone();
        if let Some(function) = current.function(name, arguments.len() + 1) {
            if function.fluent {
                let function = function.clone();
                let mut values = vec![source_value];
                for argument in arguments {
                    values.push(self.eval(argument, context)?);
                }
                return self.call_user_function_values(&current, &function, values, context);
            }
        }

        // Otherwise a built-in with the source as input
        let mut argument_values = Vec::with_capacity(arguments.len());
        for argument in arguments {
            argument_values.push(self.eval(argument, context)?);
        }
        let args: Vec<Vec<FhirPathValue>> = argument_values
            .into_iter()
            .map(FhirPathValue::into_collection)
            .collect();
        let registry = self.fhirpath.registry();
        let registry_name = if registry.contains(name) {
            name.to_string()
        } else {
            let mut chars = name.chars();
            match chars.next() {
                Some(first) => first.to_lowercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        };
        if !registry.contains(&registry_name) {
            return Err(CqlError::reference_error(format!(
                "unknown function: {name}"
            )));
        }
        let evaluation = EvaluationContext::empty();
        let function_context = FunctionContext {
            evaluation: &evaluation,
            converter: self.converter(),
        };
        let result = registry
            .call(
                &registry_name,
                &function_context,
                &source_value.into_collection(),
                &args,
            )
            .map_err(|e| CqlError::execution_error(e.to_string()))?;
        Ok(FhirPathValue::from_collection(result))
    }

    fn call_user_function(
        &self,
        library: &Arc<Library>,
        function: &crate::library::FunctionInfo,
        arguments: &[ast::Expression],
        context: &mut CqlContext,
    ) -> Result<FhirPathValue> {
        let mut values = Vec::with_capacity(arguments.len());
        for argument in arguments {
            values.push(self.eval(argument, context)?);
        }
        self.call_user_function_values(library, function, values, context)
    }

    fn call_user_function_values(
        &self,
        library: &Arc<Library>,
        function: &crate::library::FunctionInfo,
        values: Vec<FhirPathValue>,
        context: &mut CqlContext,
    ) -> Result<FhirPathValue> {
        let Some(body) = &function.body else {
            return Err(CqlError::execution_error(
                "external functions have no body to evaluate",
            ));
        };
        context.push_scope();
        for (parameter, value) in function.parameters.iter().zip(values) {
            context.bind(parameter.name.clone(), value);
        }
        let caller_library = std::mem::replace(&mut context.library, library.clone());
        let result = self.eval(body, context);
        context.library = caller_library;
        context.pop_scope();
        result
    }

    fn subsumption(
        &self,
        name: &str,
        a: &FhirPathValue,
        b: &FhirPathValue,
    ) -> Result<FhirPathValue> {
        let Some(terminology) = &self.terminology else {
            return Ok(FhirPathValue::Null);
        };
        let (FhirPathValue::Code(code_a), FhirPathValue::Code(code_b)) = (a, b) else {
            return Ok(FhirPathValue::Null);
        };
        let Some(system) = code_a.system.as_deref() else {
            return Ok(FhirPathValue::Null);
        };
        let outcome = terminology
            .subsumes(&code_a.code, &code_b.code, system)
            .map_err(|e| CqlError::execution_error(e.to_string()))?;
        let result = match name {
            "Subsumes" => {
                outcome == SubsumptionOutcome::Subsumes
                    || outcome == SubsumptionOutcome::Equivalent
            }
            _ => {
                outcome == SubsumptionOutcome::SubsumedBy
                    || outcome == SubsumptionOutcome::Equivalent
            }
        };
        Ok(FhirPathValue::Boolean(result))
    }

    fn eval_interval_selector(
        &self,
        selector: &ast::IntervalSelector,
        context: &mut CqlContext,
    ) -> Result<FhirPathValue> {
        let low = self.eval(&selector.low, context)?;
        let high = self.eval(&selector.high, context)?;
        if !low.is_null() && !high.is_null() && low.type_name() != high.type_name() {
            // Integer/Decimal promotion is the one permitted mix
            let numeric =
                low.as_decimal().is_some() && high.as_decimal().is_some();
            if !numeric {
                return Err(CqlError::execution_error(format!(
                    "interval endpoint types do not match: {} vs {}",
                    low.type_name(),
                    high.type_name()
                )));
            }
        }
        Ok(FhirPathValue::Interval(Box::new(Interval::new(
            low,
            high,
            selector.low_closed,
            selector.high_closed,
        ))))
    }

    pub(crate) fn evaluate_retrieve(
        &self,
        retrieve: &ast::Retrieve,
        context: &mut CqlContext,
    ) -> Result<FhirPathValue> {
        let Some(data_source) = &self.data_source else {
            return Ok(FhirPathValue::Collection(Vec::new()));
        };

        let mut filter = RetrieveFilter::default();
        if let Some(terminology) = &retrieve.terminology {
            filter.code_path = Some(
                retrieve
                    .code_path
                    .clone()
                    .unwrap_or_else(|| "code".to_string()),
            );
            if let Some(url) = self.valueset_url_of(terminology, context) {
                filter.valueset = Some(url);
            } else {
                let value = self.eval(terminology, context)?;
                filter.codes = codes_of(&value);
                if filter.codes.is_empty() {
                    if let FhirPathValue::String(url) = value {
                        filter.valueset = Some(url);
                    }
                }
            }
        }

        let retrieve_context = context
            .resource
            .as_ref()
            .and_then(|r| RetrieveContext::from_resource(&r.to_json()));
        let resources = data_source.retrieve(
            &retrieve.resource_type,
            &filter,
            retrieve_context.as_ref(),
        );
        debug!(
            resource_type = %retrieve.resource_type,
            count = resources.len(),
            "retrieve"
        );
        Ok(FhirPathValue::Collection(
            resources
                .iter()
                .map(FhirPathValue::from_json)
                .collect(),
        ))
    }

    /// `x between low and high`, three-valued.
    fn between(
        &self,
        value: &FhirPathValue,
        low: &FhirPathValue,
        high: &FhirPathValue,
    ) -> FhirPathValue {
        use std::cmp::Ordering;
        let converter = self.converter();
        let lower = operators::point_cmp(value, low, None, converter)
            .map(|o| o != Ordering::Less);
        let upper = operators::point_cmp(value, high, None, converter)
            .map(|o| o != Ordering::Greater);
        kleene_and(lower, upper)
    }

    /// `A within Q of B`: A lies in `[B - Q, B + Q]`. Intervals contribute
    /// their boundaries.
    fn within(
        &self,
        left: &FhirPathValue,
        quantity: &FhirPathValue,
        right: &FhirPathValue,
    ) -> FhirPathValue {
        let converter = self.converter();
        let left_point = boundary_point(left, true);
        let right_point = boundary_point(right, true);
        let low = arithmetic::subtract_values(&right_point, quantity, converter);
        let high = arithmetic::add_values(&right_point, quantity, converter);
        use std::cmp::Ordering;
        let lower = operators::point_cmp(&left_point, &low, None, converter)
            .map(|o| o != Ordering::Less);
        let upper = operators::point_cmp(&left_point, &high, None, converter)
            .map(|o| o != Ordering::Greater);
        kleene_and(lower, upper)
    }
}

impl Default for CqlEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// Boolean view of a value for the logical operators: null and empty are
/// unknown, a non-boolean value is truthy.
pub(crate) fn to_bool(value: &FhirPathValue) -> Option<bool> {
    match value {
        FhirPathValue::Boolean(b) => Some(*b),
        FhirPathValue::Null => None,
        FhirPathValue::Collection(items) if items.is_empty() => None,
        _ => Some(true),
    }
}

fn kleene_and(left: Option<bool>, right: Option<bool>) -> FhirPathValue {
    match (left, right) {
        (Some(false), _) | (_, Some(false)) => FhirPathValue::Boolean(false),
        (Some(true), Some(true)) => FhirPathValue::Boolean(true),
        _ => FhirPathValue::Null,
    }
}

fn kleene_or(left: Option<bool>, right: Option<bool>) -> FhirPathValue {
    match (left, right) {
        (Some(true), _) | (_, Some(true)) => FhirPathValue::Boolean(true),
        (Some(false), Some(false)) => FhirPathValue::Boolean(false),
        _ => FhirPathValue::Null,
    }
}

fn three_valued(value: Option<bool>) -> FhirPathValue {
    match value {
        Some(b) => FhirPathValue::Boolean(b),
        None => FhirPathValue::Null,
    }
}

fn both_non_null(
    left: &FhirPathValue,
    right: &FhirPathValue,
    compare: impl FnOnce() -> Option<bool>,
) -> Option<bool> {
    // Null propagates; an empty list is a value and compares normally
    if left.is_null() || right.is_null() {
        return None;
    }
    compare()
}

/// Extract codes from a code-ish value: Code, Concept, CodeableConcept
/// JSON, bare string, or a collection of these.
pub(crate) fn codes_of(value: &FhirPathValue) -> Vec<Code> {
    match value {
        FhirPathValue::Code(code) => vec![code.clone()],
        FhirPathValue::Concept(concept) => concept.codes.clone(),
        FhirPathValue::String(code) => vec![Code::new(code.clone(), None)],
        FhirPathValue::Object(json) => {
            let mut codes = Vec::new();
            if let Some(codings) = json.get("coding").and_then(Value::as_array) {
                for coding in codings {
                    if let Some(code) = coding.get("code").and_then(Value::as_str) {
                        codes.push(Code {
                            code: code.to_string(),
                            system: coding
                                .get("system")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                            version: None,
                            display: coding
                                .get("display")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                        });
                    }
                }
            } else if let Some(code) = json.get("code").and_then(Value::as_str) {
                codes.push(Code {
                    code: code.to_string(),
                    system: json
                        .get("system")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    version: None,
                    display: None,
                });
            }
            codes
        }
        FhirPathValue::Collection(items) => items.iter().flat_map(codes_of).collect(),
        _ => Vec::new(),
    }
}

/// `year from X` and friends.
pub(crate) fn component_from_value(
    value: &FhirPathValue,
    precision: fhirkit_fhirpath::DateTimePrecision,
) -> FhirPathValue {
    use fhirkit_fhirpath::DateTimePrecision as P;
    use FhirPathValue::*;
    let component: Option<i64> = match (value, precision) {
        (Date(d), P::Year) => Some(d.year as i64),
        (Date(d), P::Month) => d.month.map(|m| m as i64),
        (Date(d), P::Day) => d.day.map(|d| d as i64),
        (DateTime(dt), P::Year) => Some(dt.date.year as i64),
        (DateTime(dt), P::Month) => dt.date.month.map(|m| m as i64),
        (DateTime(dt), P::Day) => dt.date.day.map(|d| d as i64),
        (DateTime(dt), P::Hour) => dt.hour.map(|h| h as i64),
        (DateTime(dt), P::Minute) => dt.minute.map(|m| m as i64),
        (DateTime(dt), P::Second) => dt.second.map(|s| s as i64),
        (DateTime(dt), P::Millisecond) => dt.millisecond.map(|ms| ms as i64),
        (Time(t), P::Hour) => Some(t.hour as i64),
        (Time(t), P::Minute) => t.minute.map(|m| m as i64),
        (Time(t), P::Second) => t.second.map(|s| s as i64),
        (Time(t), P::Millisecond) => t.millisecond.map(|ms| ms as i64),
        _ => None,
    };
    component.map(FhirPathValue::Integer).unwrap_or(Null)
}

/// A point for `within`: intervals contribute a boundary.
fn boundary_point(value: &FhirPathValue, low_side: bool) -> FhirPathValue {
    match value {
        FhirPathValue::Interval(interval) => operators::interval_boundary(interval, low_side),
        other => other.clone(),
    }
}
