//! ELM interpreter.
//!
//! Executes loaded ELM libraries directly, without reparsing CQL. The
//! visitor is keyed by the node `type` and shares the operator
//! implementations, the function registry, the data source, and the
//! terminology service with the CQL evaluator, so both paths produce the
//! same results.

use super::expression as elm;
use super::library::{ElmLibrary, StatementDef};
use super::loader::ElmLoader;
use super::translator::parse_precision;
use crate::datasource::{DataSource, RetrieveContext, RetrieveFilter};
use crate::error::{CqlError, Result};
use crate::evaluator::operators::IntervalOp;
use crate::evaluator::{builtins, codes_of, operators, to_bool};
use fhirkit_fhirpath::evaluator::engine::navigate_member;
use fhirkit_fhirpath::evaluator::operations::{arithmetic, collection as collection_ops};
use fhirkit_fhirpath::model::datetime::{FhirDate, FhirDateTime, FhirTime};
use fhirkit_fhirpath::{FhirPathEvaluator, FhirPathValue, Interval, Quantity, Ratio};
use fhirkit_terminology::TerminologyService;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

/// Evaluates ELM libraries.
pub struct ElmEvaluator {
    libraries: HashMap<String, Arc<ElmLibrary>>,
    current: Option<Arc<ElmLibrary>>,
    fhirpath: FhirPathEvaluator,
    data_source: Option<Arc<dyn DataSource>>,
    terminology: Option<Arc<dyn TerminologyService>>,
}

/// Per-evaluation state for the interpreter.
struct ElmContext {
    resource: Option<FhirPathValue>,
    scopes: Vec<HashMap<String, FhirPathValue>>,
    parameters: HashMap<String, FhirPathValue>,
    library: Arc<ElmLibrary>,
    sort_element: Option<FhirPathValue>,
    memo: HashMap<(String, String), FhirPathValue>,
}

impl ElmContext {
    fn lookup(&self, name: &str) -> Option<&FhirPathValue> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }
}

impl ElmEvaluator {
    pub fn new() -> Self {
        Self {
            libraries: HashMap::new(),
            current: None,
            fhirpath: FhirPathEvaluator::new(),
            data_source: None,
            terminology: None,
        }
    }

    pub fn set_data_source(&mut self, data_source: Arc<dyn DataSource>) {
        self.data_source = Some(data_source);
    }

    pub fn set_terminology(&mut self, terminology: Arc<dyn TerminologyService>) {
        self.terminology = Some(terminology);
    }

    /// Load an ELM JSON string and make the library current.
    pub fn load(&mut self, source: &str) -> Result<Arc<ElmLibrary>> {
        self.register(ElmLoader::load_json(source)?)
    }

    /// Load an already-parsed ELM JSON value.
    pub fn load_value(&mut self, source: Value) -> Result<Arc<ElmLibrary>> {
        self.register(ElmLoader::load_value(source)?)
    }

    /// Load an ELM JSON file.
    pub fn load_file(&mut self, path: impl AsRef<std::path::Path>) -> Result<Arc<ElmLibrary>> {
        self.register(ElmLoader::load_file(path)?)
    }

    fn register(&mut self, library: ElmLibrary) -> Result<Arc<ElmLibrary>> {
        let library = Arc::new(library);
        self.libraries.insert(library.key(), library.clone());
        if let Some(identifier) = &library.identifier {
            if let Some(id) = &identifier.id {
                self.libraries.insert(id.clone(), library.clone());
            }
        }
        self.current = Some(library.clone());
        Ok(library)
    }

    pub fn current_library(&self) -> Option<Arc<ElmLibrary>> {
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
            .ok_or_else(|| CqlError::reference_error("no ELM library loaded"))?;
        let mut context = self.new_context(&library, resource, parameters)?;
        if library.definition(name).is_none() {
            return Err(CqlError::reference_error(format!(
                "definition not found: {name}"
            )));
        }
        self.definition_value(&library, name, &mut context)
    }

    /// Evaluate every definition; errors go under `_errors`.
    pub fn evaluate_all_definitions(
        &self,
        resource: Option<&Value>,
        parameters: Option<HashMap<String, FhirPathValue>>,
    ) -> Result<IndexMap<String, FhirPathValue>> {
        let library = self
            .current
            .clone()
            .ok_or_else(|| CqlError::reference_error("no ELM library loaded"))?;
        let mut context = self.new_context(&library, resource, parameters)?;

        let mut results = IndexMap::new();
        let mut errors: IndexMap<String, FhirPathValue> = IndexMap::new();
        let names: Vec<String> = library
            .statements
            .iter()
            .flat_map(|s| s.def.iter())
            .filter_map(|def| match def {
                StatementDef::ExpressionDef(d) => d.name.clone(),
                StatementDef::FunctionDef(_) => None,
            })
            .collect();
        for name in names {
            match self.definition_value(&library, &name, &mut context) {
                Ok(value) => {
                    results.insert(name, value);
                }
                Err(err) => {
                    errors.insert(name, FhirPathValue::String(err.to_string()));
                }
            }
        }
        if !errors.is_empty() {
            results.insert("_errors".to_string(), FhirPathValue::Tuple(errors));
        }
        Ok(results)
    }

    fn new_context(
        &self,
        library: &Arc<ElmLibrary>,
        resource: Option<&Value>,
        parameters: Option<HashMap<String, FhirPathValue>>,
    ) -> Result<ElmContext> {
        let mut context = ElmContext {
            resource: resource.map(FhirPathValue::from_json),
            scopes: Vec::new(),
            parameters: HashMap::new(),
            library: library.clone(),
            sort_element: None,
            memo: HashMap::new(),
        };
        let supplied = parameters.unwrap_or_default();
        if let Some(defs) = &library.parameters {
            for def in &defs.def {
                let Some(name) = &def.name else { continue };
                if let Some(value) = supplied.get(name) {
                    context.parameters.insert(name.clone(), value.clone());
                } else if let Some(default) = &def.default_value {
                    let mut default_context = ElmContext {
                        resource: None,
                        scopes: Vec::new(),
                        parameters: HashMap::new(),
                        library: library.clone(),
                        sort_element: None,
                        memo: HashMap::new(),
                    };
                    let value = self.eval(default, &mut default_context)?;
                    context.parameters.insert(name.clone(), value);
                }
            }
        }
        for (name, value) in supplied {
            context.parameters.entry(name).or_insert(value);
        }
        Ok(context)
    }

    fn definition_value(
        &self,
        library: &Arc<ElmLibrary>,
        name: &str,
        context: &mut ElmContext,
    ) -> Result<FhirPathValue> {
        let key = (library.key(), name.to_string());
        if let Some(cached) = context.memo.get(&key) {
            return Ok(cached.clone());
        }
        let Some(StatementDef::ExpressionDef(def)) = library.definition(name) else {
            return Err(CqlError::reference_error(format!(
                "definition not found: {name}"
            )));
        };
        let Some(expression) = &def.expression else {
            return Ok(FhirPathValue::Null);
        };
        let caller = std::mem::replace(&mut context.library, library.clone());
        let result = self.eval(expression, context);
        context.library = caller;
        let value = result?;
        context.memo.insert(key, value.clone());
        Ok(value)
    }

    fn converter(&self) -> &fhirkit_ucum::UcumConverter {
        self.fhirpath.converter()
    }

    // ========================================================================
    // Node visitor
    // ========================================================================

    fn eval(&self, node: &elm::ElmExpression, context: &mut ElmContext) -> Result<FhirPathValue> {
        use elm::ElmExpression as N;
        match node {
            N::Literal(literal) => parse_literal(literal),
            N::Null(_) => Ok(FhirPathValue::Null),
            N::List(list) => {
                let mut items = Vec::with_capacity(list.element.len());
                for element in &list.element {
                    let value = self.eval(element, context)?;
                    if !value.is_null() {
                        items.push(value);
                    }
                }
                Ok(FhirPathValue::Collection(items))
            }
            N::Interval(interval) => {
                let low = self.eval_opt(&interval.low, context)?;
                let high = self.eval_opt(&interval.high, context)?;
                Ok(FhirPathValue::Interval(Box::new(Interval::new(
                    low,
                    high,
                    interval.low_closed,
                    interval.high_closed,
                ))))
            }
            N::Tuple(tuple) => {
                let mut entries = IndexMap::new();
                for element in &tuple.element {
                    entries.insert(element.name.clone(), self.eval(&element.value, context)?);
                }
                Ok(FhirPathValue::Tuple(entries))
            }
            N::Quantity(quantity) => Ok(parse_quantity(quantity)),
            N::Ratio(ratio) => {
                let (Some(numerator), Some(denominator)) = (&ratio.numerator, &ratio.denominator)
                else {
                    return Ok(FhirPathValue::Null);
                };
                let (FhirPathValue::Quantity(n), FhirPathValue::Quantity(d)) =
                    (parse_quantity(numerator), parse_quantity(denominator))
                else {
                    return Ok(FhirPathValue::Null);
                };
                Ok(FhirPathValue::Ratio(Ratio::new(n, d)))
            }
            N::Code(code) => Ok(FhirPathValue::Code(self.resolve_inline_code(code, context))),
            N::Concept(concept) => {
                let codes = concept
                    .code
                    .iter()
                    .map(|c| self.resolve_inline_code(c, context))
                    .collect();
                Ok(FhirPathValue::Concept(fhirkit_fhirpath::Concept::new(
                    codes,
                    concept.display.clone(),
                )))
            }

            N::ExpressionRef(reference) => self.expression_ref(reference, context),
            N::ParameterRef(reference) => {
                let name = reference.name.as_deref().unwrap_or_default();
                context
                    .parameters
                    .get(name)
                    .cloned()
                    .ok_or_else(|| {
                        CqlError::reference_error(format!("parameter not found: {name}"))
                    })
            }
            N::OperandRef(reference) | N::AliasRef(reference) | N::QueryLetRef(reference) => {
                let name = reference.name.as_deref().unwrap_or_default();
                context
                    .lookup(name)
                    .cloned()
                    .ok_or_else(|| CqlError::reference_error(format!("unbound name: {name}")))
            }
            N::CodeRef(reference) => {
                let library = self.target_library(&reference.library_name, context)?;
                self.code_by_name(&library, reference.name.as_deref().unwrap_or_default())
                    .map(FhirPathValue::Code)
            }
            N::ConceptRef(reference) => {
                let library = self.target_library(&reference.library_name, context)?;
                let name = reference.name.as_deref().unwrap_or_default();
                let Some(defs) = &library.concepts else {
                    return Err(CqlError::reference_error(format!(
                        "concept not found: {name}"
                    )));
                };
                let Some(def) = defs.def.iter().find(|d| d.name.as_deref() == Some(name))
                else {
                    return Err(CqlError::reference_error(format!(
                        "concept not found: {name}"
                    )));
                };
                let mut codes = Vec::new();
                for code_ref in &def.code {
                    codes.push(self.code_by_name(
                        &library,
                        code_ref.name.as_deref().unwrap_or_default(),
                    )?);
                }
                Ok(FhirPathValue::Concept(fhirkit_fhirpath::Concept::new(
                    codes,
                    def.display.clone(),
                )))
            }
            N::ValueSetRef(reference) => {
                let library = self.target_library(&reference.library_name, context)?;
                let name = reference.name.as_deref().unwrap_or_default();
                self.valueset_url(&library, name)
                    .map(FhirPathValue::String)
                    .ok_or_else(|| {
                        CqlError::reference_error(format!("valueset not found: {name}"))
                    })
            }
            N::CodeSystemRef(reference) => {
                let library = self.target_library(&reference.library_name, context)?;
                let name = reference.name.as_deref().unwrap_or_default();
                let url = library.code_systems.as_ref().and_then(|defs| {
                    defs.def
                        .iter()
                        .find(|d| d.name.as_deref() == Some(name))
                        .and_then(|d| d.id.clone())
                });
                url.map(FhirPathValue::String).ok_or_else(|| {
                    CqlError::reference_error(format!("codesystem not found: {name}"))
                })
            }
            N::FunctionRef(reference) => self.function_ref(reference, context),
            N::Property(property) => self.property(property, context),

            N::If(if_expr) => {
                let condition = self.eval_opt(&if_expr.condition, context)?;
                if to_bool(&condition) == Some(true) {
                    self.eval_opt(&if_expr.then, context)
                } else {
                    self.eval_opt(&if_expr.else_branch, context)
                }
            }
            N::Case(case) => {
                let comparand = case
                    .comparand
                    .as_ref()
                    .map(|c| self.eval(c, context))
                    .transpose()?;
                for item in &case.case_item {
                    let when = self.eval_opt(&item.when, context)?;
                    let selected = match &comparand {
                        Some(comparand) => {
                            comparand.equals(&when, self.converter()) == Some(true)
                        }
                        None => to_bool(&when) == Some(true),
                    };
                    if selected {
                        return self.eval_opt(&item.then, context);
                    }
                }
                self.eval_opt(&case.else_branch, context)
            }

            N::And(nary) => self.fold_logic(nary, context, |a, b| match (a, b) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            }),
            N::Or(nary) => self.fold_logic(nary, context, |a, b| match (a, b) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            }),
            N::Xor(nary) => self.fold_logic(nary, context, |a, b| match (a, b) {
                (Some(a), Some(b)) => Some(a != b),
                _ => None,
            }),
            N::Implies(nary) => {
                let (left, right) = self.binary_operands(&nary.operand, context)?;
                Ok(match (to_bool(&left), to_bool(&right)) {
                    (Some(false), _) => FhirPathValue::Boolean(true),
                    (_, Some(true)) => FhirPathValue::Boolean(true),
                    (Some(true), Some(false)) => FhirPathValue::Boolean(false),
                    _ => FhirPathValue::Null,
                })
            }
            N::Not(unary) => {
                let value = self.eval_opt(&unary.operand, context)?;
                Ok(match to_bool(&value) {
                    Some(b) => FhirPathValue::Boolean(!b),
                    None => FhirPathValue::Null,
                })
            }
            N::IsNull(unary) => {
                let value = self.eval_opt(&unary.operand, context)?;
                Ok(FhirPathValue::Boolean(value.is_null()))
            }
            N::IsTrue(unary) => {
                let value = self.eval_opt(&unary.operand, context)?;
                Ok(FhirPathValue::Boolean(value == FhirPathValue::Boolean(true)))
            }
            N::IsFalse(unary) => {
                let value = self.eval_opt(&unary.operand, context)?;
                Ok(FhirPathValue::Boolean(
                    value == FhirPathValue::Boolean(false),
                ))
            }
            N::Coalesce(nary) => {
                for operand in &nary.operand {
                    let value = self.eval(operand, context)?;
                    if !value.is_empty() {
                        return Ok(value);
                    }
                }
                Ok(FhirPathValue::Null)
            }

            N::Equal(nary) => {
                let (left, right) = self.binary_operands(&nary.operand, context)?;
                if left.is_null() || right.is_null() {
                    return Ok(FhirPathValue::Null);
                }
                Ok(match left.equals(&right, self.converter()) {
                    Some(b) => FhirPathValue::Boolean(b),
                    None => FhirPathValue::Null,
                })
            }
            N::NotEqual(nary) => {
                let (left, right) = self.binary_operands(&nary.operand, context)?;
                if left.is_null() || right.is_null() {
                    return Ok(FhirPathValue::Null);
                }
                Ok(match left.equals(&right, self.converter()) {
                    Some(b) => FhirPathValue::Boolean(!b),
                    None => FhirPathValue::Null,
                })
            }
            N::Equivalent(nary) => {
                let (left, right) = self.binary_operands(&nary.operand, context)?;
                Ok(FhirPathValue::Boolean(
                    left.equivalent(&right, self.converter()),
                ))
            }
            N::Less(nary) | N::LessOrEqual(nary) | N::Greater(nary) | N::GreaterOrEqual(nary) => {
                let (left, right) = self.binary_operands(&nary.operand, context)?;
                let Some(ordering) =
                    operators::point_cmp(&left, &right, None, self.converter())
                else {
                    return Ok(FhirPathValue::Null);
                };
                let result = match node {
                    N::Less(_) => ordering == Ordering::Less,
                    N::LessOrEqual(_) => ordering != Ordering::Greater,
                    N::Greater(_) => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                };
                Ok(FhirPathValue::Boolean(result))
            }

            N::Add(nary) => self.arith(nary, context, |a, b, c| arithmetic::add_values(a, b, c)),
            N::Subtract(nary) => {
                self.arith(nary, context, |a, b, c| arithmetic::subtract_values(a, b, c))
            }
            N::Multiply(nary) => {
                self.arith(nary, context, |a, b, _| arithmetic::multiply_values(a, b))
            }
            N::Divide(nary) => {
                self.arith(nary, context, |a, b, _| arithmetic::divide_values(a, b))
            }
            N::TruncatedDivide(nary) => self.arith(nary, context, |a, b, _| {
                arithmetic::truncated_divide_values(a, b)
            }),
            N::Modulo(nary) => {
                self.arith(nary, context, |a, b, _| arithmetic::modulo_values(a, b))
            }
            N::Power(nary) => self.arith(nary, context, |a, b, _| arithmetic::power_values(a, b)),
            N::Negate(unary) => {
                let value = self.eval_opt(&unary.operand, context)?;
                Ok(arithmetic::negate_value(&value))
            }
            N::Concatenate(nary) => {
                let mut result = String::new();
                for operand in &nary.operand {
                    let value = self.eval(operand, context)?;
                    result.push_str(&value.display_value());
                }
                Ok(FhirPathValue::String(result))
            }

            N::Is(is_expr) => {
                let value = self.eval_opt(&is_expr.operand, context)?;
                if value.is_empty() {
                    return Ok(FhirPathValue::Null);
                }
                let type_name = is_expr.is_type.as_deref().unwrap_or_default();
                Ok(FhirPathValue::Boolean(
                    fhirkit_fhirpath::evaluator::operations::types::is_type(&value, type_name),
                ))
            }
            N::As(as_expr) => {
                let value = self.eval_opt(&as_expr.operand, context)?;
                if value.is_empty() {
                    return Ok(FhirPathValue::Null);
                }
                let type_name = as_expr.as_type.as_deref().unwrap_or_default();
                if fhirkit_fhirpath::evaluator::operations::types::is_type(&value, type_name) {
                    Ok(value)
                } else {
                    Err(CqlError::execution_error(format!(
                        "cannot cast {} to {type_name}",
                        value.type_name()
                    )))
                }
            }

            N::Exists(unary) => {
                let value = self.eval_opt(&unary.operand, context)?;
                Ok(FhirPathValue::Boolean(!value.is_empty()))
            }
            N::Count(aggregate) => self.aggregate(node, aggregate, context),
            N::Sum(aggregate) => self.aggregate(node, aggregate, context),
            N::Avg(aggregate) => self.aggregate(node, aggregate, context),
            N::Min(aggregate) => self.aggregate(node, aggregate, context),
            N::Max(aggregate) => self.aggregate(node, aggregate, context),
            N::First(aggregate) => self.aggregate(node, aggregate, context),
            N::Last(aggregate) => self.aggregate(node, aggregate, context),
            N::Distinct(unary) => {
                let value = self.eval_opt(&unary.operand, context)?;
                Ok(FhirPathValue::Collection(collection_ops::distinct(
                    &value.into_collection(),
                    self.converter(),
                )))
            }
            N::Flatten(unary) => {
                let value = self.eval_opt(&unary.operand, context)?;
                let mut flat = Vec::new();
                for item in value.into_collection() {
                    flat.extend(item.into_collection());
                }
                Ok(FhirPathValue::Collection(flat))
            }
            N::SingletonFrom(unary) => {
                let value = self.eval_opt(&unary.operand, context)?;
                let mut items = value.into_collection();
                match items.len() {
                    0 => Ok(FhirPathValue::Null),
                    1 => Ok(items.remove(0)),
                    n => Err(CqlError::execution_error(format!(
                        "singleton from a collection of {n} elements"
                    ))),
                }
            }
            N::Indexer(nary) => {
                let (source, index) = self.binary_operands(&nary.operand, context)?;
                let result = collection_ops::CollectionEvaluator::evaluate_indexer(
                    &source.into_collection(),
                    &index.into_collection(),
                )?;
                Ok(FhirPathValue::from_collection(result))
            }
            N::Union(nary) => {
                let (left, right) = self.binary_operands(&nary.operand, context)?;
                let result = collection_ops::CollectionEvaluator::evaluate_union(
                    &left.into_collection(),
                    &right.into_collection(),
                    self.converter(),
                )?;
                Ok(FhirPathValue::Collection(result))
            }
            N::Intersect(nary) => {
                let (left, right) = self.binary_operands(&nary.operand, context)?;
                let right_items = right.into_collection();
                let mut result = Vec::new();
                for item in left.into_collection() {
                    if collection_ops::contains_value(&right_items, &item, self.converter())
                        && !collection_ops::contains_value(&result, &item, self.converter())
                    {
                        result.push(item);
                    }
                }
                Ok(FhirPathValue::Collection(result))
            }
            N::Except(nary) => {
                let (left, right) = self.binary_operands(&nary.operand, context)?;
                let right_items = right.into_collection();
                Ok(FhirPathValue::Collection(
                    left.into_collection()
                        .into_iter()
                        .filter(|item| {
                            !collection_ops::contains_value(
                                &right_items,
                                item,
                                self.converter(),
                            )
                        })
                        .collect(),
                ))
            }
            N::In(binary) => {
                let (member, collection) = self.binary_operands(&binary.operand, context)?;
                Ok(self.membership(&member, &collection, &binary.precision))
            }
            N::Contains(binary) => {
                let (collection, member) = self.binary_operands(&binary.operand, context)?;
                Ok(self.membership(&member, &collection, &binary.precision))
            }
            N::InValueSet(in_valueset) => {
                let value = self.eval_opt(&in_valueset.code, context)?;
                let Some(reference) = &in_valueset.valueset else {
                    return Ok(FhirPathValue::Null);
                };
                let library = self.target_library(&reference.library_name, context)?;
                let Some(url) =
                    self.valueset_url(&library, reference.name.as_deref().unwrap_or_default())
                else {
                    return Ok(FhirPathValue::Null);
                };
                self.member_of_valueset(&value, &url)
            }

            N::Start(unary) => {
                let value = self.eval_opt(&unary.operand, context)?;
                Ok(match &value {
                    FhirPathValue::Interval(interval) => {
                        operators::interval_boundary(interval, true)
                    }
                    other => other.clone(),
                })
            }
            N::End(unary) => {
                let value = self.eval_opt(&unary.operand, context)?;
                Ok(match &value {
                    FhirPathValue::Interval(interval) => {
                        operators::interval_boundary(interval, false)
                    }
                    other => other.clone(),
                })
            }
            N::Width(unary) => {
                let value = self.eval_opt(&unary.operand, context)?;
                Ok(match &value {
                    FhirPathValue::Interval(interval) => {
                        operators::interval_width(interval, self.converter())
                    }
                    _ => FhirPathValue::Null,
                })
            }
            N::PointFrom(unary) => {
                let value = self.eval_opt(&unary.operand, context)?;
                match &value {
                    FhirPathValue::Interval(interval) => {
                        let low = operators::interval_boundary(interval, true);
                        let high = operators::interval_boundary(interval, false);
                        if low.equals(&high, self.converter()) == Some(true) {
                            Ok(low)
                        } else {
                            Err(CqlError::execution_error("point from a non-unit interval"))
                        }
                    }
                    _ => Ok(FhirPathValue::Null),
                }
            }
            N::Predecessor(unary) => {
                let value = self.eval_opt(&unary.operand, context)?;
                Ok(operators::step_value(&value, false))
            }
            N::Successor(unary) => {
                let value = self.eval_opt(&unary.operand, context)?;
                Ok(operators::step_value(&value, true))
            }

            N::Before(binary) => self.interval_op(IntervalOp::Before, binary, context),
            N::After(binary) => self.interval_op(IntervalOp::After, binary, context),
            N::SameAs(binary) => self.interval_op(IntervalOp::SameAs, binary, context),
            N::SameOrBefore(binary) => {
                self.interval_op(IntervalOp::SameOrBefore, binary, context)
            }
            N::SameOrAfter(binary) => self.interval_op(IntervalOp::SameOrAfter, binary, context),
            N::Overlaps(binary) => self.interval_op(IntervalOp::Overlaps, binary, context),
            N::OverlapsBefore(binary) => {
                self.interval_op(IntervalOp::OverlapsBefore, binary, context)
            }
            N::OverlapsAfter(binary) => {
                self.interval_op(IntervalOp::OverlapsAfter, binary, context)
            }
            N::Meets(binary) => self.interval_op(IntervalOp::Meets, binary, context),
            N::MeetsBefore(binary) => self.interval_op(IntervalOp::MeetsBefore, binary, context),
            N::MeetsAfter(binary) => self.interval_op(IntervalOp::MeetsAfter, binary, context),
            N::Starts(binary) => self.interval_op(IntervalOp::Starts, binary, context),
            N::Ends(binary) => self.interval_op(IntervalOp::Ends, binary, context),
            N::Includes(binary) => self.interval_op(IntervalOp::Includes, binary, context),
            N::IncludedIn(binary) => self.interval_op(IntervalOp::IncludedIn, binary, context),
            N::ProperIncludes(binary) => {
                self.interval_op(IntervalOp::ProperlyIncludes, binary, context)
            }
            N::ProperIncludedIn(binary) => {
                self.interval_op(IntervalOp::ProperlyIncludedIn, binary, context)
            }
            N::DurationBetween(binary) => {
                let (low, high) = self.binary_operands(&binary.operand, context)?;
                let Some(precision) =
                    binary.precision.as_deref().and_then(parse_precision)
                else {
                    return Ok(FhirPathValue::Null);
                };
                Ok(operators::duration_between(&low, &high, precision))
            }
            N::DifferenceBetween(binary) => {
                let (low, high) = self.binary_operands(&binary.operand, context)?;
                let Some(precision) =
                    binary.precision.as_deref().and_then(parse_precision)
                else {
                    return Ok(FhirPathValue::Null);
                };
                Ok(operators::difference_between(&low, &high, precision))
            }
            N::DateTimeComponentFrom(component) => {
                let value = self.eval_opt(&component.operand, context)?;
                let Some(precision) =
                    component.precision.as_deref().and_then(parse_precision)
                else {
                    return Ok(FhirPathValue::Null);
                };
                Ok(crate::evaluator::component_from_value(&value, precision))
            }

            N::Query(query) => self.query(query, context),
            N::Retrieve(retrieve) => self.retrieve(retrieve, context),

            N::Unknown => Err(CqlError::execution_error(
                "unsupported ELM node type in this interpreter",
            )),
        }
    }

    fn eval_opt(
        &self,
        node: &Option<Box<elm::ElmExpression>>,
        context: &mut ElmContext,
    ) -> Result<FhirPathValue> {
        match node {
            Some(node) => self.eval(node, context),
            None => Ok(FhirPathValue::Null),
        }
    }

    fn binary_operands(
        &self,
        operands: &[elm::ElmExpression],
        context: &mut ElmContext,
    ) -> Result<(FhirPathValue, FhirPathValue)> {
        let left = operands
            .first()
            .map(|o| self.eval(o, context))
            .transpose()?
            .unwrap_or(FhirPathValue::Null);
        let right = operands
            .get(1)
            .map(|o| self.eval(o, context))
            .transpose()?
            .unwrap_or(FhirPathValue::Null);
        Ok((left, right))
    }

    fn fold_logic(
        &self,
        nary: &elm::NaryExpression,
        context: &mut ElmContext,
        combine: fn(Option<bool>, Option<bool>) -> Option<bool>,
    ) -> Result<FhirPathValue> {
        let mut operands = nary.operand.iter();
        let Some(first) = operands.next() else {
            return Ok(FhirPathValue::Null);
        };
        let first = self.eval(first, context)?;
        let mut accumulator = to_bool(&first);
        for operand in operands {
            let value = self.eval(operand, context)?;
            accumulator = combine(accumulator, to_bool(&value));
        }
        Ok(match accumulator {
            Some(b) => FhirPathValue::Boolean(b),
            None => FhirPathValue::Null,
        })
    }

    fn arith(
        &self,
        nary: &elm::NaryExpression,
        context: &mut ElmContext,
        op: fn(&FhirPathValue, &FhirPathValue, &fhirkit_ucum::UcumConverter) -> FhirPathValue,
    ) -> Result<FhirPathValue> {
        let (left, right) = self.binary_operands(&nary.operand, context)?;
        Ok(op(&left, &right, self.converter()))
    }

    fn aggregate(
        &self,
        node: &elm::ElmExpression,
        aggregate: &elm::AggregateExpression,
        context: &mut ElmContext,
    ) -> Result<FhirPathValue> {
        use elm::ElmExpression as N;
        let source = self.eval_opt(&aggregate.source, context)?;
        let name = match node {
            N::Count(_) => "Count",
            N::Sum(_) => "Sum",
            N::Avg(_) => "Avg",
            N::Min(_) => "Min",
            N::Max(_) => "Max",
            N::First(_) => "First",
            _ => "Last",
        };
        builtins::call(name, &[source], self.fhirpath.registry(), self.converter())
    }

    fn interval_op(
        &self,
        op: IntervalOp,
        binary: &elm::PrecisionBinary,
        context: &mut ElmContext,
    ) -> Result<FhirPathValue> {
        let (left, right) = self.binary_operands(&binary.operand, context)?;
        let precision = binary.precision.as_deref().and_then(parse_precision);
        Ok(operators::evaluate_interval_op(
            op,
            &left,
            &right,
            precision,
            self.converter(),
        ))
    }

    fn membership(
        &self,
        member: &FhirPathValue,
        collection: &FhirPathValue,
        precision: &Option<String>,
    ) -> FhirPathValue {
        if member.is_null() {
            return FhirPathValue::Null;
        }
        let precision = precision.as_deref().and_then(parse_precision);
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

    fn expression_ref(
        &self,
        reference: &elm::NamedRef,
        context: &mut ElmContext,
    ) -> Result<FhirPathValue> {
        let name = reference.name.as_deref().unwrap_or_default();
        let library = self.target_library(&reference.library_name, context)?;
        if library.definition(name).is_some() {
            return self.definition_value(&library, name, context);
        }
        // Context resource reference (e.g. Patient)
        if let Some(resource) = &context.resource {
            if resource.resource_type() == Some(name) {
                return Ok(resource.clone());
            }
        }
        Err(CqlError::reference_error(format!(
            "could not resolve reference: {name}"
        )))
    }

    fn function_ref(
        &self,
        reference: &elm::FunctionRef,
        context: &mut ElmContext,
    ) -> Result<FhirPathValue> {
        let name = reference.name.as_deref().unwrap_or_default();
        let library = self.target_library(&reference.library_name, context)?;

        let mut arguments = Vec::with_capacity(reference.operand.len());
        for operand in &reference.operand {
            arguments.push(self.eval(operand, context)?);
        }

        // User-defined function with a matching operand count
        let function = library.statements.as_ref().and_then(|statements| {
            statements.def.iter().find_map(|def| match def {
                StatementDef::FunctionDef(f)
                    if f.name.as_deref() == Some(name)
                        && f.operand.len() == arguments.len() =>
                {
                    Some(f.clone())
                }
                _ => None,
            })
        });
        if let Some(function) = function {
            let Some(body) = &function.expression else {
                return Err(CqlError::execution_error(
                    "external functions have no body to evaluate",
                ));
            };
            let mut scope = HashMap::new();
            for (operand, value) in function.operand.iter().zip(arguments) {
                if let Some(operand_name) = &operand.name {
                    scope.insert(operand_name.clone(), value);
                }
            }
            context.scopes.push(scope);
            let caller = std::mem::replace(&mut context.library, library.clone());
            let result = self.eval(body, context);
            context.library = caller;
            context.scopes.pop();
            return result;
        }

        builtins::call(name, &arguments, self.fhirpath.registry(), self.converter())
    }

    fn property(&self, property: &elm::Property, context: &mut ElmContext) -> Result<FhirPathValue> {
        let source = if let Some(scope) = &property.scope {
            context.lookup(scope).cloned().ok_or_else(|| {
                CqlError::reference_error(format!("unbound query alias: {scope}"))
            })?
        } else if let Some(source) = &property.source {
            self.eval(source, context)?
        } else if let Some(element) = &context.sort_element {
            element.clone()
        } else if let Some(resource) = &context.resource {
            resource.clone()
        } else {
            return Ok(FhirPathValue::Null);
        };

        let mut current = source.into_collection();
        for segment in property.path.as_deref().unwrap_or_default().split('.') {
            if segment.is_empty() {
                continue;
            }
            current = navigate_member(&current, segment);
        }
        Ok(FhirPathValue::from_collection(current))
    }

    fn target_library(
        &self,
        library_name: &Option<String>,
        context: &ElmContext,
    ) -> Result<Arc<ElmLibrary>> {
        let Some(alias) = library_name else {
            return Ok(context.library.clone());
        };
        // The alias maps to an include path, which keys the loaded library
        let path = context
            .library
            .includes
            .as_ref()
            .and_then(|includes| {
                includes
                    .def
                    .iter()
                    .find(|def| def.local_identifier.as_deref() == Some(alias))
            })
            .and_then(|def| def.path.clone())
            .unwrap_or_else(|| alias.clone());
        self.libraries
            .get(&path)
            .cloned()
            .ok_or_else(|| CqlError::LibraryNotFound(path))
    }

    fn valueset_url(&self, library: &ElmLibrary, name: &str) -> Option<String> {
        library
            .value_sets
            .as_ref()?
            .def
            .iter()
            .find(|def| def.name.as_deref() == Some(name))
            .and_then(|def| def.id.clone())
    }

    fn code_by_name(&self, library: &ElmLibrary, name: &str) -> Result<fhirkit_fhirpath::Code> {
        let Some(defs) = &library.codes else {
            return Err(CqlError::reference_error(format!("code not found: {name}")));
        };
        let Some(def) = defs.def.iter().find(|d| d.name.as_deref() == Some(name)) else {
            return Err(CqlError::reference_error(format!("code not found: {name}")));
        };
        let system = def
            .code_system
            .as_ref()
            .and_then(|reference| reference.name.as_deref())
            .and_then(|system_name| {
                library.code_systems.as_ref().and_then(|systems| {
                    systems
                        .def
                        .iter()
                        .find(|s| s.name.as_deref() == Some(system_name))
                        .and_then(|s| s.id.clone())
                })
            });
        Ok(fhirkit_fhirpath::Code {
            code: def.id.clone().unwrap_or_default(),
            system,
            version: None,
            display: def.display.clone(),
        })
    }

    fn resolve_inline_code(
        &self,
        code: &elm::CodeExpr,
        context: &ElmContext,
    ) -> fhirkit_fhirpath::Code {
        let system = code
            .system
            .as_ref()
            .and_then(|reference| reference.name.as_deref())
            .and_then(|system_name| {
                context.library.code_systems.as_ref().and_then(|systems| {
                    systems
                        .def
                        .iter()
                        .find(|s| s.name.as_deref() == Some(system_name))
                        .and_then(|s| s.id.clone())
                })
            });
        fhirkit_fhirpath::Code {
            code: code.code.clone().unwrap_or_default(),
            system,
            version: None,
            display: code.display.clone(),
        }
    }

    // ========================================================================
    // Query and retrieve
    // ========================================================================

    fn query(&self, query: &elm::Query, context: &mut ElmContext) -> Result<FhirPathValue> {
        let mut sources: Vec<(String, Vec<FhirPathValue>)> = Vec::new();
        for source in &query.source {
            let alias = source.alias.clone().unwrap_or_default();
            let value = self.eval_opt(&source.expression, context)?;
            sources.push((alias, value.into_collection()));
        }

        let mut rows: Vec<Vec<usize>> = vec![Vec::new()];
        for (_, items) in &sources {
            let mut next = Vec::with_capacity(rows.len() * items.len().max(1));
            for row in &rows {
                for index in 0..items.len() {
                    let mut extended = row.clone();
                    extended.push(index);
                    next.push(extended);
                }
            }
            rows = next;
        }

        let single_alias = sources.len() == 1;
        let mut surviving: Vec<HashMap<String, FhirPathValue>> = Vec::new();
        let mut surviving_rows: Vec<Vec<FhirPathValue>> = Vec::new();

        for row in rows {
            let mut bindings: HashMap<String, FhirPathValue> = HashMap::new();
            let mut row_values: Vec<FhirPathValue> = Vec::new();
            for ((alias, items), index) in sources.iter().zip(row.iter()) {
                bindings.insert(alias.clone(), items[*index].clone());
                row_values.push(items[*index].clone());
            }

            context.scopes.push(bindings.clone());
            let mut kept = true;
            for let_clause in &query.let_clause {
                let value = match self.eval_opt(&let_clause.expression, context) {
                    Ok(value) => value,
                    Err(err) => {
                        context.scopes.pop();
                        return Err(err);
                    }
                };
                if let (Some(identifier), Some(scope)) =
                    (&let_clause.identifier, context.scopes.last_mut())
                {
                    scope.insert(identifier.clone(), value.clone());
                    bindings.insert(identifier.clone(), value);
                }
            }
            if let Some(where_clause) = &query.where_clause {
                match self.eval(where_clause, context) {
                    Ok(condition) => kept = to_bool(&condition) == Some(true),
                    Err(err) => {
                        context.scopes.pop();
                        return Err(err);
                    }
                }
            }
            context.scopes.pop();

            if kept {
                surviving.push(bindings);
                surviving_rows.push(row_values);
            }
        }

        if let Some(aggregate) = &query.aggregate_clause {
            let mut accumulator = match &aggregate.starting {
                Some(starting) => self.eval(starting, context)?,
                None => FhirPathValue::Null,
            };
            for bindings in surviving {
                let mut scope = bindings;
                if let Some(identifier) = &aggregate.identifier {
                    scope.insert(identifier.clone(), accumulator.clone());
                }
                context.scopes.push(scope);
                let result = self.eval_opt(&aggregate.expression, context);
                context.scopes.pop();
                accumulator = result?;
            }
            return Ok(accumulator);
        }

        let mut results: Vec<FhirPathValue> = Vec::new();
        for (bindings, row_values) in surviving.into_iter().zip(surviving_rows) {
            let value = match &query.return_clause {
                Some(return_clause) => {
                    context.scopes.push(bindings);
                    let result = self.eval_opt(&return_clause.expression, context);
                    context.scopes.pop();
                    result?
                }
                None => {
                    if single_alias {
                        row_values.into_iter().next().unwrap_or(FhirPathValue::Null)
                    } else {
                        FhirPathValue::Tuple(
                            query
                                .source
                                .iter()
                                .zip(row_values)
                                .map(|(source, value)| {
                                    (source.alias.clone().unwrap_or_default(), value)
                                })
                                .collect(),
                        )
                    }
                }
            };
            if !value.is_null() {
                results.push(value);
            }
        }

        if query
            .return_clause
            .as_ref()
            .map(|r| r.distinct)
            .unwrap_or(false)
        {
            results = collection_ops::distinct(&results, self.converter());
        }

        if let Some(sort) = &query.sort_clause {
            results = self.sort(results, sort, context)?;
        }

        Ok(FhirPathValue::Collection(results))
    }

    fn sort(
        &self,
        results: Vec<FhirPathValue>,
        sort: &elm::SortClause,
        context: &mut ElmContext,
    ) -> Result<Vec<FhirPathValue>> {
        let mut keyed: Vec<(Vec<FhirPathValue>, FhirPathValue)> =
            Vec::with_capacity(results.len());
        for element in results {
            let mut keys = Vec::with_capacity(sort.by.len());
            for item in &sort.by {
                let key = match &item.expression {
                    Some(expression) => {
                        let saved = context.sort_element.replace(element.clone());
                        let key = self.eval(expression, context);
                        context.sort_element = saved;
                        key?
                    }
                    None => element.clone(),
                };
                keys.push(key);
            }
            keyed.push((keys, element));
        }

        let converter = self.converter();
        keyed.sort_by(|(a_keys, _), (b_keys, _)| {
            for (item, (a, b)) in sort.by.iter().zip(a_keys.iter().zip(b_keys.iter())) {
                let descending = item.direction.as_deref() == Some("desc")
                    || item.direction.as_deref() == Some("descending");
                let ordering = match (a.is_null(), b.is_null()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => a.compare(b, converter).unwrap_or(Ordering::Equal),
                };
                let ordering = if descending { ordering.reverse() } else { ordering };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });

        Ok(keyed.into_iter().map(|(_, element)| element).collect())
    }

    fn retrieve(
        &self,
        retrieve: &elm::Retrieve,
        context: &mut ElmContext,
    ) -> Result<FhirPathValue> {
        let Some(data_source) = &self.data_source else {
            return Ok(FhirPathValue::Collection(Vec::new()));
        };
        let resource_type = retrieve
            .data_type
            .as_deref()
            .map(strip_namespace)
            .unwrap_or_default();

        let mut filter = RetrieveFilter {
            code_path: retrieve.code_property.clone(),
            ..RetrieveFilter::default()
        };
        if let Some(codes) = &retrieve.codes {
            match codes.as_ref() {
                elm::ElmExpression::ValueSetRef(reference) => {
                    let library = self.target_library(&reference.library_name, context)?;
                    filter.valueset = self
                        .valueset_url(&library, reference.name.as_deref().unwrap_or_default());
                }
                other => {
                    let value = self.eval(other, context)?;
                    filter.codes = codes_of(&value);
                    if filter.codes.is_empty() {
                        if let FhirPathValue::String(url) = value {
                            filter.valueset = Some(url);
                        }
                    }
                }
            }
        }

        let retrieve_context = context
            .resource
            .as_ref()
            .and_then(|r| RetrieveContext::from_resource(&r.to_json()));
        let resources =
            data_source.retrieve(resource_type, &filter, retrieve_context.as_ref());
        Ok(FhirPathValue::Collection(
            resources.iter().map(FhirPathValue::from_json).collect(),
        ))
    }
}

impl Default for ElmEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_namespace(data_type: &str) -> &str {
    match data_type.rfind('}') {
        Some(position) => &data_type[position + 1..],
        None => data_type,
    }
}

/// Parse a typed ELM literal into a runtime value.
fn parse_literal(literal: &elm::Literal) -> Result<FhirPathValue> {
    let value_type = literal
        .value_type
        .as_deref()
        .and_then(|t| t.rsplit('}').next())
        .unwrap_or("String");
    let Some(text) = &literal.value else {
        return Ok(FhirPathValue::Null);
    };
    let parsed = match value_type {
        "Integer" => text.parse::<i64>().ok().map(FhirPathValue::Integer),
        "Long" => text.parse::<i64>().ok().map(FhirPathValue::Long),
        "Decimal" => Decimal::from_str(text).ok().map(FhirPathValue::Decimal),
        "Boolean" => text.parse::<bool>().ok().map(FhirPathValue::Boolean),
        "Date" => FhirDate::from_str(text).ok().map(FhirPathValue::Date),
        "DateTime" => FhirDateTime::from_str(text).ok().map(FhirPathValue::DateTime),
        "Time" => FhirTime::from_str(text).ok().map(FhirPathValue::Time),
        _ => Some(FhirPathValue::String(text.clone())),
    };
    parsed.ok_or_else(|| {
        CqlError::execution_error(format!(
            "malformed {value_type} literal: {text}"
        ))
    })
}

fn parse_quantity(quantity: &elm::QuantityExpr) -> FhirPathValue {
    let Some(value) = quantity
        .value
        .as_deref()
        .and_then(|v| Decimal::from_str(v).ok())
    else {
        return FhirPathValue::Null;
    };
    FhirPathValue::Quantity(Quantity::new(
        value,
        quantity.unit.clone().unwrap_or_else(|| "1".to_string()),
    ))
}
