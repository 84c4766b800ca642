//! Built-in function registry.
//!
//! Dispatch is by name against a table of handler functions, so the operator
//! set is a data artifact tests can enumerate. Arguments arrive
//! pre-evaluated as collections; the lazy functions (`where`, `select`,
//! `repeat`, `all`, `exists`, `aggregate`) never reach the registry — the
//! expression walker evaluates their argument ASTs itself.
//!
//! The comparison and arithmetic operators are registered under their symbol
//! names (`=`, `+`, …) with the left operand as the function input, which is
//! how the CQL evaluator reuses them.

pub mod collection_functions;
pub mod conversion_functions;
pub mod datetime_functions;
pub mod math_functions;
pub mod navigation_functions;
pub mod string_functions;

use crate::error::{FhirPathError, FhirPathResult};
use crate::evaluator::context::EvaluationContext;
use crate::model::Collection;
use fhirkit_ucum::UcumConverter;
use std::collections::HashMap;

/// Extra state handlers may need beyond their arguments.
pub struct FunctionContext<'a> {
    pub evaluation: &'a EvaluationContext,
    pub converter: &'a UcumConverter,
}

/// A built-in function: input collection and evaluated argument collections
/// to result collection.
pub type FunctionHandler =
    fn(&FunctionContext<'_>, &Collection, &[Collection]) -> FhirPathResult<Collection>;

/// Name-keyed dispatch table of built-in functions.
pub struct FunctionRegistry {
    functions: HashMap<&'static str, FunctionHandler>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            functions: HashMap::new(),
        };
        collection_functions::register(&mut registry);
        string_functions::register(&mut registry);
        math_functions::register(&mut registry);
        conversion_functions::register(&mut registry);
        datetime_functions::register(&mut registry);
        navigation_functions::register(&mut registry);
        registry
    }

    pub fn register(&mut self, name: &'static str, handler: FunctionHandler) {
        self.functions.insert(name, handler);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// All registered names, for test enumeration.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.functions.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn call(
        &self,
        name: &str,
        context: &FunctionContext<'_>,
        input: &Collection,
        arguments: &[Collection],
    ) -> FhirPathResult<Collection> {
        match self.functions.get(name) {
            Some(handler) => handler(context, input, arguments),
            None => Err(FhirPathError::function_error(format!(
                "unknown function: {name}"
            ))),
        }
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The single value of a collection: `None` unless exactly one item.
pub(crate) fn singleton(collection: &Collection) -> Option<&crate::model::FhirPathValue> {
    match collection.len() {
        1 => Some(&collection[0]),
        _ => None,
    }
}

/// First element of the i-th argument, if present.
pub(crate) fn arg_value<'a>(
    arguments: &'a [Collection],
    index: usize,
) -> Option<&'a crate::model::FhirPathValue> {
    arguments.get(index).and_then(|c| c.first())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_function_set_is_registered() {
        let registry = FunctionRegistry::new();
        let required = [
            // collection
            "empty", "not", "exists", "allTrue", "allFalse", "anyTrue", "anyFalse", "count",
            "distinct", "isDistinct", "subsetOf", "supersetOf", "first", "last", "tail", "skip",
            "take", "intersect", "exclude", "union", "combine", "single",
            // string
            "length", "substring", "indexOf", "replace", "replaceMatches", "matches",
            "startsWith", "endsWith", "contains", "upper", "lower", "toChars", "split", "join",
            "trim",
            // math
            "abs", "ceiling", "floor", "truncate", "round", "exp", "ln", "log", "power", "sqrt",
            // conversion
            "toBoolean", "toInteger", "toDecimal", "toString", "toQuantity", "toDate",
            "toDateTime", "toTime", "toRatio", "convertsToBoolean", "convertsToInteger",
            "convertsToDecimal", "convertsToString", "convertsToQuantity", "convertsToDate",
            "convertsToDateTime", "convertsToTime",
            // date
            "now", "today", "timeOfDay",
            // navigation
            "children", "descendants", "type",
            // operators exposed as functions
            "=", "!=", "~", "!~", "<", "<=", ">", ">=", "+", "-", "*", "/", "div", "mod", "^",
            "&", "|",
        ];
        for name in required {
            assert!(registry.contains(name), "missing function: {name}");
        }
    }

    #[test]
    fn test_unknown_function_errors() {
        let registry = FunctionRegistry::new();
        let evaluation = EvaluationContext::empty();
        let converter = UcumConverter::new();
        let context = FunctionContext {
            evaluation: &evaluation,
            converter: &converter,
        };
        assert!(registry.call("frobnicate", &context, &Vec::new(), &[]).is_err());
    }
}
