//! High-level entry point combining the parser, a parse cache, and the
//! evaluator.

use crate::ast::FhirPathExpression;
use crate::error::{FhirPathError, FhirPathResult};
use crate::evaluator::{EvaluationContext, FhirPathEvaluator};
use crate::model::{Collection, FhirPathValue};
use crate::parser::FhirPathParser;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A FHIRPath engine with a per-instance parse cache.
///
/// Repeated evaluation of the same expression source does not re-parse.
/// Hosts that want cross-evaluation caching share one `FhirPath` instance;
/// there is no process-wide cache.
pub struct FhirPath {
    parser: FhirPathParser,
    evaluator: FhirPathEvaluator,
    cache: Mutex<HashMap<String, Arc<FhirPathExpression>>>,
}

impl FhirPath {
    pub fn new() -> Self {
        Self {
            parser: FhirPathParser::new(),
            evaluator: FhirPathEvaluator::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying evaluator (shared registry and unit converter).
    pub fn evaluator(&self) -> &FhirPathEvaluator {
        &self.evaluator
    }

    /// Parse an expression, consulting the cache first.
    pub fn parse(&self, expression: &str) -> FhirPathResult<Arc<FhirPathExpression>> {
        if let Some(cached) = self.cache.lock().unwrap().get(expression) {
            return Ok(cached.clone());
        }
        let parsed = Arc::new(self.parser.parse(expression)?);
        self.cache
            .lock()
            .unwrap()
            .insert(expression.to_string(), parsed.clone());
        Ok(parsed)
    }

    /// Clear the expression parse cache.
    pub fn clear_cache(&self) {
        self.cache.lock().unwrap().clear();
    }

    /// Evaluate an expression against an optional focus resource.
    pub fn evaluate(
        &self,
        expression: &str,
        resource: Option<&Value>,
    ) -> FhirPathResult<Collection> {
        let (input, context) = match resource {
            Some(resource) => {
                let value = FhirPathValue::from_json(resource);
                let input = value.clone().into_collection();
                (input, EvaluationContext::new(value))
            }
            None => (Vec::new(), EvaluationContext::empty()),
        };
        self.evaluate_in(expression, &input, &context)
    }

    /// Evaluate an expression against an explicit input collection and
    /// context.
    pub fn evaluate_in(
        &self,
        expression: &str,
        input: &Collection,
        context: &EvaluationContext,
    ) -> FhirPathResult<Collection> {
        let parsed = self.parse(expression)?;
        self.evaluator.evaluate(&parsed, input, context)
    }

    /// Boolean coercion of an evaluation: empty is `None`, a single boolean
    /// is itself, any other non-empty result is `true`.
    pub fn evaluate_boolean(
        &self,
        expression: &str,
        resource: Option<&Value>,
    ) -> FhirPathResult<Option<bool>> {
        let result = self.evaluate(expression, resource)?;
        Ok(crate::evaluator::operations::ComparisonEvaluator::to_boolean(&result))
    }

    /// Expect at most one result; more than one is an error.
    pub fn evaluate_single(
        &self,
        expression: &str,
        resource: Option<&Value>,
    ) -> FhirPathResult<FhirPathValue> {
        let mut result = self.evaluate(expression, resource)?;
        match result.len() {
            0 => Ok(FhirPathValue::Null),
            1 => Ok(result.remove(0)),
            n => Err(FhirPathError::evaluation_error(format!(
                "expected a single result, got {n} elements"
            ))),
        }
    }

    /// Constraint check: true iff the expression evaluates to true.
    pub fn check(&self, expression: &str, resource: Option<&Value>) -> FhirPathResult<bool> {
        Ok(self.evaluate_boolean(expression, resource)? == Some(true))
    }
}

impl Default for FhirPath {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_facade_coercions() {
        let fhirpath = FhirPath::new();
        let patient = json!({"resourceType": "Patient", "active": true, "name": [{"given": ["A", "B"]}]});

        assert_eq!(
            fhirpath.evaluate_boolean("active", Some(&patient)).unwrap(),
            Some(true)
        );
        assert_eq!(
            fhirpath.evaluate_boolean("deceased", Some(&patient)).unwrap(),
            None
        );
        assert!(fhirpath.check("name.given.count() = 2", Some(&patient)).unwrap());
        assert!(fhirpath.evaluate_single("name.given", Some(&patient)).is_err());
    }

    #[test]
    fn test_parse_cache_reuse() {
        let fhirpath = FhirPath::new();
        let first = fhirpath.parse("Patient.name.given").unwrap();
        let second = fhirpath.parse("Patient.name.given").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        fhirpath.clear_cache();
        let third = fhirpath.parse("Patient.name.given").unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(*first, *third);
    }
}
