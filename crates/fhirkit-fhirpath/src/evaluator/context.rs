//! Evaluation context management for FHIRPath expressions.

use crate::model::FhirPathValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A trace log entry from the trace() function
#[derive(Debug, Clone)]
pub struct TraceLog {
    pub name: String,
    pub value: String,
}

/// Context for evaluating FHIRPath expressions.
///
/// Nested higher-order operations (`where`, `select`, `aggregate`, …) build
/// child contexts with `with_this` / `with_total`; the chain of child
/// contexts is the `$this`/`$index`/`$total` stack.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    /// The root resource being evaluated (`%resource`)
    pub root: FhirPathValue,
    /// The `$this` binding of the innermost iteration, if any
    pub this_value: Option<FhirPathValue>,
    /// The `$index` binding of the innermost iteration, if any
    pub index_value: Option<i64>,
    /// The `$total` binding inside `aggregate()`, if any
    pub total_value: Option<FhirPathValue>,
    /// External constants (`%name`)
    pub constants: HashMap<String, FhirPathValue>,
    /// Trace logs collected during evaluation
    pub trace_logs: Arc<Mutex<Vec<TraceLog>>>,
}

impl EvaluationContext {
    /// Create a new evaluation context over a root resource.
    pub fn new(root: FhirPathValue) -> Self {
        Self {
            root,
            this_value: None,
            index_value: None,
            total_value: None,
            constants: HashMap::new(),
            trace_logs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Context with no resource.
    pub fn empty() -> Self {
        Self::new(FhirPathValue::Null)
    }

    /// Add an external constant.
    pub fn add_constant(&mut self, name: impl Into<String>, value: FhirPathValue) {
        self.constants.insert(name.into(), value);
    }

    /// Child context binding `$this` and `$index` for one iteration step.
    pub fn with_this(&self, this_value: FhirPathValue, index: i64) -> Self {
        Self {
            this_value: Some(this_value),
            index_value: Some(index),
            ..self.clone()
        }
    }

    /// Child context binding `$total` for `aggregate()`.
    pub fn with_total(&self, total: FhirPathValue) -> Self {
        Self {
            total_value: Some(total),
            ..self.clone()
        }
    }

    /// Record a trace log entry.
    pub fn add_trace_log(&self, name: impl Into<String>, value: impl Into<String>) {
        self.trace_logs.lock().unwrap().push(TraceLog {
            name: name.into(),
            value: value.into(),
        });
    }

    /// All trace logs recorded so far.
    pub fn get_trace_logs(&self) -> Vec<TraceLog> {
        self.trace_logs.lock().unwrap().clone()
    }
}

impl Default for EvaluationContext {
    fn default() -> Self {
        Self::empty()
    }
}
