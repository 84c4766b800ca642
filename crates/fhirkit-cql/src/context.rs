//! The CQL evaluation context.
//!
//! Mutable, single-threaded state for one evaluation: the context resource,
//! alias scopes for queries and function operands, frozen parameters, and
//! the per-call memoization cache for definitions.

use crate::library::Library;
use fhirkit_fhirpath::FhirPathValue;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-evaluation mutable state.
pub struct CqlContext {
    /// The current context resource (e.g. a Patient), as a runtime value.
    pub resource: Option<FhirPathValue>,
    /// Scope stack for query aliases, let bindings, and function operands.
    alias_scopes: Vec<HashMap<String, FhirPathValue>>,
    /// Parameter values, frozen after initialization.
    pub parameters: HashMap<String, FhirPathValue>,
    /// The library definitions resolve against; tracked so `private`
    /// access can be enforced per caller.
    pub library: Arc<Library>,
    /// Element under sort-key evaluation; identifiers resolve against it
    /// first.
    pub sort_element: Option<FhirPathValue>,
    /// (library key, definition name, resource identity) → value.
    memo: HashMap<(String, String, String), FhirPathValue>,
}

impl CqlContext {
    pub fn new(library: Arc<Library>, resource: Option<FhirPathValue>) -> Self {
        Self {
            resource,
            alias_scopes: Vec::new(),
            parameters: HashMap::new(),
            library,
            sort_element: None,
            memo: HashMap::new(),
        }
    }

    /// Identity of the context resource, part of the memoization key.
    pub fn resource_identity(&self) -> String {
        match &self.resource {
            Some(value) => {
                let id = value
                    .to_json()
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                match (value.resource_type(), id) {
                    (Some(rt), Some(id)) => format!("{rt}/{id}"),
                    _ => String::new(),
                }
            }
            None => String::new(),
        }
    }

    pub fn push_scope(&mut self) {
        self.alias_scopes.push(HashMap::new());
    }

    pub fn pop_scope(&mut self) {
        self.alias_scopes.pop();
    }

    pub fn bind(&mut self, name: impl Into<String>, value: FhirPathValue) {
        if let Some(scope) = self.alias_scopes.last_mut() {
            scope.insert(name.into(), value);
        }
    }

    /// Innermost binding for a name.
    pub fn lookup(&self, name: &str) -> Option<&FhirPathValue> {
        self.alias_scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
    }

    pub fn memo_get(&self, library_key: &str, definition: &str) -> Option<&FhirPathValue> {
        self.memo.get(&(
            library_key.to_string(),
            definition.to_string(),
            self.resource_identity(),
        ))
    }

    pub fn memo_put(&mut self, library_key: &str, definition: &str, value: FhirPathValue) {
        self.memo.insert(
            (
                library_key.to_string(),
                definition.to_string(),
                self.resource_identity(),
            ),
            value,
        );
    }

    /// Clear memoized definition values (between top-level calls).
    pub fn clear_memo(&mut self) {
        self.memo.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_shadowing() {
        let mut context = CqlContext::new(Arc::new(Library::default()), None);
        context.push_scope();
        context.bind("X", FhirPathValue::Integer(1));
        context.push_scope();
        context.bind("X", FhirPathValue::Integer(2));
        assert_eq!(context.lookup("X"), Some(&FhirPathValue::Integer(2)));
        context.pop_scope();
        assert_eq!(context.lookup("X"), Some(&FhirPathValue::Integer(1)));
        context.pop_scope();
        assert_eq!(context.lookup("X"), None);
    }
}
