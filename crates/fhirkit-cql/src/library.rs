//! The compiled library model and the library manager.
//!
//! A [`Library`] is the frozen result of compiling CQL source: terminology
//! declarations are resolved to values, definitions and function overloads
//! are indexed by name in declaration order, and includes are reduced to
//! alias → (name, version) references. Libraries are immutable after
//! compilation and safe to share.

use crate::parser::ast;
use fhirkit_fhirpath::{Code, Concept};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Library name + optional version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct LibraryIdentifier {
    pub name: String,
    pub version: Option<String>,
}

impl LibraryIdentifier {
    pub fn key(&self) -> String {
        match &self.version {
            Some(version) => format!("{}|{version}", self.name),
            None => self.name.clone(),
        }
    }
}

/// Reference to an included library.
#[derive(Debug, Clone, PartialEq)]
pub struct IncludeRef {
    pub name: String,
    pub version: Option<String>,
}

/// A code system declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeSystemInfo {
    pub id: String,
    pub version: Option<String>,
}

/// A value set declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueSetInfo {
    pub id: String,
    pub version: Option<String>,
}

/// A parameter declaration; the default stays unevaluated until use.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterInfo {
    pub type_specifier: Option<ast::TypeSpecifier>,
    pub default: Option<ast::Expression>,
}

/// A named expression definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub expression: ast::Expression,
    pub context: Option<String>,
    pub access: ast::AccessModifier,
}

/// One function overload.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionInfo {
    pub parameters: Vec<ast::FunctionParameter>,
    pub body: Option<ast::Expression>,
    pub fluent: bool,
    pub access: ast::AccessModifier,
}

/// An immutable compiled library.
#[derive(Debug, Clone, Default)]
pub struct Library {
    pub identifier: LibraryIdentifier,
    pub usings: Vec<ast::UsingDef>,
    /// alias → included library reference
    pub includes: IndexMap<String, IncludeRef>,
    pub parameters: IndexMap<String, ParameterInfo>,
    pub codesystems: IndexMap<String, CodeSystemInfo>,
    pub valuesets: IndexMap<String, ValueSetInfo>,
    pub codes: IndexMap<String, Code>,
    pub concepts: IndexMap<String, Concept>,
    pub definitions: IndexMap<String, Definition>,
    /// name → overloads in declaration order
    pub functions: IndexMap<String, Vec<FunctionInfo>>,
    /// The context in effect at the end of the library (e.g. `Patient`)
    pub context: Option<String>,
}

impl Library {
    /// Look up a function overload by name and arity.
    pub fn function(&self, name: &str, arity: usize) -> Option<&FunctionInfo> {
        self.functions
            .get(name)?
            .iter()
            .find(|f| f.parameters.len() == arity)
    }
}

/// Holds compiled libraries keyed by name and version.
///
/// `get` without a version returns the most recently added version of the
/// name.
#[derive(Debug, Default)]
pub struct LibraryManager {
    by_key: HashMap<String, Arc<Library>>,
    latest: HashMap<String, Arc<Library>>,
}

impl LibraryManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, library: Arc<Library>) {
        self.by_key
            .insert(library.identifier.key(), library.clone());
        self.latest
            .insert(library.identifier.name.clone(), library);
    }

    pub fn get(&self, name: &str, version: Option<&str>) -> Option<Arc<Library>> {
        match version {
            Some(version) => self.by_key.get(&format!("{name}|{version}")).cloned(),
            None => self.latest.get(name).cloned(),
        }
    }

    pub fn contains(&self, name: &str, version: Option<&str>) -> bool {
        self.get(name, version).is_some()
    }

    /// All libraries, for diagnostics.
    pub fn libraries(&self) -> Vec<Arc<Library>> {
        self.latest.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library(name: &str, version: Option<&str>) -> Arc<Library> {
        Arc::new(Library {
            identifier: LibraryIdentifier {
                name: name.to_string(),
                version: version.map(str::to_string),
            },
            ..Library::default()
        })
    }

    #[test]
    fn test_manager_versioning() {
        let mut manager = LibraryManager::new();
        manager.add(library("Common", Some("1.0")));
        manager.add(library("Common", Some("2.0")));

        assert_eq!(
            manager
                .get("Common", Some("1.0"))
                .unwrap()
                .identifier
                .version
                .as_deref(),
            Some("1.0")
        );
        // unversioned lookup returns the most recently added
        assert_eq!(
            manager
                .get("Common", None)
                .unwrap()
                .identifier
                .version
                .as_deref(),
            Some("2.0")
        );
        assert!(manager.get("Missing", None).is_none());
    }
}
