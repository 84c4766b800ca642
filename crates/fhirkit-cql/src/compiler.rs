//! CQL compiler: parse tree to frozen [`Library`].
//!
//! Compilation is a single pass over the parse tree. Terminology
//! declarations are resolved to values immediately; includes are resolved
//! against the library manager; duplicate names, unresolved references, and
//! include cycles are compile errors.

use crate::error::{CqlError, Result};
use crate::library::{
    CodeSystemInfo, Definition, FunctionInfo, IncludeRef, Library, LibraryIdentifier,
    LibraryManager, ParameterInfo, ValueSetInfo,
};
use crate::parser::{ast, CqlParser};
use fhirkit_fhirpath::{Code, Concept};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Compiles CQL source into libraries registered in a shared manager.
pub struct CqlCompiler {
    parser: CqlParser,
    manager: Arc<RwLock<LibraryManager>>,
}

impl CqlCompiler {
    pub fn new() -> Self {
        Self::with_manager(Arc::new(RwLock::new(LibraryManager::new())))
    }

    pub fn with_manager(manager: Arc<RwLock<LibraryManager>>) -> Self {
        Self {
            parser: CqlParser::new(),
            manager,
        }
    }

    pub fn manager(&self) -> Arc<RwLock<LibraryManager>> {
        self.manager.clone()
    }

    /// Compile source and register the resulting library.
    pub fn compile(&self, source: &str) -> Result<Arc<Library>> {
        let parsed = self.parser.parse(source)?;
        let library = Arc::new(self.build(parsed)?);
        debug!(library = %library.identifier.key(), "compiled");
        self.manager.write().unwrap().add(library.clone());
        Ok(library)
    }

    fn build(&self, parsed: ast::Library) -> Result<Library> {
        let mut library = Library {
            identifier: match parsed.identifier {
                Some(identifier) => LibraryIdentifier {
                    name: identifier.name,
                    version: identifier.version,
                },
                None => LibraryIdentifier {
                    name: "Anonymous".to_string(),
                    version: None,
                },
            },
            usings: parsed.usings,
            ..Library::default()
        };

        for include in parsed.includes {
            let alias = include
                .alias
                .clone()
                .unwrap_or_else(|| last_segment(&include.path).to_string());
            let manager = self.manager.read().unwrap();
            if !manager.contains(&include.path, include.version.as_deref()) {
                return Err(CqlError::compile_error(format!(
                    "included library not found: {}{}",
                    include.path,
                    include
                        .version
                        .as_deref()
                        .map(|v| format!(" version '{v}'"))
                        .unwrap_or_default()
                )));
            }
            drop(manager);
            if library.includes.contains_key(&alias) {
                return Err(CqlError::compile_error(format!(
                    "duplicate include alias: {alias}"
                )));
            }
            library.includes.insert(
                alias,
                IncludeRef {
                    name: include.path,
                    version: include.version,
                },
            );
        }
        self.check_include_cycle(&library)?;

        for codesystem in parsed.codesystems {
            if library
                .codesystems
                .insert(
                    codesystem.name.clone(),
                    CodeSystemInfo {
                        id: codesystem.id,
                        version: codesystem.version,
                    },
                )
                .is_some()
            {
                return Err(CqlError::compile_error(format!(
                    "duplicate codesystem: {}",
                    codesystem.name
                )));
            }
        }

        for valueset in parsed.valuesets {
            if library
                .valuesets
                .insert(
                    valueset.name.clone(),
                    ValueSetInfo {
                        id: valueset.id,
                        version: valueset.version,
                    },
                )
                .is_some()
            {
                return Err(CqlError::compile_error(format!(
                    "duplicate valueset: {}",
                    valueset.name
                )));
            }
        }

        // Codes resolve against a declared codesystem immediately
        for code in parsed.codes {
            let Some(codesystem) = library.codesystems.get(&code.codesystem) else {
                return Err(CqlError::compile_error(format!(
                    "code '{}' references unknown codesystem '{}'",
                    code.name, code.codesystem
                )));
            };
            let resolved = Code {
                code: code.code,
                system: Some(codesystem.id.clone()),
                version: codesystem.version.clone(),
                display: code.display,
            };
            if library.codes.insert(code.name.clone(), resolved).is_some() {
                return Err(CqlError::compile_error(format!(
                    "duplicate code: {}",
                    code.name
                )));
            }
        }

        for concept in parsed.concepts {
            let mut codes = Vec::with_capacity(concept.codes.len());
            for code_name in &concept.codes {
                let Some(code) = library.codes.get(code_name) else {
                    return Err(CqlError::compile_error(format!(
                        "concept '{}' references unknown code '{code_name}'",
                        concept.name
                    )));
                };
                codes.push(code.clone());
            }
            let resolved = Concept::new(codes, concept.display);
            if library
                .concepts
                .insert(concept.name.clone(), resolved)
                .is_some()
            {
                return Err(CqlError::compile_error(format!(
                    "duplicate concept: {}",
                    concept.name
                )));
            }
        }

        for parameter in parsed.parameters {
            if library
                .parameters
                .insert(
                    parameter.name.clone(),
                    ParameterInfo {
                        type_specifier: parameter.type_specifier,
                        default: parameter.default,
                    },
                )
                .is_some()
            {
                return Err(CqlError::compile_error(format!(
                    "duplicate parameter: {}",
                    parameter.name
                )));
            }
        }

        for statement in parsed.statements {
            match statement {
                ast::Statement::ExpressionDef(def) => {
                    if library.definitions.contains_key(&def.name)
                        || library.functions.contains_key(&def.name)
                    {
                        return Err(CqlError::compile_error(format!(
                            "duplicate definition: {}",
                            def.name
                        )));
                    }
                    library.definitions.insert(
                        def.name,
                        Definition {
                            expression: def.expression,
                            context: def.context,
                            access: def.access,
                        },
                    );
                }
                ast::Statement::FunctionDef(def) => {
                    if library.definitions.contains_key(&def.name) {
                        return Err(CqlError::compile_error(format!(
                            "duplicate definition: {}",
                            def.name
                        )));
                    }
                    let overloads = library.functions.entry(def.name.clone()).or_default();
                    if overloads
                        .iter()
                        .any(|f| f.parameters.len() == def.parameters.len())
                    {
                        return Err(CqlError::compile_error(format!(
                            "duplicate function overload: {} with {} parameters",
                            def.name,
                            def.parameters.len()
                        )));
                    }
                    overloads.push(FunctionInfo {
                        parameters: def.parameters,
                        body: def.body,
                        fluent: def.fluent,
                        access: def.access,
                    });
                }
            }
        }

        library.context = parsed.contexts.last().map(|c| c.name.clone());
        Ok(library)
    }

    /// Includes must form a DAG.
    fn check_include_cycle(&self, library: &Library) -> Result<()> {
        let manager = self.manager.read().unwrap();
        let mut visiting: Vec<String> = vec![library.identifier.name.clone()];
        let mut visited: HashSet<String> = HashSet::new();

        fn visit(
            manager: &LibraryManager,
            name: &str,
            version: Option<&str>,
            visiting: &mut Vec<String>,
            visited: &mut HashSet<String>,
        ) -> Result<()> {
            if visiting.iter().any(|n| n == name) {
                return Err(CqlError::compile_error(format!(
                    "include cycle detected involving library '{name}'"
                )));
            }
            if !visited.insert(name.to_string()) {
                return Ok(());
            }
            let Some(target) = manager.get(name, version) else {
                return Ok(());
            };
            visiting.push(name.to_string());
            for include in target.includes.values() {
                visit(
                    manager,
                    &include.name,
                    include.version.as_deref(),
                    visiting,
                    visited,
                )?;
            }
            visiting.pop();
            Ok(())
        }

        for include in library.includes.values() {
            visit(
                &manager,
                &include.name,
                include.version.as_deref(),
                &mut visiting,
                &mut visited,
            )?;
        }
        Ok(())
    }
}

impl Default for CqlCompiler {
    fn default() -> Self {
        Self::new()
    }
}

fn last_segment(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_populates_library() {
        let compiler = CqlCompiler::new();
        let library = compiler
            .compile(
                r#"
                library Example version '1.0'
                codesystem "CS": 'http://example.org/cs'
                code "C1": 'c-1' from "CS" display 'First'
                concept "Group": { "C1" }
                parameter Threshold Integer default 10
                define A: 1
                define function F(x Integer): x + 1
                "#,
            )
            .unwrap();

        assert_eq!(library.identifier.name, "Example");
        assert_eq!(
            library.codes.get("C1").unwrap().system.as_deref(),
            Some("http://example.org/cs")
        );
        assert_eq!(library.concepts.get("Group").unwrap().codes.len(), 1);
        assert!(library.parameters.contains_key("Threshold"));
        assert!(library.definitions.contains_key("A"));
        assert!(library.function("F", 1).is_some());
    }

    #[test]
    fn test_duplicate_definition_rejected() {
        let compiler = CqlCompiler::new();
        let err = compiler
            .compile("library D define A: 1 define A: 2")
            .expect_err("duplicate should fail");
        assert!(matches!(err, CqlError::CompileError(_)));
    }

    #[test]
    fn test_unknown_codesystem_rejected() {
        let compiler = CqlCompiler::new();
        let err = compiler
            .compile("library D code \"X\": 'x' from \"Nope\"")
            .expect_err("unknown codesystem should fail");
        assert!(matches!(err, CqlError::CompileError(_)));
    }

    #[test]
    fn test_missing_include_rejected() {
        let compiler = CqlCompiler::new();
        let err = compiler
            .compile("library D include Missing called M define X: 1")
            .expect_err("missing include should fail");
        assert!(matches!(err, CqlError::CompileError(_)));
    }

    #[test]
    fn test_include_resolves_through_manager() {
        let compiler = CqlCompiler::new();
        compiler
            .compile("library Common version '1.0' define Shared: 42")
            .unwrap();
        let library = compiler
            .compile("library Main include Common version '1.0' called Cmn define X: Cmn.Shared")
            .unwrap();
        assert_eq!(library.includes.get("Cmn").unwrap().name, "Common");
    }

    #[test]
    fn test_function_overloads_by_arity() {
        let compiler = CqlCompiler::new();
        let library = compiler
            .compile(
                r#"
                library O
                define function F(x Integer): x
                define function F(x Integer, y Integer): x + y
                "#,
            )
            .unwrap();
        assert!(library.function("F", 1).is_some());
        assert!(library.function("F", 2).is_some());
        assert!(library.function("F", 3).is_none());
    }
}
