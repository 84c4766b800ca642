//! CQL parser.
//!
//! nom parser combinators over the CQL 1.5 grammar, organized as:
//!
//! - [`lexer`]: tokenization utilities (keywords, identifiers, literals,
//!   whitespace and comments)
//! - [`ast`]: the CQL abstract syntax tree (distinct from the ELM output)
//! - [`expression`]: the operator-precedence expression grammar
//! - [`statement`]: library structure and definitions

pub mod ast;
pub mod expression;
pub mod lexer;
pub mod statement;

use crate::error::{CqlError, Result};

/// CQL parser facade.
#[derive(Debug, Clone, Default)]
pub struct CqlParser;

impl CqlParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse CQL source into a Library AST.
    pub fn parse(&self, source: &str) -> Result<ast::Library> {
        match statement::parse_library(source) {
            Ok((remaining, library)) => {
                let remaining_trimmed = remaining.trim();
                if remaining_trimmed.is_empty() {
                    Ok(library)
                } else {
                    let (line, column) = lexer::position_of(source, remaining);
                    Err(CqlError::parse_error(
                        format!(
                            "unexpected input: {}",
                            remaining_trimmed.lines().next().unwrap_or_default()
                        ),
                        line,
                        column,
                    ))
                }
            }
            Err(e) => Err(CqlError::parse_error(format!("{e}"), 1, 1)),
        }
    }

    /// Parse a single expression (ad-hoc evaluation and tests).
    pub fn parse_expression(&self, source: &str) -> Result<ast::Expression> {
        match expression::expression(source) {
            Ok((remaining, expr)) => {
                let remaining_trimmed = remaining.trim();
                if remaining_trimmed.is_empty() {
                    Ok(expr)
                } else {
                    let (line, column) = lexer::position_of(source, remaining);
                    Err(CqlError::parse_error(
                        format!("unexpected input: {remaining_trimmed}"),
                        line,
                        column,
                    ))
                }
            }
            Err(e) => Err(CqlError::parse_error(format!("{e}"), 1, 1)),
        }
    }
}
