//! CQL-to-ELM translation.
//!
//! Maps a compiled library's parse trees onto the canonical ELM node
//! vocabulary. Symbol kinds (definition, parameter, alias, terminology
//! name) decide which reference node an identifier becomes, so the
//! translator carries a scope stack mirroring query and function-body
//! nesting.

use super::expression as elm;
use super::library as elm_lib;
use crate::library::{Library, LibraryManager};
use crate::parser::ast::{self, BinaryOperator, NullTest, UnaryOperator};
use fhirkit_fhirpath::DateTimePrecision;
use std::collections::HashSet;

const ELM_TYPES: &str = "{urn:hl7-org:elm-types:r1}";
const FHIR_NS: &str = "{http://hl7.org/fhir}";

/// Translates a compiled [`Library`] into an ELM document.
pub struct ElmTranslator<'a> {
    library: &'a Library,
    manager: Option<&'a LibraryManager>,
    /// Query alias scopes, innermost last.
    aliases: Vec<HashSet<String>>,
    /// Query let scopes.
    lets: Vec<HashSet<String>>,
    /// Function operand scopes.
    operands: Vec<HashSet<String>>,
    /// Inside a sort clause, loose identifiers become element properties.
    in_sort: bool,
}

impl<'a> ElmTranslator<'a> {
    pub fn new(library: &'a Library) -> Self {
        Self {
            library,
            manager: None,
            aliases: Vec::new(),
            lets: Vec::new(),
            operands: Vec::new(),
            in_sort: false,
        }
    }

    pub fn with_manager(library: &'a Library, manager: &'a LibraryManager) -> Self {
        Self {
            manager: Some(manager),
            ..Self::new(library)
        }
    }

    /// Translate the whole library.
    pub fn translate(&mut self) -> elm_lib::ElmDocument {
        let library = self.library;
        let mut out = elm_lib::ElmLibrary {
            identifier: Some(elm_lib::VersionedIdentifier {
                id: Some(library.identifier.name.clone()),
                system: None,
                version: library.identifier.version.clone(),
            }),
            schema_identifier: Some(elm_lib::VersionedIdentifier {
                id: Some("urn:hl7-org:elm".to_string()),
                system: None,
                version: Some("r1".to_string()),
            }),
            ..elm_lib::ElmLibrary::default()
        };

        if !library.usings.is_empty() {
            out.usings = Some(elm_lib::UsingDefs {
                def: library
                    .usings
                    .iter()
                    .map(|using| elm_lib::UsingDef {
                        local_identifier: Some(using.model_name.clone()),
                        uri: Some(model_uri(&using.model_name)),
                        version: using.version.clone(),
                    })
                    .collect(),
            });
        }

        if !library.includes.is_empty() {
            out.includes = Some(elm_lib::IncludeDefs {
                def: library
                    .includes
                    .iter()
                    .map(|(alias, include)| elm_lib::IncludeDef {
                        local_identifier: Some(alias.clone()),
                        path: Some(include.name.clone()),
                        version: include.version.clone(),
                    })
                    .collect(),
            });
        }

        if !library.parameters.is_empty() {
            out.parameters = Some(elm_lib::ParameterDefs {
                def: library
                    .parameters
                    .iter()
                    .map(|(name, info)| elm_lib::ParameterDef {
                        name: Some(name.clone()),
                        default_value: info
                            .default
                            .as_ref()
                            .map(|default| Box::new(self.expression(default))),
                    })
                    .collect(),
            });
        }

        if !library.codesystems.is_empty() {
            out.code_systems = Some(elm_lib::CodeSystemDefs {
                def: library
                    .codesystems
                    .iter()
                    .map(|(name, info)| elm_lib::CodeSystemDef {
                        name: Some(name.clone()),
                        id: Some(info.id.clone()),
                        version: info.version.clone(),
                    })
                    .collect(),
            });
        }

        if !library.valuesets.is_empty() {
            out.value_sets = Some(elm_lib::ValueSetDefs {
                def: library
                    .valuesets
                    .iter()
                    .map(|(name, info)| elm_lib::ValueSetDef {
                        name: Some(name.clone()),
                        id: Some(info.id.clone()),
                        version: info.version.clone(),
                    })
                    .collect(),
            });
        }

        if !library.codes.is_empty() {
            out.codes = Some(elm_lib::CodeDefs {
                def: library
                    .codes
                    .iter()
                    .map(|(name, code)| elm_lib::CodeDef {
                        name: Some(name.clone()),
                        id: Some(code.code.clone()),
                        display: code.display.clone(),
                        code_system: code.system.as_deref().map(|url| {
                            elm_lib::CodeSystemRefPlain {
                                name: self.codesystem_name_for(url),
                            }
                        }),
                    })
                    .collect(),
            });
        }

        if !library.concepts.is_empty() {
            out.concepts = Some(elm_lib::ConceptDefs {
                def: library
                    .concepts
                    .iter()
                    .map(|(name, concept)| elm_lib::ConceptDef {
                        name: Some(name.clone()),
                        display: concept.display.clone(),
                        code: concept
                            .codes
                            .iter()
                            .filter_map(|code| self.code_name_for(code))
                            .map(|name| elm_lib::CodeRefPlain { name: Some(name) })
                            .collect(),
                    })
                    .collect(),
            });
        }

        if let Some(context) = &library.context {
            out.contexts = Some(elm_lib::ContextDefs {
                def: vec![elm_lib::ContextDef {
                    name: Some(context.clone()),
                }],
            });
        }

        let mut defs = Vec::new();
        for (name, definition) in &library.definitions {
            defs.push(elm_lib::StatementDef::ExpressionDef(
                elm_lib::ExpressionDef {
                    name: Some(name.clone()),
                    context: definition.context.clone(),
                    access_level: Some(access_level(definition.access)),
                    expression: Some(Box::new(self.expression(&definition.expression))),
                },
            ));
        }
        for (name, overloads) in &library.functions {
            for overload in overloads {
                let operand_names: HashSet<String> = overload
                    .parameters
                    .iter()
                    .map(|p| p.name.clone())
                    .collect();
                self.operands.push(operand_names);
                let expression = overload
                    .body
                    .as_ref()
                    .map(|body| Box::new(self.expression(body)));
                self.operands.pop();
                defs.push(elm_lib::StatementDef::FunctionDef(elm_lib::FunctionDef {
                    name: Some(name.clone()),
                    context: None,
                    access_level: Some(access_level(overload.access)),
                    fluent: overload.fluent,
                    operand: overload
                        .parameters
                        .iter()
                        .map(|p| elm_lib::OperandDef {
                            name: Some(p.name.clone()),
                        })
                        .collect(),
                    expression,
                }));
            }
        }
        if !defs.is_empty() {
            out.statements = Some(elm_lib::StatementDefs { def: defs });
        }

        elm_lib::ElmDocument { library: out }
    }

    fn codesystem_name_for(&self, url: &str) -> Option<String> {
        self.library
            .codesystems
            .iter()
            .find(|(_, info)| info.id == url)
            .map(|(name, _)| name.clone())
    }

    fn code_name_for(&self, code: &fhirkit_fhirpath::Code) -> Option<String> {
        self.library
            .codes
            .iter()
            .find(|(_, candidate)| candidate.equals(code))
            .map(|(name, _)| name.clone())
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    pub fn expression(&mut self, expression: &ast::Expression) -> elm::ElmExpression {
        use ast::Expression as E;
        match expression {
            E::Literal(literal) => self.literal(literal),
            E::Identifier(name) => self.identifier(name),
            E::QualifiedIdentifier { qualifier, name } => self.qualified(qualifier, name),
            E::Unary { op, operand } => {
                let operand = Box::new(self.expression(operand));
                self.unary(*op, operand)
            }
            E::Binary {
                op,
                left,
                right,
                precision,
            } => self.binary(*op, left, right, *precision),
            E::Between { operand, low, high } => {
                // x between low and high: low <= x and x <= high
                let lower = elm::ElmExpression::GreaterOrEqual(elm::NaryExpression {
                    operand: vec![self.expression(operand), self.expression(low)],
                });
                let upper = elm::ElmExpression::LessOrEqual(elm::NaryExpression {
                    operand: vec![self.expression(operand), self.expression(high)],
                });
                elm::ElmExpression::And(elm::NaryExpression {
                    operand: vec![lower, upper],
                })
            }
            E::Within {
                left,
                quantity,
                right,
            } => {
                // A within Q of B: B - Q <= A <= B + Q
                let low = elm::ElmExpression::Subtract(elm::NaryExpression {
                    operand: vec![self.expression(right), self.expression(quantity)],
                });
                let high = elm::ElmExpression::Add(elm::NaryExpression {
                    operand: vec![self.expression(right), self.expression(quantity)],
                });
                let lower = elm::ElmExpression::SameOrAfter(elm::PrecisionBinary {
                    operand: vec![self.expression(left), low],
                    precision: None,
                });
                let upper = elm::ElmExpression::SameOrBefore(elm::PrecisionBinary {
                    operand: vec![self.expression(left), high],
                    precision: None,
                });
                elm::ElmExpression::And(elm::NaryExpression {
                    operand: vec![lower, upper],
                })
            }
            E::DateTimeComponent { precision, operand } => {
                elm::ElmExpression::DateTimeComponentFrom(elm::DateTimeComponentFrom {
                    operand: Some(Box::new(self.expression(operand))),
                    precision: Some(precision_name(*precision)),
                })
            }
            E::DurationBetween {
                precision,
                low,
                high,
                difference,
            } => {
                let node = elm::PrecisionBinary {
                    operand: vec![self.expression(low), self.expression(high)],
                    precision: Some(precision_name(*precision)),
                };
                if *difference {
                    elm::ElmExpression::DifferenceBetween(node)
                } else {
                    elm::ElmExpression::DurationBetween(node)
                }
            }
            E::If {
                condition,
                then_branch,
                else_branch,
            } => elm::ElmExpression::If(elm::IfExpr {
                condition: Some(Box::new(self.expression(condition))),
                then: Some(Box::new(self.expression(then_branch))),
                else_branch: Some(Box::new(self.expression(else_branch))),
            }),
            E::Case {
                comparand,
                items,
                else_branch,
            } => elm::ElmExpression::Case(elm::CaseExpr {
                comparand: comparand
                    .as_ref()
                    .map(|c| Box::new(self.expression(c))),
                case_item: items
                    .iter()
                    .map(|item| elm::CaseItem {
                        when: Some(Box::new(self.expression(&item.when))),
                        then: Some(Box::new(self.expression(&item.then))),
                    })
                    .collect(),
                else_branch: Some(Box::new(self.expression(else_branch))),
            }),
            E::FunctionCall {
                library,
                name,
                arguments,
            } => {
                let operands: Vec<elm::ElmExpression> =
                    arguments.iter().map(|a| self.expression(a)).collect();
                self.function(library.as_deref(), name, operands)
            }
            E::MethodCall {
                source,
                name,
                arguments,
            } => {
                let mut operands = vec![self.expression(source)];
                operands.extend(arguments.iter().map(|a| self.expression(a)));
                self.function(None, name, operands)
            }
            E::Member { source, name } => {
                // Alias members become scoped properties
                if let E::Identifier(identifier) = source.as_ref() {
                    if self.is_alias(identifier) {
                        return elm::ElmExpression::Property(elm::Property {
                            path: Some(name.clone()),
                            scope: Some(identifier.clone()),
                            source: None,
                        });
                    }
                }
                elm::ElmExpression::Property(elm::Property {
                    path: Some(name.clone()),
                    scope: None,
                    source: Some(Box::new(self.expression(source))),
                })
            }
            E::Index { source, index } => elm::ElmExpression::Indexer(elm::NaryExpression {
                operand: vec![self.expression(source), self.expression(index)],
            }),
            E::Is {
                operand,
                type_specifier,
                negated,
            } => {
                let is = elm::ElmExpression::Is(elm::IsExpr {
                    operand: Some(Box::new(self.expression(operand))),
                    is_type: type_specifier.simple_name().map(str::to_string),
                });
                if *negated {
                    not_node(is)
                } else {
                    is
                }
            }
            E::As {
                operand,
                type_specifier,
            } => elm::ElmExpression::As(elm::AsExpr {
                operand: Some(Box::new(self.expression(operand))),
                as_type: type_specifier.simple_name().map(str::to_string),
            }),
            E::NullTest {
                operand,
                test,
                negated,
            } => {
                let operand = elm::UnaryExpression {
                    operand: Some(Box::new(self.expression(operand))),
                };
                let node = match test {
                    NullTest::Null => elm::ElmExpression::IsNull(operand),
                    NullTest::True => elm::ElmExpression::IsTrue(operand),
                    NullTest::False => elm::ElmExpression::IsFalse(operand),
                };
                if *negated {
                    not_node(node)
                } else {
                    node
                }
            }
            E::Interval(selector) => elm::ElmExpression::Interval(elm::IntervalExpr {
                low: Some(Box::new(self.expression(&selector.low))),
                high: Some(Box::new(self.expression(&selector.high))),
                low_closed: selector.low_closed,
                high_closed: selector.high_closed,
            }),
            E::List(items) => elm::ElmExpression::List(elm::ListExpr {
                element: items.iter().map(|item| self.expression(item)).collect(),
            }),
            E::Tuple(entries) => elm::ElmExpression::Tuple(elm::TupleExpr {
                element: entries
                    .iter()
                    .map(|(name, value)| elm::TupleElement {
                        name: name.clone(),
                        value: Box::new(self.expression(value)),
                    })
                    .collect(),
            }),
            E::Query(query) => self.query(query),
            E::Retrieve(retrieve) => self.retrieve(retrieve),
        }
    }

    fn literal(&self, literal: &ast::Literal) -> elm::ElmExpression {
        let typed = |type_name: &str, value: String| {
            elm::ElmExpression::Literal(elm::Literal {
                value_type: Some(format!("{ELM_TYPES}{type_name}")),
                value: Some(value),
            })
        };
        match literal {
            ast::Literal::Null => elm::ElmExpression::Null(elm::Null::default()),
            ast::Literal::Boolean(b) => typed("Boolean", b.to_string()),
            ast::Literal::Integer(i) => typed("Integer", i.to_string()),
            ast::Literal::Long(i) => typed("Long", i.to_string()),
            ast::Literal::Decimal(d) => typed("Decimal", d.to_string()),
            ast::Literal::String(s) => typed("String", s.clone()),
            ast::Literal::Date(d) => typed("Date", d.to_string()),
            ast::Literal::DateTime(dt) => typed("DateTime", dt.to_string()),
            ast::Literal::Time(t) => typed("Time", t.to_string()),
            ast::Literal::Quantity { value, unit } => {
                elm::ElmExpression::Quantity(elm::QuantityExpr {
                    value: Some(value.to_string()),
                    unit: Some(unit.clone()),
                })
            }
            ast::Literal::Ratio {
                numerator,
                denominator,
            } => elm::ElmExpression::Ratio(elm::RatioExpr {
                numerator: Some(elm::QuantityExpr {
                    value: Some(numerator.0.to_string()),
                    unit: Some(numerator.1.clone()),
                }),
                denominator: Some(elm::QuantityExpr {
                    value: Some(denominator.0.to_string()),
                    unit: Some(denominator.1.clone()),
                }),
            }),
        }
    }

    fn is_alias(&self, name: &str) -> bool {
        self.aliases.iter().any(|scope| scope.contains(name))
    }

    fn is_let(&self, name: &str) -> bool {
        self.lets.iter().any(|scope| scope.contains(name))
    }

    fn is_operand(&self, name: &str) -> bool {
        self.operands.iter().any(|scope| scope.contains(name))
    }

    fn identifier(&self, name: &str) -> elm::ElmExpression {
        let named = || elm::NamedRef {
            name: Some(name.to_string()),
            library_name: None,
        };
        if self.is_alias(name) {
            return elm::ElmExpression::AliasRef(named());
        }
        if self.is_let(name) {
            return elm::ElmExpression::QueryLetRef(named());
        }
        if self.is_operand(name) {
            return elm::ElmExpression::OperandRef(named());
        }
        if self.library.definitions.contains_key(name) {
            return elm::ElmExpression::ExpressionRef(named());
        }
        if self.library.parameters.contains_key(name) {
            return elm::ElmExpression::ParameterRef(named());
        }
        if self.library.codes.contains_key(name) {
            return elm::ElmExpression::CodeRef(named());
        }
        if self.library.concepts.contains_key(name) {
            return elm::ElmExpression::ConceptRef(named());
        }
        if self.library.valuesets.contains_key(name) {
            return elm::ElmExpression::ValueSetRef(named());
        }
        if self.library.codesystems.contains_key(name) {
            return elm::ElmExpression::CodeSystemRef(named());
        }
        if self.in_sort {
            // Sort keys address the element being sorted
            return elm::ElmExpression::Property(elm::Property {
                path: Some(name.to_string()),
                scope: None,
                source: None,
            });
        }
        // Context references (e.g. Patient) and anything else resolve at
        // evaluation time
        elm::ElmExpression::ExpressionRef(named())
    }

    fn qualified(&mut self, qualifier: &str, name: &str) -> elm::ElmExpression {
        if let Some(include) = self.library.includes.get(qualifier) {
            let named = elm::NamedRef {
                name: Some(name.to_string()),
                library_name: Some(qualifier.to_string()),
            };
            if let Some(manager) = self.manager {
                if let Some(target) = manager.get(&include.name, include.version.as_deref()) {
                    if target.codes.contains_key(name) {
                        return elm::ElmExpression::CodeRef(named);
                    }
                    if target.concepts.contains_key(name) {
                        return elm::ElmExpression::ConceptRef(named);
                    }
                    if target.valuesets.contains_key(name) {
                        return elm::ElmExpression::ValueSetRef(named);
                    }
                }
            }
            return elm::ElmExpression::ExpressionRef(named);
        }
        // Not an include alias: property access on a resolved value
        let source = self.identifier(qualifier);
        if self.is_alias(qualifier) {
            return elm::ElmExpression::Property(elm::Property {
                path: Some(name.to_string()),
                scope: Some(qualifier.to_string()),
                source: None,
            });
        }
        elm::ElmExpression::Property(elm::Property {
            path: Some(name.to_string()),
            scope: None,
            source: Some(Box::new(source)),
        })
    }

    fn unary(&self, op: UnaryOperator, operand: Box<elm::ElmExpression>) -> elm::ElmExpression {
        let unary = elm::UnaryExpression {
            operand: Some(operand),
        };
        match op {
            UnaryOperator::Not => elm::ElmExpression::Not(unary),
            UnaryOperator::Negate => elm::ElmExpression::Negate(unary),
            UnaryOperator::Exists => elm::ElmExpression::Exists(unary),
            UnaryOperator::Distinct => elm::ElmExpression::Distinct(unary),
            UnaryOperator::Flatten => elm::ElmExpression::Flatten(unary),
            UnaryOperator::Singleton => elm::ElmExpression::SingletonFrom(unary),
            UnaryOperator::Start => elm::ElmExpression::Start(unary),
            UnaryOperator::End => elm::ElmExpression::End(unary),
            UnaryOperator::Width => elm::ElmExpression::Width(unary),
            UnaryOperator::PointFrom => elm::ElmExpression::PointFrom(unary),
            UnaryOperator::Predecessor => elm::ElmExpression::Predecessor(unary),
            UnaryOperator::Successor => elm::ElmExpression::Successor(unary),
        }
    }

    fn binary(
        &mut self,
        op: BinaryOperator,
        left: &ast::Expression,
        right: &ast::Expression,
        precision: Option<DateTimePrecision>,
    ) -> elm::ElmExpression {
        use BinaryOperator as B;

        // Value-set membership becomes InValueSet
        if op == B::In {
            if let Some(valueset) = self.valueset_ref_of(right) {
                return elm::ElmExpression::InValueSet(elm::InValueSet {
                    code: Some(Box::new(self.expression(left))),
                    valueset: Some(valueset),
                });
            }
        }

        let operands = vec![self.expression(left), self.expression(right)];
        let nary = elm::NaryExpression {
            operand: operands.clone(),
        };
        let timing = elm::PrecisionBinary {
            operand: operands,
            precision: precision.map(precision_name),
        };

        match op {
            B::Add => elm::ElmExpression::Add(nary),
            B::Subtract => elm::ElmExpression::Subtract(nary),
            B::Multiply => elm::ElmExpression::Multiply(nary),
            B::Divide => elm::ElmExpression::Divide(nary),
            B::TruncatedDivide => elm::ElmExpression::TruncatedDivide(nary),
            B::Modulo => elm::ElmExpression::Modulo(nary),
            B::Power => elm::ElmExpression::Power(nary),
            B::Concatenate => elm::ElmExpression::Concatenate(nary),
            B::Equal => elm::ElmExpression::Equal(nary),
            B::NotEqual => elm::ElmExpression::NotEqual(nary),
            B::Equivalent => elm::ElmExpression::Equivalent(nary),
            B::NotEquivalent => not_node(elm::ElmExpression::Equivalent(nary)),
            B::Less => elm::ElmExpression::Less(nary),
            B::LessOrEqual => elm::ElmExpression::LessOrEqual(nary),
            B::Greater => elm::ElmExpression::Greater(nary),
            B::GreaterOrEqual => elm::ElmExpression::GreaterOrEqual(nary),
            B::And => elm::ElmExpression::And(nary),
            B::Or => elm::ElmExpression::Or(nary),
            B::Xor => elm::ElmExpression::Xor(nary),
            B::Implies => elm::ElmExpression::Implies(nary),
            B::In => elm::ElmExpression::In(timing),
            B::Contains => elm::ElmExpression::Contains(timing),
            B::Union => elm::ElmExpression::Union(nary),
            B::Intersect => elm::ElmExpression::Intersect(nary),
            B::Except => elm::ElmExpression::Except(nary),
            B::Includes => elm::ElmExpression::Includes(timing),
            B::IncludedIn => elm::ElmExpression::IncludedIn(timing),
            B::ProperlyIncludes => elm::ElmExpression::ProperIncludes(timing),
            B::ProperlyIncludedIn => elm::ElmExpression::ProperIncludedIn(timing),
            B::Overlaps => elm::ElmExpression::Overlaps(timing),
            B::OverlapsBefore => elm::ElmExpression::OverlapsBefore(timing),
            B::OverlapsAfter => elm::ElmExpression::OverlapsAfter(timing),
            B::Meets => elm::ElmExpression::Meets(timing),
            B::MeetsBefore => elm::ElmExpression::MeetsBefore(timing),
            B::MeetsAfter => elm::ElmExpression::MeetsAfter(timing),
            B::Starts => elm::ElmExpression::Starts(timing),
            B::Ends => elm::ElmExpression::Ends(timing),
            B::Before => elm::ElmExpression::Before(timing),
            B::After => elm::ElmExpression::After(timing),
            B::SameAs => elm::ElmExpression::SameAs(timing),
            B::SameOrBefore => elm::ElmExpression::SameOrBefore(timing),
            B::SameOrAfter => elm::ElmExpression::SameOrAfter(timing),
        }
    }

    fn valueset_ref_of(&self, expression: &ast::Expression) -> Option<elm::NamedRef> {
        match expression {
            ast::Expression::Identifier(name)
                if self.library.valuesets.contains_key(name) =>
            {
                Some(elm::NamedRef {
                    name: Some(name.clone()),
                    library_name: None,
                })
            }
            ast::Expression::QualifiedIdentifier { qualifier, name } => {
                let include = self.library.includes.get(qualifier)?;
                let manager = self.manager?;
                let target = manager.get(&include.name, include.version.as_deref())?;
                if target.valuesets.contains_key(name) {
                    Some(elm::NamedRef {
                        name: Some(name.clone()),
                        library_name: Some(qualifier.clone()),
                    })
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn function(
        &self,
        library: Option<&str>,
        name: &str,
        mut operands: Vec<elm::ElmExpression>,
    ) -> elm::ElmExpression {
        // The list aggregates have dedicated node types
        if library.is_none()
            && operands.len() == 1
            && matches!(
                name,
                "Count" | "Sum" | "Avg" | "Average" | "Min" | "Max" | "First" | "Last" | "Exists"
            )
        {
            let source = Some(Box::new(operands.remove(0)));
            let aggregate = elm::AggregateExpression { source };
            return match name {
                "Count" => elm::ElmExpression::Count(aggregate),
                "Sum" => elm::ElmExpression::Sum(aggregate),
                "Avg" | "Average" => elm::ElmExpression::Avg(aggregate),
                "Min" => elm::ElmExpression::Min(aggregate),
                "Max" => elm::ElmExpression::Max(aggregate),
                "First" => elm::ElmExpression::First(aggregate),
                "Last" => elm::ElmExpression::Last(aggregate),
                _ => elm::ElmExpression::Exists(elm::UnaryExpression {
                    operand: aggregate.source,
                }),
            };
        }
        if library.is_none() && name == "Coalesce" {
            return elm::ElmExpression::Coalesce(elm::NaryExpression { operand: operands });
        }
        elm::ElmExpression::FunctionRef(elm::FunctionRef {
            name: Some(name.to_string()),
            library_name: library.map(str::to_string),
            operand: operands,
        })
    }

    fn query(&mut self, query: &ast::Query) -> elm::ElmExpression {
        let source: Vec<elm::AliasedQuerySource> = query
            .sources
            .iter()
            .map(|s| elm::AliasedQuerySource {
                alias: Some(s.alias.clone()),
                expression: Some(Box::new(self.expression(&s.expression))),
            })
            .collect();

        self.aliases
            .push(query.sources.iter().map(|s| s.alias.clone()).collect());
        self.lets.push(HashSet::new());

        let let_clause: Vec<elm::LetClause> = query
            .lets
            .iter()
            .map(|l| {
                let clause = elm::LetClause {
                    identifier: Some(l.identifier.clone()),
                    expression: Some(Box::new(self.expression(&l.expression))),
                };
                if let Some(scope) = self.lets.last_mut() {
                    scope.insert(l.identifier.clone());
                }
                clause
            })
            .collect();

        let where_clause = query
            .where_clause
            .as_ref()
            .map(|w| Box::new(self.expression(w)));

        let return_clause = query.return_clause.as_ref().map(|r| elm::ReturnClause {
            expression: Some(Box::new(self.expression(&r.expression))),
            distinct: r.distinct,
        });

        let aggregate_clause = query.aggregate_clause.as_ref().map(|a| {
            if let Some(scope) = self.lets.last_mut() {
                scope.insert(a.identifier.clone());
            }
            elm::AggregateClause {
                identifier: Some(a.identifier.clone()),
                starting: a.starting.as_ref().map(|s| Box::new(self.expression(s))),
                distinct: a.distinct,
                expression: Some(Box::new(self.expression(&a.expression))),
            }
        });

        let sort_clause = query.sort_clause.as_ref().map(|sort| {
            self.in_sort = true;
            let by = sort
                .items
                .iter()
                .map(|item| elm::SortByItem {
                    direction: Some(
                        match item.direction {
                            ast::SortDirection::Ascending => "asc",
                            ast::SortDirection::Descending => "desc",
                        }
                        .to_string(),
                    ),
                    expression: item
                        .expression
                        .as_ref()
                        .map(|e| Box::new(self.expression(e))),
                })
                .collect();
            self.in_sort = false;
            elm::SortClause { by }
        });

        self.lets.pop();
        self.aliases.pop();

        elm::ElmExpression::Query(elm::Query {
            source,
            let_clause,
            where_clause,
            return_clause,
            aggregate_clause,
            sort_clause,
        })
    }

    fn retrieve(&mut self, retrieve: &ast::Retrieve) -> elm::ElmExpression {
        let codes = retrieve
            .terminology
            .as_ref()
            .map(|t| Box::new(self.expression(t)));
        elm::ElmExpression::Retrieve(elm::Retrieve {
            data_type: Some(format!("{FHIR_NS}{}", retrieve.resource_type)),
            code_property: retrieve
                .code_path
                .clone()
                .or_else(|| codes.is_some().then(|| "code".to_string())),
            codes,
        })
    }
}

fn not_node(inner: elm::ElmExpression) -> elm::ElmExpression {
    elm::ElmExpression::Not(elm::UnaryExpression {
        operand: Some(Box::new(inner)),
    })
}

fn access_level(access: ast::AccessModifier) -> String {
    match access {
        ast::AccessModifier::Public => "Public".to_string(),
        ast::AccessModifier::Private => "Private".to_string(),
    }
}

fn precision_name(precision: DateTimePrecision) -> String {
    match precision {
        DateTimePrecision::Year => "Year",
        DateTimePrecision::Month => "Month",
        DateTimePrecision::Week => "Week",
        DateTimePrecision::Day => "Day",
        DateTimePrecision::Hour => "Hour",
        DateTimePrecision::Minute => "Minute",
        DateTimePrecision::Second => "Second",
        DateTimePrecision::Millisecond => "Millisecond",
    }
    .to_string()
}

/// Parse a precision string back into the enum (loader side).
pub fn parse_precision(name: &str) -> Option<DateTimePrecision> {
    match name {
        "Year" | "year" => Some(DateTimePrecision::Year),
        "Month" | "month" => Some(DateTimePrecision::Month),
        "Week" | "week" => Some(DateTimePrecision::Week),
        "Day" | "day" => Some(DateTimePrecision::Day),
        "Hour" | "hour" => Some(DateTimePrecision::Hour),
        "Minute" | "minute" => Some(DateTimePrecision::Minute),
        "Second" | "second" => Some(DateTimePrecision::Second),
        "Millisecond" | "millisecond" => Some(DateTimePrecision::Millisecond),
        _ => None,
    }
}

fn model_uri(model: &str) -> String {
    match model {
        "FHIR" => "http://hl7.org/fhir".to_string(),
        "System" => "urn:hl7-org:elm-types:r1".to_string(),
        "QDM" => "urn:healthit-gov:qdm:v5_6".to_string(),
        other => other.to_string(),
    }
}
