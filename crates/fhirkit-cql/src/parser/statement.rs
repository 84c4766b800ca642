//! CQL statement and library-structure parser.

use super::ast::*;
use super::expression::{expression, parse_type_specifier};
use super::lexer::{
    any_identifier, keyword, skip_ws_and_comments, string_literal, unreserved_identifier, ws,
};
use nom::{
    branch::alt,
    character::complete::char,
    combinator::{map, opt, value},
    multi::{many0, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, terminated},
    IResult,
};

/// Parse a complete library.
pub fn parse_library(input: &str) -> IResult<&str, Library> {
    let (input, identifier) = opt(parse_library_identifier)(input)?;
    let mut library = Library {
        identifier,
        ..Library::default()
    };

    let (input, items) = many0(parse_library_item)(input)?;
    let mut current_context: Option<String> = None;
    for item in items {
        match item {
            LibraryItem::Using(def) => library.usings.push(def),
            LibraryItem::Include(def) => library.includes.push(def),
            LibraryItem::CodeSystem(def) => library.codesystems.push(def),
            LibraryItem::ValueSet(def) => library.valuesets.push(def),
            LibraryItem::Code(def) => library.codes.push(def),
            LibraryItem::Concept(def) => library.concepts.push(def),
            LibraryItem::Parameter(def) => library.parameters.push(def),
            LibraryItem::Context(def) => {
                current_context = Some(def.name.clone());
                library.contexts.push(def);
            }
            LibraryItem::Expression(mut def) => {
                def.context = current_context.clone();
                library.statements.push(Statement::ExpressionDef(def));
            }
            LibraryItem::Function(mut def) => {
                def.context = current_context.clone();
                library.statements.push(Statement::FunctionDef(def));
            }
        }
    }
    let (input, _) = skip_ws_and_comments(input)?;
    Ok((input, library))
}

enum LibraryItem {
    Using(UsingDef),
    Include(IncludeDef),
    CodeSystem(CodeSystemDef),
    ValueSet(ValueSetDef),
    Code(CodeDef),
    Concept(ConceptDef),
    Parameter(ParameterDef),
    Context(ContextDef),
    Expression(ExpressionDef),
    Function(FunctionDef),
}

fn parse_library_item(input: &str) -> IResult<&str, LibraryItem> {
    let (input, _) = skip_ws_and_comments(input)?;
    alt((
        map(parse_using_def, LibraryItem::Using),
        map(parse_include_def, LibraryItem::Include),
        map(parse_codesystem_def, LibraryItem::CodeSystem),
        map(parse_valueset_def, LibraryItem::ValueSet),
        map(parse_code_def, LibraryItem::Code),
        map(parse_concept_def, LibraryItem::Concept),
        map(parse_parameter_def, LibraryItem::Parameter),
        map(parse_context_def, LibraryItem::Context),
        map(parse_function_def, LibraryItem::Function),
        map(parse_expression_def, LibraryItem::Expression),
    ))(input)
}

/// `library Name version '1.0.0'`
pub fn parse_library_identifier(input: &str) -> IResult<&str, LibraryIdentifier> {
    let (input, _) = skip_ws_and_comments(input)?;
    let (input, _) = keyword("library")(input)?;
    let (input, _) = skip_ws_and_comments(input)?;
    let (input, name) = parse_qualified_name(input)?;
    let (input, version) = opt(preceded(ws(keyword("version")), string_literal))(input)?;
    Ok((input, LibraryIdentifier { name, version }))
}

fn parse_qualified_name(input: &str) -> IResult<&str, String> {
    let (input, parts) = separated_list1(char('.'), any_identifier)(input)?;
    Ok((input, parts.join(".")))
}

/// `using FHIR version '4.0.1'`
pub fn parse_using_def(input: &str) -> IResult<&str, UsingDef> {
    let (input, _) = keyword("using")(input)?;
    let (input, _) = skip_ws_and_comments(input)?;
    let (input, model_name) = any_identifier(input)?;
    let (input, version) = opt(preceded(ws(keyword("version")), string_literal))(input)?;
    Ok((
        input,
        UsingDef {
            model_name,
            version,
        },
    ))
}

/// `include Common version '1.0' called Cmn`
pub fn parse_include_def(input: &str) -> IResult<&str, IncludeDef> {
    let (input, _) = keyword("include")(input)?;
    let (input, _) = skip_ws_and_comments(input)?;
    let (input, path) = parse_qualified_name(input)?;
    let (input, version) = opt(preceded(ws(keyword("version")), string_literal))(input)?;
    let (input, alias) = opt(preceded(ws(keyword("called")), any_identifier))(input)?;
    Ok((
        input,
        IncludeDef {
            path,
            version,
            alias,
        },
    ))
}

fn parse_access_modifier(input: &str) -> IResult<&str, AccessModifier> {
    map(
        opt(terminated(
            alt((
                value(AccessModifier::Public, keyword("public")),
                value(AccessModifier::Private, keyword("private")),
            )),
            skip_ws_and_comments,
        )),
        Option::unwrap_or_default,
    )(input)
}

/// `codesystem "SNOMED": 'http://snomed.info/sct' version '...'`
pub fn parse_codesystem_def(input: &str) -> IResult<&str, CodeSystemDef> {
    let (input, access) = parse_access_modifier(input)?;
    let (input, _) = keyword("codesystem")(input)?;
    let (input, _) = skip_ws_and_comments(input)?;
    let (input, name) = any_identifier(input)?;
    let (input, _) = ws(char(':'))(input)?;
    let (input, id) = string_literal(input)?;
    let (input, version) = opt(preceded(ws(keyword("version")), string_literal))(input)?;
    Ok((
        input,
        CodeSystemDef {
            name,
            id,
            version,
            access,
        },
    ))
}

/// `valueset "Diabetes": 'http://...' version '...' codesystems { "A", "B" }`
pub fn parse_valueset_def(input: &str) -> IResult<&str, ValueSetDef> {
    let (input, access) = parse_access_modifier(input)?;
    let (input, _) = keyword("valueset")(input)?;
    let (input, _) = skip_ws_and_comments(input)?;
    let (input, name) = any_identifier(input)?;
    let (input, _) = ws(char(':'))(input)?;
    let (input, id) = string_literal(input)?;
    let (input, version) = opt(preceded(ws(keyword("version")), string_literal))(input)?;
    let (input, codesystems) = opt(preceded(
        ws(keyword("codesystems")),
        delimited(
            ws(char('{')),
            separated_list0(ws(char(',')), any_identifier),
            ws(char('}')),
        ),
    ))(input)?;
    Ok((
        input,
        ValueSetDef {
            name,
            id,
            version,
            codesystems: codesystems.unwrap_or_default(),
            access,
        },
    ))
}

/// `code "T2D": '44054006' from "SNOMED" display 'Type 2 diabetes'`
pub fn parse_code_def(input: &str) -> IResult<&str, CodeDef> {
    let (input, access) = parse_access_modifier(input)?;
    let (input, _) = keyword("code")(input)?;
    let (input, _) = skip_ws_and_comments(input)?;
    let (input, name) = any_identifier(input)?;
    let (input, _) = ws(char(':'))(input)?;
    let (input, code) = string_literal(input)?;
    let (input, _) = ws(keyword("from"))(input)?;
    let (input, codesystem) = any_identifier(input)?;
    let (input, display) = opt(preceded(ws(keyword("display")), string_literal))(input)?;
    Ok((
        input,
        CodeDef {
            name,
            code,
            codesystem,
            display,
            access,
        },
    ))
}

/// `concept "Diabetes": { "T2D", "T1D" } display 'Diabetes'`
pub fn parse_concept_def(input: &str) -> IResult<&str, ConceptDef> {
    let (input, access) = parse_access_modifier(input)?;
    let (input, _) = keyword("concept")(input)?;
    let (input, _) = skip_ws_and_comments(input)?;
    let (input, name) = any_identifier(input)?;
    let (input, _) = ws(char(':'))(input)?;
    let (input, codes) = delimited(
        ws(char('{')),
        separated_list0(ws(char(',')), any_identifier),
        ws(char('}')),
    )(input)?;
    let (input, display) = opt(preceded(ws(keyword("display")), string_literal))(input)?;
    Ok((
        input,
        ConceptDef {
            name,
            codes,
            display,
            access,
        },
    ))
}

/// `parameter MeasurementPeriod Interval<Date> default Interval[...]`
pub fn parse_parameter_def(input: &str) -> IResult<&str, ParameterDef> {
    let (input, access) = parse_access_modifier(input)?;
    let (input, _) = keyword("parameter")(input)?;
    let (input, _) = skip_ws_and_comments(input)?;
    let (input, name) = any_identifier(input)?;
    let (input, type_specifier) = opt(ws(parse_type_specifier))(input)?;
    let (input, default) = opt(preceded(ws(keyword("default")), expression))(input)?;
    Ok((
        input,
        ParameterDef {
            name,
            type_specifier,
            default,
            access,
        },
    ))
}

/// `context Patient`
pub fn parse_context_def(input: &str) -> IResult<&str, ContextDef> {
    let (input, _) = keyword("context")(input)?;
    let (input, _) = skip_ws_and_comments(input)?;
    let (input, name) = any_identifier(input)?;
    Ok((input, ContextDef { name }))
}

/// `define [access] "Name": expression`
pub fn parse_expression_def(input: &str) -> IResult<&str, ExpressionDef> {
    let (input, access) = parse_access_modifier(input)?;
    let (input, _) = keyword("define")(input)?;
    let (input, _) = skip_ws_and_comments(input)?;
    let (input, name) = any_identifier(input)?;
    let (input, _) = ws(char(':'))(input)?;
    let (input, body) = expression(input)?;
    Ok((
        input,
        ExpressionDef {
            name,
            expression: body,
            context: None,
            access,
        },
    ))
}

/// `define [access] [fluent] function Name(params) [returns Type]:
/// expression` (or `external`)
pub fn parse_function_def(input: &str) -> IResult<&str, FunctionDef> {
    let (input, access) = parse_access_modifier(input)?;
    let (input, _) = keyword("define")(input)?;
    let (input, _) = skip_ws_and_comments(input)?;
    let (input, fluent) = opt(terminated(keyword("fluent"), skip_ws_and_comments))(input)?;
    let (input, _) = keyword("function")(input)?;
    let (input, _) = skip_ws_and_comments(input)?;
    let (input, name) = any_identifier(input)?;
    let (input, parameters) = delimited(
        ws(char('(')),
        separated_list0(ws(char(',')), parse_function_parameter),
        ws(char(')')),
    )(input)?;
    let (input, return_type) = opt(preceded(ws(keyword("returns")), parse_type_specifier))(input)?;
    let (input, _) = ws(char(':'))(input)?;
    let (input, body) = alt((
        map(keyword("external"), |_| None),
        map(expression, Some),
    ))(input)?;
    Ok((
        input,
        FunctionDef {
            name,
            parameters,
            return_type,
            external: body.is_none(),
            body,
            fluent: fluent.is_some(),
            context: None,
            access,
        },
    ))
}

fn parse_function_parameter(input: &str) -> IResult<&str, FunctionParameter> {
    let (input, name) = unreserved_identifier(input)?;
    let (input, type_specifier) = opt(ws(parse_type_specifier))(input)?;
    Ok((
        input,
        FunctionParameter {
            name,
            type_specifier,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Library {
        let (rest, library) =
            parse_library(source).unwrap_or_else(|e| panic!("parse failed: {e}"));
        assert!(rest.trim().is_empty(), "unparsed: '{rest}'");
        library
    }

    #[test]
    fn test_library_header_and_definitions() {
        let library = parse(
            r#"
            library Example version '1.0.0'
            using FHIR version '4.0.1'

            define X: 1 + 2
            define "Quoted Name": X * 2
            "#,
        );
        let identifier = library.identifier.unwrap();
        assert_eq!(identifier.name, "Example");
        assert_eq!(identifier.version.as_deref(), Some("1.0.0"));
        assert_eq!(library.usings[0].model_name, "FHIR");
        assert_eq!(library.statements.len(), 2);
    }

    #[test]
    fn test_terminology_declarations() {
        let library = parse(
            r#"
            library Term
            codesystem "SNOMED": 'http://snomed.info/sct'
            valueset "Diabetes": 'http://example.org/vs/diabetes'
            code "T2D": '44054006' from "SNOMED" display 'Type 2 diabetes'
            concept "Diabetes Concept": { "T2D" } display 'Diabetes'
            "#,
        );
        assert_eq!(library.codesystems[0].id, "http://snomed.info/sct");
        assert_eq!(library.valuesets[0].name, "Diabetes");
        assert_eq!(library.codes[0].codesystem, "SNOMED");
        assert_eq!(library.concepts[0].codes, vec!["T2D"]);
    }

    #[test]
    fn test_parameter_and_context() {
        let library = parse(
            r#"
            library P
            parameter MeasurementPeriod Interval<Date> default Interval[@2024-01-01, @2024-12-31]
            context Patient
            define InPeriod: true
            "#,
        );
        assert_eq!(library.parameters[0].name, "MeasurementPeriod");
        assert!(library.parameters[0].default.is_some());
        let Statement::ExpressionDef(def) = &library.statements[0] else {
            panic!("expected expression def");
        };
        assert_eq!(def.context.as_deref(), Some("Patient"));
    }

    #[test]
    fn test_function_definitions() {
        let library = parse(
            r#"
            library F
            define function Double(x Integer) returns Integer: x * 2
            define fluent function isAdult(p FHIR.Patient): true
            define private function Hidden(): 42
            "#,
        );
        let Statement::FunctionDef(double) = &library.statements[0] else {
            panic!("expected function");
        };
        assert_eq!(double.parameters[0].name, "x");
        assert!(!double.fluent);

        let Statement::FunctionDef(fluent) = &library.statements[1] else {
            panic!("expected function");
        };
        assert!(fluent.fluent);

        let Statement::FunctionDef(hidden) = &library.statements[2] else {
            panic!("expected function");
        };
        assert_eq!(hidden.access, AccessModifier::Private);
    }

    #[test]
    fn test_includes() {
        let library = parse(
            r#"
            library Main
            include Common version '1.0' called Cmn
            define X: Cmn.Shared
            "#,
        );
        assert_eq!(library.includes[0].path, "Common");
        assert_eq!(library.includes[0].alias.as_deref(), Some("Cmn"));
    }

    #[test]
    fn test_comments_are_skipped() {
        let library = parse(
            r#"
            // line comment
            library C version '0.1'
            /* block
               comment */
            define X: 1 // trailing
            "#,
        );
        assert_eq!(library.statements.len(), 1);
    }
}
