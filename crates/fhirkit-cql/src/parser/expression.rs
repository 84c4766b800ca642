//! CQL expression parser.
//!
//! Operator precedence, lowest to highest: `implies`; `or`/`xor`; `and`;
//! `not`; equality; timing/membership phrases; comparison; `union`/
//! `intersect`/`except`; additive; multiplicative; `^`; prefix operators;
//! postfix (member access, indexers, `is`/`as`); terms.
//!
//! Timing phrases with quantity offsets (`starts 3 days before`) desugar at
//! parse time into the primitive operator set, so the evaluator and the ELM
//! translator only see canonical nodes.

use super::ast::*;
use super::lexer::{
    any_identifier, date_or_datetime_literal, duration_unit, keyword, number_literal,
    precision_name, quantity_literal, skip_ws_and_comments, string_literal,
    unreserved_identifier, ws, NumberLiteral, TemporalLiteral,
};
use fhirkit_fhirpath::model::datetime::DateTimePrecision;
use nom::{
    branch::alt,
    character::complete::char,
    combinator::{map, not, opt, peek, value},
    multi::{many0, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use rust_decimal::Decimal;

fn boxed(e: Expression) -> Box<Expression> {
    Box::new(e)
}

fn binary(
    op: BinaryOperator,
    left: Expression,
    right: Expression,
    precision: Option<DateTimePrecision>,
) -> Expression {
    Expression::Binary {
        op,
        left: boxed(left),
        right: boxed(right),
        precision,
    }
}

// ============================================================================
// Entry point and the boolean ladder
// ============================================================================

/// Parse any CQL expression.
pub fn expression(input: &str) -> IResult<&str, Expression> {
    parse_implies(input)
}

fn parse_implies(input: &str) -> IResult<&str, Expression> {
    let (input, first) = parse_or(input)?;
    let (input, rest) = many0(preceded(ws(keyword("implies")), parse_or))(input)?;
    Ok((
        input,
        rest.into_iter()
            .fold(first, |acc, e| binary(BinaryOperator::Implies, acc, e, None)),
    ))
}

fn parse_or(input: &str) -> IResult<&str, Expression> {
    let (input, first) = parse_and(input)?;
    let (input, rest) = many0(tuple((
        ws(alt((
            value(BinaryOperator::Or, keyword("or")),
            value(BinaryOperator::Xor, keyword("xor")),
        ))),
        parse_and,
    )))(input)?;
    Ok((
        input,
        rest.into_iter()
            .fold(first, |acc, (op, e)| binary(op, acc, e, None)),
    ))
}

fn parse_and(input: &str) -> IResult<&str, Expression> {
    let (input, first) = parse_not(input)?;
    let (input, rest) = many0(preceded(ws(keyword("and")), parse_not))(input)?;
    Ok((
        input,
        rest.into_iter()
            .fold(first, |acc, e| binary(BinaryOperator::And, acc, e, None)),
    ))
}

fn parse_not(input: &str) -> IResult<&str, Expression> {
    alt((
        map(preceded(ws(keyword("not")), parse_not), |operand| {
            Expression::Unary {
                op: UnaryOperator::Not,
                operand: boxed(operand),
            }
        }),
        parse_equality,
    ))(input)
}

fn parse_equality(input: &str) -> IResult<&str, Expression> {
    let (input, first) = parse_timing(input)?;
    let (input, rest) = many0(tuple((
        ws(alt((
            value(BinaryOperator::NotEqual, nom::bytes::complete::tag("!=")),
            value(BinaryOperator::NotEquivalent, nom::bytes::complete::tag("!~")),
            value(BinaryOperator::Equal, char('=')),
            value(BinaryOperator::Equivalent, char('~')),
        ))),
        parse_timing,
    )))(input)?;
    Ok((
        input,
        rest.into_iter()
            .fold(first, |acc, (op, e)| binary(op, acc, e, None)),
    ))
}

// ============================================================================
// Timing, membership, and between phrases
// ============================================================================

fn parse_timing(input: &str) -> IResult<&str, Expression> {
    let (input, left) = parse_comparison(input)?;
    let (input, phrase) = opt(|i| parse_timing_phrase(i, left.clone()))(input)?;
    Ok((input, phrase.unwrap_or(left)))
}

fn parse_timing_phrase(input: &str, left: Expression) -> IResult<&str, Expression> {
    let (input, _) = skip_ws_and_comments(input)?;
    alt((
        |i| parse_between_phrase(i, left.clone()),
        |i| parse_membership_phrase(i, left.clone()),
        |i| parse_interval_phrase(i, left.clone()),
    ))(input)
}

fn parse_between_phrase(input: &str, left: Expression) -> IResult<&str, Expression> {
    let (input, _) = keyword("between")(input)?;
    let (input, low) = ws(parse_comparison)(input)?;
    let (input, _) = keyword("and")(input)?;
    let (input, high) = ws(parse_comparison)(input)?;
    Ok((
        input,
        Expression::Between {
            operand: boxed(left),
            low: boxed(low),
            high: boxed(high),
        },
    ))
}

fn parse_membership_phrase(input: &str, left: Expression) -> IResult<&str, Expression> {
    let (input, op) = alt((
        value(BinaryOperator::In, keyword("in")),
        value(BinaryOperator::Contains, keyword("contains")),
    ))(input)?;
    let (input, precision) = opt(ws(precision_name))(input)?;
    let (input, right) = ws(parse_comparison)(input)?;
    Ok((input, binary(op, left, right, precision)))
}

/// The interval/temporal operator phrases.
fn parse_interval_phrase(input: &str, left: Expression) -> IResult<&str, Expression> {
    alt((
        |i| parse_on_or_phrase(i, left.clone()),
        |i| parse_same_phrase(i, left.clone()),
        |i| parse_within_phrase(i, left.clone()),
        |i| parse_includes_phrase(i, left.clone()),
        |i| parse_overlaps_meets_phrase(i, left.clone()),
        |i| parse_before_after_phrase(i, left.clone()),
        |i| parse_starts_ends_phrase(i, left.clone()),
    ))(input)
}

/// `on or before` / `on or after`
fn parse_on_or_phrase(input: &str, left: Expression) -> IResult<&str, Expression> {
    let (input, _) = keyword("on")(input)?;
    let (input, _) = ws(keyword("or"))(input)?;
    let (input, op) = alt((
        value(BinaryOperator::SameOrBefore, keyword("before")),
        value(BinaryOperator::SameOrAfter, keyword("after")),
    ))(input)?;
    let (input, right) = ws(parse_comparison)(input)?;
    Ok((input, binary(op, left, right, None)))
}

/// `same [precision] as` / `same [precision] or before|after`
fn parse_same_phrase(input: &str, left: Expression) -> IResult<&str, Expression> {
    let (input, _) = keyword("same")(input)?;
    let (input, precision) = opt(ws(precision_name))(input)?;
    let (input, op) = ws(alt((
        value(BinaryOperator::SameAs, keyword("as")),
        map(
            preceded(
                keyword("or"),
                ws(alt((keyword("before"), keyword("after")))),
            ),
            |kw| {
                if kw == "before" {
                    BinaryOperator::SameOrBefore
                } else {
                    BinaryOperator::SameOrAfter
                }
            },
        ),
    )))(input)?;
    let (input, right) = parse_comparison(input)?;
    Ok((input, binary(op, left, right, precision)))
}

/// `within <quantity> of`
fn parse_within_phrase(input: &str, left: Expression) -> IResult<&str, Expression> {
    let (input, _) = keyword("within")(input)?;
    let (input, (amount, unit)) = ws(quantity_literal)(input)?;
    let (input, _) = keyword("of")(input)?;
    let (input, right) = ws(parse_comparison)(input)?;
    Ok((
        input,
        Expression::Within {
            left: boxed(left),
            quantity: boxed(Expression::Literal(Literal::Quantity {
                value: amount,
                unit,
            })),
            right: boxed(right),
        },
    ))
}

/// `includes`, `included in`, `during`, with optional `properly`
fn parse_includes_phrase(input: &str, left: Expression) -> IResult<&str, Expression> {
    let (input, properly) = opt(terminated(keyword("properly"), skip_ws_and_comments))(input)?;
    let (input, op) = alt((
        map(
            preceded(keyword("included"), ws(keyword("in"))),
            |_| BinaryOperator::IncludedIn,
        ),
        value(BinaryOperator::IncludedIn, keyword("during")),
        value(BinaryOperator::Includes, keyword("includes")),
    ))(input)?;
    let op = match (properly.is_some(), op) {
        (true, BinaryOperator::IncludedIn) => BinaryOperator::ProperlyIncludedIn,
        (true, BinaryOperator::Includes) => BinaryOperator::ProperlyIncludes,
        (_, op) => op,
    };
    let (input, precision) = opt(ws(precision_name))(input)?;
    let (input, right) = ws(parse_comparison)(input)?;
    Ok((input, binary(op, left, right, precision)))
}

/// `overlaps [before|after]`, `meets [before|after]`
fn parse_overlaps_meets_phrase(input: &str, left: Expression) -> IResult<&str, Expression> {
    let (input, base) = alt((keyword("overlaps"), keyword("meets")))(input)?;
    let (input, direction) = opt(ws(alt((keyword("before"), keyword("after")))))(input)?;
    let op = match (base, direction) {
        ("overlaps", None) => BinaryOperator::Overlaps,
        ("overlaps", Some("before")) => BinaryOperator::OverlapsBefore,
        ("overlaps", Some(_)) => BinaryOperator::OverlapsAfter,
        (_, None) => BinaryOperator::Meets,
        (_, Some("before")) => BinaryOperator::MeetsBefore,
        (_, Some(_)) => BinaryOperator::MeetsAfter,
    };
    let (input, right) = ws(parse_comparison)(input)?;
    Ok((input, binary(op, left, right, None)))
}

/// `[starts|ends|occurs]? [N unit [or more|or less]]? before|after
/// [precision of]?`
fn parse_before_after_phrase(input: &str, left: Expression) -> IResult<&str, Expression> {
    let (input, boundary) = opt(terminated(
        alt((keyword("starts"), keyword("ends"), keyword("occurs"))),
        skip_ws_and_comments,
    ))(input)?;
    let (input, offset) = opt(terminated(
        pair(
            quantity_literal,
            opt(ws(preceded(
                keyword("or"),
                ws(alt((keyword("more"), keyword("less")))),
            ))),
        ),
        skip_ws_and_comments,
    ))(input)?;
    let (input, direction) = alt((keyword("before"), keyword("after")))(input)?;
    let (input, precision) = opt(ws(terminated(precision_name, ws(keyword("of")))))(input)?;
    let (input, right) = ws(parse_comparison)(input)?;

    // Boundary prefix applies start/end to the left operand
    let left = match boundary {
        Some("starts") => Expression::Unary {
            op: UnaryOperator::Start,
            operand: boxed(left),
        },
        Some("ends") => Expression::Unary {
            op: UnaryOperator::End,
            operand: boxed(left),
        },
        _ => left,
    };

    let before = direction == "before";
    let Some(((amount, unit), modifier)) = offset else {
        let op = if before {
            BinaryOperator::Before
        } else {
            BinaryOperator::After
        };
        return Ok((input, binary(op, left, right, precision)));
    };

    // Quantity offsets desugar into arithmetic on the right operand:
    // `A starts 3 days before B` is `start of A same as B - 3 days`.
    let offset_quantity = Expression::Literal(Literal::Quantity {
        value: amount,
        unit,
    });
    let shifted = binary(
        if before {
            BinaryOperator::Subtract
        } else {
            BinaryOperator::Add
        },
        right,
        offset_quantity,
        None,
    );
    let op = match modifier {
        // `3 days or more before B`: at or beyond the shifted point
        Some("more") => {
            if before {
                BinaryOperator::SameOrBefore
            } else {
                BinaryOperator::SameOrAfter
            }
        }
        // `3 days or less before B`: between the shifted point and B
        Some(_) => {
            if before {
                BinaryOperator::SameOrAfter
            } else {
                BinaryOperator::SameOrBefore
            }
        }
        None => BinaryOperator::SameAs,
    };
    Ok((input, binary(op, left, shifted, precision)))
}

/// Binary `starts` / `ends` (interval boundary relations)
fn parse_starts_ends_phrase(input: &str, left: Expression) -> IResult<&str, Expression> {
    let (input, op) = alt((
        value(BinaryOperator::Starts, keyword("starts")),
        value(BinaryOperator::Ends, keyword("ends")),
    ))(input)?;
    let (input, precision) = opt(ws(precision_name))(input)?;
    let (input, right) = ws(parse_comparison)(input)?;
    Ok((input, binary(op, left, right, precision)))
}

// ============================================================================
// Comparison and the arithmetic ladder
// ============================================================================

fn parse_comparison(input: &str) -> IResult<&str, Expression> {
    let (input, first) = parse_union_ops(input)?;
    let (input, rest) = many0(tuple((
        ws(alt((
            value(BinaryOperator::LessOrEqual, nom::bytes::complete::tag("<=")),
            value(BinaryOperator::GreaterOrEqual, nom::bytes::complete::tag(">=")),
            value(BinaryOperator::Less, char('<')),
            value(BinaryOperator::Greater, char('>')),
        ))),
        parse_union_ops,
    )))(input)?;
    Ok((
        input,
        rest.into_iter()
            .fold(first, |acc, (op, e)| binary(op, acc, e, None)),
    ))
}

fn parse_union_ops(input: &str) -> IResult<&str, Expression> {
    let (input, first) = parse_additive(input)?;
    let (input, rest) = many0(tuple((
        ws(alt((
            value(BinaryOperator::Union, keyword("union")),
            value(BinaryOperator::Intersect, keyword("intersect")),
            value(BinaryOperator::Except, keyword("except")),
            value(BinaryOperator::Union, char('|')),
        ))),
        parse_additive,
    )))(input)?;
    Ok((
        input,
        rest.into_iter()
            .fold(first, |acc, (op, e)| binary(op, acc, e, None)),
    ))
}

fn parse_additive(input: &str) -> IResult<&str, Expression> {
    let (input, first) = parse_multiplicative(input)?;
    let (input, rest) = many0(tuple((
        ws(alt((
            value(BinaryOperator::Add, char('+')),
            value(BinaryOperator::Subtract, char('-')),
            value(BinaryOperator::Concatenate, char('&')),
        ))),
        parse_multiplicative,
    )))(input)?;
    Ok((
        input,
        rest.into_iter()
            .fold(first, |acc, (op, e)| binary(op, acc, e, None)),
    ))
}

fn parse_multiplicative(input: &str) -> IResult<&str, Expression> {
    let (input, first) = parse_power(input)?;
    let (input, rest) = many0(tuple((
        ws(alt((
            value(BinaryOperator::Multiply, char('*')),
            value(BinaryOperator::Divide, char('/')),
            value(BinaryOperator::TruncatedDivide, keyword("div")),
            value(BinaryOperator::Modulo, keyword("mod")),
        ))),
        parse_power,
    )))(input)?;
    Ok((
        input,
        rest.into_iter()
            .fold(first, |acc, (op, e)| binary(op, acc, e, None)),
    ))
}

// Right-associative
fn parse_power(input: &str) -> IResult<&str, Expression> {
    let (input, base) = parse_prefix(input)?;
    let (input, exponent) = opt(preceded(ws(char('^')), parse_power))(input)?;
    Ok(match exponent {
        Some(exponent) => (input, binary(BinaryOperator::Power, base, exponent, None)),
        None => (input, base),
    })
}

// ============================================================================
// Prefix operators
// ============================================================================

fn parse_prefix(input: &str) -> IResult<&str, Expression> {
    alt((
        map(preceded(ws(char('-')), parse_prefix), |operand| {
            Expression::Unary {
                op: UnaryOperator::Negate,
                operand: boxed(operand),
            }
        }),
        unary_kw("exists", UnaryOperator::Exists),
        unary_kw("distinct", UnaryOperator::Distinct),
        unary_kw("flatten", UnaryOperator::Flatten),
        unary_of("start", UnaryOperator::Start),
        unary_of("end", UnaryOperator::End),
        unary_of("width", UnaryOperator::Width),
        unary_of("successor", UnaryOperator::Successor),
        unary_of("predecessor", UnaryOperator::Predecessor),
        map(
            preceded(
                pair(ws(keyword("singleton")), keyword("from")),
                ws(parse_prefix),
            ),
            |operand| Expression::Unary {
                op: UnaryOperator::Singleton,
                operand: boxed(operand),
            },
        ),
        map(
            preceded(pair(ws(keyword("point")), keyword("from")), ws(parse_prefix)),
            |operand| Expression::Unary {
                op: UnaryOperator::PointFrom,
                operand: boxed(operand),
            },
        ),
        parse_duration_between,
        parse_component_from,
        parse_postfix,
    ))(input)
}

fn unary_kw(
    kw: &'static str,
    op: UnaryOperator,
) -> impl FnMut(&str) -> IResult<&str, Expression> {
    move |input| {
        let (input, _) = ws(keyword(kw))(input)?;
        let (input, operand) = parse_prefix(input)?;
        Ok((
            input,
            Expression::Unary {
                op,
                operand: boxed(operand),
            },
        ))
    }
}

fn unary_of(
    kw: &'static str,
    op: UnaryOperator,
) -> impl FnMut(&str) -> IResult<&str, Expression> {
    move |input| {
        let (input, _) = ws(keyword(kw))(input)?;
        let (input, _) = keyword("of")(input)?;
        let (input, operand) = ws(parse_prefix)(input)?;
        Ok((
            input,
            Expression::Unary {
                op,
                operand: boxed(operand),
            },
        ))
    }
}

/// `[duration in] years between A and B` /
/// `difference in years between A and B`
fn parse_duration_between(input: &str) -> IResult<&str, Expression> {
    let (input, difference) = alt((
        value(
            true,
            pair(ws(keyword("difference")), terminated(keyword("in"), skip_ws_and_comments)),
        ),
        value(
            false,
            pair(ws(keyword("duration")), terminated(keyword("in"), skip_ws_and_comments)),
        ),
        value(false, peek(pair(ws(duration_unit), ws(keyword("between"))))),
    ))(input)?;
    let (input, precision) = ws(duration_unit)(input)?;
    let (input, _) = keyword("between")(input)?;
    let (input, low) = ws(parse_comparison)(input)?;
    let (input, _) = keyword("and")(input)?;
    let (input, high) = ws(parse_comparison)(input)?;
    Ok((
        input,
        Expression::DurationBetween {
            precision,
            low: boxed(low),
            high: boxed(high),
            difference,
        },
    ))
}

/// `year from X`, `month from X`, …
fn parse_component_from(input: &str) -> IResult<&str, Expression> {
    let (input, precision) = ws(precision_name)(input)?;
    let (input, _) = keyword("from")(input)?;
    let (input, operand) = ws(parse_prefix)(input)?;
    Ok((
        input,
        Expression::DateTimeComponent {
            precision,
            operand: boxed(operand),
        },
    ))
}

// ============================================================================
// Postfix: member access, indexers, is/as
// ============================================================================

enum Postfix {
    Member(String),
    Call(String, Vec<Expression>),
    Index(Expression),
    IsType(TypeSpecifier, bool),
    AsType(TypeSpecifier),
    NullCheck(NullTest, bool),
}

fn parse_postfix(input: &str) -> IResult<&str, Expression> {
    let (input, mut expr) = parse_term(input)?;
    let (input, postfixes) = many0(parse_one_postfix)(input)?;
    for postfix in postfixes {
        expr = match postfix {
            Postfix::Member(name) => Expression::Member {
                source: boxed(expr),
                name,
            },
            Postfix::Call(name, arguments) => Expression::MethodCall {
                source: boxed(expr),
                name,
                arguments,
            },
            Postfix::Index(index) => Expression::Index {
                source: boxed(expr),
                index: boxed(index),
            },
            Postfix::IsType(type_specifier, negated) => Expression::Is {
                operand: boxed(expr),
                type_specifier,
                negated,
            },
            Postfix::AsType(type_specifier) => Expression::As {
                operand: boxed(expr),
                type_specifier,
            },
            Postfix::NullCheck(test, negated) => Expression::NullTest {
                operand: boxed(expr),
                test,
                negated,
            },
        };
    }
    Ok((input, expr))
}

fn parse_one_postfix(input: &str) -> IResult<&str, Postfix> {
    alt((
        // .name(args) / .name
        |input| {
            let (input, _) = ws(char('.'))(input)?;
            let (input, name) = any_identifier(input)?;
            let (input, call) = opt(delimited(
                ws(char('(')),
                separated_list0(ws(char(',')), expression),
                ws(char(')')),
            ))(input)?;
            Ok(match call {
                Some(arguments) => (input, Postfix::Call(name, arguments)),
                None => (input, Postfix::Member(name)),
            })
        },
        map(
            delimited(ws(char('[')), expression, ws(char(']'))),
            Postfix::Index,
        ),
        // is [not] null/true/false, is [not] Type, as Type
        |input| {
            let (input, _) = ws(keyword("is"))(input)?;
            let (input, negated) = opt(terminated(keyword("not"), skip_ws_and_comments))(input)?;
            let negated = negated.is_some();
            if let Ok((input, test)) = null_test(input) {
                return Ok((input, Postfix::NullCheck(test, negated)));
            }
            let (input, specifier) = parse_type_specifier(input)?;
            Ok((input, Postfix::IsType(specifier, negated)))
        },
        |input| {
            let (input, _) = ws(keyword("as"))(input)?;
            let (input, specifier) = parse_type_specifier(input)?;
            Ok((input, Postfix::AsType(specifier)))
        },
    ))(input)
}

fn null_test(input: &str) -> IResult<&str, NullTest> {
    alt((
        value(NullTest::Null, keyword("null")),
        value(NullTest::True, keyword("true")),
        value(NullTest::False, keyword("false")),
    ))(input)
}

/// Type specifiers: named (qualified), `List<T>`, `Interval<T>`,
/// `Tuple{...}`, `Choice<...>`.
pub fn parse_type_specifier(input: &str) -> IResult<&str, TypeSpecifier> {
    alt((
        |input| {
            let (input, _) = keyword("List")(input)?;
            let (input, element) =
                delimited(ws(char('<')), parse_type_specifier, ws(char('>')))(input)?;
            Ok((input, TypeSpecifier::List(Box::new(element))))
        },
        |input| {
            let (input, _) = keyword("Interval")(input)?;
            let (input, point) =
                delimited(ws(char('<')), parse_type_specifier, ws(char('>')))(input)?;
            Ok((input, TypeSpecifier::Interval(Box::new(point))))
        },
        |input| {
            let (input, _) = keyword("Choice")(input)?;
            let (input, choices) = delimited(
                ws(char('<')),
                separated_list1(ws(char(',')), parse_type_specifier),
                ws(char('>')),
            )(input)?;
            Ok((input, TypeSpecifier::Choice(choices)))
        },
        |input| {
            let (input, _) = keyword("Tuple")(input)?;
            let (input, elements) = delimited(
                ws(char('{')),
                separated_list0(
                    ws(char(',')),
                    pair(any_identifier, ws(parse_type_specifier)),
                ),
                ws(char('}')),
            )(input)?;
            Ok((input, TypeSpecifier::Tuple(elements)))
        },
        |input| {
            // Reserved words never name types, so `parameter X default 5`
            // does not read `default` as X's type
            let (input, first) = unreserved_identifier(input)?;
            let (input, second) = opt(preceded(char('.'), any_identifier))(input)?;
            Ok((
                input,
                match second {
                    Some(name) => TypeSpecifier::Named {
                        namespace: Some(first),
                        name,
                    },
                    None => TypeSpecifier::Named {
                        namespace: None,
                        name: first,
                    },
                },
            ))
        },
    ))(input)
}

// ============================================================================
// Terms
// ============================================================================

fn parse_term(input: &str) -> IResult<&str, Expression> {
    let (input, _) = skip_ws_and_comments(input)?;
    let (input, term) = alt((
        parse_if,
        parse_case,
        parse_query_from,
        parse_interval_selector,
        parse_retrieve_with_alias,
        parse_literal_term,
        parse_tuple_selector,
        parse_list_selector,
        parse_parenthesized_with_alias,
        parse_identifier_term,
    ))(input)?;
    Ok((input, term))
}

fn parse_if(input: &str) -> IResult<&str, Expression> {
    let (input, _) = keyword("if")(input)?;
    let (input, condition) = ws(expression)(input)?;
    let (input, _) = keyword("then")(input)?;
    let (input, then_branch) = ws(expression)(input)?;
    let (input, _) = keyword("else")(input)?;
    let (input, else_branch) = ws(expression)(input)?;
    Ok((
        input,
        Expression::If {
            condition: boxed(condition),
            then_branch: boxed(then_branch),
            else_branch: boxed(else_branch),
        },
    ))
}

fn parse_case(input: &str) -> IResult<&str, Expression> {
    let (input, _) = keyword("case")(input)?;
    let (input, comparand) = opt(ws(|i| {
        // A comparand is present when `when` does not follow directly
        not(peek(keyword("when")))(i)?;
        expression(i)
    }))(input)?;
    let (input, items) = many0(|i| {
        let (i, _) = ws(keyword("when"))(i)?;
        let (i, when) = expression(i)?;
        let (i, _) = ws(keyword("then"))(i)?;
        let (i, then) = expression(i)?;
        Ok((i, CaseItem { when, then }))
    })(input)?;
    let (input, _) = ws(keyword("else"))(input)?;
    let (input, else_branch) = expression(input)?;
    let (input, _) = ws(keyword("end"))(input)?;
    Ok((
        input,
        Expression::Case {
            comparand: comparand.map(boxed),
            items,
            else_branch: boxed(else_branch),
        },
    ))
}

fn parse_literal_term(input: &str) -> IResult<&str, Expression> {
    alt((
        value(Expression::Literal(Literal::Null), keyword("null")),
        value(
            Expression::Literal(Literal::Boolean(true)),
            keyword("true"),
        ),
        value(
            Expression::Literal(Literal::Boolean(false)),
            keyword("false"),
        ),
        map(date_or_datetime_literal, |t| match t {
            TemporalLiteral::Date(d) => Expression::Literal(Literal::Date(d)),
            TemporalLiteral::DateTime(dt) => Expression::Literal(Literal::DateTime(dt)),
            TemporalLiteral::Time(t) => Expression::Literal(Literal::Time(t)),
        }),
        parse_ratio_literal,
        map(quantity_literal, |(value, unit)| {
            Expression::Literal(Literal::Quantity { value, unit })
        }),
        map(number_literal, |n| match n {
            NumberLiteral::Integer(i) => Expression::Literal(Literal::Integer(i)),
            NumberLiteral::Long(i) => Expression::Literal(Literal::Long(i)),
            NumberLiteral::Decimal(d) => Expression::Literal(Literal::Decimal(d)),
        }),
        map(string_literal, |s| Expression::Literal(Literal::String(s))),
    ))(input)
}

/// `5 'mg' : 10 'mL'`
fn parse_ratio_literal(input: &str) -> IResult<&str, Expression> {
    let (input, numerator) = quantity_literal(input)?;
    let (input, _) = ws(char(':'))(input)?;
    let (input, denominator) = quantity_literal(input)?;
    Ok((
        input,
        Expression::Literal(Literal::Ratio {
            numerator,
            denominator,
        }),
    ))
}

/// `Interval[low, high)` with each bracket independently open or closed.
fn parse_interval_selector(input: &str) -> IResult<&str, Expression> {
    let (input, _) = keyword("Interval")(input)?;
    let (input, low_closed) = ws(alt((value(true, char('[')), value(false, char('(')))))(input)?;
    let (input, low) = expression(input)?;
    let (input, _) = ws(char(','))(input)?;
    let (input, high) = expression(input)?;
    let (input, high_closed) = ws(alt((value(true, char(']')), value(false, char(')')))))(input)?;
    Ok((
        input,
        Expression::Interval(IntervalSelector {
            low: boxed(low),
            high: boxed(high),
            low_closed,
            high_closed,
        }),
    ))
}

/// `{1, 2, 3}` list selector, or `Tuple { name: expr }` / `{ name: expr }`.
fn parse_list_selector(input: &str) -> IResult<&str, Expression> {
    let (input, _) = opt(terminated(keyword("List"), skip_ws_and_comments))(input)?;
    let (input, elements) = delimited(
        ws(char('{')),
        separated_list0(ws(char(',')), expression),
        ws(char('}')),
    )(input)?;
    Ok((input, Expression::List(elements)))
}

fn parse_tuple_selector(input: &str) -> IResult<&str, Expression> {
    let (input, _) = opt(terminated(keyword("Tuple"), skip_ws_and_comments))(input)?;
    let (input, elements) = delimited(
        ws(char('{')),
        separated_list1(
            ws(char(',')),
            tuple((any_identifier, ws(char(':')), expression)),
        ),
        ws(char('}')),
    )(input)?;
    Ok((
        input,
        Expression::Tuple(
            elements
                .into_iter()
                .map(|(name, _, value)| (name, value))
                .collect(),
        ),
    ))
}

fn parse_parenthesized_with_alias(input: &str) -> IResult<&str, Expression> {
    let (input, inner) = delimited(ws(char('(')), expression, ws(char(')')))(input)?;
    maybe_query(input, inner)
}

/// `[Condition: code in "Diabetes"]`, optionally opening a query.
fn parse_retrieve_with_alias(input: &str) -> IResult<&str, Expression> {
    let (input, retrieve) = parse_retrieve(input)?;
    maybe_query(input, retrieve)
}

fn parse_retrieve(input: &str) -> IResult<&str, Expression> {
    let (input, _) = char('[')(input)?;
    let (input, resource_type) = ws(any_identifier)(input)?;
    let (input, filter) = opt(preceded(ws(char(':')), parse_retrieve_filter))(input)?;
    let (input, _) = ws(char(']'))(input)?;

    let (code_path, comparator, terminology) = match filter {
        Some(f) => f,
        None => (None, None, None),
    };
    Ok((
        input,
        Expression::Retrieve(Retrieve {
            resource_type,
            code_path,
            comparator,
            terminology,
        }),
    ))
}

type RetrieveFilter = (
    Option<String>,
    Option<RetrieveComparator>,
    Option<Box<Expression>>,
);

fn parse_retrieve_filter(input: &str) -> IResult<&str, RetrieveFilter> {
    alt((
        // path in/~/= terminology
        |input| {
            let (input, path) = parse_dotted_path(input)?;
            let (input, comparator) = ws(alt((
                value(RetrieveComparator::In, keyword("in")),
                value(RetrieveComparator::Equivalent, char('~')),
                value(RetrieveComparator::Equal, char('=')),
            )))(input)?;
            let (input, terminology) = parse_terminology_target(input)?;
            Ok((input, (Some(path), Some(comparator), Some(boxed(terminology)))))
        },
        // bare terminology reference, default code path
        map(parse_terminology_target, |terminology| {
            (None, None, Some(boxed(terminology)))
        }),
    ))(input)
}

fn parse_dotted_path(input: &str) -> IResult<&str, String> {
    let (input, parts) = separated_list1(char('.'), any_identifier)(input)?;
    Ok((input, parts.join(".")))
}

fn parse_terminology_target(input: &str) -> IResult<&str, Expression> {
    let (input, first) = any_identifier(input)?;
    let (input, second) = opt(preceded(char('.'), any_identifier))(input)?;
    Ok((
        input,
        match second {
            Some(name) => Expression::QualifiedIdentifier {
                qualifier: first,
                name,
            },
            None => Expression::Identifier(first),
        },
    ))
}

fn parse_identifier_term(input: &str) -> IResult<&str, Expression> {
    let (input, first) = unreserved_identifier(input)?;

    // Function call: name(args) or Library.name(args)
    let (input, qualified) = opt(preceded(char('.'), any_identifier))(input)?;
    if let (Some(name), true) = (&qualified, peek_open_paren(input)) {
        let (input, arguments) = delimited(
            ws(char('(')),
            separated_list0(ws(char(',')), expression),
            ws(char(')')),
        )(input)?;
        return Ok((
            input,
            Expression::FunctionCall {
                library: Some(first),
                name: name.clone(),
                arguments,
            },
        ));
    }
    if qualified.is_none() && peek_open_paren(input) {
        let (input, arguments) = delimited(
            ws(char('(')),
            separated_list0(ws(char(',')), expression),
            ws(char(')')),
        )(input)?;
        return Ok((
            input,
            Expression::FunctionCall {
                library: None,
                name: first,
                arguments,
            },
        ));
    }

    let base = match qualified {
        Some(name) => Expression::QualifiedIdentifier {
            qualifier: first,
            name,
        },
        None => Expression::Identifier(first),
    };
    maybe_query(input, base)
}

fn peek_open_paren(input: &str) -> bool {
    input.trim_start().starts_with('(')
}

// ============================================================================
// Queries
// ============================================================================

/// `from A x, B y ...` multi-source query.
fn parse_query_from(input: &str) -> IResult<&str, Expression> {
    let (input, _) = keyword("from")(input)?;
    let (input, sources) = separated_list1(ws(char(',')), parse_aliased_source)(input)?;
    let (input, query) = parse_query_clauses(input, sources)?;
    Ok((input, Expression::Query(query)))
}

fn parse_aliased_source(input: &str) -> IResult<&str, AliasedSource> {
    let (input, _) = skip_ws_and_comments(input)?;
    let (input, source) = alt((
        parse_retrieve,
        delimited(ws(char('(')), expression, ws(char(')'))),
        parse_list_selector,
        parse_identifier_chain,
    ))(input)?;
    let (input, alias) = ws(unreserved_identifier)(input)?;
    Ok((
        input,
        AliasedSource {
            expression: boxed(source),
            alias,
        },
    ))
}

/// Identifier with member accesses only, used for query sources.
fn parse_identifier_chain(input: &str) -> IResult<&str, Expression> {
    let (input, first) = unreserved_identifier(input)?;
    let (input, rest) = many0(preceded(char('.'), any_identifier))(input)?;
    let mut expr = Expression::Identifier(first);
    for name in rest {
        expr = Expression::Member {
            source: boxed(expr),
            name,
        };
    }
    Ok((input, expr))
}

/// After a source term, an alias opens a single-source query.
fn maybe_query(input: &str, source: Expression) -> IResult<&str, Expression> {
    let attempt: IResult<&str, String> = ws(unreserved_identifier)(input);
    match attempt {
        Ok((rest, alias)) => {
            let sources = vec![AliasedSource {
                expression: boxed(source),
                alias,
            }];
            let (rest, query) = parse_query_clauses(rest, sources)?;
            Ok((rest, Expression::Query(query)))
        }
        Err(_) => Ok((input, source)),
    }
}

fn parse_query_clauses(
    input: &str,
    sources: Vec<AliasedSource>,
) -> IResult<&str, Query> {
    let (input, let_groups) = many0(parse_let_clause)(input)?;
    let lets: Vec<LetClause> = let_groups.into_iter().flatten().collect();
    let (input, where_clause) = opt(preceded(ws(keyword("where")), expression))(input)?;
    let (input, aggregate_clause) = opt(parse_aggregate_clause)(input)?;
    let (input, return_clause) = if aggregate_clause.is_none() {
        opt(parse_return_clause)(input)?
    } else {
        (input, None)
    };
    let (input, sort_clause) = opt(parse_sort_clause)(input)?;
    Ok((
        input,
        Query {
            sources,
            lets,
            where_clause: where_clause.map(boxed),
            return_clause,
            aggregate_clause,
            sort_clause,
        },
    ))
}

/// `let a: expr, b: expr` — one keyword, comma-separated bindings.
fn parse_let_clause(input: &str) -> IResult<&str, Vec<LetClause>> {
    let (input, _) = ws(keyword("let"))(input)?;
    separated_list1(ws(char(',')), |input| {
        let (input, identifier) = ws(unreserved_identifier)(input)?;
        let (input, _) = ws(char(':'))(input)?;
        let (input, expr) = expression(input)?;
        Ok((
            input,
            LetClause {
                identifier,
                expression: boxed(expr),
            },
        ))
    })(input)
}

fn parse_return_clause(input: &str) -> IResult<&str, ReturnClause> {
    let (input, _) = ws(keyword("return"))(input)?;
    let (input, modifier) = opt(ws(alt((keyword("distinct"), keyword("all")))))(input)?;
    let (input, expr) = expression(input)?;
    Ok((
        input,
        ReturnClause {
            distinct: modifier == Some("distinct"),
            expression: boxed(expr),
        },
    ))
}

fn parse_aggregate_clause(input: &str) -> IResult<&str, AggregateClause> {
    let (input, _) = ws(keyword("aggregate"))(input)?;
    let (input, modifier) = opt(ws(alt((keyword("distinct"), keyword("all")))))(input)?;
    let (input, identifier) = ws(unreserved_identifier)(input)?;
    let (input, starting) = opt(preceded(ws(keyword("starting")), parse_postfix))(input)?;
    let (input, _) = ws(char(':'))(input)?;
    let (input, expr) = expression(input)?;
    Ok((
        input,
        AggregateClause {
            identifier,
            starting: starting.map(boxed),
            distinct: modifier == Some("distinct"),
            expression: boxed(expr),
        },
    ))
}

fn parse_sort_clause(input: &str) -> IResult<&str, SortClause> {
    let (input, _) = ws(keyword("sort"))(input)?;
    alt((
        // sort by item, item, ...
        |input| {
            let (input, _) = keyword("by")(input)?;
            let (input, items) = separated_list1(ws(char(',')), parse_sort_item)(input)?;
            Ok((input, SortClause { items }))
        },
        // sort asc / sort desc
        map(ws(parse_sort_direction), |direction| SortClause {
            items: vec![SortItem {
                expression: None,
                direction,
            }],
        }),
    ))(input)
}

fn parse_sort_item(input: &str) -> IResult<&str, SortItem> {
    let (input, _) = skip_ws_and_comments(input)?;
    let (input, expr) = parse_comparison(input)?;
    let (input, direction) = opt(ws(parse_sort_direction))(input)?;
    Ok((
        input,
        SortItem {
            expression: Some(boxed(expr)),
            direction: direction.unwrap_or_default(),
        },
    ))
}

fn parse_sort_direction(input: &str) -> IResult<&str, SortDirection> {
    alt((
        value(SortDirection::Ascending, keyword("ascending")),
        value(SortDirection::Ascending, keyword("asc")),
        value(SortDirection::Descending, keyword("descending")),
        value(SortDirection::Descending, keyword("desc")),
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn parse(input: &str) -> Expression {
        let (rest, expr) = expression(input).unwrap_or_else(|e| panic!("parse '{input}': {e}"));
        assert!(rest.trim().is_empty(), "unparsed: '{rest}'");
        expr
    }

    #[test]
    fn test_arithmetic_precedence() {
        let expr = parse("1 + 2 * 3");
        let Expression::Binary { op, right, .. } = expr else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOperator::Add);
        assert!(matches!(
            *right,
            Expression::Binary {
                op: BinaryOperator::Multiply,
                ..
            }
        ));
    }

    #[test]
    fn test_power_right_associative() {
        let expr = parse("2 ^ 3 ^ 2");
        let Expression::Binary { op, right, .. } = expr else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOperator::Power);
        assert!(matches!(
            *right,
            Expression::Binary {
                op: BinaryOperator::Power,
                ..
            }
        ));
    }

    #[test]
    fn test_literals() {
        assert_eq!(parse("null"), Expression::Literal(Literal::Null));
        assert_eq!(parse("5L"), Expression::Literal(Literal::Long(5)));
        assert_eq!(
            parse("1.5 'mg'"),
            Expression::Literal(Literal::Quantity {
                value: Decimal::from_str("1.5").unwrap(),
                unit: "mg".into()
            })
        );
        assert_eq!(
            parse("20 days"),
            Expression::Literal(Literal::Quantity {
                value: Decimal::from(20),
                unit: "day".into()
            })
        );
        assert!(matches!(
            parse("@2024-03-15"),
            Expression::Literal(Literal::Date(_))
        ));
    }

    #[test]
    fn test_interval_selector() {
        let Expression::Interval(interval) = parse("Interval[1, 10)") else {
            panic!("expected interval");
        };
        assert!(interval.low_closed);
        assert!(!interval.high_closed);
    }

    #[test]
    fn test_list_and_tuple_selectors() {
        assert!(matches!(parse("{1, 2, 3}"), Expression::List(items) if items.len() == 3));
        let Expression::Tuple(elements) = parse("Tuple { name: 'John', age: 40 }") else {
            panic!("expected tuple");
        };
        assert_eq!(elements[0].0, "name");
        assert_eq!(elements[1].0, "age");
    }

    #[test]
    fn test_retrieve_forms() {
        let Expression::Retrieve(r) = parse("[Condition]") else {
            panic!("expected retrieve");
        };
        assert_eq!(r.resource_type, "Condition");
        assert!(r.terminology.is_none());

        let Expression::Retrieve(r) = parse("[Condition: \"Diabetes\"]") else {
            panic!("expected retrieve");
        };
        assert!(r.code_path.is_none());
        assert!(r.terminology.is_some());

        let Expression::Retrieve(r) = parse("[Observation: code in \"Vitals\"]") else {
            panic!("expected retrieve");
        };
        assert_eq!(r.code_path.as_deref(), Some("code"));
        assert_eq!(r.comparator, Some(RetrieveComparator::In));
    }

    #[test]
    fn test_single_source_query() {
        let Expression::Query(q) = parse("[Condition] C where C.active return C.code") else {
            panic!("expected query");
        };
        assert_eq!(q.sources.len(), 1);
        assert_eq!(q.sources[0].alias, "C");
        assert!(q.where_clause.is_some());
        assert!(q.return_clause.is_some());
    }

    #[test]
    fn test_from_query_with_sort() {
        let Expression::Query(q) =
            parse("from N e where e mod 2 = 0 return e sort desc")
        else {
            panic!("expected query");
        };
        assert_eq!(q.sources[0].alias, "e");
        let sort = q.sort_clause.unwrap();
        assert_eq!(sort.items[0].direction, SortDirection::Descending);
        assert!(sort.items[0].expression.is_none());
    }

    #[test]
    fn test_multi_source_query() {
        let Expression::Query(q) = parse("from A x, B y where x.id = y.ref return x") else {
            panic!("expected query");
        };
        assert_eq!(q.sources.len(), 2);
    }

    #[test]
    fn test_aggregate_clause() {
        let Expression::Query(q) = parse("from {1,2,3,4,5} N aggregate R starting 0: R + N")
        else {
            panic!("expected query");
        };
        let aggregate = q.aggregate_clause.unwrap();
        assert_eq!(aggregate.identifier, "R");
        assert!(aggregate.starting.is_some());
        assert!(q.return_clause.is_none());
    }

    #[test]
    fn test_let_clause() {
        let Expression::Query(q) = parse("from {1,2} x let d: x * 2 return d") else {
            panic!("expected query");
        };
        assert_eq!(q.lets[0].identifier, "d");
    }

    #[test]
    fn test_timing_phrases() {
        assert!(matches!(
            parse("A overlaps B"),
            Expression::Binary {
                op: BinaryOperator::Overlaps,
                ..
            }
        ));
        assert!(matches!(
            parse("A during B"),
            Expression::Binary {
                op: BinaryOperator::IncludedIn,
                ..
            }
        ));
        assert!(matches!(
            parse("A properly includes B"),
            Expression::Binary {
                op: BinaryOperator::ProperlyIncludes,
                ..
            }
        ));
        assert!(matches!(
            parse("A on or before B"),
            Expression::Binary {
                op: BinaryOperator::SameOrBefore,
                ..
            }
        ));

        let Expression::Binary { op, precision, .. } = parse("A same day as B") else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOperator::SameAs);
        assert_eq!(precision, Some(DateTimePrecision::Day));
    }

    #[test]
    fn test_within_phrase() {
        assert!(matches!(
            parse("A within 3 days of B"),
            Expression::Within { .. }
        ));
    }

    #[test]
    fn test_starts_offset_desugars() {
        // starts 3 days before B => start of A same as B - 3 days
        let Expression::Binary { op, left, right, .. } = parse("A starts 3 days before B") else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOperator::SameAs);
        assert!(matches!(
            *left,
            Expression::Unary {
                op: UnaryOperator::Start,
                ..
            }
        ));
        assert!(matches!(
            *right,
            Expression::Binary {
                op: BinaryOperator::Subtract,
                ..
            }
        ));
    }

    #[test]
    fn test_if_and_case() {
        assert!(matches!(parse("if x > 1 then 'a' else 'b'"), Expression::If { .. }));

        let Expression::Case { comparand, items, .. } =
            parse("case when x > 1 then 'a' when x > 0 then 'b' else 'c' end")
        else {
            panic!("expected case");
        };
        assert!(comparand.is_none());
        assert_eq!(items.len(), 2);

        let Expression::Case { comparand, .. } = parse("case x when 1 then 'a' else 'b' end")
        else {
            panic!("expected case");
        };
        assert!(comparand.is_some());
    }

    #[test]
    fn test_null_tests_and_type_ops() {
        assert!(matches!(
            parse("x is null"),
            Expression::NullTest {
                test: NullTest::Null,
                negated: false,
                ..
            }
        ));
        assert!(matches!(
            parse("x is not null"),
            Expression::NullTest { negated: true, .. }
        ));
        assert!(matches!(parse("x as Quantity"), Expression::As { .. }));
        assert!(matches!(parse("x is Integer"), Expression::Is { .. }));
    }

    #[test]
    fn test_prefix_operators() {
        assert!(matches!(
            parse("exists [Condition]"),
            Expression::Unary {
                op: UnaryOperator::Exists,
                ..
            }
        ));
        assert!(matches!(
            parse("start of X"),
            Expression::Unary {
                op: UnaryOperator::Start,
                ..
            }
        ));
        assert!(matches!(
            parse("years between A and B"),
            Expression::DurationBetween {
                precision: DateTimePrecision::Year,
                difference: false,
                ..
            }
        ));
        assert!(matches!(
            parse("difference in years between A and B"),
            Expression::DurationBetween {
                difference: true,
                ..
            }
        ));
        assert!(matches!(
            parse("year from X"),
            Expression::DateTimeComponent {
                precision: DateTimePrecision::Year,
                ..
            }
        ));
    }

    #[test]
    fn test_function_calls_and_members() {
        assert!(matches!(
            parse("AgeInYears()"),
            Expression::FunctionCall { library: None, .. }
        ));
        assert!(matches!(
            parse("Common.Foo(1, 2)"),
            Expression::FunctionCall {
                library: Some(_),
                ..
            }
        ));
        assert!(matches!(parse("P.birthDate"), Expression::Member { .. }));
        assert!(matches!(
            parse("X.value.single()"),
            Expression::MethodCall { .. }
        ));
    }

    #[test]
    fn test_union_and_membership() {
        assert!(matches!(
            parse("{1,2} union {3}"),
            Expression::Binary {
                op: BinaryOperator::Union,
                ..
            }
        ));
        assert!(matches!(
            parse("2 in {1,2}"),
            Expression::Binary {
                op: BinaryOperator::In,
                ..
            }
        ));
        assert!(matches!(
            parse("x between 1 and 10"),
            Expression::Between { .. }
        ));
    }
}
