//! FHIRPath parser implementation using nom.
//!
//! The precedence ladder follows the published grammar, lowest first:
//! `implies`, `or`/`xor`, `and`, membership, equality, inequality, union,
//! type test, additive, multiplicative, polarity, then the postfix chain of
//! invocations and indexers over a term.

use crate::ast::*;
use crate::error::{FhirPathError, FhirPathResult};
use crate::model::datetime::{FhirDate, FhirDateTime, FhirTime};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, multispace0},
    combinator::{map, not, opt, peek, recognize, value},
    multi::{many0, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};
use rust_decimal::Decimal;
use std::str::FromStr;

/// FHIRPath expression parser.
pub struct FhirPathParser;

impl FhirPathParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a FHIRPath expression from a string.
    pub fn parse(&self, input: &str) -> FhirPathResult<FhirPathExpression> {
        match parse_expression(input.trim()) {
            Ok((remaining, expr)) => {
                let remaining = remaining.trim();
                if remaining.is_empty() {
                    Ok(FhirPathExpression { root: expr })
                } else {
                    Err(FhirPathError::syntax_error(
                        input.len() - remaining.len(),
                        format!("unexpected trailing input: {remaining}"),
                    ))
                }
            }
            Err(e) => Err(FhirPathError::syntax_error(0, format!("{e}"))),
        }
    }
}

impl Default for FhirPathParser {
    fn default() -> Self {
        Self::new()
    }
}

// Whitespace handling
fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O> + 'a,
{
    delimited(multispace0, inner, multispace0)
}

/// Match a keyword with a word boundary, so `divide` is an identifier and
/// not `div` + `ide`.
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    move |input| {
        let (rest, matched) = tag(kw)(input)?;
        let (rest, _) = not(peek(take_while1(is_identifier_char)))(rest)?;
        Ok((rest, matched))
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

// expression: lowest precedence is `implies`
pub(crate) fn parse_expression(input: &str) -> IResult<&str, Expression> {
    let (input, first) = parse_or_expression(input)?;
    let (input, rest) = many0(preceded(ws(keyword("implies")), parse_or_expression))(input)?;

    Ok((
        input,
        rest.into_iter().fold(first, |acc, expr| Expression::Implies {
            left: Box::new(acc),
            right: Box::new(expr),
        }),
    ))
}

fn parse_or_expression(input: &str) -> IResult<&str, Expression> {
    let (input, first) = parse_and_expression(input)?;
    let (input, rest) = many0(tuple((
        ws(alt((
            value(OrOperator::Or, keyword("or")),
            value(OrOperator::Xor, keyword("xor")),
        ))),
        parse_and_expression,
    )))(input)?;

    Ok((
        input,
        rest.into_iter().fold(first, |acc, (operator, expr)| {
            Expression::Or {
                left: Box::new(acc),
                operator,
                right: Box::new(expr),
            }
        }),
    ))
}

fn parse_and_expression(input: &str) -> IResult<&str, Expression> {
    let (input, first) = parse_membership_expression(input)?;
    let (input, rest) = many0(preceded(ws(keyword("and")), parse_membership_expression))(input)?;

    Ok((
        input,
        rest.into_iter().fold(first, |acc, expr| Expression::And {
            left: Box::new(acc),
            right: Box::new(expr),
        }),
    ))
}

fn parse_membership_expression(input: &str) -> IResult<&str, Expression> {
    let (input, first) = parse_equality_expression(input)?;
    let (input, rest) = many0(tuple((
        ws(alt((
            value(MembershipOperator::In, keyword("in")),
            value(MembershipOperator::Contains, keyword("contains")),
        ))),
        parse_equality_expression,
    )))(input)?;

    Ok((
        input,
        rest.into_iter().fold(first, |acc, (operator, expr)| {
            Expression::Membership {
                left: Box::new(acc),
                operator,
                right: Box::new(expr),
            }
        }),
    ))
}

fn parse_equality_expression(input: &str) -> IResult<&str, Expression> {
    let (input, first) = parse_inequality_expression(input)?;
    let (input, rest) = many0(tuple((
        ws(alt((
            value(EqualityOperator::NotEqual, tag("!=")),
            value(EqualityOperator::NotEquivalent, tag("!~")),
            value(EqualityOperator::Equal, char('=')),
            value(EqualityOperator::Equivalent, char('~')),
        ))),
        parse_inequality_expression,
    )))(input)?;

    Ok((
        input,
        rest.into_iter().fold(first, |acc, (operator, expr)| {
            Expression::Equality {
                left: Box::new(acc),
                operator,
                right: Box::new(expr),
            }
        }),
    ))
}

fn parse_inequality_expression(input: &str) -> IResult<&str, Expression> {
    let (input, first) = parse_union_expression(input)?;
    let (input, rest) = many0(tuple((
        ws(alt((
            value(InequalityOperator::LessOrEqual, tag("<=")),
            value(InequalityOperator::GreaterOrEqual, tag(">=")),
            value(InequalityOperator::Less, char('<')),
            value(InequalityOperator::Greater, char('>')),
        ))),
        parse_union_expression,
    )))(input)?;

    Ok((
        input,
        rest.into_iter().fold(first, |acc, (operator, expr)| {
            Expression::Inequality {
                left: Box::new(acc),
                operator,
                right: Box::new(expr),
            }
        }),
    ))
}

fn parse_union_expression(input: &str) -> IResult<&str, Expression> {
    let (input, first) = parse_type_expression(input)?;
    let (input, rest) = many0(preceded(ws(char('|')), parse_type_expression))(input)?;

    Ok((
        input,
        rest.into_iter().fold(first, |acc, expr| Expression::Union {
            left: Box::new(acc),
            right: Box::new(expr),
        }),
    ))
}

fn parse_type_expression(input: &str) -> IResult<&str, Expression> {
    let (input, first) = parse_additive_expression(input)?;
    let (input, rest) = many0(tuple((
        ws(alt((
            value(TypeOperator::Is, keyword("is")),
            value(TypeOperator::As, keyword("as")),
        ))),
        parse_type_specifier,
    )))(input)?;

    Ok((
        input,
        rest.into_iter()
            .fold(first, |acc, (operator, type_specifier)| Expression::Type {
                left: Box::new(acc),
                operator,
                type_specifier,
            }),
    ))
}

fn parse_type_specifier(input: &str) -> IResult<&str, TypeSpecifier> {
    let (input, qualified_name) = separated_list1(char('.'), parse_identifier)(input)?;
    Ok((input, TypeSpecifier { qualified_name }))
}

fn parse_additive_expression(input: &str) -> IResult<&str, Expression> {
    let (input, first) = parse_multiplicative_expression(input)?;
    let (input, rest) = many0(tuple((
        ws(alt((
            value(AdditiveOperator::Plus, char('+')),
            value(AdditiveOperator::Minus, char('-')),
            value(AdditiveOperator::Concatenate, char('&')),
        ))),
        parse_multiplicative_expression,
    )))(input)?;

    Ok((
        input,
        rest.into_iter().fold(first, |acc, (operator, expr)| {
            Expression::Additive {
                left: Box::new(acc),
                operator,
                right: Box::new(expr),
            }
        }),
    ))
}

fn parse_multiplicative_expression(input: &str) -> IResult<&str, Expression> {
    let (input, first) = parse_polarity_expression(input)?;
    let (input, rest) = many0(tuple((
        ws(alt((
            value(MultiplicativeOperator::Multiply, char('*')),
            value(MultiplicativeOperator::Divide, char('/')),
            value(MultiplicativeOperator::Div, keyword("div")),
            value(MultiplicativeOperator::Mod, keyword("mod")),
        ))),
        parse_polarity_expression,
    )))(input)?;

    Ok((
        input,
        rest.into_iter().fold(first, |acc, (operator, expr)| {
            Expression::Multiplicative {
                left: Box::new(acc),
                operator,
                right: Box::new(expr),
            }
        }),
    ))
}

fn parse_polarity_expression(input: &str) -> IResult<&str, Expression> {
    alt((
        map(
            pair(
                ws(alt((
                    value(PolarityOperator::Plus, char('+')),
                    value(PolarityOperator::Minus, char('-')),
                ))),
                parse_polarity_expression,
            ),
            |(operator, operand)| Expression::Polarity {
                operator,
                operand: Box::new(operand),
            },
        ),
        parse_postfix_expression,
    ))(input)
}

// Postfix chain: term followed by `.member`, `.fn(args)`, or `[index]`
fn parse_postfix_expression(input: &str) -> IResult<&str, Expression> {
    let (input, term) = parse_term(input)?;
    let mut expr = Expression::Term(term);

    let (input, postfixes) = many0(alt((
        map(preceded(ws(char('.')), parse_invocation), Postfix::Invocation),
        map(
            delimited(ws(char('[')), parse_expression, ws(char(']'))),
            Postfix::Index,
        ),
    )))(input)?;

    for postfix in postfixes {
        expr = match postfix {
            Postfix::Invocation(invocation) => Expression::Invocation {
                left: Box::new(expr),
                invocation,
            },
            Postfix::Index(index) => Expression::Indexer {
                left: Box::new(expr),
                index: Box::new(index),
            },
        };
    }

    Ok((input, expr))
}

enum Postfix {
    Invocation(Invocation),
    Index(Expression),
}

fn parse_term(input: &str) -> IResult<&str, Term> {
    alt((
        map(parse_literal, Term::Literal),
        map(parse_external_constant, Term::ExternalConstant),
        map(
            delimited(ws(char('(')), parse_expression, ws(char(')'))),
            |e| Term::Parenthesized(Box::new(e)),
        ),
        map(parse_invocation, Term::Invocation),
    ))(input)
}

fn parse_invocation(input: &str) -> IResult<&str, Invocation> {
    alt((
        value(Invocation::This, keyword("$this")),
        value(Invocation::Index, keyword("$index")),
        value(Invocation::Total, keyword("$total")),
        parse_function_invocation,
        map(parse_identifier, Invocation::Member),
    ))(input)
}

fn parse_function_invocation(input: &str) -> IResult<&str, Invocation> {
    let (input, name) = parse_identifier(input)?;
    let (input, _) = ws(char('('))(input)?;
    let (input, parameters) = separated_list0(ws(char(',')), parse_expression)(input)?;
    let (input, _) = ws(char(')'))(input)?;
    Ok((input, Invocation::Function { name, parameters }))
}

fn parse_identifier(input: &str) -> IResult<&str, String> {
    alt((parse_delimited_identifier, parse_bare_identifier))(input)
}

fn parse_bare_identifier(input: &str) -> IResult<&str, String> {
    map(
        recognize(pair(
            take_while1(is_identifier_start),
            take_while(is_identifier_char),
        )),
        |s: &str| s.to_string(),
    )(input)
}

fn parse_delimited_identifier(input: &str) -> IResult<&str, String> {
    map(
        delimited(char('`'), take_while1(|c| c != '`'), char('`')),
        |s: &str| s.to_string(),
    )(input)
}

fn parse_external_constant(input: &str) -> IResult<&str, String> {
    preceded(
        char('%'),
        alt((parse_identifier, parse_string_contents)),
    )(input)
}

// ============================================================================
// Literals
// ============================================================================

fn parse_literal(input: &str) -> IResult<&str, Literal> {
    alt((
        parse_null_literal,
        parse_boolean_literal,
        parse_temporal_literal,
        parse_quantity_literal,
        parse_number_literal,
        map(parse_string_contents, Literal::String),
    ))(input)
}

fn parse_null_literal(input: &str) -> IResult<&str, Literal> {
    value(Literal::Null, pair(ws(char('{')), char('}')))(input)
}

fn parse_boolean_literal(input: &str) -> IResult<&str, Literal> {
    alt((
        value(Literal::Boolean(true), keyword("true")),
        value(Literal::Boolean(false), keyword("false")),
    ))(input)
}

/// `@2024-03-15`, `@2024-03-15T10:30:00Z`, `@T14:30`
fn parse_temporal_literal(input: &str) -> IResult<&str, Literal> {
    let (input, _) = char('@')(input)?;

    if let Some(rest) = input.strip_prefix('T') {
        let (rest, body) = take_while1(is_temporal_char)(rest)?;
        let time = FhirTime::from_str(body)
            .map_err(|_| nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Verify)))?;
        return Ok((rest, Literal::Time(time)));
    }

    let (rest, body) = take_while1(is_temporal_char)(input)?;
    if body.contains('T') {
        let datetime = FhirDateTime::from_str(body)
            .map_err(|_| nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Verify)))?;
        Ok((rest, Literal::DateTime(datetime)))
    } else {
        let date = FhirDate::from_str(body)
            .map_err(|_| nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Verify)))?;
        Ok((rest, Literal::Date(date)))
    }
}

fn is_temporal_char(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '-' | ':' | '+' | '.' | 'T' | 'Z')
}

/// `5 'mg'`, `10.5'kg'`, `6 months`
fn parse_quantity_literal(input: &str) -> IResult<&str, Literal> {
    let (input, number) = parse_decimal_text(input)?;
    let (input, _) = multispace0(input)?;
    let (input, unit) = alt((
        map(parse_string_contents, Some),
        map(parse_duration_keyword, |kw| Some(kw.to_string())),
    ))(input)?;

    let literal_value = Decimal::from_str(number)
        .map_err(|_| nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Verify)))?;
    Ok((
        input,
        Literal::Quantity {
            value: literal_value,
            unit: unit.filter(|u| !u.is_empty()),
        },
    ))
}

fn parse_duration_keyword(input: &str) -> IResult<&str, &str> {
    // Plural forms first to avoid partial matches
    alt((
        keyword("milliseconds"),
        keyword("millisecond"),
        keyword("seconds"),
        keyword("second"),
        keyword("minutes"),
        keyword("minute"),
        keyword("hours"),
        keyword("hour"),
        keyword("days"),
        keyword("day"),
        keyword("weeks"),
        keyword("week"),
        keyword("months"),
        keyword("month"),
        keyword("years"),
        keyword("year"),
    ))(input)
}

fn parse_number_literal(input: &str) -> IResult<&str, Literal> {
    let (input, number) = parse_decimal_text(input)?;
    if number.contains('.') {
        let literal_value = Decimal::from_str(number).map_err(|_| {
            nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Verify))
        })?;
        return Ok((input, Literal::Decimal(literal_value)));
    }

    let (input, long_suffix) = opt(char('L'))(input)?;
    let parsed: i64 = number
        .parse()
        .map_err(|_| nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Verify)))?;
    Ok((
        input,
        if long_suffix.is_some() {
            Literal::Long(parsed)
        } else {
            Literal::Integer(parsed)
        },
    ))
}

/// The textual form of a number: digits with an optional fraction. The
/// fraction requires a digit so the postfix `.` chain is left intact.
fn parse_decimal_text(input: &str) -> IResult<&str, &str> {
    recognize(pair(digit1, opt(pair(char('.'), digit1))))(input)
}

fn parse_string_contents(input: &str) -> IResult<&str, String> {
    let (mut rest, _) = char('\'')(input)?;
    let mut result = String::new();

    loop {
        let mut chars = rest.char_indices();
        match chars.next() {
            None => {
                return Err(nom::Err::Error(nom::error::Error::new(
                    input,
                    nom::error::ErrorKind::Char,
                )))
            }
            Some((_, '\'')) => {
                rest = &rest[1..];
                break;
            }
            Some((_, '\\')) => {
                let Some((idx, escaped)) = chars.next() else {
                    return Err(nom::Err::Error(nom::error::Error::new(
                        input,
                        nom::error::ErrorKind::Char,
                    )));
                };
                match escaped {
                    '\'' => result.push('\''),
                    '"' => result.push('"'),
                    '`' => result.push('`'),
                    '\\' => result.push('\\'),
                    '/' => result.push('/'),
                    'f' => result.push('\u{000C}'),
                    'n' => result.push('\n'),
                    'r' => result.push('\r'),
                    't' => result.push('\t'),
                    'u' => {
                        let hex = rest.get(idx + 1..idx + 5).ok_or_else(|| {
                            nom::Err::Error(nom::error::Error::new(
                                input,
                                nom::error::ErrorKind::Char,
                            ))
                        })?;
                        let code = u32::from_str_radix(hex, 16).map_err(|_| {
                            nom::Err::Error(nom::error::Error::new(
                                input,
                                nom::error::ErrorKind::Char,
                            ))
                        })?;
                        result.push(char::from_u32(code).unwrap_or('\u{FFFD}'));
                        rest = &rest[idx + 5..];
                        continue;
                    }
                    other => result.push(other),
                }
                rest = &rest[idx + escaped.len_utf8()..];
            }
            Some((idx, c)) => {
                result.push(c);
                rest = &rest[idx + c.len_utf8()..];
            }
        }
    }

    Ok((rest, result))
}
