//! CQL lexical utilities: whitespace and comments, keywords, identifiers,
//! and literal parsing.
//!
//! CQL identifiers come in three forms: bare, double-quoted (`"Inpatient
//! Encounters"`), and backtick-delimited. Strings use single quotes.
//! Comments are `//` to end of line and `/* ... */`.

use fhirkit_fhirpath::model::datetime::{DateTimePrecision, FhirDate, FhirDateTime, FhirTime};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_until, take_while, take_while1},
    character::complete::{char, digit1, multispace1},
    combinator::{map, not, opt, peek, recognize, value},
    multi::many0,
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Words that terminate an identifier position (query aliases, etc.).
pub const RESERVED_WORDS: &[&str] = &[
    "and", "or", "xor", "implies", "not", "true", "false", "null", "is", "as", "in", "contains",
    "properly", "between", "from", "where", "return", "all", "distinct", "sort", "by", "asc",
    "ascending", "desc", "descending", "let", "such", "that", "with", "without", "aggregate",
    "starting", "if", "then", "else", "case", "when", "end", "union", "intersect", "except",
    "includes", "included", "during", "meets", "overlaps", "starts", "ends", "before", "after",
    "same", "within", "of", "day", "days", "week", "weeks", "month", "months", "year", "years",
    "hour", "hours", "minute", "minutes", "second", "seconds", "millisecond", "milliseconds",
    "occurs", "interval", "div", "mod", "define", "context", "library", "using", "include",
    "parameter", "codesystem", "valueset", "code", "concept", "called", "version", "default",
    "exists", "start", "width", "successor", "predecessor", "singleton", "point", "on",
    "public", "private", "fluent", "function", "returns", "external", "display", "codesystems",
    "flatten", "duration", "difference",
];

fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Skip whitespace and comments.
pub fn skip_ws_and_comments(input: &str) -> IResult<&str, ()> {
    value(
        (),
        many0(alt((
            value((), multispace1),
            value((), pair(tag("//"), take_while(|c| c != '\n'))),
            value((), tuple((tag("/*"), take_until("*/"), tag("*/")))),
        ))),
    )(input)
}

/// Wrap a parser with whitespace/comment skipping on both sides.
pub fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O> + 'a,
{
    delimited(skip_ws_and_comments, inner, skip_ws_and_comments)
}

/// Match a keyword with a word boundary.
pub fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    move |input| {
        let (rest, matched) = tag(kw)(input)?;
        let (rest, _) = not(peek(take_while1(is_identifier_char)))(rest)?;
        Ok((rest, matched))
    }
}

/// Any identifier: bare, double-quoted, or backtick-delimited.
pub fn any_identifier(input: &str) -> IResult<&str, String> {
    alt((quoted_identifier, bare_identifier))(input)
}

/// An identifier that is not a reserved word; used where a keyword would
/// otherwise be swallowed (aliases, let names).
pub fn unreserved_identifier(input: &str) -> IResult<&str, String> {
    alt((
        quoted_identifier,
        nom::combinator::verify(bare_identifier, |s: &String| {
            !RESERVED_WORDS.contains(&s.as_str())
        }),
    ))(input)
}

fn bare_identifier(input: &str) -> IResult<&str, String> {
    map(
        recognize(pair(
            take_while1(is_identifier_start),
            take_while(is_identifier_char),
        )),
        |s: &str| s.to_string(),
    )(input)
}

/// `"Inpatient Encounters"` or `` `quoted` ``.
pub fn quoted_identifier(input: &str) -> IResult<&str, String> {
    alt((
        delimited_text('"'),
        delimited_text('`'),
    ))(input)
}

/// `'single-quoted string'` with backslash escapes.
pub fn string_literal(input: &str) -> IResult<&str, String> {
    delimited_text('\'')(input)
}

fn delimited_text(quote: char) -> impl Fn(&str) -> IResult<&str, String> {
    move |input: &str| {
        let (mut rest, _) = char(quote)(input)?;
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
                Some((_, c)) if c == quote => {
                    rest = &rest[c.len_utf8()..];
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
                        'n' => result.push('\n'),
                        'r' => result.push('\r'),
                        't' => result.push('\t'),
                        'f' => result.push('\u{000C}'),
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
}

/// The textual form of a number; the fraction requires a digit so member
/// chains like `1.combine(...)` stay intact.
pub fn decimal_text(input: &str) -> IResult<&str, &str> {
    recognize(pair(digit1, opt(pair(char('.'), digit1))))(input)
}

/// Integer, long (`5L`), or decimal literal text.
pub fn number_literal(input: &str) -> IResult<&str, NumberLiteral> {
    let (input, text) = decimal_text(input)?;
    if text.contains('.') {
        let parsed = Decimal::from_str(text).map_err(|_| {
            nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Verify))
        })?;
        return Ok((input, NumberLiteral::Decimal(parsed)));
    }
    let (input, long_suffix) = opt(char('L'))(input)?;
    let parsed: i64 = text.parse().map_err(|_| {
        nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Verify))
    })?;
    Ok((
        input,
        if long_suffix.is_some() {
            NumberLiteral::Long(parsed)
        } else {
            NumberLiteral::Integer(parsed)
        },
    ))
}

#[derive(Debug, Clone, PartialEq)]
pub enum NumberLiteral {
    Integer(i64),
    Long(i64),
    Decimal(Decimal),
}

/// `@2024-03-15`, `@2024-03-15T10:30:00Z`
pub fn date_or_datetime_literal(input: &str) -> IResult<&str, TemporalLiteral> {
    let (input, _) = char('@')(input)?;
    if let Some(rest) = input.strip_prefix('T') {
        let (rest, body) = take_while1(is_temporal_char)(rest)?;
        let time = FhirTime::from_str(body).map_err(|_| {
            nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Verify))
        })?;
        return Ok((rest, TemporalLiteral::Time(time)));
    }
    let (rest, body) = take_while1(is_temporal_char)(input)?;
    if body.contains('T') {
        let datetime = FhirDateTime::from_str(body).map_err(|_| {
            nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Verify))
        })?;
        Ok((rest, TemporalLiteral::DateTime(datetime)))
    } else {
        let date = FhirDate::from_str(body).map_err(|_| {
            nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Verify))
        })?;
        Ok((rest, TemporalLiteral::Date(date)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemporalLiteral {
    Date(FhirDate),
    DateTime(FhirDateTime),
    Time(FhirTime),
}

fn is_temporal_char(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '-' | ':' | '+' | '.' | 'T' | 'Z')
}

/// A calendar duration unit keyword, returned with its precision.
pub fn duration_unit(input: &str) -> IResult<&str, DateTimePrecision> {
    alt((
        value(DateTimePrecision::Millisecond, keyword("milliseconds")),
        value(DateTimePrecision::Millisecond, keyword("millisecond")),
        value(DateTimePrecision::Second, keyword("seconds")),
        value(DateTimePrecision::Second, keyword("second")),
        value(DateTimePrecision::Minute, keyword("minutes")),
        value(DateTimePrecision::Minute, keyword("minute")),
        value(DateTimePrecision::Hour, keyword("hours")),
        value(DateTimePrecision::Hour, keyword("hour")),
        value(DateTimePrecision::Day, keyword("days")),
        value(DateTimePrecision::Day, keyword("day")),
        value(DateTimePrecision::Week, keyword("weeks")),
        value(DateTimePrecision::Week, keyword("week")),
        value(DateTimePrecision::Month, keyword("months")),
        value(DateTimePrecision::Month, keyword("month")),
        value(DateTimePrecision::Year, keyword("years")),
        value(DateTimePrecision::Year, keyword("year")),
    ))(input)
}

/// A date/time precision name (singular), for `same day as` and friends.
pub fn precision_name(input: &str) -> IResult<&str, DateTimePrecision> {
    duration_unit(input)
}

/// The canonical unit string a duration precision denotes.
pub fn precision_unit_name(precision: DateTimePrecision) -> &'static str {
    match precision {
        DateTimePrecision::Year => "year",
        DateTimePrecision::Month => "month",
        DateTimePrecision::Week => "week",
        DateTimePrecision::Day => "day",
        DateTimePrecision::Hour => "hour",
        DateTimePrecision::Minute => "minute",
        DateTimePrecision::Second => "second",
        DateTimePrecision::Millisecond => "millisecond",
    }
}

/// `5 'mg'` or `3 months`: a number with a unit.
pub fn quantity_literal(input: &str) -> IResult<&str, (Decimal, String)> {
    let (input, text) = decimal_text(input)?;
    let (input, _) = skip_ws_and_comments(input)?;
    let (input, unit) = alt((
        string_literal,
        map(duration_unit, |p| precision_unit_name(p).to_string()),
    ))(input)?;
    let parsed = Decimal::from_str(text).map_err(|_| {
        nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Verify))
    })?;
    let unit = if unit.is_empty() { "1".to_string() } else { unit };
    Ok((input, (parsed, unit)))
}

/// Compute 1-based line and column of the first unparsed character.
pub fn position_of(source: &str, remaining: &str) -> (usize, usize) {
    let consumed = source.len().saturating_sub(remaining.len());
    let consumed_text = &source[..consumed.min(source.len())];
    let line = consumed_text.matches('\n').count() + 1;
    let column = consumed_text
        .rfind('\n')
        .map(|pos| consumed - pos)
        .unwrap_or(consumed + 1);
    (line, column)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_comments() {
        let (rest, _) = skip_ws_and_comments("  // line comment\n  /* block */  x").unwrap();
        assert_eq!(rest, "x");
    }

    #[test]
    fn test_identifiers() {
        assert_eq!(any_identifier("Foo rest").unwrap().1, "Foo");
        assert_eq!(
            any_identifier("\"Inpatient Encounters\" x").unwrap().1,
            "Inpatient Encounters"
        );
        assert!(unreserved_identifier("where").is_err());
        assert_eq!(unreserved_identifier("\"where\"").unwrap().1, "where");
    }

    #[test]
    fn test_number_literals() {
        assert_eq!(number_literal("42 ").unwrap().1, NumberLiteral::Integer(42));
        assert_eq!(number_literal("42L").unwrap().1, NumberLiteral::Long(42));
        assert_eq!(
            number_literal("3.14").unwrap().1,
            NumberLiteral::Decimal(Decimal::from_str("3.14").unwrap())
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(string_literal("'it\\'s'").unwrap().1, "it's");
        assert_eq!(string_literal("'a\\nb'").unwrap().1, "a\nb");
    }

    #[test]
    fn test_quantity_literal() {
        let (_, (value, unit)) = quantity_literal("1.5 'mg/dL'").unwrap();
        assert_eq!(value, Decimal::from_str("1.5").unwrap());
        assert_eq!(unit, "mg/dL");

        let (_, (value, unit)) = quantity_literal("20 days").unwrap();
        assert_eq!(value, Decimal::from(20));
        assert_eq!(unit, "day");
    }

    #[test]
    fn test_position_of() {
        let source = "line one\nline two";
        let remaining = "two";
        assert_eq!(position_of(source, remaining), (2, 6));
    }
}
