//! FHIRPath Abstract Syntax Tree types.
//!
//! The tree mirrors the published FHIRPath grammar: an expression is a chain
//! of invocations over terms combined by the operator precedence ladder.

use crate::model::datetime::{DateTimePrecision, FhirDate, FhirDateTime, FhirTime};
use rust_decimal::Decimal;

/// A parsed FHIRPath expression.
#[derive(Debug, Clone, PartialEq)]
pub struct FhirPathExpression {
    pub root: Expression,
}

/// Expression node, one variant per precedence level of the grammar.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Term(Term),
    /// `left.invocation`
    Invocation {
        left: Box<Expression>,
        invocation: Invocation,
    },
    /// `left[index]`
    Indexer {
        left: Box<Expression>,
        index: Box<Expression>,
    },
    /// Unary `+` / `-`
    Polarity {
        operator: PolarityOperator,
        operand: Box<Expression>,
    },
    Multiplicative {
        left: Box<Expression>,
        operator: MultiplicativeOperator,
        right: Box<Expression>,
    },
    Additive {
        left: Box<Expression>,
        operator: AdditiveOperator,
        right: Box<Expression>,
    },
    /// `value is Type` / `value as Type`
    Type {
        left: Box<Expression>,
        operator: TypeOperator,
        type_specifier: TypeSpecifier,
    },
    /// `left | right`
    Union {
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Inequality {
        left: Box<Expression>,
        operator: InequalityOperator,
        right: Box<Expression>,
    },
    Equality {
        left: Box<Expression>,
        operator: EqualityOperator,
        right: Box<Expression>,
    },
    Membership {
        left: Box<Expression>,
        operator: MembershipOperator,
        right: Box<Expression>,
    },
    And {
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Or {
        left: Box<Expression>,
        operator: OrOperator,
        right: Box<Expression>,
    },
    Implies {
        left: Box<Expression>,
        right: Box<Expression>,
    },
}

/// A primary term.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Literal(Literal),
    /// A bare invocation applied to the input collection: `name`, `fn()`,
    /// `$this`
    Invocation(Invocation),
    /// `%name` external constant
    ExternalConstant(String),
    Parenthesized(Box<Expression>),
}

/// Member access, function call, or one of the `$` variables.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Member(String),
    Function {
        name: String,
        parameters: Vec<Expression>,
    },
    This,
    Index,
    Total,
}

/// Literal values.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// `{}`
    Null,
    Boolean(bool),
    String(String),
    Integer(i64),
    Long(i64),
    Decimal(Decimal),
    Date(FhirDate),
    DateTime(FhirDateTime),
    Time(FhirTime),
    Quantity {
        value: Decimal,
        /// UCUM code, calendar duration keyword, or absent for `5 ''`
        unit: Option<String>,
    },
}

/// A (possibly qualified) type name, e.g. `Integer` or `System.String`.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeSpecifier {
    pub qualified_name: Vec<String>,
}

impl TypeSpecifier {
    /// The unqualified type name.
    pub fn name(&self) -> &str {
        self.qualified_name.last().map(String::as_str).unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolarityOperator {
    Plus,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiplicativeOperator {
    Multiply,
    Divide,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdditiveOperator {
    Plus,
    Minus,
    /// `&` string concatenation, treating empty as `""`
    Concatenate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeOperator {
    Is,
    As,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InequalityOperator {
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqualityOperator {
    Equal,
    NotEqual,
    Equivalent,
    NotEquivalent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipOperator {
    In,
    Contains,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrOperator {
    Or,
    Xor,
}

/// Re-exported so AST consumers see duration precisions alongside literals.
pub use crate::model::datetime::DateTimePrecision as DurationPrecision;

impl Literal {
    /// The duration precision of a calendar-unit quantity literal, if any.
    pub fn duration_precision(&self) -> Option<DateTimePrecision> {
        match self {
            Literal::Quantity {
                unit: Some(unit), ..
            } => DateTimePrecision::from_unit(unit),
            _ => None,
        }
    }
}
