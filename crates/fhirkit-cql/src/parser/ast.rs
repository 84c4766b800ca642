//! CQL Abstract Syntax Tree types.
//!
//! These types represent the syntactic structure of CQL source before
//! resolution; the compiler turns them into a frozen
//! [`crate::library::Library`], and the ELM translator maps them to the
//! serialized form. They are distinct from the ELM model on purpose: the
//! AST keeps CQL's surface shapes (operator phrases, selectors), ELM keeps
//! the canonical node vocabulary.

use fhirkit_fhirpath::model::datetime::{DateTimePrecision, FhirDate, FhirDateTime, FhirTime};
use rust_decimal::Decimal;

// ============================================================================
// Library structure
// ============================================================================

/// A parsed CQL library (top-level compilation unit).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Library {
    pub identifier: Option<LibraryIdentifier>,
    pub usings: Vec<UsingDef>,
    pub includes: Vec<IncludeDef>,
    pub codesystems: Vec<CodeSystemDef>,
    pub valuesets: Vec<ValueSetDef>,
    pub codes: Vec<CodeDef>,
    pub concepts: Vec<ConceptDef>,
    pub parameters: Vec<ParameterDef>,
    pub contexts: Vec<ContextDef>,
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LibraryIdentifier {
    pub name: String,
    pub version: Option<String>,
}

/// `using FHIR version '4.0.1'`
#[derive(Debug, Clone, PartialEq)]
pub struct UsingDef {
    pub model_name: String,
    pub version: Option<String>,
}

/// `include Common version '1.0' called Cmn`
#[derive(Debug, Clone, PartialEq)]
pub struct IncludeDef {
    pub path: String,
    pub version: Option<String>,
    pub alias: Option<String>,
}

/// `codesystem "SNOMED": 'http://snomed.info/sct'`
#[derive(Debug, Clone, PartialEq)]
pub struct CodeSystemDef {
    pub name: String,
    pub id: String,
    pub version: Option<String>,
    pub access: AccessModifier,
}

/// `valueset "Diabetes": 'http://example.org/vs/diabetes'`
#[derive(Debug, Clone, PartialEq)]
pub struct ValueSetDef {
    pub name: String,
    pub id: String,
    pub version: Option<String>,
    pub codesystems: Vec<String>,
    pub access: AccessModifier,
}

/// `code "T2D": '44054006' from "SNOMED" display 'Type 2 diabetes'`
#[derive(Debug, Clone, PartialEq)]
pub struct CodeDef {
    pub name: String,
    pub code: String,
    pub codesystem: String,
    pub display: Option<String>,
    pub access: AccessModifier,
}

/// `concept "Diabetes": { "T2D", "T1D" } display 'Diabetes'`
#[derive(Debug, Clone, PartialEq)]
pub struct ConceptDef {
    pub name: String,
    pub codes: Vec<String>,
    pub display: Option<String>,
    pub access: AccessModifier,
}

/// `parameter MeasurementPeriod Interval<Date> default Interval[@2024-01-01, @2024-12-31]`
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDef {
    pub name: String,
    pub type_specifier: Option<TypeSpecifier>,
    pub default: Option<Expression>,
    pub access: AccessModifier,
}

/// `context Patient`
#[derive(Debug, Clone, PartialEq)]
pub struct ContextDef {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessModifier {
    #[default]
    Public,
    Private,
}

// ============================================================================
// Statements
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    ExpressionDef(ExpressionDef),
    FunctionDef(FunctionDef),
}

/// `define "In Population": ...`
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionDef {
    pub name: String,
    pub expression: Expression,
    pub context: Option<String>,
    pub access: AccessModifier,
}

/// `define function AgeAt(d Date) returns Integer: ...`
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub parameters: Vec<FunctionParameter>,
    pub return_type: Option<TypeSpecifier>,
    pub body: Option<Expression>,
    pub fluent: bool,
    pub external: bool,
    pub context: Option<String>,
    pub access: AccessModifier,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionParameter {
    pub name: String,
    pub type_specifier: Option<TypeSpecifier>,
}

// ============================================================================
// Type specifiers
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum TypeSpecifier {
    /// `Integer`, `FHIR.Patient`
    Named {
        namespace: Option<String>,
        name: String,
    },
    /// `List<Integer>`
    List(Box<TypeSpecifier>),
    /// `Interval<Date>`
    Interval(Box<TypeSpecifier>),
    /// `Tuple { name String, age Integer }`
    Tuple(Vec<(String, TypeSpecifier)>),
    /// `Choice<Integer, String>`
    Choice(Vec<TypeSpecifier>),
}

impl TypeSpecifier {
    /// The unqualified name for a named specifier.
    pub fn simple_name(&self) -> Option<&str> {
        match self {
            TypeSpecifier::Named { name, .. } => Some(name),
            _ => None,
        }
    }
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Literal),
    /// Unqualified reference: definition, parameter, terminology name,
    /// alias, or operand.
    Identifier(String),
    /// `Alias.Name` or `Model.Type` member chain root.
    QualifiedIdentifier {
        qualifier: String,
        name: String,
    },
    Unary {
        op: UnaryOperator,
        operand: Box<Expression>,
    },
    Binary {
        op: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
        /// Precision qualifier on temporal phrases (`same day as`, …)
        precision: Option<DateTimePrecision>,
    },
    /// `x between low and high`
    Between {
        operand: Box<Expression>,
        low: Box<Expression>,
        high: Box<Expression>,
    },
    /// `A within 3 days of B`
    Within {
        left: Box<Expression>,
        quantity: Box<Expression>,
        right: Box<Expression>,
    },
    /// `year from X`
    DateTimeComponent {
        precision: DateTimePrecision,
        operand: Box<Expression>,
    },
    /// `years between A and B` / `difference in years between A and B`
    DurationBetween {
        precision: DateTimePrecision,
        low: Box<Expression>,
        high: Box<Expression>,
        /// true for boundary-counting `difference in`, false for `duration in`
        difference: bool,
    },
    If {
        condition: Box<Expression>,
        then_branch: Box<Expression>,
        else_branch: Box<Expression>,
    },
    Case {
        comparand: Option<Box<Expression>>,
        items: Vec<CaseItem>,
        else_branch: Box<Expression>,
    },
    FunctionCall {
        library: Option<String>,
        name: String,
        arguments: Vec<Expression>,
    },
    /// `value.fn(args)` — fluent functions get the source prepended to
    /// their arguments; built-ins treat the source as their input.
    MethodCall {
        source: Box<Expression>,
        name: String,
        arguments: Vec<Expression>,
    },
    Member {
        source: Box<Expression>,
        name: String,
    },
    Index {
        source: Box<Expression>,
        index: Box<Expression>,
    },
    Is {
        operand: Box<Expression>,
        type_specifier: TypeSpecifier,
        negated: bool,
    },
    As {
        operand: Box<Expression>,
        type_specifier: TypeSpecifier,
    },
    /// `x is null` / `x is not null` / `is true` / `is false`
    NullTest {
        operand: Box<Expression>,
        test: NullTest,
        negated: bool,
    },
    Interval(IntervalSelector),
    List(Vec<Expression>),
    Tuple(Vec<(String, Expression)>),
    Query(Query),
    Retrieve(Retrieve),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseItem {
    pub when: Expression,
    pub then: Expression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullTest {
    Null,
    True,
    False,
}

/// `Interval[low, high)` — each endpoint independently closed or open.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalSelector {
    pub low: Box<Expression>,
    pub high: Box<Expression>,
    pub low_closed: bool,
    pub high_closed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i64),
    Long(i64),
    Decimal(Decimal),
    String(String),
    Date(FhirDate),
    DateTime(FhirDateTime),
    Time(FhirTime),
    Quantity { value: Decimal, unit: String },
    Ratio {
        numerator: (Decimal, String),
        denominator: (Decimal, String),
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Negate,
    Exists,
    Distinct,
    Flatten,
    Singleton,
    Start,
    End,
    Width,
    PointFrom,
    Predecessor,
    Successor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    TruncatedDivide,
    Modulo,
    Power,
    // String
    Concatenate,
    // Comparison
    Equal,
    NotEqual,
    Equivalent,
    NotEquivalent,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    // Logic
    And,
    Or,
    Xor,
    Implies,
    // Membership
    In,
    Contains,
    // List/interval algebra
    Union,
    Intersect,
    Except,
    Includes,
    IncludedIn,
    ProperlyIncludes,
    ProperlyIncludedIn,
    // Timing phrases
    Overlaps,
    OverlapsBefore,
    OverlapsAfter,
    Meets,
    MeetsBefore,
    MeetsAfter,
    Starts,
    Ends,
    Before,
    After,
    SameAs,
    SameOrBefore,
    SameOrAfter,
}

// ============================================================================
// Query
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub sources: Vec<AliasedSource>,
    pub lets: Vec<LetClause>,
    pub where_clause: Option<Box<Expression>>,
    pub return_clause: Option<ReturnClause>,
    pub aggregate_clause: Option<AggregateClause>,
    pub sort_clause: Option<SortClause>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AliasedSource {
    pub expression: Box<Expression>,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LetClause {
    pub identifier: String,
    pub expression: Box<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnClause {
    pub distinct: bool,
    pub expression: Box<Expression>,
}

/// `aggregate [distinct] Acc starting 0: Acc + X`
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateClause {
    pub identifier: String,
    pub starting: Option<Box<Expression>>,
    pub distinct: bool,
    pub expression: Box<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortClause {
    pub items: Vec<SortItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortItem {
    /// `None` sorts by the result element itself (`sort asc`)
    pub expression: Option<Box<Expression>>,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

// ============================================================================
// Retrieve
// ============================================================================

/// `[Condition: code in "Diabetes"]`
#[derive(Debug, Clone, PartialEq)]
pub struct Retrieve {
    pub resource_type: String,
    /// The code path; `code` when a terminology filter is given bare.
    pub code_path: Option<String>,
    pub comparator: Option<RetrieveComparator>,
    /// Value set or code reference expression.
    pub terminology: Option<Box<Expression>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrieveComparator {
    In,
    Equivalent,
    Equal,
}
