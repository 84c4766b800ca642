//! ELM expression node model.
//!
//! The `type` field discriminates nodes (serde's internally tagged
//! representation). The node set is the one this crate's own serializer
//! produces; loading is strict on `type` (unknown node types become
//! [`ElmExpression::Unknown`], which the interpreter rejects) and lenient on
//! unknown fields.

use serde::{Deserialize, Serialize};

/// An ELM expression node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ElmExpression {
    // === Literals and selectors ===
    Literal(Literal),
    Null(Null),
    List(ListExpr),
    Interval(IntervalExpr),
    Tuple(TupleExpr),
    Quantity(QuantityExpr),
    Ratio(RatioExpr),
    Code(CodeExpr),
    Concept(ConceptExpr),

    // === References ===
    ExpressionRef(NamedRef),
    ParameterRef(NamedRef),
    OperandRef(NamedRef),
    AliasRef(NamedRef),
    QueryLetRef(NamedRef),
    CodeRef(NamedRef),
    ConceptRef(NamedRef),
    ValueSetRef(NamedRef),
    CodeSystemRef(NamedRef),
    FunctionRef(FunctionRef),
    Property(Property),

    // === Control flow ===
    If(IfExpr),
    Case(CaseExpr),

    // === Logic ===
    And(NaryExpression),
    Or(NaryExpression),
    Xor(NaryExpression),
    Implies(NaryExpression),
    Not(UnaryExpression),
    IsNull(UnaryExpression),
    IsTrue(UnaryExpression),
    IsFalse(UnaryExpression),
    Coalesce(NaryExpression),

    // === Comparison ===
    Equal(NaryExpression),
    NotEqual(NaryExpression),
    Equivalent(NaryExpression),
    Less(NaryExpression),
    LessOrEqual(NaryExpression),
    Greater(NaryExpression),
    GreaterOrEqual(NaryExpression),

    // === Arithmetic ===
    Add(NaryExpression),
    Subtract(NaryExpression),
    Multiply(NaryExpression),
    Divide(NaryExpression),
    TruncatedDivide(NaryExpression),
    Modulo(NaryExpression),
    Power(NaryExpression),
    Negate(UnaryExpression),
    Concatenate(NaryExpression),

    // === Type operations ===
    Is(IsExpr),
    As(AsExpr),

    // === Lists and aggregates ===
    Exists(UnaryExpression),
    Count(AggregateExpression),
    Sum(AggregateExpression),
    Avg(AggregateExpression),
    Min(AggregateExpression),
    Max(AggregateExpression),
    First(AggregateExpression),
    Last(AggregateExpression),
    Distinct(UnaryExpression),
    Flatten(UnaryExpression),
    SingletonFrom(UnaryExpression),
    Indexer(NaryExpression),
    Union(NaryExpression),
    Intersect(NaryExpression),
    Except(NaryExpression),
    In(PrecisionBinary),
    Contains(PrecisionBinary),
    InValueSet(InValueSet),

    // === Intervals and timing ===
    Start(UnaryExpression),
    End(UnaryExpression),
    Width(UnaryExpression),
    PointFrom(UnaryExpression),
    Predecessor(UnaryExpression),
    Successor(UnaryExpression),
    Before(PrecisionBinary),
    After(PrecisionBinary),
    SameAs(PrecisionBinary),
    SameOrBefore(PrecisionBinary),
    SameOrAfter(PrecisionBinary),
    Overlaps(PrecisionBinary),
    OverlapsBefore(PrecisionBinary),
    OverlapsAfter(PrecisionBinary),
    Meets(PrecisionBinary),
    MeetsBefore(PrecisionBinary),
    MeetsAfter(PrecisionBinary),
    Starts(PrecisionBinary),
    Ends(PrecisionBinary),
    Includes(PrecisionBinary),
    IncludedIn(PrecisionBinary),
    ProperIncludes(PrecisionBinary),
    ProperIncludedIn(PrecisionBinary),
    DurationBetween(PrecisionBinary),
    DifferenceBetween(PrecisionBinary),
    DateTimeComponentFrom(DateTimeComponentFrom),

    // === Query and retrieve ===
    Query(Query),
    Retrieve(Retrieve),

    /// Unrecognized node type; rejected at evaluation time.
    #[serde(other)]
    Unknown,
}

impl Default for ElmExpression {
    fn default() -> Self {
        ElmExpression::Null(Null::default())
    }
}

/// A literal with its ELM value type, e.g.
/// `{urn:hl7-org:elm-types:r1}Integer`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Literal {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Null {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListExpr {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub element: Vec<ElmExpression>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalExpr {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low: Option<Box<ElmExpression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high: Option<Box<ElmExpression>>,
    #[serde(default = "default_true")]
    pub low_closed: bool,
    #[serde(default = "default_true")]
    pub high_closed: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TupleExpr {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub element: Vec<TupleElement>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TupleElement {
    pub name: String,
    pub value: Box<ElmExpression>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuantityExpr {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatioExpr {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numerator: Option<QuantityExpr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denominator: Option<QuantityExpr>,
}

/// Inline code value referencing a code system by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeExpr {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<NamedRefPlain>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConceptExpr {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub code: Vec<CodeExpr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

/// A reference by name (ExpressionRef, ParameterRef, AliasRef, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library_name: Option<String>,
}

/// A plain (untagged) name reference used inside Code values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedRefPlain {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operand: Vec<ElmExpression>,
}

/// Property access: `scope` names a query alias, `source` is an inner
/// expression; `path` may be dotted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Property {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Box<ElmExpression>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IfExpr {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Box<ElmExpression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub then: Option<Box<ElmExpression>>,
    #[serde(rename = "else", skip_serializing_if = "Option::is_none")]
    pub else_branch: Option<Box<ElmExpression>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseExpr {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparand: Option<Box<ElmExpression>>,
    #[serde(default, rename = "caseItem", skip_serializing_if = "Vec::is_empty")]
    pub case_item: Vec<CaseItem>,
    #[serde(rename = "else", skip_serializing_if = "Option::is_none")]
    pub else_branch: Option<Box<ElmExpression>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<Box<ElmExpression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub then: Option<Box<ElmExpression>>,
}

/// One operand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnaryExpression {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operand: Option<Box<ElmExpression>>,
}

/// Two or more operands (`operand: [...]`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NaryExpression {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operand: Vec<ElmExpression>,
}

/// Binary operands plus an optional date/time precision qualifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrecisionBinary {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operand: Vec<ElmExpression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateExpression {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Box<ElmExpression>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsExpr {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operand: Option<Box<ElmExpression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsExpr {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operand: Option<Box<ElmExpression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub as_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InValueSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<Box<ElmExpression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valueset: Option<NamedRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateTimeComponentFrom {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operand: Option<Box<ElmExpression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<String>,
}

// ============================================================================
// Query
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source: Vec<AliasedQuerySource>,
    #[serde(default, rename = "let", skip_serializing_if = "Vec::is_empty")]
    pub let_clause: Vec<LetClause>,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<Box<ElmExpression>>,
    #[serde(rename = "return", skip_serializing_if = "Option::is_none")]
    pub return_clause: Option<ReturnClause>,
    #[serde(rename = "aggregate", skip_serializing_if = "Option::is_none")]
    pub aggregate_clause: Option<AggregateClause>,
    #[serde(rename = "sort", skip_serializing_if = "Option::is_none")]
    pub sort_clause: Option<SortClause>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AliasedQuerySource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<Box<ElmExpression>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LetClause {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<Box<ElmExpression>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReturnClause {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<Box<ElmExpression>>,
    #[serde(default)]
    pub distinct: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateClause {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starting: Option<Box<ElmExpression>>,
    #[serde(default)]
    pub distinct: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<Box<ElmExpression>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SortClause {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub by: Vec<SortByItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SortByItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<Box<ElmExpression>>,
}

// ============================================================================
// Retrieve
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Retrieve {
    /// e.g. `{http://hl7.org/fhir}Condition`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_property: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codes: Option<Box<ElmExpression>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_literal_node_shape() {
        let node = ElmExpression::Literal(Literal {
            value_type: Some("{urn:hl7-org:elm-types:r1}Integer".to_string()),
            value: Some("7".to_string()),
        });
        let serialized = serde_json::to_value(&node).unwrap();
        assert_eq!(
            serialized,
            json!({
                "type": "Literal",
                "valueType": "{urn:hl7-org:elm-types:r1}Integer",
                "value": "7"
            })
        );
    }

    #[test]
    fn test_add_round_trip() {
        let source = json!({
            "type": "Add",
            "operand": [
                {"type": "Literal", "valueType": "{urn:hl7-org:elm-types:r1}Integer", "value": "1"},
                {"type": "Literal", "valueType": "{urn:hl7-org:elm-types:r1}Integer", "value": "2"}
            ]
        });
        let node: ElmExpression = serde_json::from_value(source.clone()).unwrap();
        assert!(matches!(node, ElmExpression::Add(_)));
        assert_eq!(serde_json::to_value(&node).unwrap(), source);
    }

    #[test]
    fn test_unknown_type_parses_to_unknown() {
        let node: ElmExpression =
            serde_json::from_value(json!({"type": "Message", "source": {}})).unwrap();
        assert_eq!(node, ElmExpression::Unknown);
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let node: ElmExpression = serde_json::from_value(json!({
            "type": "Null",
            "localId": "42",
            "locator": "3:10"
        }))
        .unwrap();
        assert!(matches!(node, ElmExpression::Null(_)));
    }
}
