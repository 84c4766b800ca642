//! The runtime value model.
//!
//! Every value an expression can produce is one variant of
//! [`FhirPathValue`], a tagged sum type. Resources and elements stay as
//! opaque JSON objects; the evaluator only looks at `resourceType` and
//! member access. Numbers are `i64` or `rust_decimal::Decimal` — binary
//! floats never enter the numeric tower.

use crate::model::code::{Code, Concept};
use crate::model::datetime::{FhirDate, FhirDateTime, FhirTime};
use crate::model::interval::Interval;
use crate::model::quantity::{Quantity, Ratio};
use fhirkit_ucum::UcumConverter;
use indexmap::IndexMap;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use std::cmp::Ordering;

/// The result of evaluating a FHIRPath expression: an ordered collection.
pub type Collection = Vec<FhirPathValue>;

/// A runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum FhirPathValue {
    /// Null / missing. Distinct from an empty collection; never stored
    /// inside a collection.
    Null,
    Boolean(bool),
    Integer(i64),
    Long(i64),
    Decimal(Decimal),
    String(String),
    Date(FhirDate),
    DateTime(FhirDateTime),
    Time(FhirTime),
    Quantity(Quantity),
    Ratio(Ratio),
    Interval(Box<Interval>),
    /// Ordered name → value mapping; equality ignores insertion order.
    Tuple(IndexMap<String, FhirPathValue>),
    Code(Code),
    Concept(Concept),
    /// A FHIR resource or element as raw JSON. Resources carry
    /// `resourceType`; elements do not.
    Object(Value),
    Collection(Vec<FhirPathValue>),
}

impl FhirPathValue {
    /// Convert raw JSON into a runtime value.
    pub fn from_json(value: &Value) -> FhirPathValue {
        match value {
            Value::Null => FhirPathValue::Null,
            Value::Bool(b) => FhirPathValue::Boolean(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    FhirPathValue::Integer(i)
                } else {
                    n.as_f64()
                        .and_then(Decimal::from_f64)
                        .map(FhirPathValue::Decimal)
                        .unwrap_or(FhirPathValue::Null)
                }
            }
            Value::String(s) => FhirPathValue::String(s.clone()),
            Value::Array(items) => {
                FhirPathValue::Collection(items.iter().map(Self::from_json).collect())
            }
            Value::Object(_) => FhirPathValue::Object(value.clone()),
        }
    }

    /// Convert back to JSON (used for `%context` and data source plumbing).
    pub fn to_json(&self) -> Value {
        match self {
            FhirPathValue::Null => Value::Null,
            FhirPathValue::Boolean(b) => Value::Bool(*b),
            FhirPathValue::Integer(i) | FhirPathValue::Long(i) => Value::Number((*i).into()),
            FhirPathValue::Decimal(d) => serde_json::Number::from_f64(
                d.to_string().parse().unwrap_or_default(),
            )
            .map(Value::Number)
            .unwrap_or(Value::Null),
            FhirPathValue::String(s) => Value::String(s.clone()),
            FhirPathValue::Date(d) => Value::String(d.to_string()),
            FhirPathValue::DateTime(dt) => Value::String(dt.to_string()),
            FhirPathValue::Time(t) => Value::String(t.to_string()),
            FhirPathValue::Quantity(q) => serde_json::json!({
                "value": q.value.to_string().parse::<f64>().unwrap_or_default(),
                "unit": q.unit,
            }),
            FhirPathValue::Ratio(r) => serde_json::json!({
                "numerator": FhirPathValue::Quantity(r.numerator.clone()).to_json(),
                "denominator": FhirPathValue::Quantity(r.denominator.clone()).to_json(),
            }),
            FhirPathValue::Interval(interval) => serde_json::json!({
                "low": interval.low.to_json(),
                "high": interval.high.to_json(),
                "lowClosed": interval.low_closed,
                "highClosed": interval.high_closed,
            }),
            FhirPathValue::Tuple(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_json()))
                    .collect(),
            ),
            FhirPathValue::Code(code) => serde_json::json!({
                "code": code.code,
                "system": code.system,
                "display": code.display,
            }),
            FhirPathValue::Concept(concept) => serde_json::json!({
                "coding": concept
                    .codes
                    .iter()
                    .map(|c| FhirPathValue::Code(c.clone()).to_json())
                    .collect::<Vec<_>>(),
                "text": concept.display,
            }),
            FhirPathValue::Object(obj) => obj.clone(),
            FhirPathValue::Collection(items) => {
                Value::Array(items.iter().map(|item| item.to_json()).collect())
            }
        }
    }

    /// Wrap a collection as a single value: empty becomes `Null`, a
    /// singleton unwraps, anything else stays a collection.
    pub fn from_collection(mut items: Collection) -> FhirPathValue {
        match items.len() {
            0 => FhirPathValue::Null,
            1 => items.remove(0),
            _ => FhirPathValue::Collection(items),
        }
    }

    /// View a value as a collection: `Null` is empty, collections unwrap,
    /// anything else is a singleton.
    pub fn into_collection(self) -> Collection {
        match self {
            FhirPathValue::Null => Vec::new(),
            FhirPathValue::Collection(items) => items,
            other => vec![other],
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FhirPathValue::Null)
    }

    /// True for `Null` and for an empty collection.
    pub fn is_empty(&self) -> bool {
        match self {
            FhirPathValue::Null => true,
            FhirPathValue::Collection(items) => items.is_empty(),
            _ => false,
        }
    }

    /// Numeric view over Integer/Long/Decimal.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            FhirPathValue::Integer(i) | FhirPathValue::Long(i) => Some(Decimal::from(*i)),
            FhirPathValue::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FhirPathValue::Integer(i) | FhirPathValue::Long(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FhirPathValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            FhirPathValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// The `resourceType` of an object value, if present.
    pub fn resource_type(&self) -> Option<&str> {
        match self {
            FhirPathValue::Object(Value::Object(map)) => {
                map.get("resourceType").and_then(|v| v.as_str())
            }
            _ => None,
        }
    }

    /// Runtime type name, as reported by `type()` and used by `is`.
    pub fn type_name(&self) -> &'static str {
        match self {
            FhirPathValue::Null => "Null",
            FhirPathValue::Boolean(_) => "Boolean",
            FhirPathValue::Integer(_) => "Integer",
            FhirPathValue::Long(_) => "Long",
            FhirPathValue::Decimal(_) => "Decimal",
            FhirPathValue::String(_) => "String",
            FhirPathValue::Date(_) => "Date",
            FhirPathValue::DateTime(_) => "DateTime",
            FhirPathValue::Time(_) => "Time",
            FhirPathValue::Quantity(_) => "Quantity",
            FhirPathValue::Ratio(_) => "Ratio",
            FhirPathValue::Interval(_) => "Interval",
            FhirPathValue::Tuple(_) => "Tuple",
            FhirPathValue::Code(_) => "Code",
            FhirPathValue::Concept(_) => "Concept",
            FhirPathValue::Object(_) => "Object",
            FhirPathValue::Collection(_) => "Collection",
        }
    }

    /// Three-valued structural equality (`=`).
    ///
    /// `None` propagates unknown: null operands, mixed-precision dates with
    /// an equal common prefix, and incompatible quantity units.
    pub fn equals(&self, other: &FhirPathValue, converter: &UcumConverter) -> Option<bool> {
        use FhirPathValue::*;
        match (self, other) {
            (Null, _) | (_, Null) => None,
            (Boolean(a), Boolean(b)) => Some(a == b),
            (String(a), String(b)) => Some(a == b),
            (Date(a), Date(b)) => a.equals(b),
            (DateTime(a), DateTime(b)) => a.equals(b),
            (Date(a), DateTime(b)) | (DateTime(b), Date(a)) => {
                FhirDateTime::from_date(*a).equals(b)
            }
            (Time(a), Time(b)) => a.equals(b),
            (Quantity(a), Quantity(b)) => a.equals(b, converter),
            (Ratio(a), Ratio(b)) => Some(a == b),
            (Code(a), Code(b)) => Some(a.equals(b)),
            (Concept(a), Concept(b)) => Some(a == b),
            (Interval(a), Interval(b)) => {
                let low = a.low.equals(&b.low, converter);
                let high = a.high.equals(&b.high, converter);
                match (low, high) {
                    (Some(true), Some(true)) => {
                        Some(a.low_closed == b.low_closed && a.high_closed == b.high_closed)
                    }
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    _ => None,
                }
            }
            (Tuple(a), Tuple(b)) => {
                if a.len() != b.len() {
                    return Some(false);
                }
                let mut all_known = true;
                for (name, left) in a {
                    match b.get(name) {
                        Some(right) => match left.equals(right, converter) {
                            Some(true) => {}
                            Some(false) => return Some(false),
                            None => all_known = false,
                        },
                        None => return Some(false),
                    }
                }
                if all_known {
                    Some(true)
                } else {
                    None
                }
            }
            (Object(a), Object(b)) => Some(a == b),
            (Collection(a), Collection(b)) => {
                if a.len() != b.len() {
                    return Some(false);
                }
                let mut all_known = true;
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.equals(y, converter) {
                        Some(true) => {}
                        Some(false) => return Some(false),
                        None => all_known = false,
                    }
                }
                if all_known {
                    Some(true)
                } else {
                    None
                }
            }
            (a, b) => match (a.as_decimal(), b.as_decimal()) {
                (Some(x), Some(y)) => Some(x == y),
                _ => Some(false),
            },
        }
    }

    /// Equivalence (`~`): never unknown. Strings compare case-insensitively
    /// with collapsed whitespace; dates compare their comparable portion;
    /// `1` and `1.0` are equivalent; collections match order-independently.
    pub fn equivalent(&self, other: &FhirPathValue, converter: &UcumConverter) -> bool {
        use FhirPathValue::*;
        match (self, other) {
            (Null, Null) => true,
            (Null, other) | (other, Null) => other.is_empty(),
            (String(a), String(b)) => normalize_string(a) == normalize_string(b),
            (Date(a), Date(b)) => a.equivalent(b),
            (DateTime(a), DateTime(b)) => a.equivalent(b),
            (Date(a), DateTime(b)) | (DateTime(b), Date(a)) => {
                FhirDateTime::from_date(*a).equivalent(b)
            }
            (Time(a), Time(b)) => a.equivalent(b),
            (Quantity(a), Quantity(b)) => a.equals(b, converter).unwrap_or(false),
            (Code(a), Code(b)) => a.equivalent(b),
            (Concept(a), Concept(b)) => a.equivalent(b),
            (Collection(a), Collection(b)) => {
                if a.len() != b.len() {
                    return false;
                }
                let mut used = vec![false; b.len()];
                for item in a {
                    let Some(pos) = b
                        .iter()
                        .enumerate()
                        .position(|(i, candidate)| !used[i] && item.equivalent(candidate, converter))
                    else {
                        return false;
                    };
                    used[pos] = true;
                }
                true
            }
            (a, b) => match (a.as_decimal(), b.as_decimal()) {
                (Some(x), Some(y)) => x == y,
                _ => a.equals(b, converter).unwrap_or(false),
            },
        }
    }

    /// Three-valued ordering for `<`, `<=`, `>`, `>=`.
    pub fn compare(&self, other: &FhirPathValue, converter: &UcumConverter) -> Option<Ordering> {
        use FhirPathValue::*;
        match (self, other) {
            (String(a), String(b)) => Some(a.cmp(b)),
            (Boolean(a), Boolean(b)) => Some(a.cmp(b)),
            (Date(a), Date(b)) => a.partial_cmp_precision(b),
            (DateTime(a), DateTime(b)) => a.partial_cmp_precision(b),
            (Date(a), DateTime(b)) => FhirDateTime::from_date(*a).partial_cmp_precision(b),
            (DateTime(a), Date(b)) => a.partial_cmp_precision(&FhirDateTime::from_date(*b)),
            (Time(a), Time(b)) => a.partial_cmp_precision(b),
            (Quantity(a), Quantity(b)) => a.compare(b, converter),
            (Quantity(a), b) if a.is_dimensionless() => {
                b.as_decimal().map(|n| a.value.cmp(&n))
            }
            (a, Quantity(b)) if b.is_dimensionless() => {
                a.as_decimal().map(|n| n.cmp(&b.value))
            }
            (a, b) => match (a.as_decimal(), b.as_decimal()) {
                (Some(x), Some(y)) => Some(x.cmp(&y)),
                _ => None,
            },
        }
    }

    /// Render a value the way `toString()` does.
    pub fn display_value(&self) -> String {
        match self {
            FhirPathValue::Null => String::new(),
            FhirPathValue::Boolean(b) => b.to_string(),
            FhirPathValue::Integer(i) | FhirPathValue::Long(i) => i.to_string(),
            FhirPathValue::Decimal(d) => d.to_string(),
            FhirPathValue::String(s) => s.clone(),
            FhirPathValue::Date(d) => d.to_string(),
            FhirPathValue::DateTime(dt) => dt.to_string(),
            FhirPathValue::Time(t) => t.to_string(),
            FhirPathValue::Quantity(q) => q.to_string(),
            FhirPathValue::Ratio(r) => r.to_string(),
            FhirPathValue::Code(c) => c.to_string(),
            other => serde_json::to_string(&other.to_json()).unwrap_or_default(),
        }
    }
}

fn normalize_string(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    fn converter() -> UcumConverter {
        UcumConverter::new()
    }

    #[test]
    fn test_from_json_preserves_structure() {
        let value = FhirPathValue::from_json(&json!({"resourceType": "Patient", "id": "p1"}));
        assert_eq!(value.resource_type(), Some("Patient"));

        let list = FhirPathValue::from_json(&json!([1, 2.5, "x"]));
        let FhirPathValue::Collection(items) = list else {
            panic!("expected collection");
        };
        assert_eq!(items[0], FhirPathValue::Integer(1));
        assert_eq!(
            items[1],
            FhirPathValue::Decimal(Decimal::from_str("2.5").unwrap())
        );
    }

    #[test]
    fn test_numeric_equality_across_types() {
        let c = converter();
        let one = FhirPathValue::Integer(1);
        let one_decimal = FhirPathValue::Decimal(Decimal::from_str("1.0").unwrap());
        assert_eq!(one.equals(&one_decimal, &c), Some(true));
        assert!(one.equivalent(&one_decimal, &c));
    }

    #[test]
    fn test_null_propagates_in_equality() {
        let c = converter();
        assert_eq!(
            FhirPathValue::Null.equals(&FhirPathValue::Integer(1), &c),
            None
        );
        assert!(FhirPathValue::Null.equivalent(&FhirPathValue::Null, &c));
    }

    #[test]
    fn test_string_equivalence_case_insensitive() {
        let c = converter();
        let a = FhirPathValue::String("Hello  World".into());
        let b = FhirPathValue::String("hello world".into());
        assert_eq!(a.equals(&b, &c), Some(false));
        assert!(a.equivalent(&b, &c));
    }

    #[test]
    fn test_tuple_equality_ignores_order() {
        let c = converter();
        let mut left = IndexMap::new();
        left.insert("a".to_string(), FhirPathValue::Integer(1));
        left.insert("b".to_string(), FhirPathValue::Integer(2));
        let mut right = IndexMap::new();
        right.insert("b".to_string(), FhirPathValue::Integer(2));
        right.insert("a".to_string(), FhirPathValue::Integer(1));
        assert_eq!(
            FhirPathValue::Tuple(left).equals(&FhirPathValue::Tuple(right), &c),
            Some(true)
        );
    }

    #[test]
    fn test_mixed_precision_dates_unknown() {
        let c = converter();
        let month = FhirPathValue::Date("2024-03".parse().unwrap());
        let day = FhirPathValue::Date("2024-03-15".parse().unwrap());
        assert_eq!(month.equals(&day, &c), None);
        assert!(month.equivalent(&day, &c));
    }
}
