//! Comparison, equality, membership, and three-valued boolean operations.

use crate::ast::{EqualityOperator, InequalityOperator, MembershipOperator, OrOperator};
use crate::error::FhirPathResult;
use crate::model::{Collection, FhirPathValue};
use fhirkit_ucum::UcumConverter;
use std::cmp::Ordering;

/// Evaluates comparison and boolean operators over collections.
pub struct ComparisonEvaluator;

impl ComparisonEvaluator {
    /// Boolean view of a collection: empty is unknown, a single boolean is
    /// itself, anything else non-empty is true.
    pub fn to_boolean(collection: &Collection) -> Option<bool> {
        match collection.len() {
            0 => None,
            1 => match &collection[0] {
                FhirPathValue::Boolean(b) => Some(*b),
                _ => Some(true),
            },
            _ => Some(true),
        }
    }

    fn from_option(value: Option<bool>) -> Collection {
        match value {
            Some(b) => vec![FhirPathValue::Boolean(b)],
            None => Vec::new(),
        }
    }

    /// Kleene conjunction.
    pub fn evaluate_and(left: &Collection, right: &Collection) -> FhirPathResult<Collection> {
        let result = match (Self::to_boolean(left), Self::to_boolean(right)) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        };
        Ok(Self::from_option(result))
    }

    /// Kleene disjunction, or exclusive-or where unknown always propagates.
    pub fn evaluate_or(
        left: &Collection,
        operator: &OrOperator,
        right: &Collection,
    ) -> FhirPathResult<Collection> {
        let (l, r) = (Self::to_boolean(left), Self::to_boolean(right));
        let result = match operator {
            OrOperator::Or => match (l, r) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
            OrOperator::Xor => match (l, r) {
                (Some(a), Some(b)) => Some(a != b),
                _ => None,
            },
        };
        Ok(Self::from_option(result))
    }

    /// Kleene implication.
    pub fn evaluate_implies(left: &Collection, right: &Collection) -> FhirPathResult<Collection> {
        let result = match (Self::to_boolean(left), Self::to_boolean(right)) {
            (Some(false), _) => Some(true),
            (_, Some(true)) => Some(true),
            (Some(true), Some(false)) => Some(false),
            _ => None,
        };
        Ok(Self::from_option(result))
    }

    /// `=`, `!=`, `~`, `!~` over whole collections.
    pub fn evaluate_equality(
        left: &Collection,
        operator: &EqualityOperator,
        right: &Collection,
        converter: &UcumConverter,
    ) -> FhirPathResult<Collection> {
        match operator {
            EqualityOperator::Equal | EqualityOperator::NotEqual => {
                if left.is_empty() || right.is_empty() {
                    return Ok(Vec::new());
                }
                let equal = collections_equal(left, right, converter);
                let result = match operator {
                    EqualityOperator::Equal => equal,
                    _ => equal.map(|b| !b),
                };
                Ok(Self::from_option(result))
            }
            EqualityOperator::Equivalent | EqualityOperator::NotEquivalent => {
                let equivalent = collections_equivalent(left, right, converter);
                let result = match operator {
                    EqualityOperator::Equivalent => equivalent,
                    _ => !equivalent,
                };
                Ok(vec![FhirPathValue::Boolean(result)])
            }
        }
    }

    /// `<`, `<=`, `>`, `>=` over singletons; anything else is empty.
    pub fn evaluate_inequality(
        left: &Collection,
        operator: &InequalityOperator,
        right: &Collection,
        converter: &UcumConverter,
    ) -> FhirPathResult<Collection> {
        let (Some(l), Some(r)) = (singleton(left), singleton(right)) else {
            return Ok(Vec::new());
        };
        let Some(ordering) = l.compare(r, converter) else {
            return Ok(Vec::new());
        };
        let result = match operator {
            InequalityOperator::Less => ordering == Ordering::Less,
            InequalityOperator::LessOrEqual => ordering != Ordering::Greater,
            InequalityOperator::Greater => ordering == Ordering::Greater,
            InequalityOperator::GreaterOrEqual => ordering != Ordering::Less,
        };
        Ok(vec![FhirPathValue::Boolean(result)])
    }

    /// `in` / `contains`. All items of the member side must appear in the
    /// collection side; an empty member side is vacuously true.
    pub fn evaluate_membership(
        left: &Collection,
        operator: &MembershipOperator,
        right: &Collection,
        converter: &UcumConverter,
    ) -> FhirPathResult<Collection> {
        let (members, collection) = match operator {
            MembershipOperator::In => (left, right),
            MembershipOperator::Contains => (right, left),
        };
        let result = members.iter().all(|item| {
            collection
                .iter()
                .any(|candidate| item.equals(candidate, converter) == Some(true))
        });
        Ok(vec![FhirPathValue::Boolean(result)])
    }
}

/// Whole-collection equality: same length and pairwise equal, with unknown
/// propagating.
pub fn collections_equal(
    left: &Collection,
    right: &Collection,
    converter: &UcumConverter,
) -> Option<bool> {
    if left.len() != right.len() {
        return Some(false);
    }
    let mut all_known = true;
    for (l, r) in left.iter().zip(right.iter()) {
        match l.equals(r, converter) {
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

/// Whole-collection equivalence: order-independent matching, never unknown.
pub fn collections_equivalent(
    left: &Collection,
    right: &Collection,
    converter: &UcumConverter,
) -> bool {
    FhirPathValue::Collection(left.clone()).equivalent(
        &FhirPathValue::Collection(right.clone()),
        converter,
    )
}

fn singleton(collection: &Collection) -> Option<&FhirPathValue> {
    match collection.len() {
        1 => Some(&collection[0]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(value: bool) -> Collection {
        vec![FhirPathValue::Boolean(value)]
    }

    fn empty() -> Collection {
        Vec::new()
    }

    #[test]
    fn test_kleene_and_table() {
        let cases: &[(Collection, Collection, Option<bool>)] = &[
            (b(true), b(true), Some(true)),
            (b(true), b(false), Some(false)),
            (b(false), empty(), Some(false)),
            (b(true), empty(), None),
            (empty(), empty(), None),
        ];
        for (l, r, expected) in cases {
            let result = ComparisonEvaluator::evaluate_and(l, r).unwrap();
            assert_eq!(ComparisonEvaluator::to_boolean(&result), *expected);
        }
    }

    #[test]
    fn test_kleene_or_and_xor_table() {
        let result = ComparisonEvaluator::evaluate_or(&empty(), &OrOperator::Or, &b(true)).unwrap();
        assert_eq!(ComparisonEvaluator::to_boolean(&result), Some(true));

        let result =
            ComparisonEvaluator::evaluate_or(&b(false), &OrOperator::Or, &empty()).unwrap();
        assert_eq!(ComparisonEvaluator::to_boolean(&result), None);

        let result =
            ComparisonEvaluator::evaluate_or(&b(true), &OrOperator::Xor, &empty()).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_kleene_implies_table() {
        let cases: &[(Collection, Collection, Option<bool>)] = &[
            (b(false), empty(), Some(true)),
            (empty(), b(true), Some(true)),
            (b(true), b(false), Some(false)),
            (b(true), empty(), None),
            (empty(), b(false), None),
            (empty(), empty(), None),
        ];
        for (l, r, expected) in cases {
            let result = ComparisonEvaluator::evaluate_implies(l, r).unwrap();
            assert_eq!(ComparisonEvaluator::to_boolean(&result), *expected, "{l:?} implies {r:?}");
        }
    }

    #[test]
    fn test_equality_empty_propagation() {
        let converter = UcumConverter::new();
        let result = ComparisonEvaluator::evaluate_equality(
            &empty(),
            &EqualityOperator::Equal,
            &vec![FhirPathValue::Integer(1)],
            &converter,
        )
        .unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_membership_empty_left_is_true() {
        let converter = UcumConverter::new();
        let result = ComparisonEvaluator::evaluate_membership(
            &empty(),
            &MembershipOperator::In,
            &vec![FhirPathValue::Integer(1)],
            &converter,
        )
        .unwrap();
        assert_eq!(result, vec![FhirPathValue::Boolean(true)]);
    }
}
