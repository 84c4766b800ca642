//! Collection-level operations: indexing, union, distinct, set algebra.

use crate::error::FhirPathResult;
use crate::model::{Collection, FhirPathValue};
use fhirkit_ucum::UcumConverter;

/// Evaluates collection operators.
pub struct CollectionEvaluator;

impl CollectionEvaluator {
    /// `C[i]`: zero-based; out of range is empty.
    pub fn evaluate_indexer(
        collection: &Collection,
        index: &Collection,
    ) -> FhirPathResult<Collection> {
        let Some(index) = (match index.len() {
            1 => index[0].as_integer(),
            _ => None,
        }) else {
            return Ok(Vec::new());
        };
        if index < 0 {
            return Ok(Vec::new());
        }
        Ok(collection
            .get(index as usize)
            .cloned()
            .map(|v| vec![v])
            .unwrap_or_default())
    }

    /// `|`: order-preserving union, de-duplicated by equality.
    pub fn evaluate_union(
        left: &Collection,
        right: &Collection,
        converter: &UcumConverter,
    ) -> FhirPathResult<Collection> {
        let mut result = Vec::new();
        for item in left.iter().chain(right.iter()) {
            if !contains_value(&result, item, converter) {
                result.push(item.clone());
            }
        }
        Ok(result)
    }
}

/// Membership scan by equality; unknown comparisons do not count as present.
pub fn contains_value(
    collection: &Collection,
    value: &FhirPathValue,
    converter: &UcumConverter,
) -> bool {
    collection
        .iter()
        .any(|item| item.equals(value, converter) == Some(true))
}

/// First-seen-order de-duplication by equality.
pub fn distinct(collection: &Collection, converter: &UcumConverter) -> Collection {
    let mut result: Collection = Vec::new();
    for item in collection {
        if !contains_value(&result, item, converter) {
            result.push(item.clone());
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> FhirPathValue {
        FhirPathValue::Integer(i)
    }

    #[test]
    fn test_indexer_bounds() {
        let collection = vec![int(10), int(20)];
        let result =
            CollectionEvaluator::evaluate_indexer(&collection, &vec![int(1)]).unwrap();
        assert_eq!(result, vec![int(20)]);

        assert!(CollectionEvaluator::evaluate_indexer(&collection, &vec![int(5)])
            .unwrap()
            .is_empty());
        assert!(CollectionEvaluator::evaluate_indexer(&collection, &vec![int(-1)])
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_union_dedups_preserving_order() {
        let converter = UcumConverter::new();
        let result = CollectionEvaluator::evaluate_union(
            &vec![int(3), int(1), int(3)],
            &vec![int(2), int(1)],
            &converter,
        )
        .unwrap();
        assert_eq!(result, vec![int(3), int(1), int(2)]);
    }
}
