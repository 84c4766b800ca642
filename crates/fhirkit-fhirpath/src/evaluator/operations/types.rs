//! Type tests: `is`, `as`, `ofType`.

use crate::ast::{TypeOperator, TypeSpecifier};
use crate::error::{FhirPathError, FhirPathResult};
use crate::model::{Collection, FhirPathValue};

/// Evaluates type operations.
pub struct TypeEvaluator;

impl TypeEvaluator {
    pub fn evaluate_type_operation(
        input: &Collection,
        operator: &TypeOperator,
        type_specifier: &TypeSpecifier,
    ) -> FhirPathResult<Collection> {
        let type_name = type_specifier.name();
        match operator {
            TypeOperator::Is => {
                let Some(value) = singleton(input) else {
                    return Ok(Vec::new());
                };
                Ok(vec![FhirPathValue::Boolean(is_type(value, type_name))])
            }
            TypeOperator::As => {
                if input.is_empty() {
                    return Ok(Vec::new());
                }
                if input.len() > 1 {
                    return Err(FhirPathError::type_error(format!(
                        "cannot cast a collection of {} elements to {type_name}",
                        input.len()
                    )));
                }
                if is_type(&input[0], type_name) {
                    Ok(vec![input[0].clone()])
                } else {
                    Err(FhirPathError::type_error(format!(
                        "cannot cast {} to {type_name}",
                        input[0].type_name()
                    )))
                }
            }
        }
    }

    /// `ofType(T)`: keep the items of the input that are of the type.
    pub fn evaluate_of_type(input: &Collection, type_name: &str) -> Collection {
        input
            .iter()
            .filter(|value| is_type(value, type_name))
            .cloned()
            .collect()
    }
}

/// Runtime type test.
///
/// Resources match their `resourceType`; elements (objects without a
/// `resourceType`) pass a relaxed test since no type metadata is carried.
pub fn is_type(value: &FhirPathValue, type_name: &str) -> bool {
    if let FhirPathValue::Object(_) = value {
        return match value.resource_type() {
            Some(resource_type) => resource_type == type_name,
            None => !is_primitive_type_name(type_name),
        };
    }

    match type_name {
        "Boolean" => matches!(value, FhirPathValue::Boolean(_)),
        "Integer" => matches!(value, FhirPathValue::Integer(_)),
        "Long" => matches!(value, FhirPathValue::Long(_)),
        "Decimal" => matches!(
            value,
            FhirPathValue::Decimal(_) | FhirPathValue::Integer(_) | FhirPathValue::Long(_)
        ),
        "String" => matches!(value, FhirPathValue::String(_)),
        "Date" => matches!(value, FhirPathValue::Date(_)),
        "DateTime" => matches!(value, FhirPathValue::DateTime(_)),
        "Time" => matches!(value, FhirPathValue::Time(_)),
        "Quantity" => matches!(value, FhirPathValue::Quantity(_)),
        "Ratio" => matches!(value, FhirPathValue::Ratio(_)),
        "Code" => matches!(value, FhirPathValue::Code(_)),
        "Concept" => matches!(value, FhirPathValue::Concept(_)),
        "Interval" => matches!(value, FhirPathValue::Interval(_)),
        "Tuple" => matches!(value, FhirPathValue::Tuple(_)),
        _ => false,
    }
}

fn is_primitive_type_name(name: &str) -> bool {
    matches!(
        name,
        "Boolean"
            | "Integer"
            | "Long"
            | "Decimal"
            | "String"
            | "Date"
            | "DateTime"
            | "Time"
            | "Quantity"
            | "Ratio"
            | "Code"
            | "Concept"
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
    use serde_json::json;

    #[test]
    fn test_is_type_primitives() {
        assert!(is_type(&FhirPathValue::Integer(1), "Integer"));
        assert!(is_type(&FhirPathValue::Integer(1), "Decimal"));
        assert!(!is_type(&FhirPathValue::String("x".into()), "Integer"));
    }

    #[test]
    fn test_is_type_resources_and_elements() {
        let patient = FhirPathValue::from_json(&json!({"resourceType": "Patient"}));
        assert!(is_type(&patient, "Patient"));
        assert!(!is_type(&patient, "Observation"));

        // Elements pass relaxed structural tests
        let name = FhirPathValue::from_json(&json!({"family": "Smith"}));
        assert!(is_type(&name, "HumanName"));
        assert!(!is_type(&name, "Integer"));
    }

    #[test]
    fn test_as_wrong_type_is_an_error() {
        let input = vec![FhirPathValue::String("x".into())];
        let specifier = TypeSpecifier {
            qualified_name: vec!["Integer".into()],
        };
        let result =
            TypeEvaluator::evaluate_type_operation(&input, &TypeOperator::As, &specifier);
        assert!(result.is_err());
    }
}
