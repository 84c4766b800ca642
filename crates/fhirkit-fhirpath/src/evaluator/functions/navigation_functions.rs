//! Structural navigation: `children`, `descendants`, `type`.

use super::FunctionRegistry;
use crate::model::{Collection, FhirPathValue};
use indexmap::IndexMap;
use serde_json::Value;

pub fn register(registry: &mut FunctionRegistry) {
    registry.register("children", |_, input, _| Ok(children(input)));

    registry.register("descendants", |_, input, _| {
        // Breadth-first expansion; resources are finite trees so no
        // visited-set is needed below the JSON layer.
        let mut result = Vec::new();
        let mut frontier = children(input);
        while !frontier.is_empty() {
            result.extend(frontier.iter().cloned());
            frontier = children(&frontier);
        }
        Ok(result)
    });

    registry.register("type", |_, input, _| {
        Ok(input
            .iter()
            .map(|value| {
                let (namespace, name) = match value {
                    FhirPathValue::Object(_) => match value.resource_type() {
                        Some(resource_type) => ("FHIR", resource_type.to_string()),
                        None => ("FHIR", "Element".to_string()),
                    },
                    other => ("System", other.type_name().to_string()),
                };
                let mut info = IndexMap::new();
                info.insert(
                    "namespace".to_string(),
                    FhirPathValue::String(namespace.to_string()),
                );
                info.insert("name".to_string(), FhirPathValue::String(name));
                FhirPathValue::Tuple(info)
            })
            .collect())
    });
}

/// One level of child values for every object in the input.
fn children(input: &Collection) -> Collection {
    let mut result = Vec::new();
    for item in input {
        if let FhirPathValue::Object(Value::Object(map)) = item {
            for (name, value) in map {
                if name == "resourceType" {
                    continue;
                }
                match value {
                    Value::Array(items) => {
                        result.extend(items.iter().map(FhirPathValue::from_json));
                    }
                    Value::Null => {}
                    other => result.push(FhirPathValue::from_json(other)),
                }
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::context::EvaluationContext;
    use crate::evaluator::functions::FunctionContext;
    use fhirkit_ucum::UcumConverter;
    use serde_json::json;

    fn call(name: &str, input: Collection) -> Collection {
        let registry = FunctionRegistry::new();
        let evaluation = EvaluationContext::empty();
        let converter = UcumConverter::new();
        let ctx = FunctionContext {
            evaluation: &evaluation,
            converter: &converter,
        };
        registry.call(name, &ctx, &input, &[]).unwrap()
    }

    #[test]
    fn test_children_and_descendants() {
        let patient = FhirPathValue::from_json(&json!({
            "resourceType": "Patient",
            "name": [{"given": ["John"], "family": "Smith"}],
            "active": true
        }));

        let children = call("children", vec![patient.clone()]);
        // name entry plus active, resourceType excluded
        assert_eq!(children.len(), 2);

        let descendants = call("descendants", vec![patient]);
        assert!(descendants
            .iter()
            .any(|v| v == &FhirPathValue::String("John".into())));
    }

    #[test]
    fn test_type_info() {
        let result = call("type", vec![FhirPathValue::Integer(1)]);
        let FhirPathValue::Tuple(info) = &result[0] else {
            panic!("expected tuple");
        };
        assert_eq!(
            info.get("name"),
            Some(&FhirPathValue::String("Integer".into()))
        );
        assert_eq!(
            info.get("namespace"),
            Some(&FhirPathValue::String("System".into()))
        );
    }
}
