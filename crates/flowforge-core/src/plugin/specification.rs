//! Type-checks task parameters against a plugin's declared specifications.

use flowforge_types::plugin::PluginSpecification;
use serde_json::{Map, Value};

use super::PluginError;

/// Every required specification must be present and every supplied value
/// whose name is declared must have the declared type. Undeclared
/// parameters pass through untouched. All problems are reported together.
pub fn check_parameters(
    specifications: &[PluginSpecification],
    parameters: &Map<String, Value>,
) -> Result<(), PluginError> {
    let mut problems = Vec::new();

    for spec in specifications {
        match parameters.get(&spec.name) {
            None | Some(Value::Null) if spec.required => {
                problems.push(format!("missing required parameter '{}'", spec.name));
            }
            None | Some(Value::Null) => {}
            Some(value) if !spec.spec_type.matches(value) => {
                problems.push(format!(
                    "parameter '{}' must be of type {}",
                    spec.name,
                    spec.spec_type.as_str()
                ));
            }
            Some(_) => {}
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(PluginError::SpecificationMismatch(problems))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowforge_types::plugin::SpecType;
    use serde_json::json;

    fn spec(name: &str, spec_type: SpecType, required: bool) -> PluginSpecification {
        PluginSpecification {
            name: name.into(),
            spec_type,
            required,
        }
    }

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn matching_parameters_pass() {
        let specs = [spec("url", SpecType::String, true), spec("retries", SpecType::Integer, false)];
        check_parameters(&specs, &params(json!({"url": "https://x", "extra": true}))).unwrap();
    }

    #[test]
    fn reports_missing_and_mistyped_together() {
        let specs = [
            spec("url", SpecType::String, true),
            spec("retries", SpecType::Integer, false),
        ];
        let err = check_parameters(&specs, &params(json!({"retries": "three"}))).unwrap_err();
        match err {
            PluginError::SpecificationMismatch(problems) => {
                assert_eq!(problems.len(), 2);
                assert!(problems[0].contains("url"));
                assert!(problems[1].contains("integer"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn null_counts_as_missing() {
        let specs = [spec("to", SpecType::String, true)];
        assert!(check_parameters(&specs, &params(json!({"to": null}))).is_err());
    }
}
