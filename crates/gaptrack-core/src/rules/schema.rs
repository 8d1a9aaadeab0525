//! JSON Schema validation for rule definition files.
//!
//! Rule sets are validated against schema/rule.schema.json before import.

use std::sync::OnceLock;

/// Embedded rule set schema (loaded at compile time).
const RULE_SCHEMA_JSON: &str = include_str!("../../../../schema/rule.schema.json");

/// Compiled validator (initialized once, reused).
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

fn get_validator() -> Result<&'static jsonschema::Validator, String> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = serde_json::from_str(RULE_SCHEMA_JSON)
            .map_err(|e| format!("Invalid schema JSON: {}", e))?;

        jsonschema::options()
            .build(&schema_value)
            .map_err(|e| format!("Failed to compile schema: {}", e))
    });

    result.as_ref().map_err(|e| e.clone())
}

/// Validate a rule set JSON value against the schema.
///
/// # Returns
///
/// * `Ok(())` - Rule set is valid
/// * `Err(Vec<String>)` - Every validation error, with its instance path
pub fn validate_rule_schema(rule_set: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e])?;

    let errors: Vec<String> = validator
        .iter_errors(rule_set)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Check a rule set without collecting error messages.
pub fn is_valid_rule_set(rule_set: &serde_json::Value) -> bool {
    get_validator()
        .map(|v| v.is_valid(rule_set))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_loads() {
        assert!(get_validator().is_ok());
    }

    #[test]
    fn test_minimal_rule_set_valid() {
        let set = json!({"rules": [{"name": "A", "rule_type": "scope_agreement"}]});
        assert!(is_valid_rule_set(&set));
        assert!(validate_rule_schema(&set).is_ok());
    }

    #[test]
    fn test_missing_rule_type_invalid() {
        let set = json!({"rules": [{"name": "A"}]});
        let errors = validate_rule_schema(&set).unwrap_err();
        assert!(!errors.is_empty());
    }

    #[test]
    fn test_priority_must_be_integer() {
        let set = json!({"rules": [{"name": "A", "rule_type": "x", "priority": "high"}]});
        assert!(!is_valid_rule_set(&set));
    }
}
