//! Rule definition files (YAML/JSON).

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use super::schema::validate_rule_schema;
use super::{NewRule, RuleSpec};

/// Errors that can occur when loading rule definitions.
#[derive(Error, Debug)]
pub enum RuleError {
    #[error("Failed to read rule file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Rule set failed schema validation: {}", .0.join("; "))]
    SchemaError(Vec<String>),

    #[error("Rule validation failed: {0}")]
    ValidationError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// One rule as written in a definition file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleDefinition {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub rule_type: String,

    /// Defaults to `{enabled: true}`
    #[serde(default = "default_conditions")]
    pub conditions: Value,

    #[serde(default = "default_actions")]
    pub actions: Value,

    #[serde(default)]
    pub priority: i32,

    #[serde(default = "default_active")]
    pub is_active: bool,
}

impl RuleDefinition {
    /// Convert to a registration, decoding the payload.
    pub fn into_new_rule(self) -> NewRule {
        NewRule {
            spec: RuleSpec::decode(&self.rule_type, self.conditions, self.actions),
            name: self.name,
            description: self.description,
            priority: self.priority,
            is_active: self.is_active,
        }
    }
}

/// A validated set of rule definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    pub rules: Vec<RuleDefinition>,
}

impl RuleSet {
    /// Parse a rule set from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, RuleError> {
        let value: Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse a rule set from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, RuleError> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Parse a rule set from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, RuleError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse a rule set from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RuleError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Parse a file, choosing the format from its extension.
    ///
    /// `.json` is read as JSON; anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RuleError> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::from_json_file(path),
            _ => Self::from_yaml_file(path),
        }
    }

    fn from_value(value: Value) -> Result<Self, RuleError> {
        validate_rule_schema(&value).map_err(RuleError::SchemaError)?;
        let set: RuleSet = serde_json::from_value(value)?;
        set.validate()?;
        Ok(set)
    }

    /// Convert every definition into a registration, preserving file order.
    pub fn into_new_rules(self) -> Vec<NewRule> {
        self.rules.into_iter().map(RuleDefinition::into_new_rule).collect()
    }

    fn validate(&self) -> Result<(), RuleError> {
        for (i, rule) in self.rules.iter().enumerate() {
            if rule.name.trim().is_empty() {
                return Err(RuleError::MissingField(format!("rules[{}].name", i)));
            }
            if rule.rule_type.trim().is_empty() {
                return Err(RuleError::MissingField(format!("rules[{}].rule_type", i)));
            }
        }

        self.validate_unique_names()
    }

    /// Names are unique store-wide, so a set must not repeat one.
    fn validate_unique_names(&self) -> Result<(), RuleError> {
        let mut seen = HashSet::new();
        for rule in &self.rules {
            if !seen.insert(rule.name.as_str()) {
                return Err(RuleError::ValidationError(format!(
                    "Duplicate rule name: {}",
                    rule.name
                )));
            }
        }
        Ok(())
    }
}

fn default_conditions() -> Value {
    json!({ "enabled": true })
}

fn default_actions() -> Value {
    json!({})
}

fn default_active() -> bool {
    true
}
