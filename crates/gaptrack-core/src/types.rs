//! Core types shared by the evaluator, the matchers and the prompt composer.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::Context;
use crate::rules::Rule;

/// Entities attached to a turn, keyed by entity name.
///
/// A `BTreeMap` keeps serialization order stable, which keeps composed
/// prompts byte-identical for identical input.
pub type Entities = BTreeMap<String, Value>;

/// Severity of a violation or contradiction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

/// An action a matcher asks downstream stages to take.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Action type (e.g., "temporal_check", "ambiguity_resolution")
    #[serde(rename = "type")]
    pub action_type: String,

    /// Free-form parameters describing what triggered the action
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
}

impl Action {
    /// Create an action with no parameters.
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// Attach a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// A rule violation found in user input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    #[serde(rename = "type")]
    pub violation_type: String,
    pub description: String,
    pub severity: Severity,
    pub confidence: f64,
}

impl Violation {
    pub fn new(
        violation_type: impl Into<String>,
        description: impl Into<String>,
        severity: Severity,
        confidence: f64,
    ) -> Self {
        Self {
            violation_type: violation_type.into(),
            description: description.into(),
            severity,
            confidence,
        }
    }
}

/// Outcome of evaluating one rule against one evaluation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleResult {
    pub rule_id: i64,
    pub rule_name: String,
    pub matched: bool,

    /// Fixed per matcher, in [0, 1]
    pub confidence: f64,

    #[serde(default)]
    pub actions: Vec<Action>,

    #[serde(default)]
    pub violations: Vec<Violation>,

    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl RuleResult {
    /// An unmatched result for `rule` with no findings.
    pub fn unmatched(rule: &Rule, confidence: f64) -> Self {
        Self {
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            matched: false,
            confidence,
            actions: Vec::new(),
            violations: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    /// Whether any action of the given type was emitted.
    pub fn has_action(&self, action_type: &str) -> bool {
        self.actions.iter().any(|a| a.action_type == action_type)
    }
}

/// A temporal event mentioned in a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub event: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub reference: String,
}

/// A factual claim made in a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    pub claim: String,
    pub confidence: f64,
    #[serde(default)]
    pub source: String,
}

/// Unclear information identified in a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ambiguity {
    pub text: String,
    #[serde(rename = "type", default)]
    pub ambiguity_type: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

/// Per-call snapshot the matchers evaluate against.
///
/// Built fresh for every evaluation and never persisted as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationContext {
    pub session_id: String,
    pub turn_number: u32,
    pub user_input: String,
    #[serde(default)]
    pub entities: Entities,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub timeline: Vec<TimelineEvent>,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
    #[serde(default)]
    pub ambiguities: Vec<Ambiguity>,
    #[serde(default)]
    pub history: Vec<Context>,
}

impl EvaluationContext {
    /// A context carrying only the raw input.
    pub fn new(session_id: impl Into<String>, turn_number: u32, user_input: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            turn_number,
            user_input: user_input.into(),
            ..Default::default()
        }
    }

    /// Build from a tracked turn plus prior turns.
    pub fn from_turn(turn: &Context, history: Vec<Context>) -> Self {
        Self {
            session_id: turn.session_id.clone(),
            turn_number: turn.turn_number,
            user_input: turn.user_input.clone(),
            entities: turn.entities.clone(),
            topics: turn.topics.clone(),
            timeline: turn.timeline.clone(),
            assertions: turn.assertions.clone(),
            ambiguities: turn.ambiguities.clone(),
            history,
        }
    }

    /// Case-folded user input, the only form matchers look at.
    pub fn folded_input(&self) -> String {
        self.user_input.to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_serializes_type_field() {
        let action = Action::new("temporal_check").with_param("keyword", "ago");
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "temporal_check");
        assert_eq!(json["parameters"]["keyword"], "ago");
    }

    #[test]
    fn test_severity_wire_format() {
        let v = Violation::new("contradiction", "x", Severity::High, 0.7);
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["severity"], "high");
        assert_eq!(json["type"], "contradiction");
    }

    #[test]
    fn test_from_turn_copies_annotations() {
        let mut turn = Context::new("s1", 3, "Book it for tomorrow");
        turn.topics.push("travel".to_string());
        turn.entities.insert("city".to_string(), Value::from("Paris"));

        let ctx = EvaluationContext::from_turn(&turn, vec![]);
        assert_eq!(ctx.turn_number, 3);
        assert_eq!(ctx.topics, vec!["travel".to_string()]);
        assert_eq!(ctx.entities.len(), 1);
        assert_eq!(ctx.folded_input(), "book it for tomorrow");
    }
}
