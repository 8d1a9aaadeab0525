//! Rule definitions.
//!
//! A rule is stored flat (`rule_type`, `conditions`, `actions` as JSON
//! documents) but held in memory as a [`RuleSpec`]: a typed payload for each
//! known rule type, with an opaque fallback for anything that does not decode.

mod parser;
mod schema;

pub use parser::{RuleDefinition, RuleError, RuleSet};
pub use schema::{is_valid_rule_set, validate_rule_schema};

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Known rule types, plus an open-ended fallback.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RuleType {
    TemporalConsistency,
    ScopeAgreement,
    MissingInformation,
    ContradictionDetection,
    AmbiguityResolution,
    Other(String),
}

impl RuleType {
    pub fn parse(s: &str) -> Self {
        match s {
            "temporal_consistency" => RuleType::TemporalConsistency,
            "scope_agreement" => RuleType::ScopeAgreement,
            "missing_information" => RuleType::MissingInformation,
            "contradiction_detection" => RuleType::ContradictionDetection,
            "ambiguity_resolution" => RuleType::AmbiguityResolution,
            other => RuleType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RuleType::TemporalConsistency => "temporal_consistency",
            RuleType::ScopeAgreement => "scope_agreement",
            RuleType::MissingInformation => "missing_information",
            RuleType::ContradictionDetection => "contradiction_detection",
            RuleType::AmbiguityResolution => "ambiguity_resolution",
            RuleType::Other(s) => s,
        }
    }

    /// Whether a dedicated matcher exists for this type.
    pub fn is_known(&self) -> bool {
        !matches!(self, RuleType::Other(_))
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conditions of a built-in rule.
///
/// Keys the matchers do not read are kept in `extra`, so a stored document
/// re-encodes exactly as it was written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatcherConditions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MatcherConditions {
    /// Absent means enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

/// Actions declared by a built-in rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatcherActions {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Decoded payload of a rule with a dedicated matcher.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatcherPayload {
    pub conditions: MatcherConditions,
    pub actions: MatcherActions,
}

impl MatcherPayload {
    /// Enabled conditions plus a single declared action type.
    pub fn with_action(action_type: impl Into<String>) -> Self {
        Self {
            conditions: MatcherConditions {
                enabled: Some(true),
                extra: Map::new(),
            },
            actions: MatcherActions {
                action_type: Some(action_type.into()),
                extra: Map::new(),
            },
        }
    }

    fn decode(conditions: &Value, actions: &Value) -> Result<Self, serde_json::Error> {
        Ok(Self {
            conditions: serde_json::from_value(conditions.clone())?,
            actions: serde_json::from_value(actions.clone())?,
        })
    }

    fn encode<T: Serialize>(part: &T) -> Value {
        serde_json::to_value(part).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Rule payload did not encode");
            Value::Object(Map::new())
        })
    }
}

/// Undecoded rule payload kept verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct OpaquePayload {
    pub rule_type: String,
    pub conditions: Value,
    pub actions: Value,
}

/// Typed rule payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleSpec {
    TemporalConsistency(MatcherPayload),
    ScopeAgreement(MatcherPayload),
    MissingInformation(MatcherPayload),
    ContradictionDetection(MatcherPayload),
    AmbiguityResolution(MatcherPayload),
    /// Unrecognized type, or a known type whose payload failed to decode
    Opaque(OpaquePayload),
}

impl RuleSpec {
    /// Decode a flat `(rule_type, conditions, actions)` triple.
    ///
    /// Never fails: anything that cannot be typed is kept as [`RuleSpec::Opaque`].
    pub fn decode(rule_type: &str, conditions: Value, actions: Value) -> Self {
        let kind = RuleType::parse(rule_type);
        if !kind.is_known() {
            return Self::opaque(rule_type, conditions, actions);
        }

        let payload = match MatcherPayload::decode(&conditions, &actions) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(rule_type, error = %e, "Rule payload did not decode, keeping it opaque");
                return Self::opaque(rule_type, conditions, actions);
            }
        };

        match kind {
            RuleType::TemporalConsistency => RuleSpec::TemporalConsistency(payload),
            RuleType::ScopeAgreement => RuleSpec::ScopeAgreement(payload),
            RuleType::MissingInformation => RuleSpec::MissingInformation(payload),
            RuleType::ContradictionDetection => RuleSpec::ContradictionDetection(payload),
            RuleType::AmbiguityResolution => RuleSpec::AmbiguityResolution(payload),
            RuleType::Other(_) => Self::opaque(rule_type, conditions, actions),
        }
    }

    fn opaque(rule_type: &str, conditions: Value, actions: Value) -> Self {
        RuleSpec::Opaque(OpaquePayload {
            rule_type: rule_type.to_string(),
            conditions,
            actions,
        })
    }

    pub fn rule_type(&self) -> RuleType {
        match self {
            RuleSpec::TemporalConsistency(_) => RuleType::TemporalConsistency,
            RuleSpec::ScopeAgreement(_) => RuleType::ScopeAgreement,
            RuleSpec::MissingInformation(_) => RuleType::MissingInformation,
            RuleSpec::ContradictionDetection(_) => RuleType::ContradictionDetection,
            RuleSpec::AmbiguityResolution(_) => RuleType::AmbiguityResolution,
            RuleSpec::Opaque(o) => RuleType::parse(&o.rule_type),
        }
    }

    /// The typed payload, if this rule decoded.
    pub fn payload(&self) -> Option<&MatcherPayload> {
        match self {
            RuleSpec::TemporalConsistency(p)
            | RuleSpec::ScopeAgreement(p)
            | RuleSpec::MissingInformation(p)
            | RuleSpec::ContradictionDetection(p)
            | RuleSpec::AmbiguityResolution(p) => Some(p),
            RuleSpec::Opaque(_) => None,
        }
    }

    /// `conditions` as the stored JSON document.
    pub fn conditions_json(&self) -> Value {
        match self {
            RuleSpec::Opaque(o) => o.conditions.clone(),
            _ => self
                .payload()
                .map(|p| MatcherPayload::encode(&p.conditions))
                .unwrap_or(Value::Null),
        }
    }

    /// `actions` as the stored JSON document.
    pub fn actions_json(&self) -> Value {
        match self {
            RuleSpec::Opaque(o) => o.actions.clone(),
            _ => self
                .payload()
                .map(|p| MatcherPayload::encode(&p.actions))
                .unwrap_or(Value::Null),
        }
    }
}

/// A persisted rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RuleRecord", into = "RuleRecord")]
pub struct Rule {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub spec: RuleSpec,
    /// Higher evaluates first
    pub priority: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    pub fn rule_type(&self) -> RuleType {
        self.spec.rule_type()
    }
}

/// Evaluation order: priority descending, then creation time, then id.
pub fn evaluation_order(a: &Rule, b: &Rule) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Flat wire form of a [`Rule`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RuleRecord {
    #[serde(default)]
    id: i64,
    name: String,
    #[serde(default)]
    description: String,
    rule_type: String,
    #[serde(default)]
    conditions: Value,
    #[serde(default)]
    actions: Value,
    #[serde(default)]
    priority: i32,
    #[serde(default = "default_true")]
    is_active: bool,
    #[serde(default)]
    created_at: DateTime<Utc>,
    #[serde(default)]
    updated_at: DateTime<Utc>,
}

impl From<RuleRecord> for Rule {
    fn from(r: RuleRecord) -> Self {
        Rule {
            id: r.id,
            name: r.name,
            description: r.description,
            spec: RuleSpec::decode(&r.rule_type, r.conditions, r.actions),
            priority: r.priority,
            is_active: r.is_active,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

impl From<Rule> for RuleRecord {
    fn from(r: Rule) -> Self {
        RuleRecord {
            id: r.id,
            rule_type: r.spec.rule_type().as_str().to_string(),
            conditions: r.spec.conditions_json(),
            actions: r.spec.actions_json(),
            name: r.name,
            description: r.description,
            priority: r.priority,
            is_active: r.is_active,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

/// A rule registration, before the store assigns an id and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRule {
    pub name: String,
    pub description: String,
    pub spec: RuleSpec,
    pub priority: i32,
    pub is_active: bool,
}

impl NewRule {
    pub fn new(name: impl Into<String>, spec: RuleSpec, priority: i32) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            spec,
            priority,
            is_active: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Materialize with store-assigned identity.
    pub fn into_rule(self, id: i64, now: DateTime<Utc>) -> Rule {
        Rule {
            id,
            name: self.name,
            description: self.description,
            spec: self.spec,
            priority: self.priority,
            is_active: self.is_active,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The rule set seeded by `initialize_default_rules`.
pub fn default_rules() -> Vec<NewRule> {
    vec![
        NewRule::new(
            "Temporal Consistency Check",
            RuleSpec::TemporalConsistency(MatcherPayload::with_action("temporal_check")),
            100,
        )
        .with_description("Checks for temporal consistency in user input"),
        NewRule::new(
            "Missing Information Detection",
            RuleSpec::MissingInformation(MatcherPayload::with_action("clarification_request")),
            90,
        )
        .with_description("Detects missing or vague information in user input"),
        NewRule::new(
            "Contradiction Detection",
            RuleSpec::ContradictionDetection(MatcherPayload::with_action("contradiction_alert")),
            95,
        )
        .with_description("Detects contradictions in user input"),
        NewRule::new(
            "Ambiguity Resolution",
            RuleSpec::AmbiguityResolution(MatcherPayload::with_action("ambiguity_clarification")),
            85,
        )
        .with_description("Identifies and resolves ambiguities"),
    ]
}

fn default_true() -> bool {
    true
}
