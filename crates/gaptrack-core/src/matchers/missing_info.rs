//! Missing information matcher.

use crate::rules::Rule;
use crate::types::{EvaluationContext, RuleResult, Severity, Violation};

use super::keywords::{hits, VAGUE_REFERENCES};
use super::Matcher;

/// Inputs longer than this (in bytes) are expected to name at least one entity.
const SUBSTANTIAL_INPUT_LEN: usize = 10;

pub struct MissingInformationMatcher;

impl MissingInformationMatcher {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MissingInformationMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Matcher for MissingInformationMatcher {
    fn confidence(&self) -> f64 {
        0.9
    }

    fn evaluate(&self, rule: &Rule, ctx: &EvaluationContext) -> RuleResult {
        let mut result = RuleResult::unmatched(rule, self.confidence());
        let input = ctx.folded_input();

        for word in hits(&input, &VAGUE_REFERENCES) {
            result.matched = true;
            result.violations.push(Violation::new(
                "vague_reference",
                format!("Vague reference detected: '{}'", word),
                Severity::Medium,
                0.8,
            ));
            result
                .suggestions
                .push(format!("Clarify what '{}' refers to", word));
        }

        if ctx.entities.is_empty() && ctx.user_input.len() > SUBSTANTIAL_INPUT_LEN {
            result.matched = true;
            result.violations.push(Violation::new(
                "missing_entities",
                "No entities detected in substantial input",
                Severity::Low,
                0.6,
            ));
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchers::test_support::{payload, rule};
    use crate::rules::RuleSpec;
    use serde_json::Value;

    fn missing_rule() -> Rule {
        rule("Missing", RuleSpec::MissingInformation(payload()))
    }

    #[test]
    fn test_vague_references_in_question() {
        let ctx = EvaluationContext::new("s", 1, "Can you help me with that thing we discussed?");
        let result = MissingInformationMatcher::new().evaluate(&missing_rule(), &ctx);

        assert!(result.matched);
        let clarify: Vec<&String> = result
            .suggestions
            .iter()
            .filter(|s| s.starts_with("Clarify what '") && s.ends_with("' refers to"))
            .collect();
        assert!(clarify.len() >= 2);
        assert!(result.suggestions.contains(&"Clarify what 'that' refers to".to_string()));
        assert!(result.suggestions.contains(&"Clarify what 'thing' refers to".to_string()));

        // No entities on a long input adds a low-severity violation
        let last = result.violations.last().unwrap();
        assert_eq!(last.violation_type, "missing_entities");
        assert_eq!(last.severity, Severity::Low);
    }

    #[test]
    fn test_entities_suppress_missing_entities() {
        let mut ctx = EvaluationContext::new("s", 1, "Book a table for two people");
        ctx.entities.insert("party_size".to_string(), Value::from(2));

        let result = MissingInformationMatcher::new().evaluate(&missing_rule(), &ctx);
        assert!(result.violations.iter().all(|v| v.violation_type != "missing_entities"));
    }

    #[test]
    fn test_short_input_without_hits() {
        let ctx = EvaluationContext::new("s", 1, "Book now");
        let result = MissingInformationMatcher::new().evaluate(&missing_rule(), &ctx);
        assert!(!result.matched);
        assert!(result.violations.is_empty());
    }
}
