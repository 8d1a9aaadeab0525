//! Temporal consistency matcher.

use crate::rules::Rule;
use crate::types::{Action, EvaluationContext, RuleResult};

use super::keywords::{hits, TEMPORAL_KEYWORDS};
use super::Matcher;

pub struct TemporalMatcher;

impl TemporalMatcher {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TemporalMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Matcher for TemporalMatcher {
    fn confidence(&self) -> f64 {
        0.8
    }

    fn evaluate(&self, rule: &Rule, ctx: &EvaluationContext) -> RuleResult {
        let mut result = RuleResult::unmatched(rule, self.confidence());
        let input = ctx.folded_input();

        for keyword in hits(&input, &TEMPORAL_KEYWORDS) {
            result.matched = true;
            result.actions.push(
                Action::new("temporal_check")
                    .with_param("keyword", keyword)
                    .with_param("context", "temporal_reference_detected"),
            );
        }

        // Sequenced events are worth a check whether or not the input matched
        if ctx.timeline.len() > 1 {
            result
                .suggestions
                .push("Verify temporal sequence consistency".to_string());
        }

        result
    }
}
