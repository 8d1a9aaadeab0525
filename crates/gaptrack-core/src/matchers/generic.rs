//! Fallback matcher for rule types with no dedicated matcher.

use crate::rules::Rule;
use crate::types::{Action, EvaluationContext, RuleResult};

use super::Matcher;

pub struct GenericMatcher;

impl GenericMatcher {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GenericMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Matcher for GenericMatcher {
    fn confidence(&self) -> f64 {
        0.5
    }

    fn evaluate(&self, rule: &Rule, ctx: &EvaluationContext) -> RuleResult {
        let mut result = RuleResult::unmatched(rule, self.confidence());

        if !ctx.user_input.is_empty() {
            result.matched = true;
            result.actions.push(
                Action::new("generic_processing").with_param("input_length", ctx.user_input.len()),
            );
        }

        result
    }
}
