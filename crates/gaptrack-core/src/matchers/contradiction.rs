//! Contradiction matcher.
//!
//! Co-containment of two opposing terms is only a hint: "before" and "after"
//! often appear together in perfectly consistent text.

use crate::rules::Rule;
use crate::types::{EvaluationContext, RuleResult, Severity, Violation};

use super::keywords::CONTRADICTORY_PAIRS;
use super::Matcher;

pub struct ContradictionMatcher;

impl ContradictionMatcher {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ContradictionMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Matcher for ContradictionMatcher {
    fn confidence(&self) -> f64 {
        0.8
    }

    fn evaluate(&self, rule: &Rule, ctx: &EvaluationContext) -> RuleResult {
        let mut result = RuleResult::unmatched(rule, self.confidence());
        let input = ctx.folded_input();

        for (a, b) in CONTRADICTORY_PAIRS.iter() {
            if input.contains(a) && input.contains(b) {
                result.matched = true;
                result.violations.push(Violation::new(
                    "contradiction",
                    format!("Potential contradiction detected: '{}' and '{}'", a, b),
                    Severity::High,
                    0.7,
                ));
                result.suggestions.push(format!(
                    "Clarify the relationship between '{}' and '{}'",
                    a, b
                ));
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchers::test_support::{payload, rule};
    use crate::rules::RuleSpec;

    fn contradiction_rule() -> Rule {
        rule("Contradiction", RuleSpec::ContradictionDetection(payload()))
    }

    #[test]
    fn test_always_never() {
        let ctx = EvaluationContext::new("s", 1, "I always never go there");
        let result = ContradictionMatcher::new().evaluate(&contradiction_rule(), &ctx);

        assert!(result.matched);
        let pair: Vec<&Violation> = result
            .violations
            .iter()
            .filter(|v| v.description.contains("'always' and 'never'"))
            .collect();
        assert_eq!(pair.len(), 1);
        assert_eq!(pair[0].severity, Severity::High);
        assert_eq!(pair[0].confidence, 0.7);
        assert_eq!(
            result.suggestions,
            vec!["Clarify the relationship between 'always' and 'never'"]
        );
    }

    #[test]
    fn test_single_side_is_not_a_contradiction() {
        let ctx = EvaluationContext::new("s", 1, "I always go there");
        let result = ContradictionMatcher::new().evaluate(&contradiction_rule(), &ctx);
        assert!(!result.matched);
    }
}
