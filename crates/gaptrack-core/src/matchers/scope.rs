//! Scope agreement matcher.

use crate::rules::Rule;
use crate::types::{Action, EvaluationContext, RuleResult};

use super::keywords::{hits, SCOPE_QUANTIFIERS};
use super::Matcher;

pub struct ScopeMatcher;

impl ScopeMatcher {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ScopeMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Matcher for ScopeMatcher {
    fn confidence(&self) -> f64 {
        0.7
    }

    fn evaluate(&self, rule: &Rule, ctx: &EvaluationContext) -> RuleResult {
        let mut result = RuleResult::unmatched(rule, self.confidence());
        let input = ctx.folded_input();

        for keyword in hits(&input, &SCOPE_QUANTIFIERS) {
            result.matched = true;
            result.actions.push(
                Action::new("scope_clarification")
                    .with_param("keyword", keyword)
                    .with_param("context", "scope_quantifier_detected"),
            );
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchers::test_support::{payload, rule};
    use crate::rules::RuleSpec;

    #[test]
    fn test_quantifiers_detected() {
        let r = rule("Scope", RuleSpec::ScopeAgreement(payload()));
        let ctx = EvaluationContext::new("s", 1, "Send it to every customer, or most of them");
        let result = ScopeMatcher::new().evaluate(&r, &ctx);

        assert!(result.matched);
        assert_eq!(result.confidence, 0.7);
        let keywords: Vec<&str> = result
            .actions
            .iter()
            .map(|a| a.parameters["keyword"].as_str().unwrap())
            .collect();
        assert_eq!(keywords, vec!["every", "most"]);
        assert!(result.actions.iter().all(|a| a.action_type == "scope_clarification"));
    }

    #[test]
    fn test_case_folded() {
        let r = rule("Scope", RuleSpec::ScopeAgreement(payload()));
        let ctx = EvaluationContext::new("s", 1, "NONE");
        assert!(ScopeMatcher::new().evaluate(&r, &ctx).matched);
    }
}
