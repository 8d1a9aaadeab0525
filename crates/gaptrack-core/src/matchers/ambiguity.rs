//! Ambiguity resolution matcher.

use crate::rules::Rule;
use crate::types::{Action, EvaluationContext, RuleResult};

use super::keywords::{hits, AMBIGUOUS_PRONOUNS};
use super::Matcher;

pub struct AmbiguityMatcher;

impl AmbiguityMatcher {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AmbiguityMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Matcher for AmbiguityMatcher {
    fn confidence(&self) -> f64 {
        0.9
    }

    fn evaluate(&self, rule: &Rule, ctx: &EvaluationContext) -> RuleResult {
        let mut result = RuleResult::unmatched(rule, self.confidence());
        let input = ctx.folded_input();

        for pronoun in hits(&input, &AMBIGUOUS_PRONOUNS) {
            result.matched = true;
            result.actions.push(
                Action::new("ambiguity_resolution")
                    .with_param("pronoun", pronoun)
                    .with_param("context", "ambiguous_pronoun_detected"),
            );
            result
                .suggestions
                .push(format!("Clarify what '{}' refers to", pronoun));
        }

        if !ctx.ambiguities.is_empty() {
            result.matched = true;
            result.actions.push(
                Action::new("resolve_ambiguities").with_param("count", ctx.ambiguities.len()),
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
    use crate::types::Ambiguity;

    fn ambiguity_rule() -> Rule {
        rule("Ambiguity", RuleSpec::AmbiguityResolution(payload()))
    }

    #[test]
    fn test_pronouns_detected() {
        let ctx = EvaluationContext::new("s", 1, "Tell them I said so");
        let result = AmbiguityMatcher::new().evaluate(&ambiguity_rule(), &ctx);

        assert!(result.matched);
        // "them" also contains "he"
        let pronouns: Vec<&str> = result
            .actions
            .iter()
            .map(|a| a.parameters["pronoun"].as_str().unwrap())
            .collect();
        assert_eq!(pronouns, vec!["he", "them"]);
        assert!(result.suggestions.contains(&"Clarify what 'them' refers to".to_string()));
    }

    #[test]
    fn test_context_ambiguities_counted() {
        let mut ctx = EvaluationContext::new("s", 1, "Book a room");
        ctx.ambiguities.push(Ambiguity {
            text: "which hotel".to_string(),
            ambiguity_type: "reference".to_string(),
            suggestions: vec![],
        });

        let result = AmbiguityMatcher::new().evaluate(&ambiguity_rule(), &ctx);
        assert!(result.matched);
        let action = result.actions.last().unwrap();
        assert_eq!(action.action_type, "resolve_ambiguities");
        assert_eq!(action.parameters["count"], 1);
    }
}
