//! Rule evaluator.
//!
//! Dispatches each rule to the matcher for its type and collects the results.
//! A rule that fails to evaluate is logged and left out; it never aborts the
//! evaluation of the remaining rules.

use thiserror::Error;

use crate::matchers::{
    AmbiguityMatcher, ContradictionMatcher, GenericMatcher, Matcher, MissingInformationMatcher,
    ScopeMatcher, TemporalMatcher,
};
use crate::rules::{Rule, RuleSpec, RuleType};
use crate::types::{EvaluationContext, RuleResult};

/// Per-rule evaluation failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("Rule '{rule}' has a malformed {rule_type} payload")]
    MalformedPayload { rule: String, rule_type: String },
}

/// Stateless rule evaluator.
pub struct RuleEvaluator {
    temporal: TemporalMatcher,
    scope: ScopeMatcher,
    missing_info: MissingInformationMatcher,
    contradiction: ContradictionMatcher,
    ambiguity: AmbiguityMatcher,
    generic: GenericMatcher,
}

impl RuleEvaluator {
    pub fn new() -> Self {
        Self {
            temporal: TemporalMatcher::new(),
            scope: ScopeMatcher::new(),
            missing_info: MissingInformationMatcher::new(),
            contradiction: ContradictionMatcher::new(),
            ambiguity: AmbiguityMatcher::new(),
            generic: GenericMatcher::new(),
        }
    }

    /// Evaluate rules in the given order.
    ///
    /// # Arguments
    ///
    /// * `rules` - Rules in evaluation order (priority desc, creation asc)
    /// * `ctx` - The per-call evaluation context
    ///
    /// # Returns
    ///
    /// One result per rule that evaluated, in input order.
    pub fn evaluate(&self, rules: &[Rule], ctx: &EvaluationContext) -> Vec<RuleResult> {
        let mut results = Vec::with_capacity(rules.len());

        for rule in rules {
            match self.evaluate_rule(rule, ctx) {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::warn!(
                        rule = %rule.name,
                        rule_id = rule.id,
                        session_id = %ctx.session_id,
                        error = %e,
                        "Rule evaluation failed, skipping"
                    );
                }
            }
        }

        tracing::debug!(
            session_id = %ctx.session_id,
            turn_number = ctx.turn_number,
            rules = rules.len(),
            results = results.len(),
            matched = results.iter().filter(|r| r.matched).count(),
            "Rules evaluated"
        );

        results
    }

    /// Evaluate a single rule.
    pub fn evaluate_rule(&self, rule: &Rule, ctx: &EvaluationContext) -> Result<RuleResult, MatchError> {
        let matcher: &dyn Matcher = match &rule.spec {
            RuleSpec::TemporalConsistency(_) => &self.temporal,
            RuleSpec::ScopeAgreement(_) => &self.scope,
            RuleSpec::MissingInformation(_) => &self.missing_info,
            RuleSpec::ContradictionDetection(_) => &self.contradiction,
            RuleSpec::AmbiguityResolution(_) => &self.ambiguity,
            RuleSpec::Opaque(opaque) => {
                if RuleType::parse(&opaque.rule_type).is_known() {
                    return Err(MatchError::MalformedPayload {
                        rule: rule.name.clone(),
                        rule_type: opaque.rule_type.clone(),
                    });
                }
                &self.generic
            }
        };

        Ok(matcher.evaluate(rule, ctx))
    }
}

impl Default for RuleEvaluator {
    fn default() -> Self {
        Self::new()
    }
}
