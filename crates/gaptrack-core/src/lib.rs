//! # gaptrack-core
//!
//! Deterministic context-gap analysis for conversational AI pipelines.
//!
//! This crate answers three questions about a conversation turn:
//! - Which heuristic rules does the user input trip?
//! - How sure, consistent and assumption-laden is a generated response?
//! - What should the prompt look like once known gaps are spelled out?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same input always produces the same output
//! 2. **No I/O**: Storage, caching and extraction live in `gaptrack-runtime`
//! 3. **Partial-failure tolerant**: One broken rule never hides the others
//!
//! ## Example
//!
//! ```rust,ignore
//! use gaptrack_core::{evaluate, EvaluationContext, Rule};
//!
//! let rules: Vec<Rule> = store.list_active().await?;
//! let ctx = EvaluationContext::new("session-1", 3, "Can you book that place?");
//! for result in evaluate(&rules, &ctx) {
//!     println!("{}: matched={}", result.rule_name, result.matched);
//! }
//! ```

pub mod auditor;
pub mod context;
pub mod evaluator;
pub mod matchers;
pub mod rewriter;
pub mod rules;
pub mod types;

pub use auditor::{
    AuditFlags, AuditResult, Assumption, CertaintyLevel, Contradiction, ResponseAuditor,
};
pub use context::{
    is_valid_session_id, Context, Edge, GraphNode, MemoryGraph, NodeKind, TurnAnnotations,
    CO_OCCURRENCE,
};
pub use evaluator::{MatchError, RuleEvaluator};
pub use matchers::Matcher;
pub use rewriter::{GatheredContext, PromptComposer, RewriteOptions, RewriteResult};
pub use rules::{
    default_rules, evaluation_order, MatcherActions, MatcherConditions, MatcherPayload, NewRule,
    OpaquePayload, Rule, RuleDefinition, RuleError, RuleSet, RuleSpec, RuleType,
};
pub use types::{
    Action, Ambiguity, Assertion, Entities, EvaluationContext, RuleResult, Severity,
    TimelineEvent, Violation,
};

/// Evaluate rules against a context.
///
/// Convenience wrapper over [`RuleEvaluator::evaluate`]; rules are expected
/// in evaluation order.
pub fn evaluate(rules: &[Rule], ctx: &EvaluationContext) -> Vec<RuleResult> {
    RuleEvaluator::new().evaluate(rules, ctx)
}

/// Audit a response without persisting it.
pub fn audit(session_id: &str, turn_number: u32, response_text: &str) -> AuditResult {
    ResponseAuditor::new().analyze(session_id, turn_number, response_text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_basic_evaluation() {
        let now = Utc::now();
        let mut rules: Vec<Rule> = default_rules()
            .into_iter()
            .enumerate()
            .map(|(i, r)| r.into_rule(i as i64 + 1, now))
            .collect();
        rules.sort_by(evaluation_order);

        let ctx = EvaluationContext::new("session-1", 1, "Can you help me with that thing we discussed?");
        let results = evaluate(&rules, &ctx);

        assert_eq!(results.len(), 4);
        assert_eq!(results[0].rule_name, "Temporal Consistency Check");
        assert!(!results[0].matched);

        let missing = results
            .iter()
            .find(|r| r.rule_name == "Missing Information Detection")
            .unwrap();
        assert!(missing.matched);
    }

    #[test]
    fn test_audit_convenience() {
        let result = audit("session-1", 1, "This is definitely maybe true");
        assert_eq!(result.certainty_level, CertaintyLevel::High);
        assert_eq!(result.id, 0);
    }
}
