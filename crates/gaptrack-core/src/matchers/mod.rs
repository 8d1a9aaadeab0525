//! Rule-type matchers.
//!
//! Each matcher answers one question about the user input:
//!
//! | Matcher | Question |
//! |---------|----------|
//! | Temporal | Does the input lean on relative time? |
//! | Scope | Does it quantify over an unstated set? |
//! | Missing information | Does it point at something it never names? |
//! | Contradiction | Does it contain opposing terms? |
//! | Ambiguity | Are there pronouns without a clear referent? |
//! | Generic | Fallback for rule types with no dedicated matcher |
//!
//! Matchers are pure functions of `(rule, context)`: no state, no I/O, safe
//! to run concurrently.

pub mod ambiguity;
pub mod contradiction;
pub mod generic;
pub mod keywords;
pub mod missing_info;
pub mod scope;
pub mod temporal;

pub use ambiguity::AmbiguityMatcher;
pub use contradiction::ContradictionMatcher;
pub use generic::GenericMatcher;
pub use missing_info::MissingInformationMatcher;
pub use scope::ScopeMatcher;
pub use temporal::TemporalMatcher;

use crate::rules::Rule;
use crate::types::{EvaluationContext, RuleResult};

/// Trait implemented by every matcher.
pub trait Matcher: Send + Sync {
    /// Fixed confidence reported on every result.
    fn confidence(&self) -> f64;

    /// Evaluate `rule` against the context.
    fn evaluate(&self, rule: &Rule, ctx: &EvaluationContext) -> RuleResult;
}
