//! Prompt composition and scoring.
//!
//! Turns gathered context plus rule results into an annotated prompt. The
//! quality score computed here rates the prompt, not a response, and is
//! deliberately independent of the auditor's score.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{Context, MemoryGraph};
use crate::types::{EvaluationContext, RuleResult};

const LOW_QUALITY_THRESHOLD: f64 = 0.6;
const MANY_AMBIGUITIES: usize = 3;
const MANY_ASSUMPTIONS: usize = 2;

/// Which sections a rewrite emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteOptions {
    pub include_context: bool,
    pub include_ambiguities: bool,
    pub include_assumptions: bool,
    pub include_history: bool,
    pub add_disambiguation: bool,
    pub add_clarity_flags: bool,
    /// Characters of serialized history kept before the "..." marker
    pub max_context_length: usize,
    /// Most recent turns kept; 0 keeps all
    pub max_history_turns: usize,
    pub optimize_for_clarity: bool,
    pub optimize_for_accuracy: bool,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        Self {
            include_context: true,
            include_ambiguities: true,
            include_assumptions: true,
            include_history: true,
            add_disambiguation: true,
            add_clarity_flags: true,
            max_context_length: 2000,
            max_history_turns: 5,
            optimize_for_clarity: true,
            optimize_for_accuracy: true,
        }
    }
}

impl RewriteOptions {
    /// Reduced option set used by `simple_rewrite`.
    pub fn simple() -> Self {
        Self {
            include_context: true,
            include_ambiguities: true,
            include_assumptions: false,
            include_history: false,
            add_disambiguation: false,
            add_clarity_flags: true,
            max_context_length: 500,
            max_history_turns: 2,
            optimize_for_clarity: true,
            optimize_for_accuracy: false,
        }
    }
}

/// Everything known about a session at rewrite time.
///
/// Any part may be absent; a rewrite never fails because of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatheredContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_turn: Option<Context>,
    #[serde(default)]
    pub history: Vec<Context>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_graph: Option<MemoryGraph>,
    /// Caller-supplied context, echoed back untouched
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl GatheredContext {
    /// Keep only the most recent `max_turns` history turns (0 keeps all).
    pub fn bound_history(mut history: Vec<Context>, max_turns: usize) -> Vec<Context> {
        if max_turns > 0 && history.len() > max_turns {
            history.drain(..history.len() - max_turns);
        }
        history
    }

    /// Evaluation context for `user_input`, annotated from the current turn.
    pub fn evaluation_context(
        &self,
        session_id: &str,
        turn_number: u32,
        user_input: &str,
    ) -> EvaluationContext {
        let mut ctx = match &self.current_turn {
            Some(turn) => EvaluationContext::from_turn(turn, self.history.clone()),
            None => {
                let mut ctx = EvaluationContext::new(session_id, turn_number, user_input);
                ctx.history = self.history.clone();
                ctx
            }
        };
        ctx.session_id = session_id.to_string();
        ctx.turn_number = turn_number;
        ctx.user_input = user_input.to_string();
        ctx
    }

    fn ambiguity_texts(&self) -> impl Iterator<Item = &str> {
        self.current_turn
            .iter()
            .flat_map(|t| t.ambiguities.iter().map(|a| a.text.as_str()))
    }

    fn assertion_claims(&self) -> impl Iterator<Item = &str> {
        self.current_turn
            .iter()
            .flat_map(|t| t.assertions.iter().map(|a| a.claim.as_str()))
    }
}

/// Outcome of a prompt rewrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewriteResult {
    pub original_prompt: String,
    pub rewritten_prompt: String,
    pub context: GatheredContext,
    pub ambiguities: Vec<String>,
    pub assumptions: Vec<String>,
    pub clarity_flags: Vec<String>,
    pub disambiguation_flags: Vec<String>,
    pub quality_score: f64,
    pub recommendations: Vec<String>,
    pub processing_time_ms: u64,
}

/// Deterministic prompt composer.
pub struct PromptComposer;

impl PromptComposer {
    pub fn new() -> Self {
        Self
    }

    /// Compose a full result; `processing_time_ms` is left at 0 for the caller.
    pub fn rewrite(
        &self,
        user_input: &str,
        system_prompt: &str,
        gathered: GatheredContext,
        results: &[RuleResult],
        options: &RewriteOptions,
    ) -> RewriteResult {
        let rewritten_prompt = self.compose(user_input, system_prompt, &gathered, results, options);

        let ambiguities = self.extract_ambiguities(&gathered, results);
        let assumptions = self.extract_assumptions(&gathered, results);
        let clarity_flags = self.extract_clarity_flags(results);
        let disambiguation_flags = self.extract_disambiguation_flags(results);
        let quality_score = self.calculate_quality_score(
            ambiguities.len(),
            assumptions.len(),
            clarity_flags.len(),
            disambiguation_flags.len(),
        );

        let mut result = RewriteResult {
            original_prompt: user_input.to_string(),
            rewritten_prompt,
            context: gathered,
            ambiguities,
            assumptions,
            clarity_flags,
            disambiguation_flags,
            quality_score,
            recommendations: Vec::new(),
            processing_time_ms: 0,
        };
        result.recommendations = self.recommendations(&result);
        result
    }

    /// Build the prompt text. Sections appear in a fixed order and only when
    /// enabled and non-empty.
    pub fn compose(
        &self,
        user_input: &str,
        system_prompt: &str,
        gathered: &GatheredContext,
        results: &[RuleResult],
        options: &RewriteOptions,
    ) -> String {
        let mut prompt = String::new();

        if !system_prompt.is_empty() {
            prompt.push_str(system_prompt);
            prompt.push_str("\n\n");
        }

        if options.include_context {
            let lines = self.context_lines(gathered, options);
            if !lines.is_empty() {
                push_section(&mut prompt, "CONTEXT INFORMATION:", &lines, "");
            }
        }

        if options.add_disambiguation {
            let flags = self.extract_disambiguation_flags(results);
            push_section(&mut prompt, "DISAMBIGUATION REQUIRED:", &flags, "- ");
        }

        if options.add_clarity_flags {
            let flags = self.extract_clarity_flags(results);
            push_section(&mut prompt, "CLARITY CONSIDERATIONS:", &flags, "- ");
        }

        if options.include_ambiguities {
            let ambiguities = self.extract_ambiguities(gathered, results);
            push_section(&mut prompt, "IDENTIFIED AMBIGUITIES:", &ambiguities, "- ");
        }

        if options.include_assumptions {
            let assumptions = self.extract_assumptions(gathered, results);
            push_section(&mut prompt, "CURRENT ASSUMPTIONS:", &assumptions, "- ");
        }

        prompt.push_str("USER INPUT:\n");
        prompt.push_str(user_input);
        prompt.push_str("\n\n");

        if options.optimize_for_clarity {
            prompt.push_str("RESPONSE REQUIREMENTS:\n");
            prompt.push_str("- Provide clear, unambiguous responses\n");
            prompt.push_str("- State assumptions explicitly\n");
            prompt.push_str("- Ask for clarification when needed\n");
            if options.optimize_for_accuracy {
                prompt.push_str("- Verify information before stating facts\n");
                prompt.push_str("- Indicate confidence levels\n");
            }
            prompt.push('\n');
        }

        prompt
    }

    fn context_lines(&self, gathered: &GatheredContext, options: &RewriteOptions) -> Vec<String> {
        let mut lines = Vec::new();

        if let Some(turn) = &gathered.current_turn {
            if !turn.entities.is_empty() {
                lines.push(format!("Entities: {}", to_json(&turn.entities)));
            }
            if !turn.topics.is_empty() {
                lines.push(format!("Topics: {}", to_json(&turn.topics)));
            }
            if !turn.timeline.is_empty() {
                lines.push(format!("Timeline: {}", to_json(&turn.timeline)));
            }
        }

        if options.include_history && !gathered.history.is_empty() {
            let history = truncate_chars(&to_json(&gathered.history), options.max_context_length);
            lines.push(format!("Recent History: {}", history));
        }

        lines
    }

    /// Context ambiguity texts, then matched suggestions mentioning ambiguity.
    pub fn extract_ambiguities(&self, gathered: &GatheredContext, results: &[RuleResult]) -> Vec<String> {
        gathered
            .ambiguity_texts()
            .map(String::from)
            .chain(matched_suggestions(results, &["ambiguous", "clarify"]))
            .collect()
    }

    /// Context assertion claims, then matched suggestions mentioning assumptions.
    pub fn extract_assumptions(&self, gathered: &GatheredContext, results: &[RuleResult]) -> Vec<String> {
        gathered
            .assertion_claims()
            .map(String::from)
            .chain(matched_suggestions(results, &["assume", "presuming"]))
            .collect()
    }

    pub fn extract_clarity_flags(&self, results: &[RuleResult]) -> Vec<String> {
        flags_for(results, &["clarification_request", "scope_clarification"], "Clarification needed")
    }

    pub fn extract_disambiguation_flags(&self, results: &[RuleResult]) -> Vec<String> {
        flags_for(results, &["ambiguity_resolution"], "Disambiguation needed")
    }

    /// Score in [0, 1]: ambiguities and assumptions lower it, flags raise it.
    pub fn calculate_quality_score(
        &self,
        ambiguities: usize,
        assumptions: usize,
        clarity_flags: usize,
        disambiguation_flags: usize,
    ) -> f64 {
        let score = 1.0 - ambiguities as f64 * 0.1 - assumptions as f64 * 0.05
            + clarity_flags as f64 * 0.1
            + disambiguation_flags as f64 * 0.1;
        score.clamp(0.0, 1.0)
    }

    pub fn recommendations(&self, result: &RewriteResult) -> Vec<String> {
        let mut recommendations = Vec::new();

        if result.ambiguities.len() > MANY_AMBIGUITIES {
            recommendations.push("Consider resolving ambiguities before processing");
        }
        if result.assumptions.len() > MANY_ASSUMPTIONS {
            recommendations.push("Verify assumptions with user");
        }
        if result.quality_score < LOW_QUALITY_THRESHOLD {
            recommendations.push("Prompt quality is below threshold - consider additional context");
        }
        if result.clarity_flags.is_empty() && result.disambiguation_flags.is_empty() {
            recommendations.push("Prompt appears clear and unambiguous");
        }

        recommendations.into_iter().map(String::from).collect()
    }
}

impl Default for PromptComposer {
    fn default() -> Self {
        Self::new()
    }
}

fn push_section(prompt: &mut String, header: &str, items: &[String], bullet: &str) {
    if items.is_empty() {
        return;
    }
    prompt.push_str(header);
    prompt.push('\n');
    for item in items {
        let _ = writeln!(prompt, "{}{}", bullet, item);
    }
    prompt.push('\n');
}

fn matched_suggestions<'a>(
    results: &'a [RuleResult],
    needles: &'a [&'a str],
) -> impl Iterator<Item = String> + 'a {
    results
        .iter()
        .filter(|r| r.matched)
        .flat_map(|r| r.suggestions.iter())
        .filter(move |s| {
            let folded = s.to_lowercase();
            needles.iter().any(|n| folded.contains(n))
        })
        .cloned()
}

/// One flag per qualifying action of a matched result.
fn flags_for(results: &[RuleResult], action_types: &[&str], label: &str) -> Vec<String> {
    results
        .iter()
        .filter(|r| r.matched)
        .flat_map(move |r| {
            r.actions
                .iter()
                .filter(move |a| action_types.contains(&a.action_type.as_str()))
                .map(move |_| format!("{}: {}", label, r.rule_name))
        })
        .collect()
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
