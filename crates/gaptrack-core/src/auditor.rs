//! Response auditor.
//!
//! Applies a fixed keyword taxonomy to a generated response: certainty
//! classification, assumption and contradiction detection, signal flags, a
//! bounded quality score and recommendations. Pure analysis; persistence is
//! the runtime's job.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::types::Severity;

lazy_static! {
    static ref HIGH_CERTAINTY_KEYWORDS: Vec<&'static str> = vec![
        "definitely", "certainly", "absolutely", "confirmed", "verified",
        "proven", "established", "documented", "factual", "precisely"
    ];

    static ref ASSUMPTION_KEYWORDS: Vec<&'static str> = vec![
        "assuming", "suppose", "presuming", "let's say", "if we assume",
        "taking for granted", "based on the assumption", "presumably"
    ];

    static ref INFERENCE_KEYWORDS: Vec<&'static str> = vec![
        "infer", "deduce", "conclude", "suggest", "imply",
        "based on", "from this we can", "it follows that"
    ];

    static ref AMBIGUITY_KEYWORDS: Vec<&'static str> = vec![
        "unclear", "ambiguous", "uncertain", "vague", "confusing",
        "multiple interpretations", "could mean", "not sure"
    ];

    static ref LOW_CERTAINTY_KEYWORDS: Vec<&'static str> = vec![
        "maybe", "perhaps", "possibly", "might", "could be",
        "seems", "appears", "likely", "probably", "potentially"
    ];

    /// (keywords, confidence, critical), scanned tier by tier.
    static ref ASSUMPTION_TIERS: Vec<(Vec<&'static str>, f64, bool)> = vec![
        (vec!["assuming", "suppose", "presuming", "let's say"], 0.9, true),
        (vec!["if we assume", "based on the assumption", "presumably"], 0.8, true),
        (vec!["likely", "probably", "seems", "appears"], 0.6, false),
        (vec!["might", "could be", "possibly", "perhaps"], 0.4, false),
    ];

    static ref OPPOSING_TERMS: Vec<(&'static str, &'static str, Severity)> = vec![
        ("yes", "no", Severity::High),
        ("always", "never", Severity::High),
        ("all", "none", Severity::High),
        ("increase", "decrease", Severity::Medium),
        ("before", "after", Severity::Medium),
        ("more", "less", Severity::Low),
    ];

    static ref HEDGE_WORDS: Vec<&'static str> = vec![
        "might", "could", "possibly", "perhaps", "maybe", "likely", "probably"
    ];
}

const SHORT_RESPONSE_LEN: usize = 50;
const LONG_RESPONSE_LEN: usize = 500;
const EXCESSIVE_HEDGING: usize = 3;
/// Bytes of context kept after an assumption keyword.
const ASSUMPTION_EXCERPT_LEN: usize = 50;
const RETRY_QUALITY_THRESHOLD: f64 = 0.3;
const LOW_QUALITY_THRESHOLD: f64 = 0.6;

/// How sure a response sounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertaintyLevel {
    High,
    Medium,
    Low,
    Assumed,
    Inferred,
    Ambiguous,
    Verified,
}

impl CertaintyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertaintyLevel::High => "high",
            CertaintyLevel::Medium => "medium",
            CertaintyLevel::Low => "low",
            CertaintyLevel::Assumed => "assumed",
            CertaintyLevel::Inferred => "inferred",
            CertaintyLevel::Ambiguous => "ambiguous",
            CertaintyLevel::Verified => "verified",
        }
    }

    /// Parse the stored form. Unknown values yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high" => Some(CertaintyLevel::High),
            "medium" => Some(CertaintyLevel::Medium),
            "low" => Some(CertaintyLevel::Low),
            "assumed" => Some(CertaintyLevel::Assumed),
            "inferred" => Some(CertaintyLevel::Inferred),
            "ambiguous" => Some(CertaintyLevel::Ambiguous),
            "verified" => Some(CertaintyLevel::Verified),
            _ => None,
        }
    }

    /// Quality score adjustment for this level.
    fn quality_adjustment(&self) -> f64 {
        match self {
            CertaintyLevel::High => 0.2,
            CertaintyLevel::Verified => 0.3,
            CertaintyLevel::Low => -0.1,
            CertaintyLevel::Ambiguous => -0.2,
            CertaintyLevel::Medium | CertaintyLevel::Assumed | CertaintyLevel::Inferred => 0.0,
        }
    }
}

/// An assumption found in a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assumption {
    pub text: String,
    pub confidence: f64,
    pub source: String,
    pub critical: bool,
}

/// A pair of opposing terms found in a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contradiction {
    pub text: String,
    pub conflicts_with: String,
    pub severity: Severity,
    pub confidence: f64,
}

/// Named signals computed from a response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditFlags {
    /// Length in bytes
    pub response_length: usize,
    pub short_response: bool,
    pub long_response: bool,
    pub contains_assumptions: bool,
    pub contains_contradictions: bool,
    pub high_certainty: bool,
    pub low_certainty: bool,
    pub contains_questions: bool,
    pub clarification_request: bool,
    /// Distinct hedge words present
    pub hedge_words_count: usize,
    pub excessive_hedging: bool,
    pub confidence_stated: bool,
    pub uncertainty_stated: bool,
}

/// Result of auditing one response.
///
/// Persisted once; only `retry_count` changes afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditResult {
    #[serde(default)]
    pub id: i64,
    pub session_id: String,
    pub turn_number: u32,
    pub response_text: String,
    pub certainty_level: CertaintyLevel,
    #[serde(default)]
    pub flags: AuditFlags,
    #[serde(default)]
    pub assumptions: Vec<Assumption>,
    #[serde(default)]
    pub contradictions: Vec<Contradiction>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub quality_score: f64,
    pub created_at: DateTime<Utc>,
}

impl AuditResult {
    /// Whether the audited response is worth regenerating.
    ///
    /// Advisory only: retrying is up to the caller.
    pub fn should_retry(&self) -> bool {
        if self.quality_score < RETRY_QUALITY_THRESHOLD {
            return true;
        }

        if self
            .contradictions
            .iter()
            .any(|c| c.severity == Severity::High)
        {
            return true;
        }

        self.assumptions
            .iter()
            .any(|a| a.critical && a.confidence > 0.8)
    }
}

/// Keyword-driven response auditor.
pub struct ResponseAuditor;

impl ResponseAuditor {
    pub fn new() -> Self {
        Self
    }

    /// Audit a response. The returned result has no id yet.
    pub fn analyze(&self, session_id: &str, turn_number: u32, response_text: &str) -> AuditResult {
        let certainty_level = self.classify_certainty(response_text);
        let assumptions = self.detect_assumptions(response_text);
        let contradictions = self.detect_contradictions(response_text);
        let flags = self.compute_flags(
            response_text,
            certainty_level,
            assumptions.len(),
            contradictions.len(),
        );
        let quality_score = self.calculate_quality_score(
            assumptions.len(),
            contradictions.len(),
            certainty_level,
            flags.excessive_hedging,
        );

        let mut result = AuditResult {
            id: 0,
            session_id: session_id.to_string(),
            turn_number,
            response_text: response_text.to_string(),
            certainty_level,
            flags,
            assumptions,
            contradictions,
            retry_count: 0,
            recommendations: Vec::new(),
            quality_score,
            created_at: Utc::now(),
        };
        result.recommendations = self.recommendations(&result);
        result
    }

    /// First matching bucket wins: high, assumed, inferred, ambiguous, low.
    pub fn classify_certainty(&self, response_text: &str) -> CertaintyLevel {
        let text = response_text.to_lowercase();
        let buckets: [(&[&str], CertaintyLevel); 5] = [
            (HIGH_CERTAINTY_KEYWORDS.as_slice(), CertaintyLevel::High),
            (ASSUMPTION_KEYWORDS.as_slice(), CertaintyLevel::Assumed),
            (INFERENCE_KEYWORDS.as_slice(), CertaintyLevel::Inferred),
            (AMBIGUITY_KEYWORDS.as_slice(), CertaintyLevel::Ambiguous),
            (LOW_CERTAINTY_KEYWORDS.as_slice(), CertaintyLevel::Low),
        ];

        buckets
            .iter()
            .find(|(keywords, _)| keywords.iter().any(|kw| text.contains(kw)))
            .map(|(_, level)| *level)
            .unwrap_or(CertaintyLevel::Medium)
    }

    /// One entry per keyword hit; tiers may overlap.
    pub fn detect_assumptions(&self, response_text: &str) -> Vec<Assumption> {
        let text = response_text.to_lowercase();
        let mut assumptions = Vec::new();

        for (keywords, confidence, critical) in ASSUMPTION_TIERS.iter() {
            for keyword in keywords {
                if let Some(index) = text.find(keyword) {
                    assumptions.push(Assumption {
                        text: excerpt(response_text, index, keyword.len() + ASSUMPTION_EXCERPT_LEN),
                        confidence: *confidence,
                        source: "keyword_detection".to_string(),
                        critical: *critical,
                    });
                }
            }
        }

        assumptions
    }

    pub fn detect_contradictions(&self, response_text: &str) -> Vec<Contradiction> {
        let text = response_text.to_lowercase();

        OPPOSING_TERMS
            .iter()
            .filter(|(a, b, _)| text.contains(a) && text.contains(b))
            .map(|(a, b, severity)| Contradiction {
                text: format!("Contains both '{}' and '{}'", a, b),
                conflicts_with: format!("'{}' conflicts with '{}'", a, b),
                severity: *severity,
                confidence: 0.7,
            })
            .collect()
    }

    pub fn compute_flags(
        &self,
        response_text: &str,
        certainty_level: CertaintyLevel,
        assumptions: usize,
        contradictions: usize,
    ) -> AuditFlags {
        let text = response_text.to_lowercase();
        let hedge_words_count = HEDGE_WORDS.iter().filter(|w| text.contains(*w)).count();

        AuditFlags {
            response_length: response_text.len(),
            short_response: response_text.len() < SHORT_RESPONSE_LEN,
            long_response: response_text.len() > LONG_RESPONSE_LEN,
            contains_assumptions: assumptions > 0,
            contains_contradictions: contradictions > 0,
            high_certainty: certainty_level == CertaintyLevel::High,
            low_certainty: certainty_level == CertaintyLevel::Low,
            contains_questions: text.contains('?'),
            clarification_request: text.contains("please clarify") || text.contains("can you specify"),
            hedge_words_count,
            excessive_hedging: hedge_words_count > EXCESSIVE_HEDGING,
            confidence_stated: text.contains("confident") || text.contains("certain"),
            uncertainty_stated: text.contains("uncertain") || text.contains("not sure"),
        }
    }

    /// Score in [0, 1]; non-increasing in both counts for a fixed level.
    pub fn calculate_quality_score(
        &self,
        assumptions: usize,
        contradictions: usize,
        certainty_level: CertaintyLevel,
        excessive_hedging: bool,
    ) -> f64 {
        let mut score = 1.0;
        score -= assumptions as f64 * 0.1;
        score -= contradictions as f64 * 0.2;
        score += certainty_level.quality_adjustment();
        if excessive_hedging {
            score -= 0.1;
        }
        score.clamp(0.0, 1.0)
    }

    pub fn recommendations(&self, result: &AuditResult) -> Vec<String> {
        let mut recommendations = Vec::new();

        match result.certainty_level {
            CertaintyLevel::Low => recommendations.push(
                "Consider providing more definitive information or seeking clarification",
            ),
            CertaintyLevel::Assumed => {
                recommendations.push("Verify assumptions before providing final response")
            }
            CertaintyLevel::Ambiguous => recommendations
                .push("Clarify ambiguous statements and provide clearer explanations"),
            _ => {}
        }

        if !result.assumptions.is_empty() {
            recommendations.push("Consider explicitly stating assumptions or seeking confirmation");
        }
        if !result.contradictions.is_empty() {
            recommendations.push("Resolve contradictions in the response");
        }
        if result.quality_score < LOW_QUALITY_THRESHOLD {
            recommendations.push("Response quality is below threshold - consider revision");
        }
        if result.flags.excessive_hedging {
            recommendations.push("Reduce excessive use of hedge words for clearer communication");
        }
        if result.flags.short_response {
            recommendations.push("Consider providing more detailed response");
        }

        recommendations.into_iter().map(String::from).collect()
    }
}

impl Default for ResponseAuditor {
    fn default() -> Self {
        Self::new()
    }
}

/// `len` bytes of `text` starting at `start`, snapped to char boundaries.
///
/// `start` comes from the lowercased text, which can differ in byte length
/// from the response text for non-ASCII input.
fn excerpt(text: &str, start: usize, len: usize) -> String {
    let start = floor_char_boundary(text, start);
    let end = floor_char_boundary(text, start.saturating_add(len));
    text[start..end].to_string()
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut i = index;
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn auditor() -> ResponseAuditor {
        ResponseAuditor::new()
    }

    #[test]
    fn test_first_bucket_wins() {
        assert_eq!(
            auditor().classify_certainty("This is definitely maybe true"),
            CertaintyLevel::High
        );
        assert_eq!(
            auditor().classify_certainty("Assuming that is probably fine"),
            CertaintyLevel::Assumed
        );
        assert_eq!(auditor().classify_certainty("The sky is blue."), CertaintyLevel::Medium);
    }

    #[test]
    fn test_assumption_tiers() {
        let found = auditor().detect_assumptions("Assuming the store is open, it is probably busy.");
        assert_eq!(found.len(), 2);

        assert_eq!(found[0].confidence, 0.9);
        assert!(found[0].critical);
        assert!(found[0].text.starts_with("Assuming"));
        assert_eq!(found[0].source, "keyword_detection");

        assert_eq!(found[1].confidence, 0.6);
        assert!(!found[1].critical);
        assert_eq!(found[1].text, "probably busy.");
    }

    #[test]
    fn test_assumption_excerpt_is_bounded() {
        let text = format!("perhaps {}", "x".repeat(200));
        let found = auditor().detect_assumptions(&text);
        assert_eq!(found[0].text.len(), "perhaps".len() + 50);
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        let text = "ÉTÉ perhaps ünïcödé ünïcödé ünïcödé ünïcödé ünïcödé ünïcödé";
        let found = auditor().detect_assumptions(text);
        assert_eq!(found.len(), 1);
        assert!(found[0].text.contains("perhaps"));
    }

    #[test]
    fn test_contradiction_severities() {
        let found = auditor().detect_contradictions("Yes and no; more or less.");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].severity, Severity::High);
        assert_eq!(found[0].text, "Contains both 'yes' and 'no'");
        assert_eq!(found[0].conflicts_with, "'yes' conflicts with 'no'");
        assert_eq!(found[1].severity, Severity::Low);
    }

    #[test]
    fn test_flags() {
        let text = "It might rain, maybe. Possibly perhaps snow. Can you specify the city?";
        let certainty = auditor().classify_certainty(text);
        let flags = auditor().compute_flags(text, certainty, 0, 0);

        assert_eq!(flags.response_length, text.len());
        assert!(!flags.short_response);
        assert!(flags.contains_questions);
        assert!(flags.clarification_request);
        assert_eq!(flags.hedge_words_count, 4);
        assert!(flags.excessive_hedging);
        assert!(flags.low_certainty);
    }

    #[test]
    fn test_analyze_end_to_end() {
        let result = auditor().analyze("s1", 2, "Assuming yes, the answer is no.");

        assert_eq!(result.certainty_level, CertaintyLevel::Assumed);
        assert_eq!(result.assumptions.len(), 1);
        assert_eq!(result.contradictions.len(), 1);
        // 1.0 - 0.1 - 0.2
        assert!((result.quality_score - 0.7).abs() < 1e-9);
        assert_eq!(
            result.recommendations,
            vec![
                "Verify assumptions before providing final response",
                "Consider explicitly stating assumptions or seeking confirmation",
                "Resolve contradictions in the response",
                "Consider providing more detailed response",
            ]
        );
        assert!(result.should_retry());
    }

    #[test]
    fn test_should_retry_thresholds() {
        let mut result = auditor().analyze("s1", 1, "The meeting is at noon in room four, see you there then.");
        assert!(result.contradictions.is_empty());
        assert!(result.assumptions.is_empty());

        result.quality_score = 0.25;
        assert!(result.should_retry());

        result.quality_score = 0.5;
        assert!(!result.should_retry());
    }

    #[test]
    fn test_flags_serialize_as_named_signals() {
        let result = auditor().analyze("s1", 1, "ok?");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["flags"]["contains_questions"], true);
        assert_eq!(json["flags"]["response_length"], 3);
        assert_eq!(json["certainty_level"], "medium");
    }

    fn any_level() -> impl Strategy<Value = CertaintyLevel> {
        prop_oneof![
            Just(CertaintyLevel::High),
            Just(CertaintyLevel::Medium),
            Just(CertaintyLevel::Low),
            Just(CertaintyLevel::Assumed),
            Just(CertaintyLevel::Inferred),
            Just(CertaintyLevel::Ambiguous),
            Just(CertaintyLevel::Verified),
        ]
    }

    proptest! {
        #[test]
        fn prop_quality_in_unit_interval(
            a in 0usize..100,
            c in 0usize..100,
            level in any_level(),
            hedging in any::<bool>(),
        ) {
            let score = auditor().calculate_quality_score(a, c, level, hedging);
            prop_assert!((0.0..=1.0).contains(&score));
        }

        #[test]
        fn prop_quality_non_increasing(
            a in 0usize..30,
            c in 0usize..30,
            extra_a in 0usize..5,
            extra_c in 0usize..5,
            level in any_level(),
            hedging in any::<bool>(),
        ) {
            let base = auditor().calculate_quality_score(a, c, level, hedging);
            let more = auditor().calculate_quality_score(a + extra_a, c + extra_c, level, hedging);
            prop_assert!(more <= base + 1e-12);
        }

        #[test]
        fn prop_analyze_never_panics(text in "\\PC{0,200}") {
            let result = auditor().analyze("s", 0, &text);
            prop_assert!((0.0..=1.0).contains(&result.quality_score));
        }
    }
}
