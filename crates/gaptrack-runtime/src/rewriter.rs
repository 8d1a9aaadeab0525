//! Prompt rewriting over tracked session state.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use gaptrack_core::{GatheredContext, PromptComposer, RewriteOptions, RewriteResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::RuleEngine;
use crate::error::RuntimeError;
use crate::tracker::{validate_session_id, ContextTracker};

/// A prompt to rewrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewriteRequest {
    pub session_id: String,
    pub turn_number: u32,
    pub user_input: String,
    #[serde(default)]
    pub system_prompt: String,
    /// Caller context, echoed back in the result
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    /// Falls back to the runtime's configured options
    #[serde(default)]
    pub options: Option<RewriteOptions>,
}

impl RewriteRequest {
    pub fn new(session_id: impl Into<String>, turn_number: u32, user_input: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            turn_number,
            user_input: user_input.into(),
            system_prompt: String::new(),
            context: BTreeMap::new(),
            options: None,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_options(mut self, options: RewriteOptions) -> Self {
        self.options = Some(options);
        self
    }
}

pub struct PromptRewriter {
    tracker: Arc<ContextTracker>,
    engine: Arc<RuleEngine>,
    composer: PromptComposer,
    default_options: RewriteOptions,
}

impl PromptRewriter {
    pub fn new(
        tracker: Arc<ContextTracker>,
        engine: Arc<RuleEngine>,
        default_options: RewriteOptions,
    ) -> Self {
        Self {
            tracker,
            engine,
            composer: PromptComposer::new(),
            default_options,
        }
    }

    /// Gather session state, evaluate rules and compose the annotated prompt.
    ///
    /// Missing turns or graphs are tolerated; store failures propagate.
    pub async fn rewrite_prompt(&self, request: RewriteRequest) -> Result<RewriteResult, RuntimeError> {
        let started = Instant::now();
        validate_session_id(&request.session_id)?;

        let options = request
            .options
            .unwrap_or_else(|| self.default_options.clone());
        let gathered = self.gather(&request.session_id, request.turn_number, &options, request.context).await?;

        let ctx = gathered.evaluation_context(&request.session_id, request.turn_number, &request.user_input);
        let results = self.engine.evaluate_rules(&ctx).await?;

        let mut result = self.composer.rewrite(
            &request.user_input,
            &request.system_prompt,
            gathered,
            &results,
            &options,
        );
        result.processing_time_ms = started.elapsed().as_millis() as u64;

        tracing::debug!(
            session_id = %request.session_id,
            turn_number = request.turn_number,
            quality = result.quality_score,
            ambiguities = result.ambiguities.len(),
            elapsed_ms = result.processing_time_ms,
            "Rewrote prompt"
        );
        Ok(result)
    }

    /// Reduced rewrite returning only the prompt text.
    pub async fn simple_rewrite(
        &self,
        session_id: &str,
        turn_number: u32,
        user_input: &str,
    ) -> Result<String, RuntimeError> {
        let request =
            RewriteRequest::new(session_id, turn_number, user_input).with_options(RewriteOptions::simple());
        Ok(self.rewrite_prompt(request).await?.rewritten_prompt)
    }

    async fn gather(
        &self,
        session_id: &str,
        turn_number: u32,
        options: &RewriteOptions,
        extra: BTreeMap<String, Value>,
    ) -> Result<GatheredContext, RuntimeError> {
        let current_turn = self.tracker.get_context(session_id, turn_number).await?;

        let history = if options.include_history {
            let turns = self.tracker.get_session_context(session_id).await?;
            GatheredContext::bound_history(turns, options.max_history_turns)
        } else {
            Vec::new()
        };

        let memory_graph = self.tracker.get_memory_graph(session_id).await?;

        Ok(GatheredContext {
            current_turn,
            history,
            memory_graph,
            extra,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeoutConfig;
    use crate::store::MemoryStore;
    use crate::tracker::TrackRequest;
    use gaptrack_core::{Ambiguity, TurnAnnotations};
    use serde_json::json;

    async fn rewriter() -> (PromptRewriter, Arc<ContextTracker>) {
        let store = Arc::new(MemoryStore::new());
        let tracker = Arc::new(ContextTracker::new(store.clone(), None, TimeoutConfig::default()));
        let engine = Arc::new(RuleEngine::new(store, TimeoutConfig::default()));
        engine.initialize_default_rules().await;
        let rewriter = PromptRewriter::new(tracker.clone(), engine, RewriteOptions::default());
        (rewriter, tracker)
    }

    #[tokio::test]
    async fn test_rewrite_untracked_turn() {
        let (rewriter, _) = rewriter().await;
        let result = rewriter
            .rewrite_prompt(RewriteRequest::new("s1", 1, "Can you book that place?"))
            .await
            .unwrap();

        assert!(result.context.current_turn.is_none());
        assert!(result.context.history.is_empty());
        assert!(result.rewritten_prompt.contains("USER INPUT:\nCan you book that place?"));
        assert!(result
            .rewritten_prompt
            .contains("Disambiguation needed: Ambiguity Resolution"));
        assert!(result
            .ambiguities
            .contains(&"Clarify what 'that' refers to".to_string()));
        assert!(!result.rewritten_prompt.contains("CLARITY CONSIDERATIONS:"));
    }

    #[tokio::test]
    async fn test_rewrite_uses_tracked_annotations_and_echoes_context() {
        let (rewriter, tracker) = rewriter().await;
        tracker.track_context("s1", 1, "I want to visit Paris").await.unwrap();
        tracker
            .track_turn(TrackRequest::new("s1", 2, "Book it").with_annotations(TurnAnnotations {
                topics: vec!["travel".to_string()],
                ambiguities: vec![Ambiguity {
                    text: "which hotel".to_string(),
                    ambiguity_type: "reference".to_string(),
                    suggestions: vec![],
                }],
                ..Default::default()
            }))
            .await
            .unwrap();

        let mut request = RewriteRequest::new("s1", 2, "Book it").with_system_prompt("You are a travel agent.");
        request.context.insert("channel".to_string(), json!("web"));
        let result = rewriter.rewrite_prompt(request).await.unwrap();

        assert!(result.rewritten_prompt.starts_with("You are a travel agent.\n\n"));
        assert!(result.rewritten_prompt.contains("Topics: [\"travel\"]"));
        assert!(result.rewritten_prompt.contains("Recent History: "));
        assert!(result.ambiguities.contains(&"which hotel".to_string()));
        assert_eq!(result.context.history.len(), 2);
        assert!(result.context.memory_graph.is_some());
        assert_eq!(result.context.extra["channel"], json!("web"));
    }

    #[tokio::test]
    async fn test_history_bounded_by_options() {
        let (rewriter, tracker) = rewriter().await;
        for turn in 1..=4 {
            tracker.track_context("s1", turn, "more").await.unwrap();
        }

        let options = RewriteOptions {
            max_history_turns: 2,
            ..Default::default()
        };
        let result = rewriter
            .rewrite_prompt(RewriteRequest::new("s1", 4, "more").with_options(options))
            .await
            .unwrap();
        let turns: Vec<u32> = result.context.history.iter().map(|t| t.turn_number).collect();
        assert_eq!(turns, vec![3, 4]);
    }

    #[tokio::test]
    async fn test_simple_rewrite() {
        let (rewriter, tracker) = rewriter().await;
        tracker.track_context("s1", 1, "first").await.unwrap();

        let prompt = rewriter.simple_rewrite("s1", 1, "Is it ready?").await.unwrap();
        assert!(prompt.contains("USER INPUT:\nIs it ready?"));
        assert!(prompt.contains("- Ask for clarification when needed"));
        assert!(!prompt.contains("Recent History"));
        assert!(!prompt.contains("DISAMBIGUATION REQUIRED"));
        assert!(!prompt.contains("Indicate confidence levels"));
    }
}
