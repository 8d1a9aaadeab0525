//! The gap tracker facade and the track → evaluate → rewrite pipeline.
//!
//! [`GapTracker`] owns the injected collaborators and exposes every
//! operation of the runtime. Construct it with [`GapTracker::open`] from a
//! [`RuntimeConfig`], or with [`GapTrackerBuilder`] to inject custom stores
//! and caches.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use gaptrack_core::{
    AuditResult, Context, EvaluationContext, MemoryGraph, NewRule, RewriteOptions, RewriteResult,
    Rule, RuleResult, RuleSet, TurnAnnotations,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audit::{AuditRequest, AuditService};
use crate::cache::{ContextCache, SessionCache};
use crate::config::{RuntimeConfig, StoreBackend};
use crate::engine::RuleEngine;
use crate::error::{PipelineError, PipelineStage, RuntimeError, StoreError};
use crate::rewriter::{PromptRewriter, RewriteRequest};
use crate::store::{AuditStore, ContextStore, MemoryStore, RuleStore, SqliteStore, Store, Stores};
use crate::tracker::{ContextTracker, TrackRequest};

/// Input to [`GapTracker::process_pipeline`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRequest {
    pub session_id: String,
    pub turn_number: u32,
    pub user_input: String,
    #[serde(default)]
    pub system_prompt: String,
    /// Annotations for the tracked turn
    #[serde(default)]
    pub annotations: TurnAnnotations,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    #[serde(default)]
    pub options: Option<RewriteOptions>,
}

impl PipelineRequest {
    pub fn new(session_id: impl Into<String>, turn_number: u32, user_input: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            turn_number,
            user_input: user_input.into(),
            system_prompt: String::new(),
            annotations: TurnAnnotations::default(),
            context: BTreeMap::new(),
            options: None,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }
}

/// Output of a completed pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub session_id: String,
    pub turn_number: u32,
    pub context: Context,
    pub rule_results: Vec<RuleResult>,
    pub prompt_result: RewriteResult,
    pub pipeline_stage: String,
}

/// Entry point to the runtime.
pub struct GapTracker {
    config: RuntimeConfig,
    tracker: Arc<ContextTracker>,
    engine: Arc<RuleEngine>,
    audits: AuditService,
    rewriter: PromptRewriter,
}

impl GapTracker {
    /// Start building a tracker with injected collaborators.
    pub fn builder() -> GapTrackerBuilder {
        GapTrackerBuilder::default()
    }

    /// Open the store and cache described by `config`.
    ///
    /// Seeds the default rules when configured to and the registry is empty.
    pub async fn open(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let stores = match config.store.backend {
            StoreBackend::Memory => Stores::shared(Arc::new(MemoryStore::new())),
            StoreBackend::Sqlite => {
                let path = config.store.path.clone();
                let store = tokio::task::spawn_blocking(move || SqliteStore::open(path))
                    .await
                    .map_err(|e| StoreError::Task(e.to_string()))??;
                Stores::shared(Arc::new(store))
            }
        };

        let mut builder = GapTracker::builder()
            .config(config.clone())
            .rule_store(stores.rules)
            .context_store(stores.contexts)
            .audit_store(stores.audits);
        if config.cache.enabled {
            builder = builder.cache(Arc::new(SessionCache::new(
                config.cache.max_entries,
                config.cache.ttl,
            )));
        }
        let tracker = builder.build()?;
        tracing::info!(
            backend = ?config.store.backend,
            cache = config.cache.enabled,
            "Opened gap tracker"
        );

        if config.seed_default_rules && tracker.list_rules().await?.is_empty() {
            tracker.initialize_default_rules().await;
        }
        Ok(tracker)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    // Context tracking

    pub async fn track_context(
        &self,
        session_id: &str,
        turn_number: u32,
        user_input: &str,
    ) -> Result<Context, RuntimeError> {
        self.tracker.track_context(session_id, turn_number, user_input).await
    }

    pub async fn track_turn(&self, request: TrackRequest) -> Result<Context, RuntimeError> {
        self.tracker.track_turn(request).await
    }

    pub async fn get_context(
        &self,
        session_id: &str,
        turn_number: u32,
    ) -> Result<Option<Context>, RuntimeError> {
        self.tracker.get_context(session_id, turn_number).await
    }

    pub async fn get_session_context(&self, session_id: &str) -> Result<Vec<Context>, RuntimeError> {
        self.tracker.get_session_context(session_id).await
    }

    pub async fn get_memory_graph(&self, session_id: &str) -> Result<Option<MemoryGraph>, RuntimeError> {
        self.tracker.get_memory_graph(session_id).await
    }

    // Rules

    pub async fn evaluate_rules(&self, ctx: &EvaluationContext) -> Result<Vec<RuleResult>, RuntimeError> {
        self.engine.evaluate_rules(ctx).await
    }

    pub async fn list_rules(&self) -> Result<Vec<Rule>, RuntimeError> {
        self.engine.list_rules().await
    }

    pub async fn list_active_rules(&self) -> Result<Vec<Rule>, RuntimeError> {
        self.engine.list_active_rules().await
    }

    pub async fn get_rule(&self, id: i64) -> Result<Option<Rule>, RuntimeError> {
        self.engine.get_rule(id).await
    }

    pub async fn create_rule(&self, rule: NewRule) -> Result<Rule, RuntimeError> {
        self.engine.create_rule(rule).await
    }

    pub async fn update_rule(&self, rule: Rule) -> Result<Rule, RuntimeError> {
        self.engine.update_rule(rule).await
    }

    pub async fn set_rule_active(&self, id: i64, is_active: bool) -> Result<Rule, RuntimeError> {
        self.engine.set_rule_active(id, is_active).await
    }

    pub async fn delete_rule(&self, id: i64) -> Result<bool, RuntimeError> {
        self.engine.delete_rule(id).await
    }

    pub async fn initialize_default_rules(&self) -> Vec<Rule> {
        self.engine.initialize_default_rules().await
    }

    pub async fn import_rules(&self, rule_set: RuleSet) -> Result<Vec<Rule>, RuntimeError> {
        self.engine.import_rules(rule_set).await
    }

    pub async fn import_rules_file(&self, path: impl AsRef<Path>) -> Result<Vec<Rule>, RuntimeError> {
        self.engine.import_rules_file(path).await
    }

    // Auditing

    pub async fn audit_response(&self, request: AuditRequest) -> Result<AuditResult, RuntimeError> {
        self.audits.audit_response(request).await
    }

    pub async fn audit_history(&self, session_id: &str) -> Result<Vec<AuditResult>, RuntimeError> {
        self.audits.audit_history(session_id).await
    }

    /// Advisory: whether the audited response is worth regenerating.
    pub fn should_retry(&self, audit: &AuditResult) -> bool {
        audit.should_retry()
    }

    pub async fn increment_retry(&self, audit_id: i64) -> Result<u32, RuntimeError> {
        self.audits.increment_retry(audit_id).await
    }

    // Rewriting

    pub async fn rewrite_prompt(&self, request: RewriteRequest) -> Result<RewriteResult, RuntimeError> {
        self.rewriter.rewrite_prompt(request).await
    }

    pub async fn simple_rewrite(
        &self,
        session_id: &str,
        turn_number: u32,
        user_input: &str,
    ) -> Result<String, RuntimeError> {
        self.rewriter
            .simple_rewrite(session_id, turn_number, user_input)
            .await
    }

    /// Track the turn, evaluate rules against it, then rewrite the prompt.
    ///
    /// Fail-fast: the first failing stage aborts the run and its error is
    /// returned tagged with that stage.
    pub async fn process_pipeline(
        &self,
        request: PipelineRequest,
    ) -> Result<PipelineOutcome, PipelineError> {
        let track = TrackRequest::new(&request.session_id, request.turn_number, &request.user_input)
            .with_annotations(request.annotations);
        let context = self
            .tracker
            .track_turn(track)
            .await
            .map_err(PipelineError::at(PipelineStage::Tracking))?;

        let eval_ctx = EvaluationContext::from_turn(&context, Vec::new());
        let rule_results = self
            .engine
            .evaluate_rules(&eval_ctx)
            .await
            .map_err(PipelineError::at(PipelineStage::Evaluation))?;

        let rewrite = RewriteRequest {
            session_id: request.session_id.clone(),
            turn_number: request.turn_number,
            user_input: request.user_input,
            system_prompt: request.system_prompt,
            context: request.context,
            options: request.options,
        };
        let prompt_result = self
            .rewriter
            .rewrite_prompt(rewrite)
            .await
            .map_err(PipelineError::at(PipelineStage::Rewrite))?;

        tracing::debug!(
            session_id = %request.session_id,
            turn_number = request.turn_number,
            matched = rule_results.iter().filter(|r| r.matched).count(),
            quality = prompt_result.quality_score,
            "Pipeline completed"
        );

        Ok(PipelineOutcome {
            session_id: request.session_id,
            turn_number: request.turn_number,
            context,
            rule_results,
            prompt_result,
            pipeline_stage: "completed".to_string(),
        })
    }
}

/// Builder for [`GapTracker`].
#[derive(Default)]
pub struct GapTrackerBuilder {
    config: RuntimeConfig,
    rules: Option<Arc<dyn RuleStore>>,
    contexts: Option<Arc<dyn ContextStore>>,
    audits: Option<Arc<dyn AuditStore>>,
    cache: Option<Arc<dyn ContextCache>>,
}

impl GapTrackerBuilder {
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Use one backend for rules, turns and audits.
    pub fn store<S: Store + 'static>(self, store: Arc<S>) -> Self {
        let stores = Stores::shared(store);
        self.rule_store(stores.rules)
            .context_store(stores.contexts)
            .audit_store(stores.audits)
    }

    pub fn rule_store(mut self, store: Arc<dyn RuleStore>) -> Self {
        self.rules = Some(store);
        self
    }

    pub fn context_store(mut self, store: Arc<dyn ContextStore>) -> Self {
        self.contexts = Some(store);
        self
    }

    pub fn audit_store(mut self, store: Arc<dyn AuditStore>) -> Self {
        self.audits = Some(store);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn ContextCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> Result<GapTracker, RuntimeError> {
        let rules = self
            .rules
            .ok_or_else(|| RuntimeError::NotConfigured("rule store".to_string()))?;
        let contexts = self
            .contexts
            .ok_or_else(|| RuntimeError::NotConfigured("context store".to_string()))?;
        let audits = self
            .audits
            .ok_or_else(|| RuntimeError::NotConfigured("audit store".to_string()))?;

        let timeouts = self.config.timeouts.clone();
        let tracker = Arc::new(ContextTracker::new(contexts, self.cache, timeouts.clone()));
        let engine = Arc::new(RuleEngine::new(rules, timeouts.clone()));
        let rewriter = PromptRewriter::new(
            Arc::clone(&tracker),
            Arc::clone(&engine),
            self.config.rewrite.clone(),
        );

        Ok(GapTracker {
            audits: AuditService::new(audits, timeouts),
            config: self.config,
            tracker,
            engine,
            rewriter,
        })
    }
}
