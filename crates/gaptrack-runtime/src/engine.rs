//! Rule engine: rule registry plus evaluation over the active snapshot.

use std::path::Path;
use std::sync::Arc;

use gaptrack_core::{
    default_rules, evaluation_order, EvaluationContext, NewRule, Rule, RuleEvaluator, RuleResult,
    RuleSet,
};

use crate::config::TimeoutConfig;
use crate::error::{RuntimeError, StoreError};
use crate::store::{bounded, RuleStore};
use crate::tracker::validate_session_id;

pub struct RuleEngine {
    store: Arc<dyn RuleStore>,
    evaluator: RuleEvaluator,
    timeouts: TimeoutConfig,
}

impl RuleEngine {
    pub fn new(store: Arc<dyn RuleStore>, timeouts: TimeoutConfig) -> Self {
        Self {
            store,
            evaluator: RuleEvaluator::new(),
            timeouts,
        }
    }

    /// Evaluate every active rule against `ctx`.
    ///
    /// The active set is re-read on every call, so registry changes apply to
    /// the next evaluation without a restart.
    pub async fn evaluate_rules(&self, ctx: &EvaluationContext) -> Result<Vec<RuleResult>, RuntimeError> {
        validate_session_id(&ctx.session_id)?;

        let mut rules = self.list_active_rules().await?;
        rules.sort_by(evaluation_order);
        Ok(self.evaluator.evaluate(&rules, ctx))
    }

    pub async fn list_rules(&self) -> Result<Vec<Rule>, RuntimeError> {
        bounded("rules.list_all", self.timeouts.store, self.store.list_all()).await
    }

    pub async fn list_active_rules(&self) -> Result<Vec<Rule>, RuntimeError> {
        bounded("rules.list_active", self.timeouts.store, self.store.list_active()).await
    }

    pub async fn get_rule(&self, id: i64) -> Result<Option<Rule>, RuntimeError> {
        bounded("rules.get", self.timeouts.store, self.store.get(id)).await
    }

    pub async fn create_rule(&self, rule: NewRule) -> Result<Rule, RuntimeError> {
        validate_rule_name(&rule.name)?;
        let created = bounded("rules.create", self.timeouts.store, self.store.create(rule)).await?;
        tracing::debug!(rule = %created.name, id = created.id, "Created rule");
        Ok(created)
    }

    pub async fn update_rule(&self, rule: Rule) -> Result<Rule, RuntimeError> {
        validate_rule_name(&rule.name)?;
        bounded("rules.update", self.timeouts.store, self.store.update(rule)).await
    }

    /// Toggle a rule in or out of evaluation.
    pub async fn set_rule_active(&self, id: i64, is_active: bool) -> Result<Rule, RuntimeError> {
        let mut rule = self
            .get_rule(id)
            .await?
            .ok_or_else(|| RuntimeError::from(StoreError::rule_not_found(id)))?;
        rule.is_active = is_active;
        self.update_rule(rule).await
    }

    /// Returns `false` when no rule had that id.
    pub async fn delete_rule(&self, id: i64) -> Result<bool, RuntimeError> {
        bounded("rules.delete", self.timeouts.store, self.store.delete(id)).await
    }

    /// Register the default rule set.
    ///
    /// A rule that fails to register (usually because its name already
    /// exists) is logged and skipped. Returns the rules actually created.
    pub async fn initialize_default_rules(&self) -> Vec<Rule> {
        let mut created = Vec::new();
        for rule in default_rules() {
            let name = rule.name.clone();
            match self.create_rule(rule).await {
                Ok(rule) => created.push(rule),
                Err(e) => tracing::warn!(rule = %name, error = %e, "Skipping default rule"),
            }
        }
        tracing::info!(created = created.len(), "Initialized default rules");
        created
    }

    /// Register every rule of a validated rule file. Stops at the first
    /// store failure.
    pub async fn import_rules(&self, rule_set: RuleSet) -> Result<Vec<Rule>, RuntimeError> {
        let mut created = Vec::new();
        for rule in rule_set.into_new_rules() {
            created.push(self.create_rule(rule).await?);
        }
        tracing::info!(imported = created.len(), "Imported rules");
        Ok(created)
    }

    /// Load a YAML or JSON rule file and register its rules.
    pub async fn import_rules_file(&self, path: impl AsRef<Path>) -> Result<Vec<Rule>, RuntimeError> {
        let rule_set = RuleSet::from_file(path)?;
        self.import_rules(rule_set).await
    }
}

fn validate_rule_name(name: &str) -> Result<(), RuntimeError> {
    if name.trim().is_empty() {
        return Err(RuntimeError::InvalidInput("rule name must not be empty".to_string()));
    }
    if name.chars().count() > 255 {
        return Err(RuntimeError::InvalidInput(
            "rule name must be at most 255 characters".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, SqliteStore};
    use gaptrack_core::{MatcherPayload, RuleSpec};
    use serde_json::json;

    fn engine() -> RuleEngine {
        RuleEngine::new(Arc::new(MemoryStore::new()), TimeoutConfig::default())
    }

    #[tokio::test]
    async fn test_default_rules_seeded_once() {
        let engine = engine();
        assert_eq!(engine.initialize_default_rules().await.len(), 4);
        // Second run: every name exists already, all skipped
        assert!(engine.initialize_default_rules().await.is_empty());
        assert_eq!(engine.list_rules().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_evaluate_uses_current_registry() {
        let engine = engine();
        engine.initialize_default_rules().await;

        let ctx = EvaluationContext::new("s1", 1, "Can you help me with that thing we discussed?");
        let results = engine.evaluate_rules(&ctx).await.unwrap();
        assert_eq!(results.len(), 4);

        let missing = results
            .iter()
            .find(|r| r.rule_name == "Missing Information Detection")
            .unwrap();
        assert!(missing.matched);
        let clarify = missing
            .suggestions
            .iter()
            .filter(|s| s.starts_with("Clarify what '"))
            .count();
        assert!(clarify >= 2);

        // Deactivation applies to the very next call
        engine.set_rule_active(missing.rule_id, false).await.unwrap();
        let results = engine.evaluate_rules(&ctx).await.unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn test_contradiction_rule_fires_once() {
        let engine = engine();
        engine.initialize_default_rules().await;

        let ctx = EvaluationContext::new("s1", 1, "I always never go there");
        let results = engine.evaluate_rules(&ctx).await.unwrap();
        let contradiction = results
            .iter()
            .find(|r| r.rule_name == "Contradiction Detection")
            .unwrap();
        assert_eq!(contradiction.violations.len(), 1);
        assert_eq!(
            contradiction.violations[0].description,
            "Potential contradiction detected: 'always' and 'never'"
        );
    }

    #[tokio::test]
    async fn test_broken_rule_does_not_hide_others() {
        let engine = engine();
        engine
            .create_rule(NewRule::new(
                "Broken Scope",
                RuleSpec::decode("scope_agreement", json!("not an object"), json!({})),
                200,
            ))
            .await
            .unwrap();
        engine
            .create_rule(NewRule::new(
                "Scope",
                RuleSpec::ScopeAgreement(MatcherPayload::with_action("scope_clarification")),
                50,
            ))
            .await
            .unwrap();

        let ctx = EvaluationContext::new("s1", 1, "some of them");
        let results = engine.evaluate_rules(&ctx).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].rule_name, "Scope");
        assert!(results[0].matched);
    }

    #[tokio::test]
    async fn test_rule_crud_round_trip_on_sqlite() {
        let engine = RuleEngine::new(
            Arc::new(SqliteStore::open_in_memory().unwrap()),
            TimeoutConfig::default(),
        );
        let created = engine
            .create_rule(
                NewRule::new(
                    "Scope",
                    RuleSpec::ScopeAgreement(MatcherPayload::with_action("scope_clarification")),
                    70,
                )
                .with_description("Quantifier check"),
            )
            .await
            .unwrap();

        let active = engine.list_active_rules().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, created.name);
        assert_eq!(active[0].spec, created.spec);
        assert_eq!(active[0].priority, 70);

        assert!(engine.delete_rule(created.id).await.unwrap());
        assert!(engine.list_rules().await.unwrap().is_empty());
        assert!(engine.set_rule_active(created.id, true).await.is_err());
    }

    #[tokio::test]
    async fn test_blank_rule_name_rejected() {
        let engine = engine();
        let err = engine
            .create_rule(NewRule::new(
                "  ",
                RuleSpec::ScopeAgreement(MatcherPayload::default()),
                1,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_import_missing_file_is_rule_error() {
        let err = engine()
            .import_rules_file("/nonexistent/rules.yaml")
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Rules(_)));
    }

    #[tokio::test]
    async fn test_import_rule_file() {
        let yaml = r#"
rules:
  - name: Scope
    rule_type: scope_agreement
    actions:
      type: scope_clarification
    priority: 70
  - name: Sentiment
    rule_type: sentiment_shift
"#;
        let engine = engine();
        let imported = engine
            .import_rules(RuleSet::from_yaml(yaml).unwrap())
            .await
            .unwrap();
        assert_eq!(imported.len(), 2);

        let ctx = EvaluationContext::new("s1", 1, "every option");
        let results = engine.evaluate_rules(&ctx).await.unwrap();
        assert_eq!(results[0].rule_name, "Scope");
        // Unknown type goes to the generic matcher
        assert!(results[1].has_action("generic_processing"));
    }
}
