//! In-process store backed by ordered maps.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use gaptrack_core::{evaluation_order, AuditResult, Context, MemoryGraph, NewRule, Rule};
use parking_lot::RwLock;

use super::{AuditStore, ContextStore, RuleStore};
use crate::error::StoreError;

#[derive(Default)]
struct Inner {
    rules: BTreeMap<i64, Rule>,
    next_rule_id: i64,
    turns: BTreeMap<(String, u32), Context>,
    next_turn_id: i64,
    graphs: HashMap<String, MemoryGraph>,
    audits: BTreeMap<i64, AuditResult>,
    next_audit_id: i64,
}

/// Store that lives and dies with the process.
///
/// Locks are never held across an await point.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn next_id(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

fn duplicate_name(name: &str) -> StoreError {
    StoreError::Conflict(format!("rule name '{}' already exists", name))
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn list_active(&self) -> Result<Vec<Rule>, StoreError> {
        let inner = self.inner.read();
        let mut rules: Vec<Rule> = inner.rules.values().filter(|r| r.is_active).cloned().collect();
        rules.sort_by(evaluation_order);
        Ok(rules)
    }

    async fn list_all(&self) -> Result<Vec<Rule>, StoreError> {
        let inner = self.inner.read();
        let mut rules: Vec<Rule> = inner.rules.values().cloned().collect();
        rules.sort_by(evaluation_order);
        Ok(rules)
    }

    async fn get(&self, id: i64) -> Result<Option<Rule>, StoreError> {
        Ok(self.inner.read().rules.get(&id).cloned())
    }

    async fn create(&self, rule: NewRule) -> Result<Rule, StoreError> {
        let mut inner = self.inner.write();
        if inner.rules.values().any(|r| r.name == rule.name) {
            return Err(duplicate_name(&rule.name));
        }

        let id = next_id(&mut inner.next_rule_id);
        let rule = rule.into_rule(id, Utc::now());
        inner.rules.insert(id, rule.clone());
        Ok(rule)
    }

    async fn update(&self, mut rule: Rule) -> Result<Rule, StoreError> {
        let mut inner = self.inner.write();
        if inner
            .rules
            .values()
            .any(|r| r.id != rule.id && r.name == rule.name)
        {
            return Err(duplicate_name(&rule.name));
        }

        let existing = inner
            .rules
            .get(&rule.id)
            .ok_or_else(|| StoreError::rule_not_found(rule.id))?;
        rule.created_at = existing.created_at;
        rule.updated_at = Utc::now();

        inner.rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.inner.write().rules.remove(&id).is_some())
    }
}

#[async_trait]
impl ContextStore for MemoryStore {
    async fn upsert_turn(&self, mut turn: Context) -> Result<Context, StoreError> {
        let mut inner = self.inner.write();
        let key = (turn.session_id.clone(), turn.turn_number);
        let now = Utc::now();

        match inner.turns.get(&key) {
            Some(existing) => {
                turn.id = existing.id;
                turn.created_at = existing.created_at;
            }
            None => {
                turn.id = next_id(&mut inner.next_turn_id);
                turn.created_at = now;
            }
        }
        turn.updated_at = now;

        inner.turns.insert(key, turn.clone());
        Ok(turn)
    }

    async fn get_turn(
        &self,
        session_id: &str,
        turn_number: u32,
    ) -> Result<Option<Context>, StoreError> {
        let key = (session_id.to_string(), turn_number);
        Ok(self.inner.read().turns.get(&key).cloned())
    }

    async fn list_turns(&self, session_id: &str) -> Result<Vec<Context>, StoreError> {
        let inner = self.inner.read();
        let start = (session_id.to_string(), 0);
        let end = (session_id.to_string(), u32::MAX);
        Ok(inner
            .turns
            .range(start..=end)
            .map(|(_, turn)| turn.clone())
            .collect())
    }

    async fn get_memory_graph(&self, session_id: &str) -> Result<Option<MemoryGraph>, StoreError> {
        Ok(self.inner.read().graphs.get(session_id).cloned())
    }

    async fn put_memory_graph(&self, graph: &MemoryGraph) -> Result<(), StoreError> {
        self.inner
            .write()
            .graphs
            .insert(graph.session_id.clone(), graph.clone());
        Ok(())
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn insert_audit(&self, mut audit: AuditResult) -> Result<AuditResult, StoreError> {
        let mut inner = self.inner.write();
        audit.id = next_id(&mut inner.next_audit_id);
        inner.audits.insert(audit.id, audit.clone());
        Ok(audit)
    }

    async fn list_audits(&self, session_id: &str) -> Result<Vec<AuditResult>, StoreError> {
        let inner = self.inner.read();
        let mut audits: Vec<AuditResult> = inner
            .audits
            .values()
            .filter(|a| a.session_id == session_id)
            .cloned()
            .collect();
        audits.sort_by_key(|a| (a.turn_number, a.id));
        Ok(audits)
    }

    async fn increment_retry(&self, audit_id: i64) -> Result<u32, StoreError> {
        let mut inner = self.inner.write();
        let audit = inner
            .audits
            .get_mut(&audit_id)
            .ok_or_else(|| StoreError::audit_not_found(audit_id))?;
        audit.retry_count += 1;
        Ok(audit.retry_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gaptrack_core::{audit, default_rules, MatcherPayload, RuleSpec};
    use serde_json::json;

    #[tokio::test]
    async fn test_rules_listed_in_evaluation_order() {
        let store = MemoryStore::new();
        for rule in default_rules() {
            store.create(rule).await.unwrap();
        }

        let names: Vec<String> = store
            .list_active()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "Temporal Consistency Check",
                "Contradiction Detection",
                "Missing Information Detection",
                "Ambiguity Resolution",
            ]
        );
    }

    #[tokio::test]
    async fn test_known_type_payload_stored_verbatim() {
        let store = MemoryStore::new();
        let conditions = json!({"enabled": true, "keywords": ["x"]});
        let actions = json!({"type": "t", "extra": 1});
        store
            .create(NewRule::new(
                "Scope",
                RuleSpec::decode("scope_agreement", conditions.clone(), actions.clone()),
                10,
            ))
            .await
            .unwrap();
        store
            .create(NewRule::new(
                "Bare",
                RuleSpec::decode("temporal_consistency", json!({}), json!({})),
                5,
            ))
            .await
            .unwrap();

        let active = store.list_active().await.unwrap();
        assert_eq!(active[0].spec.conditions_json(), conditions);
        assert_eq!(active[0].spec.actions_json(), actions);
        assert_eq!(active[1].spec.conditions_json(), json!({}));
        assert_eq!(active[1].spec.actions_json(), json!({}));
    }

    #[tokio::test]
    async fn test_duplicate_rule_name_conflicts() {
        let store = MemoryStore::new();
        let rule = NewRule::new(
            "Scope",
            RuleSpec::ScopeAgreement(MatcherPayload::with_action("scope_clarification")),
            10,
        );
        store.create(rule.clone()).await.unwrap();
        let err = store.create(rule).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_keeps_created_at_and_hides_inactive() {
        let store = MemoryStore::new();
        let created = store
            .create(NewRule::new(
                "Scope",
                RuleSpec::ScopeAgreement(MatcherPayload::with_action("scope_clarification")),
                10,
            ))
            .await
            .unwrap();

        let mut changed = created.clone();
        changed.is_active = false;
        let updated = store.update(changed).await.unwrap();

        assert_eq!(updated.created_at, created.created_at);
        assert!(store.list_active().await.unwrap().is_empty());
        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_rule() {
        let store = MemoryStore::new();
        let ghost = default_rules().remove(0).into_rule(42, Utc::now());
        let err = store.update(ghost).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "Rule", .. }));
        assert!(!store.delete(42).await.unwrap());
    }

    #[tokio::test]
    async fn test_upsert_overwrites_turn() {
        let store = MemoryStore::new();
        let first = store
            .upsert_turn(Context::new("s1", 1, "first"))
            .await
            .unwrap();
        let second = store
            .upsert_turn(Context::new("s1", 1, "second"))
            .await
            .unwrap();
        store.upsert_turn(Context::new("s2", 1, "other")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);

        let turns = store.list_turns("s1").await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].user_input, "second");
    }

    #[tokio::test]
    async fn test_audits_ordered_and_retry_counted() {
        let store = MemoryStore::new();
        store.insert_audit(audit("s1", 2, "later")).await.unwrap();
        let first = store.insert_audit(audit("s1", 1, "earlier")).await.unwrap();

        let turns: Vec<u32> = store
            .list_audits("s1")
            .await
            .unwrap()
            .iter()
            .map(|a| a.turn_number)
            .collect();
        assert_eq!(turns, vec![1, 2]);

        assert_eq!(store.increment_retry(first.id).await.unwrap(), 1);
        assert_eq!(store.increment_retry(first.id).await.unwrap(), 2);
        assert!(store.increment_retry(999).await.is_err());
    }
}
