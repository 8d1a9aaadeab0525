//! Response auditing with persistence.

use std::collections::BTreeMap;
use std::sync::Arc;

use gaptrack_core::{AuditResult, ResponseAuditor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::TimeoutConfig;
use crate::error::RuntimeError;
use crate::store::{bounded, AuditStore};
use crate::tracker::validate_session_id;

/// A generated response to audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRequest {
    pub session_id: String,
    pub turn_number: u32,
    pub response_text: String,
    /// Caller context. Accepted for interface stability; analysis does not read it.
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
}

impl AuditRequest {
    pub fn new(session_id: impl Into<String>, turn_number: u32, response_text: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            turn_number,
            response_text: response_text.into(),
            context: BTreeMap::new(),
        }
    }
}

pub struct AuditService {
    store: Arc<dyn AuditStore>,
    auditor: ResponseAuditor,
    timeouts: TimeoutConfig,
}

impl AuditService {
    pub fn new(store: Arc<dyn AuditStore>, timeouts: TimeoutConfig) -> Self {
        Self {
            store,
            auditor: ResponseAuditor::new(),
            timeouts,
        }
    }

    /// Analyze a response and persist the result.
    ///
    /// Returns the stored audit, id assigned. Failing to persist fails the call.
    pub async fn audit_response(&self, request: AuditRequest) -> Result<AuditResult, RuntimeError> {
        validate_session_id(&request.session_id)?;

        let result = self.auditor.analyze(
            &request.session_id,
            request.turn_number,
            &request.response_text,
        );
        let stored = bounded(
            "audits.insert_audit",
            self.timeouts.store,
            self.store.insert_audit(result),
        )
        .await?;

        tracing::debug!(
            session_id = %stored.session_id,
            turn_number = stored.turn_number,
            certainty = stored.certainty_level.as_str(),
            quality = stored.quality_score,
            should_retry = stored.should_retry(),
            "Audited response"
        );
        Ok(stored)
    }

    /// Persisted audits of a session, by turn then id.
    pub async fn audit_history(&self, session_id: &str) -> Result<Vec<AuditResult>, RuntimeError> {
        validate_session_id(session_id)?;
        bounded(
            "audits.list_audits",
            self.timeouts.store,
            self.store.list_audits(session_id),
        )
        .await
    }

    /// Record one more regeneration attempt for an audited response.
    pub async fn increment_retry(&self, audit_id: i64) -> Result<u32, RuntimeError> {
        bounded(
            "audits.increment_retry",
            self.timeouts.store,
            self.store.increment_retry(audit_id),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{MemoryStore, SqliteStore};
    use async_trait::async_trait;
    use gaptrack_core::CertaintyLevel;

    struct FailingAudits;

    #[async_trait]
    impl AuditStore for FailingAudits {
        async fn insert_audit(&self, _: AuditResult) -> Result<AuditResult, StoreError> {
            Err(StoreError::Task("disk full".to_string()))
        }

        async fn list_audits(&self, _: &str) -> Result<Vec<AuditResult>, StoreError> {
            Ok(vec![])
        }

        async fn increment_retry(&self, id: i64) -> Result<u32, StoreError> {
            Err(StoreError::audit_not_found(id))
        }
    }

    #[tokio::test]
    async fn test_audit_persists_result() {
        let service = AuditService::new(Arc::new(MemoryStore::new()), TimeoutConfig::default());
        let stored = service
            .audit_response(AuditRequest::new("s1", 1, "This is definitely maybe true"))
            .await
            .unwrap();

        assert!(stored.id > 0);
        assert_eq!(stored.certainty_level, CertaintyLevel::High);

        let history = service.audit_history("s1").await.unwrap();
        assert_eq!(history, vec![stored]);
    }

    #[tokio::test]
    async fn test_persistence_failure_is_hard_error() {
        let service = AuditService::new(Arc::new(FailingAudits), TimeoutConfig::default());
        let err = service
            .audit_response(AuditRequest::new("s1", 1, "Sure."))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Store(StoreError::Task(_))));
    }

    #[tokio::test]
    async fn test_retry_counter_on_sqlite() {
        let service = AuditService::new(
            Arc::new(SqliteStore::open_in_memory().unwrap()),
            TimeoutConfig::default(),
        );
        let stored = service
            .audit_response(AuditRequest::new(
                "s1",
                3,
                "I'm assuming you want the cheapest option. Yes and no.",
            ))
            .await
            .unwrap();
        assert!(stored.should_retry());

        assert_eq!(service.increment_retry(stored.id).await.unwrap(), 1);
        assert_eq!(service.increment_retry(stored.id).await.unwrap(), 2);
        assert_eq!(service.audit_history("s1").await.unwrap()[0].retry_count, 2);
    }
}
