//! Persistent stores for rules, turns, memory graphs and audits.
//!
//! Stores are injected as trait objects. Two backends ship with the crate:
//! [`MemoryStore`] for tests and one-off runs, and [`SqliteStore`] for
//! anything that should survive a restart.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gaptrack_core::{AuditResult, Context, MemoryGraph, NewRule, Rule};

use crate::error::{RuntimeError, StoreError};

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Rule persistence.
///
/// Listings come back in evaluation order: priority descending, then
/// creation time, then id.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn list_active(&self) -> Result<Vec<Rule>, StoreError>;

    async fn list_all(&self) -> Result<Vec<Rule>, StoreError>;

    async fn get(&self, id: i64) -> Result<Option<Rule>, StoreError>;

    /// Insert a rule. A duplicate name is a [`StoreError::Conflict`].
    async fn create(&self, rule: NewRule) -> Result<Rule, StoreError>;

    /// Overwrite a rule by id, keeping its `created_at`.
    async fn update(&self, rule: Rule) -> Result<Rule, StoreError>;

    /// Returns `false` when no rule had that id.
    async fn delete(&self, id: i64) -> Result<bool, StoreError>;
}

/// Turn and memory graph persistence.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Insert or overwrite the turn keyed by (session_id, turn_number).
    ///
    /// Returns the stored record: id assigned, `created_at` preserved from
    /// the first write.
    async fn upsert_turn(&self, turn: Context) -> Result<Context, StoreError>;

    async fn get_turn(&self, session_id: &str, turn_number: u32)
        -> Result<Option<Context>, StoreError>;

    /// All turns of a session, ordered by turn number.
    async fn list_turns(&self, session_id: &str) -> Result<Vec<Context>, StoreError>;

    async fn get_memory_graph(&self, session_id: &str) -> Result<Option<MemoryGraph>, StoreError>;

    async fn put_memory_graph(&self, graph: &MemoryGraph) -> Result<(), StoreError>;
}

/// Audit log persistence.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Persist an audit and return it with its id assigned.
    async fn insert_audit(&self, audit: AuditResult) -> Result<AuditResult, StoreError>;

    /// Audits of a session, ordered by turn number then id.
    async fn list_audits(&self, session_id: &str) -> Result<Vec<AuditResult>, StoreError>;

    /// Bump `retry_count` and return the new value.
    async fn increment_retry(&self, audit_id: i64) -> Result<u32, StoreError>;
}

/// A backend implementing every store.
pub trait Store: RuleStore + ContextStore + AuditStore {}

impl<T: RuleStore + ContextStore + AuditStore> Store for T {}

/// The three store handles a runtime needs.
#[derive(Clone)]
pub struct Stores {
    pub rules: Arc<dyn RuleStore>,
    pub contexts: Arc<dyn ContextStore>,
    pub audits: Arc<dyn AuditStore>,
}

impl Stores {
    /// Use one backend for everything.
    pub fn shared<S: Store + 'static>(store: Arc<S>) -> Self {
        Self {
            rules: store.clone(),
            contexts: store.clone(),
            audits: store,
        }
    }
}

/// Run a store call under a deadline.
///
/// A timeout aborts the call; no partial result is returned.
pub(crate) async fn bounded<T, F>(
    operation: &'static str,
    timeout: Duration,
    fut: F,
) -> Result<T, RuntimeError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(RuntimeError::from),
        Err(_) => {
            tracing::warn!(operation, timeout = ?timeout, "Store call timed out");
            Err(RuntimeError::Timeout {
                operation,
                after: timeout,
            })
        }
    }
}
