//! Runtime error types.

use std::time::Duration;

use gaptrack_core::RuleError;
use thiserror::Error;

/// Errors from a persistent store. Fatal to the enclosing call.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store task failed: {0}")]
    Task(String),
}

impl StoreError {
    pub fn rule_not_found(id: i64) -> Self {
        Self::NotFound {
            entity: "Rule",
            id: id.to_string(),
        }
    }

    pub fn audit_not_found(id: i64) -> Self {
        Self::NotFound {
            entity: "Audit",
            id: id.to_string(),
        }
    }
}

/// Errors from the cache. Never escape the runtime: every caller maps them
/// to a miss or logs them.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Cache codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Errors surfaced by runtime services.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Rule definition error: {0}")]
    Rules(#[from] RuleError),

    #[error("Not configured: {0}")]
    NotConfigured(String),
}

/// Pipeline stage names used to tag failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Tracking,
    Evaluation,
    Rewrite,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Tracking => "tracking",
            PipelineStage::Evaluation => "evaluation",
            PipelineStage::Rewrite => "rewrite",
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pipeline failure, tagged with the stage that failed.
#[derive(Error, Debug)]
#[error("Pipeline failed at {stage} stage: {source}")]
pub struct PipelineError {
    pub stage: PipelineStage,
    #[source]
    pub source: RuntimeError,
}

impl PipelineError {
    pub fn at(stage: PipelineStage) -> impl FnOnce(RuntimeError) -> Self {
        move |source| Self { stage, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_message_names_stage() {
        let err = PipelineError::at(PipelineStage::Evaluation)(RuntimeError::Timeout {
            operation: "rules.list_active",
            after: Duration::from_secs(5),
        });
        let msg = err.to_string();
        assert!(msg.contains("evaluation stage"));
        assert!(msg.contains("rules.list_active timed out"));
    }

    #[test]
    fn test_not_found_display() {
        assert_eq!(StoreError::rule_not_found(7).to_string(), "Rule not found: 7");
    }
}
