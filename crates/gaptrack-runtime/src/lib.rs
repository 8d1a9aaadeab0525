//! # gaptrack-runtime
//!
//! Async services around the deterministic `gaptrack-core` engine.
//!
//! This crate owns everything with I/O:
//! - Turn tracking and the per-session memory graph
//! - Rule registry (SQLite or in-memory) and evaluation over the active set
//! - Persisted response audits and retry counters
//! - Prompt rewriting over tracked session state
//! - A fail-fast track → evaluate → rewrite pipeline
//!
//! Stores and the cache are injected as trait objects. Every store and cache
//! call runs under a configured deadline; cache failures only ever cost
//! latency.
//!
//! ## Example
//!
//! ```rust,ignore
//! use gaptrack_runtime::{GapTracker, PipelineRequest, RuntimeConfig};
//!
//! let tracker = GapTracker::open(RuntimeConfig::in_memory()).await?;
//! let outcome = tracker
//!     .process_pipeline(PipelineRequest::new("session-1", 1, "Book it for tomorrow"))
//!     .await?;
//! println!("{}", outcome.prompt_result.rewritten_prompt);
//! ```

pub mod audit;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod rewriter;
pub mod store;
pub mod tracker;

pub use audit::{AuditRequest, AuditService};
pub use cache::{ContextCache, SessionCache};
pub use config::{CacheConfig, ConfigError, RuntimeConfig, StoreBackend, StoreConfig, TimeoutConfig};
pub use engine::RuleEngine;
pub use error::{CacheError, PipelineError, PipelineStage, RuntimeError, StoreError};
pub use pipeline::{GapTracker, GapTrackerBuilder, PipelineOutcome, PipelineRequest};
pub use rewriter::{PromptRewriter, RewriteRequest};
pub use store::{AuditStore, ContextStore, MemoryStore, RuleStore, SqliteStore, Store, Stores};
pub use tracker::{ContextTracker, TrackRequest};
