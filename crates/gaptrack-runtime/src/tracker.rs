//! Per-turn context tracking.
//!
//! Turn records are the source of truth; the memory graph and the cache are
//! derived from them and updated best-effort after the turn is stored.
//!
//! Writes to one session are serialized. Each write bumps the session's
//! generation, and a read only fills the cache if no write landed while it
//! was reading the store.

use std::collections::HashMap;
use std::sync::Arc;

use gaptrack_core::{is_valid_session_id, Context, MemoryGraph, TurnAnnotations};
use serde::{Deserialize, Serialize};

use crate::cache::{cache_best_effort, try_cache, ContextCache};
use crate::config::TimeoutConfig;
use crate::error::RuntimeError;
use crate::store::{bounded, ContextStore};

/// A turn to track, with optional annotations from an external NLP service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRequest {
    pub session_id: String,
    pub turn_number: u32,
    pub user_input: String,
    #[serde(default, flatten)]
    pub annotations: TurnAnnotations,
}

impl TrackRequest {
    pub fn new(session_id: impl Into<String>, turn_number: u32, user_input: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            turn_number,
            user_input: user_input.into(),
            annotations: TurnAnnotations::default(),
        }
    }

    pub fn with_annotations(mut self, annotations: TurnAnnotations) -> Self {
        self.annotations = annotations;
        self
    }
}

/// Reject session ids the stores cannot key on.
pub(crate) fn validate_session_id(session_id: &str) -> Result<(), RuntimeError> {
    if is_valid_session_id(session_id) {
        Ok(())
    } else {
        Err(RuntimeError::InvalidInput(format!(
            "session_id must be 1-255 characters of [A-Za-z0-9_.:-], got {:?}",
            session_id
        )))
    }
}

type Generation = Arc<tokio::sync::Mutex<u64>>;

/// Per-session write lock and generation counter.
///
/// Entries live only while some call holds them.
#[derive(Default)]
struct SessionLocks {
    slots: parking_lot::Mutex<HashMap<String, Generation>>,
}

impl SessionLocks {
    fn slot(&self, session_id: &str) -> SessionSlot<'_> {
        let generation = self
            .slots
            .lock()
            .entry(session_id.to_string())
            .or_default()
            .clone();
        SessionSlot {
            locks: self,
            session_id: session_id.to_string(),
            generation,
        }
    }
}

struct SessionSlot<'a> {
    locks: &'a SessionLocks,
    session_id: String,
    generation: Generation,
}

impl SessionSlot<'_> {
    async fn lock(&self) -> tokio::sync::MutexGuard<'_, u64> {
        self.generation.lock().await
    }

    async fn current(&self) -> u64 {
        *self.generation.lock().await
    }
}

impl Drop for SessionSlot<'_> {
    fn drop(&mut self) {
        let mut slots = self.locks.slots.lock();
        // Only the map and this slot left
        if Arc::strong_count(&self.generation) == 2 {
            slots.remove(&self.session_id);
        }
    }
}

/// Tracks turns and maintains each session's memory graph.
pub struct ContextTracker {
    store: Arc<dyn ContextStore>,
    cache: Option<Arc<dyn ContextCache>>,
    timeouts: TimeoutConfig,
    sessions: SessionLocks,
}

impl ContextTracker {
    pub fn new(
        store: Arc<dyn ContextStore>,
        cache: Option<Arc<dyn ContextCache>>,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            store,
            cache,
            timeouts,
            sessions: SessionLocks::default(),
        }
    }

    /// Track a bare turn.
    pub async fn track_context(
        &self,
        session_id: &str,
        turn_number: u32,
        user_input: &str,
    ) -> Result<Context, RuntimeError> {
        self.track_turn(TrackRequest::new(session_id, turn_number, user_input))
            .await
    }

    /// Track a turn with annotations.
    ///
    /// Only the turn upsert can fail the call. Re-tracking a turn overwrites
    /// it (last writer wins) and keeps its `created_at`.
    pub async fn track_turn(&self, request: TrackRequest) -> Result<Context, RuntimeError> {
        validate_session_id(&request.session_id)?;

        let slot = self.sessions.slot(&request.session_id);
        let mut generation = slot.lock().await;
        // Before the upsert: a timed-out write may still land
        *generation += 1;

        let turn = Context::new(request.session_id, request.turn_number, request.user_input)
            .with_annotations(request.annotations);
        let stored = bounded(
            "contexts.upsert_turn",
            self.timeouts.store,
            self.store.upsert_turn(turn),
        )
        .await?;

        if let Some(cache) = &self.cache {
            cache_best_effort(
                "cache.invalidate_session",
                self.timeouts.cache,
                cache.invalidate_session(&stored.session_id),
            )
            .await;
            cache_best_effort(
                "cache.set_context",
                self.timeouts.cache,
                cache.set_context(&stored),
            )
            .await;
        }

        if let Err(e) = self.update_memory_graph(&stored).await {
            tracing::warn!(
                session_id = %stored.session_id,
                turn_number = stored.turn_number,
                error = %e,
                "Memory graph update failed"
            );
        }
        drop(generation);

        tracing::debug!(
            session_id = %stored.session_id,
            turn_number = stored.turn_number,
            entities = stored.entities.len(),
            topics = stored.topics.len(),
            "Tracked turn"
        );
        Ok(stored)
    }

    /// Fold a stored turn into the session graph.
    ///
    /// New turns are absorbed incrementally. A re-tracked turn, or a missing
    /// graph, triggers a rebuild from the stored turns. Callers hold the
    /// session lock.
    async fn update_memory_graph(&self, turn: &Context) -> Result<(), RuntimeError> {
        let existing = bounded(
            "contexts.get_memory_graph",
            self.timeouts.store,
            self.store.get_memory_graph(&turn.session_id),
        )
        .await?;

        let graph = match existing {
            Some(mut graph) => {
                if graph.absorb(turn) {
                    graph
                } else {
                    self.rebuild_graph(&turn.session_id).await?
                }
            }
            None => self.rebuild_graph(&turn.session_id).await?,
        };

        bounded(
            "contexts.put_memory_graph",
            self.timeouts.store,
            self.store.put_memory_graph(&graph),
        )
        .await?;

        if let Some(cache) = &self.cache {
            cache_best_effort(
                "cache.set_memory_graph",
                self.timeouts.cache,
                cache.set_memory_graph(&graph),
            )
            .await;
        }
        Ok(())
    }

    async fn rebuild_graph(&self, session_id: &str) -> Result<MemoryGraph, RuntimeError> {
        let turns = bounded(
            "contexts.list_turns",
            self.timeouts.store,
            self.store.list_turns(session_id),
        )
        .await?;
        tracing::debug!(session_id, turns = turns.len(), "Rebuilding memory graph");
        Ok(MemoryGraph::from_turns(session_id, &turns))
    }

    /// One turn: cache first, then store.
    pub async fn get_context(
        &self,
        session_id: &str,
        turn_number: u32,
    ) -> Result<Option<Context>, RuntimeError> {
        validate_session_id(session_id)?;

        if let Some(cache) = &self.cache {
            if let Some(turn) = try_cache(
                "cache.get_context",
                self.timeouts.cache,
                cache.get_context(session_id, turn_number),
            )
            .await
            {
                return Ok(Some(turn));
            }
        }

        let slot = self.sessions.slot(session_id);
        let seen = slot.current().await;
        let turn = bounded(
            "contexts.get_turn",
            self.timeouts.store,
            self.store.get_turn(session_id, turn_number),
        )
        .await?;

        if let (Some(cache), Some(turn)) = (&self.cache, &turn) {
            let generation = slot.lock().await;
            if *generation == seen {
                cache_best_effort("cache.set_context", self.timeouts.cache, cache.set_context(turn))
                    .await;
            } else {
                tracing::debug!(session_id, turn_number, "Turn changed during read, skipping cache fill");
            }
        }
        Ok(turn)
    }

    /// Every turn of a session, ordered by turn number.
    pub async fn get_session_context(&self, session_id: &str) -> Result<Vec<Context>, RuntimeError> {
        validate_session_id(session_id)?;

        if let Some(cache) = &self.cache {
            if let Some(turns) = try_cache(
                "cache.get_session",
                self.timeouts.cache,
                cache.get_session(session_id),
            )
            .await
            {
                return Ok(turns);
            }
        }

        let slot = self.sessions.slot(session_id);
        let seen = slot.current().await;
        let turns = bounded(
            "contexts.list_turns",
            self.timeouts.store,
            self.store.list_turns(session_id),
        )
        .await?;

        if let Some(cache) = &self.cache {
            let generation = slot.lock().await;
            if *generation == seen {
                cache_best_effort(
                    "cache.set_session",
                    self.timeouts.cache,
                    cache.set_session(session_id, &turns),
                )
                .await;
            } else {
                tracing::debug!(session_id, "Session changed during read, skipping cache fill");
            }
        }
        Ok(turns)
    }

    /// The session's memory graph: cache first, then store.
    pub async fn get_memory_graph(&self, session_id: &str) -> Result<Option<MemoryGraph>, RuntimeError> {
        validate_session_id(session_id)?;

        if let Some(cache) = &self.cache {
            if let Some(graph) = try_cache(
                "cache.get_memory_graph",
                self.timeouts.cache,
                cache.get_memory_graph(session_id),
            )
            .await
            {
                return Ok(Some(graph));
            }
        }

        let slot = self.sessions.slot(session_id);
        let seen = slot.current().await;
        let graph = bounded(
            "contexts.get_memory_graph",
            self.timeouts.store,
            self.store.get_memory_graph(session_id),
        )
        .await?;

        if let (Some(cache), Some(graph)) = (&self.cache, &graph) {
            let generation = slot.lock().await;
            if *generation == seen {
                cache_best_effort(
                    "cache.set_memory_graph",
                    self.timeouts.cache,
                    cache.set_memory_graph(graph),
                )
                .await;
            }
        }
        Ok(graph)
    }
}
