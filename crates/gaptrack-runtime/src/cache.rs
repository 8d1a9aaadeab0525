//! Read-through cache for turns, session listings and memory graphs.
//!
//! The cache is advisory. Reads that fail or time out count as misses and
//! writes that fail are logged; neither ever fails the enclosing call.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use gaptrack_core::{Context, MemoryGraph};
use moka::future::Cache;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CacheError;

/// Cache collaborator.
#[async_trait]
pub trait ContextCache: Send + Sync {
    async fn get_context(
        &self,
        session_id: &str,
        turn_number: u32,
    ) -> Result<Option<Context>, CacheError>;

    async fn set_context(&self, turn: &Context) -> Result<(), CacheError>;

    async fn get_session(&self, session_id: &str) -> Result<Option<Vec<Context>>, CacheError>;

    async fn set_session(&self, session_id: &str, turns: &[Context]) -> Result<(), CacheError>;

    async fn get_memory_graph(&self, session_id: &str) -> Result<Option<MemoryGraph>, CacheError>;

    async fn set_memory_graph(&self, graph: &MemoryGraph) -> Result<(), CacheError>;

    /// Drop the cached session listing.
    async fn invalidate_session(&self, session_id: &str) -> Result<(), CacheError>;
}

fn context_key(session_id: &str, turn_number: u32) -> String {
    format!("context:{}:{}", session_id, turn_number)
}

fn session_key(session_id: &str) -> String {
    format!("session:{}", session_id)
}

fn memory_key(session_id: &str) -> String {
    format!("memory:{}", session_id)
}

/// In-process cache using moka. Values are stored as JSON documents.
pub struct SessionCache {
    cache: Cache<String, String>,
}

impl SessionCache {
    /// Create a new cache with the given configuration.
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.cache.get(key).await {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set_json<T: Serialize + ?Sized>(&self, key: String, value: &T) -> Result<(), CacheError> {
        let raw = serde_json::to_string(value)?;
        self.cache.insert(key, raw).await;
        Ok(())
    }

    /// Get cache statistics.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new(10_000, Duration::from_secs(24 * 60 * 60))
    }
}

#[async_trait]
impl ContextCache for SessionCache {
    async fn get_context(
        &self,
        session_id: &str,
        turn_number: u32,
    ) -> Result<Option<Context>, CacheError> {
        self.get_json(&context_key(session_id, turn_number)).await
    }

    async fn set_context(&self, turn: &Context) -> Result<(), CacheError> {
        self.set_json(context_key(&turn.session_id, turn.turn_number), turn)
            .await
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Vec<Context>>, CacheError> {
        self.get_json(&session_key(session_id)).await
    }

    async fn set_session(&self, session_id: &str, turns: &[Context]) -> Result<(), CacheError> {
        self.set_json(session_key(session_id), turns).await
    }

    async fn get_memory_graph(&self, session_id: &str) -> Result<Option<MemoryGraph>, CacheError> {
        self.get_json(&memory_key(session_id)).await
    }

    async fn set_memory_graph(&self, graph: &MemoryGraph) -> Result<(), CacheError> {
        self.set_json(memory_key(&graph.session_id), graph).await
    }

    async fn invalidate_session(&self, session_id: &str) -> Result<(), CacheError> {
        self.cache.invalidate(&session_key(session_id)).await;
        Ok(())
    }
}

/// Read from the cache, mapping every failure to a miss.
pub(crate) async fn try_cache<T, F>(operation: &'static str, timeout: Duration, fut: F) -> Option<T>
where
    F: Future<Output = Result<Option<T>, CacheError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(Some(value))) => {
            tracing::debug!(operation, "Cache hit");
            Some(value)
        }
        Ok(Ok(None)) => {
            tracing::debug!(operation, "Cache miss");
            None
        }
        Ok(Err(e)) => {
            tracing::warn!(operation, error = %e, "Cache read failed, treating as miss");
            None
        }
        Err(_) => {
            tracing::warn!(operation, timeout = ?timeout, "Cache read timed out, treating as miss");
            None
        }
    }
}

/// Write to the cache, logging failures.
pub(crate) async fn cache_best_effort<F>(operation: &'static str, timeout: Duration, fut: F)
where
    F: Future<Output = Result<(), CacheError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(operation, error = %e, "Cache write failed"),
        Err(_) => tracing::warn!(operation, timeout = ?timeout, "Cache write timed out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cache_operations() {
        let cache = SessionCache::default();

        // Cache miss
        assert!(cache.get_context("s1", 1).await.unwrap().is_none());

        let turn = Context::new("s1", 1, "hello");
        cache.set_context(&turn).await.unwrap();

        // Cache hit
        let cached = cache.get_context("s1", 1).await.unwrap().unwrap();
        assert_eq!(cached.user_input, "hello");
        assert!(cache.get_context("s1", 2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalidate_drops_only_session_listing() {
        let cache = SessionCache::default();
        let turn = Context::new("s1", 1, "hello");
        cache.set_context(&turn).await.unwrap();
        cache.set_session("s1", &[turn]).await.unwrap();
        cache
            .set_memory_graph(&MemoryGraph::new("s1"))
            .await
            .unwrap();

        cache.invalidate_session("s1").await.unwrap();

        assert!(cache.get_session("s1").await.unwrap().is_none());
        assert!(cache.get_context("s1", 1).await.unwrap().is_some());
        assert!(cache.get_memory_graph("s1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = SessionCache::new(100, Duration::from_millis(50));
        cache.set_context(&Context::new("s1", 1, "x")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(cache.get_context("s1", 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_try_cache_maps_errors_to_miss() {
        let failing = async { Err::<Option<u32>, _>(CacheError::Backend("down".to_string())) };
        assert_eq!(try_cache("cache.get", Duration::from_secs(1), failing).await, None);

        let hit = async { Ok::<_, CacheError>(Some(7)) };
        assert_eq!(try_cache("cache.get", Duration::from_secs(1), hit).await, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_cache_timeout_is_miss() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, CacheError>(Some(1))
        };
        assert_eq!(try_cache("cache.get", Duration::from_millis(10), slow).await, None);
    }
}
