//! Request-level memoization of the fully assembled context.
//!
//! Unlike the read-through wrappers this has no upstream behind it: on a miss
//! the orchestrator decides what to do.

use std::time::Duration;

use super::keys::context_key;
use crate::context::ContextPayload;
use crate::identity::IdentityKey;
use crate::store::Cache;

pub const DEFAULT_CONTEXT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct ContextCache {
    cache: Cache,
    ttl: Duration,
}

impl ContextCache {
    pub fn new(cache: Cache) -> Self {
        Self { cache, ttl: DEFAULT_CONTEXT_TTL }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub async fn get_context(&self, identity: &IdentityKey) -> Option<ContextPayload> {
        let cached = self.cache.get_json::<ContextPayload>(&context_key(identity)).await;
        match &cached {
            Some(_) => tracing::info!(%identity, "full context cache hit"),
            None => tracing::info!(%identity, "full context cache miss"),
        }
        cached
    }

    /// Store the payload; `ttl` of `None` uses the configured default.
    pub async fn set_context(&self, identity: &IdentityKey, payload: &ContextPayload, ttl: Option<Duration>) -> bool {
        let ttl = ttl.unwrap_or(self.ttl);
        let stored = self.cache.set_json(&context_key(identity), payload, ttl).await;
        if stored {
            tracing::debug!(%identity, ttl_secs = ttl.as_secs(), "cached full context");
        }
        stored
    }

    pub async fn invalidate_context(&self, identity: &IdentityKey) {
        if self.cache.delete(&context_key(identity)).await {
            tracing::info!(%identity, "full context cache invalidated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn identity() -> IdentityKey {
        IdentityKey::normalize("15551234567").unwrap()
    }

    #[tokio::test]
    async fn test_set_get_invalidate() {
        let contexts = ContextCache::new(Cache::new(Arc::new(MemoryStore::default())));
        assert!(contexts.get_context(&identity()).await.is_none());

        let mut payload = ContextPayload::default();
        payload.insert("customer_known", json!("no"));
        assert!(contexts.set_context(&identity(), &payload, None).await);
        assert_eq!(contexts.get_context(&identity()).await, Some(payload));

        contexts.invalidate_context(&identity()).await;
        assert!(contexts.get_context(&identity()).await.is_none());
    }

    #[tokio::test]
    async fn test_custom_ttl_overrides_default() {
        let clock = Arc::new(ManualClock::default());
        let contexts = ContextCache::new(Cache::new(Arc::new(MemoryStore::new(clock.clone()))));

        let payload = ContextPayload::default();
        contexts.set_context(&identity(), &payload, Some(Duration::from_secs(30))).await;

        clock.advance(Duration::from_secs(31));
        assert!(contexts.get_context(&identity()).await.is_none());
    }
}
