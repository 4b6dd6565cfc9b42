//! Read-through cache over the memory service.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::keys::memory_key;
use crate::Error;
use crate::identity::IdentityKey;
use crate::source::{MemorySnapshot, MemorySource};
use crate::store::Cache;

/// Memory facts change slowly; five minutes of staleness is acceptable.
pub const DEFAULT_MEMORY_TTL: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct CachedMemory {
    source: Arc<dyn MemorySource>,
    cache: Cache,
    ttl: Duration,
}

impl CachedMemory {
    pub fn new(source: Arc<dyn MemorySource>, cache: Cache) -> Self {
        Self { source, cache, ttl: DEFAULT_MEMORY_TTL }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn source(&self) -> &Arc<dyn MemorySource> {
        &self.source
    }

    /// Fetch caller memory, serving from cache unless `force_refresh`.
    ///
    /// # Errors
    ///
    /// Upstream failures are returned as-is; cache failures never are.
    pub async fn fetch(
        &self, identity: &IdentityKey, session: Option<&str>, force_refresh: bool,
    ) -> Result<MemorySnapshot, Error> {
        let key = memory_key(identity);

        if !force_refresh && let Some(cached) = self.cache.get_json::<MemorySnapshot>(&key).await {
            tracing::debug!(%identity, "memory cache hit");
            return Ok(cached);
        }

        tracing::debug!(%identity, force_refresh, "memory cache miss");
        let start = Instant::now();
        let memory = self.source.get_memory(identity, session).await?;
        tracing::info!(%identity, latency_ms = start.elapsed().as_millis() as u64, "memory upstream fetch");

        self.cache.set_json(&key, &memory, self.ttl).await;
        Ok(memory)
    }

    /// Drop the cached memory for `identity`, e.g. after a transcript lands.
    pub async fn invalidate(&self, identity: &IdentityKey) {
        if self.cache.delete(&memory_key(identity)).await {
            tracing::info!(%identity, "memory cache invalidated");
        }
    }
}
