//! Key/value cache store with per-key expiry.
//!
//! [`CacheStore`] is the raw backend contract and returns typed errors.
//! [`Cache`] is what the rest of the crate talks to: it (de)serializes JSON
//! payloads and turns every backend or serialization fault into a miss or a
//! logged no-op, so an unavailable store degrades to direct upstream calls
//! instead of failing a request.

pub mod memory;
pub mod sqlite;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::Error;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Number of keys handled per page by `scan_delete`.
pub const SCAN_PAGE_SIZE: usize = 100;

/// A stored value with its absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>, now: DateTime<Utc>, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        Self { key: key.into(), value: value.into(), expires_at: now + ttl }
    }

    /// An entry is dead from `expires_at` onward.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Backend contract for the cache substrate.
///
/// Writes overwrite unconditionally. Reads of expired keys return `None`.
#[async_trait]
pub trait CacheStore: Send + Sync + fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<String>, Error>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), Error>;

    async fn delete(&self, key: &str) -> Result<(), Error>;

    /// Delete every key starting with `prefix`, one page at a time.
    ///
    /// Returns the number of keys removed.
    async fn scan_delete(&self, prefix: &str) -> Result<u64, Error>;

    /// Physically remove every expired entry. Returns how many went.
    async fn purge_expired(&self) -> Result<u64, Error>;
}

/// Fault-tolerant, JSON-typed view over a [`CacheStore`].
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache").field("store", &self.store).finish()
    }
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Read and decode a cached value. Any failure reads as a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache read failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "cached value could not be decoded");
                None
            }
        }
    }

    /// Encode and store a value. Returns whether the write landed.
    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key, error = %e, "value could not be encoded for cache");
                return false;
            }
        };

        match self.store.set(key, &raw, ttl).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache write failed");
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        match self.store.delete(key).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache delete failed");
                false
            }
        }
    }

    /// Delete a family of keys. Store faults count as zero deletions.
    pub async fn scan_delete(&self, prefix: &str) -> u64 {
        match self.store.scan_delete(prefix).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(prefix, error = %e, "cache scan-delete failed");
                0
            }
        }
    }

    /// Sweep expired entries out of the backend.
    ///
    /// This is maintenance, not the request path, so faults are returned.
    pub async fn purge_expired(&self) -> Result<u64, Error> {
        let removed = self.store.purge_expired().await?;
        if removed > 0 {
            tracing::info!(removed, "purged expired cache entries");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FailingStore;

    #[test]
    fn test_entry_expiry_boundary() {
        let now = Utc::now();
        let entry = CacheEntry::new("k", "v", now, Duration::from_secs(10));
        assert!(!entry.is_expired(now));
        assert!(!entry.is_expired(now + chrono::Duration::seconds(9)));
        assert!(entry.is_expired(now + chrono::Duration::seconds(10)));
    }

    #[tokio::test]
    async fn test_failing_store_degrades_to_miss() {
        let cache = Cache::new(Arc::new(FailingStore));

        assert_eq!(cache.get_json::<String>("memory:1").await, None);
        assert!(!cache.set_json("memory:1", "value", Duration::from_secs(60)).await);
        assert!(!cache.delete("memory:1").await);
        assert_eq!(cache.scan_delete("slots:").await, 0);
        assert!(cache.purge_expired().await.is_err());
    }

    #[tokio::test]
    async fn test_undecodable_value_is_a_miss() {
        let store = Arc::new(MemoryStore::default());
        store.set("context:1", "not json", Duration::from_secs(60)).await.unwrap();

        let cache = Cache::new(store);
        assert_eq!(cache.get_json::<serde_json::Value>("context:1").await, None);
    }

    #[tokio::test]
    async fn test_json_round_trip() {
        let cache = Cache::new(Arc::new(MemoryStore::default()));
        assert!(cache.set_json("memory:1", &vec!["likes blue"], Duration::from_secs(60)).await);
        assert_eq!(cache.get_json::<Vec<String>>("memory:1").await, Some(vec!["likes blue".to_string()]));
    }
}
