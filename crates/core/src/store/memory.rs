//! In-process cache store.
//!
//! Backed by an ordered map so prefix scans walk a contiguous key range.
//! Expired entries are dropped when read and swept by
//! [`CacheStore::purge_expired`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CacheEntry, CacheStore, SCAN_PAGE_SIZE};
use crate::Error;
use crate::clock::{Clock, SystemClock};

#[derive(Debug)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
    page_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { entries: RwLock::new(BTreeMap::new()), clock, page_size: SCAN_PAGE_SIZE }
    }

    /// Override the scan page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Number of live (unexpired) entries.
    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries.read().await.values().filter(|e| !e.is_expired(now)).count()
    }

    /// Number of entries held, expired or not.
    pub async fn stored_len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Live keys starting with `prefix`, in key order.
    pub async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let now = self.clock.now();
        self.entries
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let now = self.clock.now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), Error> {
        let entry = CacheEntry::new(key, value, self.clock.now(), ttl);
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn scan_delete(&self, prefix: &str) -> Result<u64, Error> {
        let mut deleted = 0u64;
        loop {
            let mut entries = self.entries.write().await;
            let page: Vec<String> = entries
                .range(prefix.to_string()..)
                .take_while(|(key, _)| key.starts_with(prefix))
                .take(self.page_size)
                .map(|(key, _)| key.clone())
                .collect();

            for key in &page {
                entries.remove(key);
            }
            deleted += page.len() as u64;

            if page.len() < self.page_size {
                break;
            }
        }
        Ok(deleted)
    }

    async fn purge_expired(&self) -> Result<u64, Error> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok((before - entries.len()) as u64)
    }
}
