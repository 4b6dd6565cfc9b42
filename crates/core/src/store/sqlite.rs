//! SQLite-backed cache store.
//!
//! Entries live in the `cache_entries` table with an absolute expiry in unix
//! milliseconds. Expired rows are ignored on read and removed by
//! [`CacheStore::purge_expired`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::OptionalExtension;

use super::{CacheEntry, CacheStore, SCAN_PAGE_SIZE};
use crate::Error;
use crate::clock::{Clock, SystemClock};
use crate::db::Database;

#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Database,
    clock: Arc<dyn Clock>,
    page_size: usize,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self::with_clock(db, Arc::new(SystemClock))
    }

    pub fn with_clock(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock, page_size: SCAN_PAGE_SIZE }
    }

    /// Override the scan page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }
}

#[async_trait]
impl CacheStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let key = key.to_string();
        let now = self.now_ms();
        self.db
            .conn
            .call(move |conn| -> Result<Option<String>, Error> {
                let value = conn
                    .query_row(
                        "SELECT value FROM cache_entries WHERE key = ?1 AND expires_at > ?2",
                        params![key, now],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(value)
            })
            .await
            .map_err(Error::from)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), Error> {
        let entry = CacheEntry::new(key, value, self.clock.now(), ttl);
        let expires_at = entry.expires_at.timestamp_millis();
        self.db
            .conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO cache_entries (key, value, expires_at) VALUES (?1, ?2, ?3)
                    ON CONFLICT(key) DO UPDATE SET
                        value = excluded.value,
                        expires_at = excluded.expires_at",
                    params![entry.key, entry.value, expires_at],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        let key = key.to_string();
        self.db
            .conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn scan_delete(&self, prefix: &str) -> Result<u64, Error> {
        let page_size = self.page_size;
        let mut deleted = 0u64;
        loop {
            let prefix = prefix.to_string();
            let removed = self
                .db
                .conn
                .call(move |conn| -> Result<usize, Error> {
                    let tx = conn.transaction()?;
                    let keys: Vec<String> = {
                        let mut stmt = tx.prepare(
                            "SELECT key FROM cache_entries
                            WHERE substr(key, 1, length(?1)) = ?1
                            ORDER BY key LIMIT ?2",
                        )?;
                        let rows = stmt.query_map(params![prefix, page_size as i64], |row| row.get(0))?;
                        rows.collect::<Result<_, _>>()?
                    };
                    {
                        let mut del = tx.prepare("DELETE FROM cache_entries WHERE key = ?1")?;
                        for key in &keys {
                            del.execute(params![key])?;
                        }
                    }
                    tx.commit()?;
                    Ok(keys.len())
                })
                .await
                .map_err(Error::from)?;

            deleted += removed as u64;
            if removed < page_size {
                break;
            }
        }
        Ok(deleted)
    }

    async fn purge_expired(&self) -> Result<u64, Error> {
        let now = self.now_ms();
        self.db
            .conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM cache_entries WHERE expires_at <= ?1", params![now])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    async fn store_with_clock() -> (SqliteStore, Arc<ManualClock>) {
        let db = Database::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::default());
        (SqliteStore::with_clock(db, clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let (store, _) = store_with_clock().await;
        store.set("memory:1", r#"{"facts":[]}"#, Duration::from_secs(300)).await.unwrap();
        assert_eq!(store.get("memory:1").await.unwrap().as_deref(), Some(r#"{"facts":[]}"#));
        assert_eq!(store.get("memory:2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expiry_and_purge() {
        let (store, clock) = store_with_clock().await;
        store.set("short", "1", Duration::from_secs(10)).await.unwrap();
        store.set("long", "2", Duration::from_secs(3600)).await.unwrap();

        clock.advance(Duration::from_secs(11));
        assert_eq!(store.get("short").await.unwrap(), None);
        assert!(store.get("long").await.unwrap().is_some());

        assert_eq!(store.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_overwrites() {
        let (store, _) = store_with_clock().await;
        store.set("k", "old", Duration::from_secs(60)).await.unwrap();
        store.set("k", "new", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_delete() {
        let (store, _) = store_with_clock().await;
        store.set("k", "v", Duration::from_secs(60)).await.unwrap();
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scan_delete_by_prefix_in_pages() {
        let (store, _) = store_with_clock().await;
        let store = store.with_page_size(2);
        for (start, end) in [("2024-01-01", "2024-01-08"), ("2024-01-02", "2024-01-09"), ("2024-01-03", "2024-01-10")] {
            let key = format!("slots:cal-1:{start}:{end}:America/New_York");
            store.set(&key, "{}", Duration::from_secs(180)).await.unwrap();
        }
        store.set("slots:cal-10:2024-01-01:2024-01-08:UTC", "{}", Duration::from_secs(180)).await.unwrap();

        let deleted = store.scan_delete("slots:cal-1:").await.unwrap();
        assert_eq!(deleted, 3);
        assert!(store.get("slots:cal-10:2024-01-01:2024-01-08:UTC").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_prefix_with_like_metacharacters() {
        let (store, _) = store_with_clock().await;
        store.set("slots:a_b%:x", "{}", Duration::from_secs(60)).await.unwrap();
        store.set("slots:aXbY:x", "{}", Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.scan_delete("slots:a_b%:").await.unwrap(), 1);
        assert!(store.get("slots:aXbY:x").await.unwrap().is_some());
    }
}
