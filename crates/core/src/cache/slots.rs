//! Read-through cache over calendar availability.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::keys::{slots_key, slots_prefix};
use crate::Error;
use crate::source::{AvailabilitySource, SlotQuery, SlotsResponse};
use crate::store::Cache;

/// Availability moves fast, so it gets a shorter TTL than memory.
pub const DEFAULT_SLOTS_TTL: Duration = Duration::from_secs(180);

#[derive(Clone)]
pub struct CachedSlots {
    source: Arc<dyn AvailabilitySource>,
    cache: Cache,
    ttl: Duration,
}

impl CachedSlots {
    pub fn new(source: Arc<dyn AvailabilitySource>, cache: Cache) -> Self {
        Self { source, cache, ttl: DEFAULT_SLOTS_TTL }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Fetch free slots for one window, serving from cache unless `force_refresh`.
    ///
    /// # Errors
    ///
    /// Upstream failures are returned as-is; cache failures never are.
    pub async fn fetch(&self, query: &SlotQuery, force_refresh: bool) -> Result<SlotsResponse, Error> {
        let key = slots_key(query);

        if !force_refresh && let Some(cached) = self.cache.get_json::<SlotsResponse>(&key).await {
            tracing::debug!(calendar_id = %query.calendar_id, "calendar cache hit");
            return Ok(cached);
        }

        tracing::debug!(calendar_id = %query.calendar_id, force_refresh, "calendar cache miss");
        let start = Instant::now();
        let slots = self.source.get_slots(query).await?;
        tracing::info!(
            calendar_id = %query.calendar_id,
            slots = slots.slots.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "calendar upstream fetch"
        );

        self.cache.set_json(&key, &slots, self.ttl).await;
        Ok(slots)
    }

    /// Drop every cached window of `calendar_id`. Called after a booking
    /// mutation consumes or frees a slot.
    ///
    /// Returns the number of cache entries removed.
    pub async fn invalidate(&self, calendar_id: &str) -> u64 {
        let deleted = self.cache.scan_delete(&slots_prefix(calendar_id)).await;
        tracing::info!(calendar_id, deleted, "calendar cache invalidated");
        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{CacheStore, MemoryStore};
    use crate::testing::FakeSlots;
    use chrono::NaiveDate;

    fn query(start_day: u32) -> SlotQuery {
        let today = NaiveDate::from_ymd_opt(2024, 1, start_day).unwrap();
        SlotQuery::upcoming("cal-1", "America/New_York", today, 7)
    }

    #[tokio::test]
    async fn test_hit_after_set_skips_upstream() {
        let source = Arc::new(FakeSlots::with_slots(&["2024-01-15T14:00:00Z"]));
        let slots = CachedSlots::new(source.clone(), Cache::new(Arc::new(MemoryStore::default())));

        slots.fetch(&query(15), false).await.unwrap();
        let cached = slots.fetch(&query(15), false).await.unwrap();

        assert_eq!(cached.slots, vec!["2024-01-15T14:00:00Z".to_string()]);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_distinct_windows_cached_separately() {
        let source = Arc::new(FakeSlots::with_slots(&[]));
        let slots = CachedSlots::new(source.clone(), Cache::new(Arc::new(MemoryStore::default())));

        slots.fetch(&query(15), false).await.unwrap();
        slots.fetch(&query(16), false).await.unwrap();
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_expiry_uses_slots_ttl() {
        let source = Arc::new(FakeSlots::with_slots(&[]));
        let clock = Arc::new(ManualClock::default());
        let slots = CachedSlots::new(source.clone(), Cache::new(Arc::new(MemoryStore::new(clock.clone()))));

        slots.fetch(&query(15), false).await.unwrap();
        clock.advance(Duration::from_secs(179));
        slots.fetch(&query(15), false).await.unwrap();
        assert_eq!(source.calls(), 1);

        clock.advance(Duration::from_secs(2));
        slots.fetch(&query(15), false).await.unwrap();
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_booking_invalidation_clears_every_window() {
        let store = Arc::new(MemoryStore::default());
        let source = Arc::new(FakeSlots::with_slots(&["2024-01-15T14:00:00Z"]));
        let slots = CachedSlots::new(source.clone(), Cache::new(store.clone()));

        for day in [15, 16, 17] {
            slots.fetch(&query(day), false).await.unwrap();
        }
        store.set("slots:cal-2:2024-01-15:2024-01-22:UTC", "{}", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.keys_with_prefix("slots:cal-1:").await.len(), 3);

        assert_eq!(slots.invalidate("cal-1").await, 3);
        assert!(store.keys_with_prefix("slots:cal-1:").await.is_empty());
        assert_eq!(store.keys_with_prefix("slots:cal-2:").await.len(), 1);

        slots.fetch(&query(15), false).await.unwrap();
        assert_eq!(source.calls(), 4);
    }
}
