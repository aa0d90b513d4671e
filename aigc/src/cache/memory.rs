//! In-process volatile tier
//!
//! Used when no Redis URL is configured, and as a fast fake in tests.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::tier::{CacheTier, TierEntry};

struct MemoryEntry {
    value: String,
    expires_at: Instant,
    expires_at_ms: i64,
    last_accessed: AtomicU64,
}

/// Bounded in-memory tier with lazy expiry and least-recently-used eviction
#[derive(Clone)]
pub struct MemoryTier {
    entries: Arc<RwLock<HashMap<String, MemoryEntry>>>,
    max_entries: usize,
    access_counter: Arc<AtomicU64>,
}

impl MemoryTier {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            max_entries: max_entries.max(1),
            access_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn entry_count(&self) -> usize {
        self.entries.read().len()
    }

    /// Drop entries whose TTL has elapsed
    fn purge_expired(entries: &mut HashMap<String, MemoryEntry>) {
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at > now);
    }

    fn evict_lru(entries: &mut HashMap<String, MemoryEntry>) {
        let lru_key = entries
            .iter()
            .min_by_key(|(_, e)| e.last_accessed.load(Ordering::Relaxed))
            .map(|(k, _)| k.clone());

        if let Some(key) = lru_key {
            entries.remove(&key);
            metrics::counter!("aigc_cache_evictions_total", "tier" => "memory").increment(1);
        }
    }
}

#[async_trait]
impl CacheTier for MemoryTier {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> crate::Result<Option<TierEntry>> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => {
                    let access = self.access_counter.fetch_add(1, Ordering::Relaxed);
                    entry.last_accessed.store(access, Ordering::Relaxed);
                    return Ok(Some(TierEntry {
                        value: entry.value.clone(),
                        expires_at_ms: Some(entry.expires_at_ms),
                    }));
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // Expired. Re-check under the write lock: a concurrent set may have
        // replaced it in between.
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|e| e.expires_at <= now) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> crate::Result<()> {
        let mut entries = self.entries.write();

        if !entries.contains_key(key) && entries.len() >= self.max_entries {
            // Expired entries go first so a full tier only evicts live ones
            // when it has to
            Self::purge_expired(&mut entries);
            if entries.len() >= self.max_entries {
                Self::evict_lru(&mut entries);
            }
        }

        let access = self.access_counter.fetch_add(1, Ordering::Relaxed);
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
                expires_at_ms: super::tier::expiry_from(ttl),
                last_accessed: AtomicU64::new(access),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> crate::Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get() {
        let tier = MemoryTier::new(10);
        tier.set("k", "v", Duration::from_secs(60)).await.unwrap();

        let entry = tier.get("k").await.unwrap().unwrap();
        assert_eq!(entry.value, "v");
        assert!(entry.expires_at_ms.is_some());
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let tier = MemoryTier::new(10);
        assert!(tier.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_absent() {
        let tier = MemoryTier::new(10);
        tier.set("k", "v", Duration::from_millis(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(tier.get("k").await.unwrap().is_none());
        assert_eq!(tier.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_set_replaces_value() {
        let tier = MemoryTier::new(10);
        tier.set("k", "first", Duration::from_secs(60)).await.unwrap();
        tier.set("k", "second", Duration::from_secs(60)).await.unwrap();

        assert_eq!(tier.get("k").await.unwrap().unwrap().value, "second");
        assert_eq!(tier.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_evicts_least_recently_used() {
        let tier = MemoryTier::new(2);
        tier.set("a", "1", Duration::from_secs(60)).await.unwrap();
        tier.set("b", "2", Duration::from_secs(60)).await.unwrap();

        // Touch "a" so "b" becomes the eviction candidate
        tier.get("a").await.unwrap();
        tier.set("c", "3", Duration::from_secs(60)).await.unwrap();

        assert_eq!(tier.entry_count(), 2);
        assert!(tier.get("a").await.unwrap().is_some());
        assert!(tier.get("b").await.unwrap().is_none());
        assert!(tier.get("c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete() {
        let tier = MemoryTier::new(10);
        tier.set("k", "v", Duration::from_secs(60)).await.unwrap();
        tier.delete("k").await.unwrap();
        assert!(tier.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_full_tier_drops_expired_before_evicting() {
        let tier = MemoryTier::new(2);
        tier.set("short", "v", Duration::from_millis(10)).await.unwrap();
        tier.set("long", "v", Duration::from_secs(60)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        tier.set("new", "v", Duration::from_secs(60)).await.unwrap();

        assert_eq!(tier.entry_count(), 2);
        assert!(tier.get("long").await.unwrap().is_some());
        assert!(tier.get("new").await.unwrap().is_some());
    }
}
