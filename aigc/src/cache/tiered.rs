//! Two-tier cache with lazy volatile-tier health tracking.
//!
//! ```text
//!  get ──► volatile ──hit──► return
//!             │ miss / down
//!             ▼
//!          durable ──hit──► write back to volatile (best effort) ──► return
//!             │ miss
//!             ▼
//!           absent
//!
//!  set ──► volatile ──ok──► done
//!             │ down / error
//!             ▼
//!          durable
//! ```
//!
//! Tier failures never reach the caller. A volatile failure opens a
//! cool-down window; once it elapses the next operation probes the tier
//! again, so an outage heals without a restart.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::memory::MemoryTier;
use super::sqlite::SqliteTier;
use super::stats::{CacheStats, CacheStatsSnapshot};
use super::tier::{now_ms, CacheTier, TierKind};
use super::CacheConfig;
use crate::{Error, Result};

/// Availability state of the volatile tier
struct VolatileHealth {
    down_until: Mutex<Option<Instant>>,
    cooldown: Duration,
}

impl VolatileHealth {
    fn new(cooldown: Duration) -> Self {
        Self {
            down_until: Mutex::new(None),
            cooldown,
        }
    }

    fn is_available(&self) -> bool {
        match *self.down_until.lock() {
            None => true,
            Some(until) => Instant::now() >= until,
        }
    }

    /// Returns true when this call flipped the tier from up to down
    fn mark_down(&self) -> bool {
        let mut down_until = self.down_until.lock();
        let was_up = down_until.is_none();
        *down_until = Some(Instant::now() + self.cooldown);
        was_up
    }

    /// Returns true when this call recovered the tier
    fn mark_up(&self) -> bool {
        self.down_until.lock().take().is_some()
    }
}

/// Health summary for `/health`
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheHealth {
    pub volatile_backend: Option<String>,
    pub volatile_available: bool,
    pub durable_backend: Option<String>,
    pub stats: CacheStatsSnapshot,
}

/// Volatile tier in front of a durable fallback tier
pub struct TieredCache {
    volatile: Option<Arc<dyn CacheTier>>,
    durable: Option<Arc<dyn CacheTier>>,
    health: VolatileHealth,
    stats: Arc<CacheStats>,
}

impl TieredCache {
    pub fn new(
        volatile: Option<Arc<dyn CacheTier>>,
        durable: Option<Arc<dyn CacheTier>>,
        cooldown: Duration,
    ) -> Self {
        Self {
            volatile,
            durable,
            health: VolatileHealth::new(cooldown),
            stats: Arc::new(CacheStats::new()),
        }
    }

    /// A cache that stores nothing: every lookup misses.
    pub fn disabled() -> Self {
        Self::new(None, None, Duration::from_secs(30))
    }

    /// Build both tiers from configuration.
    ///
    /// `data_dir` is used for the SQLite file when no explicit path is set.
    pub fn from_config(config: &CacheConfig, data_dir: &Path) -> Result<Self> {
        let volatile: Option<Arc<dyn CacheTier>> = match config.backend.as_str() {
            "memory" => Some(Arc::new(MemoryTier::new(config.memory_max_entries))),
            "none" => None,
            #[cfg(feature = "cache-redis")]
            "redis" => {
                let url = config.redis_url.as_deref().ok_or_else(|| {
                    Error::Config("cache.backend = \"redis\" requires cache.redis_url".to_string())
                })?;
                Some(Arc::new(super::RedisTier::new(url, config.op_timeout())?))
            }
            #[cfg(not(feature = "cache-redis"))]
            "redis" => {
                return Err(Error::Config(
                    "Redis cache requires the 'cache-redis' feature".to_string(),
                ))
            }
            other => {
                return Err(Error::Config(format!("Unknown cache backend: {}", other)));
            }
        };

        let durable: Option<Arc<dyn CacheTier>> = if config.durable_enabled {
            let path = config
                .sqlite_path
                .clone()
                .unwrap_or_else(|| data_dir.join("cache").join("durable.db"));
            Some(Arc::new(SqliteTier::new(path, config.durable_max_entries)?))
        } else {
            None
        };

        info!(
            volatile = volatile.as_ref().map(|t| t.name()).unwrap_or("none"),
            durable = durable.as_ref().map(|t| t.name()).unwrap_or("none"),
            "Cache tiers configured"
        );

        Ok(Self::new(volatile, durable, config.probe_interval()))
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    /// Whether the volatile tier is configured and not in a cool-down window
    pub fn volatile_available(&self) -> bool {
        self.volatile.is_some() && self.health.is_available()
    }

    pub fn health(&self) -> CacheHealth {
        CacheHealth {
            volatile_backend: self.volatile.as_ref().map(|t| t.name().to_string()),
            volatile_available: self.volatile_available(),
            durable_backend: self.durable.as_ref().map(|t| t.name().to_string()),
            stats: self.stats.snapshot(),
        }
    }

    fn volatile_if_available(&self) -> Option<&Arc<dyn CacheTier>> {
        self.volatile
            .as_ref()
            .filter(|_| self.health.is_available())
    }

    fn record_volatile_ok(&self, tier: &dyn CacheTier) {
        if self.health.mark_up() {
            info!(tier = tier.name(), "Volatile cache tier recovered");
        }
    }

    fn record_volatile_failure(&self, tier: &dyn CacheTier, op: &str, error: &Error) {
        if self.health.mark_down() {
            self.stats.volatile_outage();
            warn!(
                tier = tier.name(),
                op,
                error = %error,
                cooldown_secs = self.health.cooldown.as_secs(),
                "Volatile cache tier unavailable, falling back to durable tier"
            );
        } else {
            debug!(tier = tier.name(), op, error = %error, "Volatile cache tier still failing");
        }
    }

    /// Read a raw value. Tier errors degrade to a miss.
    pub async fn get(&self, key: &str) -> Option<String> {
        if let Some(volatile) = self.volatile_if_available() {
            match volatile.get(key).await {
                Ok(Some(entry)) => {
                    self.record_volatile_ok(volatile.as_ref());
                    self.stats.hit(TierKind::Volatile);
                    return Some(entry.value);
                }
                Ok(None) => self.record_volatile_ok(volatile.as_ref()),
                Err(e) => self.record_volatile_failure(volatile.as_ref(), "get", &e),
            }
        }

        if let Some(durable) = &self.durable {
            match durable.get(key).await {
                Ok(Some(entry)) => {
                    self.stats.hit(TierKind::Durable);
                    if let Some(ttl) = entry.remaining_ttl(now_ms()) {
                        self.write_back(key, &entry.value, ttl).await;
                    }
                    return Some(entry.value);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(tier = durable.name(), key, error = %e, "Durable cache read failed");
                }
            }
        }

        self.stats.miss();
        None
    }

    async fn write_back(&self, key: &str, value: &str, ttl: Duration) {
        let Some(volatile) = self.volatile_if_available() else {
            return;
        };
        match volatile.set(key, value, ttl).await {
            Ok(()) => {
                self.record_volatile_ok(volatile.as_ref());
                self.stats.write_back();
            }
            Err(e) => self.record_volatile_failure(volatile.as_ref(), "write_back", &e),
        }
    }

    /// Store a raw value. The durable tier receives the write only when the
    /// volatile tier is missing, cooling down, or fails this write.
    pub async fn set(&self, key: &str, value: &str, ttl: Duration) {
        if let Some(volatile) = self.volatile_if_available() {
            match volatile.set(key, value, ttl).await {
                Ok(()) => {
                    self.record_volatile_ok(volatile.as_ref());
                    return;
                }
                Err(e) => self.record_volatile_failure(volatile.as_ref(), "set", &e),
            }
        }

        match &self.durable {
            Some(durable) => match durable.set(key, value, ttl).await {
                Ok(()) => self.stats.durable_write(),
                Err(e) => {
                    warn!(tier = durable.name(), key, error = %e, "Durable cache write failed, entry dropped");
                }
            },
            None => debug!(key, "No cache tier available, entry dropped"),
        }
    }

    /// Remove a key from every tier that is reachable
    pub async fn delete(&self, key: &str) {
        if let Some(volatile) = self.volatile_if_available() {
            match volatile.delete(key).await {
                Ok(()) => self.record_volatile_ok(volatile.as_ref()),
                Err(e) => self.record_volatile_failure(volatile.as_ref(), "delete", &e),
            }
        }
        if let Some(durable) = &self.durable {
            if let Err(e) = durable.delete(key).await {
                warn!(tier = durable.name(), key, error = %e, "Durable cache delete failed");
            }
        }
    }

    /// Read and deserialize. A payload that no longer parses is dropped.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "Discarding undecodable cache entry");
                self.delete(key).await;
                None
            }
        }
    }

    /// Serialize and store
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_string(value) {
            Ok(raw) => self.set(key, &raw, ttl).await,
            Err(e) => warn!(key, error = %e, "Failed to serialize cache entry"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_pair() -> (Arc<MemoryTier>, Arc<MemoryTier>, TieredCache) {
        let volatile = Arc::new(MemoryTier::new(100));
        let durable = Arc::new(MemoryTier::new(100));
        let cache = TieredCache::new(
            Some(volatile.clone() as Arc<dyn CacheTier>),
            Some(durable.clone() as Arc<dyn CacheTier>),
            Duration::from_secs(30),
        );
        (volatile, durable, cache)
    }

    #[tokio::test]
    async fn test_set_goes_to_volatile_only_when_healthy() {
        let (volatile, durable, cache) = memory_pair();
        cache.set("k", "v", Duration::from_secs(60)).await;

        assert_eq!(volatile.entry_count(), 1);
        assert_eq!(durable.entry_count(), 0);
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_durable_hit_is_written_back() {
        let (volatile, durable, cache) = memory_pair();
        durable
            .set("k", "from-disk", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(cache.get("k").await.as_deref(), Some("from-disk"));
        let promoted = volatile.get("k").await.unwrap().unwrap();
        assert_eq!(promoted.value, "from-disk");

        let snap = cache.stats().snapshot();
        assert_eq!(snap.durable_hits, 1);
        assert_eq!(snap.write_backs, 1);
    }

    #[tokio::test]
    async fn test_disabled_cache_always_misses() {
        let cache = TieredCache::disabled();
        cache.set("k", "v", Duration::from_secs(60)).await;
        assert!(cache.get("k").await.is_none());
        assert!(!cache.volatile_available());
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let (_, _, cache) = memory_pair();
        cache
            .set_json("k", &vec!["a".to_string(), "b".to_string()], Duration::from_secs(60))
            .await;

        let value: Vec<String> = cache.get_json("k").await.unwrap();
        assert_eq!(value, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_dropped() {
        let (volatile, _, cache) = memory_pair();
        cache.set("k", "not json", Duration::from_secs(60)).await;

        let value: Option<Vec<String>> = cache.get_json("k").await;
        assert!(value.is_none());
        assert_eq!(volatile.entry_count(), 0);
    }

    #[test]
    fn test_health_cooldown_window() {
        let health = VolatileHealth::new(Duration::from_millis(0));
        assert!(health.is_available());
        assert!(health.mark_down());
        assert!(!health.mark_down());
        // Zero cool-down: immediately eligible for a probe again
        assert!(health.is_available());
        assert!(health.mark_up());
        assert!(!health.mark_up());
    }

    #[tokio::test]
    async fn test_from_config_memory_and_sqlite() {
        let temp = tempfile::tempdir().unwrap();
        let config = CacheConfig::default();
        let cache = TieredCache::from_config(&config, temp.path()).unwrap();

        let health = cache.health();
        assert_eq!(health.volatile_backend.as_deref(), Some("memory"));
        assert_eq!(health.durable_backend.as_deref(), Some("sqlite"));
        assert!(temp.path().join("cache").join("durable.db").exists());
    }

    #[test]
    fn test_from_config_rejects_unknown_backend() {
        let temp = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            backend: "memcached".to_string(),
            ..Default::default()
        };
        assert!(TieredCache::from_config(&config, temp.path()).is_err());
    }
}
