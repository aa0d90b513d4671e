//! Tiered cache statistics

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use super::tier::TierKind;

/// Counters for hits, misses and degraded-mode events across both tiers
#[derive(Debug, Default)]
pub struct CacheStats {
    volatile_hits: AtomicU64,
    durable_hits: AtomicU64,
    misses: AtomicU64,
    write_backs: AtomicU64,
    durable_writes: AtomicU64,
    volatile_outages: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStatsSnapshot {
    pub volatile_hits: u64,
    pub durable_hits: u64,
    pub misses: u64,
    pub write_backs: u64,
    pub durable_writes: u64,
    pub volatile_outages: u64,
    pub hit_rate: f64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hit(&self, tier: TierKind) {
        match tier {
            TierKind::Volatile => self.volatile_hits.fetch_add(1, Ordering::Relaxed),
            TierKind::Durable => self.durable_hits.fetch_add(1, Ordering::Relaxed),
        };
        metrics::counter!("aigc_cache_hits_total", "tier" => tier.as_str()).increment(1);
    }

    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("aigc_cache_misses_total").increment(1);
    }

    pub fn write_back(&self) {
        self.write_backs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn durable_write(&self) {
        self.durable_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn volatile_outage(&self) {
        self.volatile_outages.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("aigc_cache_volatile_outages_total").increment(1);
    }

    pub fn hits(&self) -> u64 {
        self.volatile_hits.load(Ordering::Relaxed) + self.durable_hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            volatile_hits: self.volatile_hits.load(Ordering::Relaxed),
            durable_hits: self.durable_hits.load(Ordering::Relaxed),
            misses: self.misses(),
            write_backs: self.write_backs.load(Ordering::Relaxed),
            durable_writes: self.durable_writes.load(Ordering::Relaxed),
            volatile_outages: self.volatile_outages.load(Ordering::Relaxed),
            hit_rate: self.hit_rate(),
        }
    }
}
