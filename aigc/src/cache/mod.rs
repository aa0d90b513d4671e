//! Cache module
//!
//! Two-tier key-value cache used for endpoint results, scraped pages and
//! content sessions. A volatile tier (Redis, or in-process memory when no
//! Redis is configured) is consulted first; a durable SQLite tier backs it
//! and takes over writes while the volatile tier is down.

mod memory;
mod sqlite;
mod stats;
mod tier;
mod tiered;

pub use memory::MemoryTier;
pub use sqlite::SqliteTier;
pub use stats::{CacheStats, CacheStatsSnapshot};
pub use tier::{CacheTier, TierEntry, TierKind};
pub use tiered::{CacheHealth, TieredCache};

#[cfg(feature = "cache-redis")]
mod redis;

#[cfg(feature = "cache-redis")]
pub use redis::RedisTier;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Volatile tier backend: "memory", "redis" or "none"
    #[serde(default = "default_backend")]
    pub backend: String,

    /// URL for Redis connection (volatile tier)
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Enable the durable SQLite tier
    #[serde(default = "default_true")]
    pub durable_enabled: bool,

    /// Path for the SQLite database. Defaults to `<data_dir>/cache/durable.db`.
    #[serde(default)]
    pub sqlite_path: Option<PathBuf>,

    /// Entry bound for the in-process volatile tier
    #[serde(default = "default_memory_max_entries")]
    pub memory_max_entries: usize,

    /// Row bound for the durable tier (LRU trimmed)
    #[serde(default = "default_durable_max_entries")]
    pub durable_max_entries: Option<usize>,

    /// Per-operation timeout for the volatile tier
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,

    /// Cool-down after a volatile-tier failure before it is tried again
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    #[serde(default)]
    pub ttl: CacheTtlConfig,
}

fn default_backend() -> String {
    "memory".to_string()
}

fn default_true() -> bool {
    true
}

fn default_memory_max_entries() -> usize {
    10_000
}

fn default_durable_max_entries() -> Option<usize> {
    Some(100_000)
}

fn default_op_timeout_ms() -> u64 {
    250
}

fn default_probe_interval_secs() -> u64 {
    30
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            redis_url: None,
            durable_enabled: true,
            sqlite_path: None,
            memory_max_entries: default_memory_max_entries(),
            durable_max_entries: default_durable_max_entries(),
            op_timeout_ms: default_op_timeout_ms(),
            probe_interval_secs: default_probe_interval_secs(),
            ttl: CacheTtlConfig::default(),
        }
    }
}

impl CacheConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

/// Expiry per class of cached data, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheTtlConfig {
    #[serde(default = "default_questions_ttl")]
    pub questions_secs: u64,
    #[serde(default = "default_metadata_ttl")]
    pub metadata_secs: u64,
    #[serde(default = "default_answers_ttl")]
    pub answers_secs: u64,
    #[serde(default = "default_sessions_ttl")]
    pub sessions_secs: u64,
    #[serde(default = "default_pages_ttl")]
    pub pages_secs: u64,
}

fn default_questions_ttl() -> u64 {
    600
}

fn default_metadata_ttl() -> u64 {
    3600
}

fn default_answers_ttl() -> u64 {
    300
}

fn default_sessions_ttl() -> u64 {
    3600
}

fn default_pages_ttl() -> u64 {
    1800
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            questions_secs: default_questions_ttl(),
            metadata_secs: default_metadata_ttl(),
            answers_secs: default_answers_ttl(),
            sessions_secs: default_sessions_ttl(),
            pages_secs: default_pages_ttl(),
        }
    }
}

impl CacheTtlConfig {
    pub fn ttl_for(&self, class: TtlClass) -> Duration {
        let secs = match class {
            TtlClass::Questions => self.questions_secs,
            TtlClass::Metadata => self.metadata_secs,
            TtlClass::Answers => self.answers_secs,
            TtlClass::Sessions => self.sessions_secs,
            TtlClass::Pages => self.pages_secs,
        };
        Duration::from_secs(secs)
    }
}

/// Class of cached data; each class has its own expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlClass {
    Questions,
    Metadata,
    Answers,
    Sessions,
    Pages,
}
