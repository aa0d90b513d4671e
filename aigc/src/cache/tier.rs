//! Cache tier trait and shared types

use std::time::Duration;

use async_trait::async_trait;

/// Which tier of a `TieredCache` a hit came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TierKind {
    /// Fast, possibly networked, possibly unavailable
    Volatile,
    /// Local persistent fallback
    Durable,
}

impl TierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::Volatile => "volatile",
            TierKind::Durable => "durable",
        }
    }
}

/// A value read back from a tier, with the expiry the tier recorded for it
#[derive(Debug, Clone, PartialEq)]
pub struct TierEntry {
    pub value: String,
    /// Unix milliseconds. `None` when the tier could not report it.
    pub expires_at_ms: Option<i64>,
}

impl TierEntry {
    /// Time left before expiry, measured against `now_ms`.
    pub fn remaining_ttl(&self, now_ms: i64) -> Option<Duration> {
        let expires = self.expires_at_ms?;
        let left = expires - now_ms;
        if left <= 0 {
            None
        } else {
            Some(Duration::from_millis(left as u64))
        }
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn expiry_from(ttl: Duration) -> i64 {
    now_ms().saturating_add(ttl.as_millis().min(i64::MAX as u128) as i64)
}

/// Trait for cache tiers.
///
/// Implementations own their expiry: a `get` after `ttl` has elapsed must
/// return `None`. Errors mean the tier itself is unhealthy; a plain miss is
/// `Ok(None)`.
#[async_trait]
pub trait CacheTier: Send + Sync {
    /// Human-readable backend name (for logs and health output)
    fn name(&self) -> &str;

    /// Read an unexpired value
    async fn get(&self, key: &str) -> crate::Result<Option<TierEntry>>;

    /// Replace the value stored under `key`
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> crate::Result<()>;

    /// Remove `key` if present
    async fn delete(&self, key: &str) -> crate::Result<()>;
}
