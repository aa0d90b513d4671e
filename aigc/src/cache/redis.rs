//! Redis-backed volatile tier

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use super::tier::{now_ms, CacheTier, TierEntry};
use crate::Error;

/// Redis volatile tier.
///
/// Every command is bounded by `op_timeout` so a hung server reads as an
/// outage instead of stalling the request. A failed command drops the
/// shared connection; the next call reconnects.
pub struct RedisTier {
    client: redis::Client,
    conn: Mutex<Option<redis::aio::MultiplexedConnection>>,
    prefix: String,
    op_timeout: Duration,
}

impl RedisTier {
    /// Create a new Redis tier for the given URL. No connection is opened yet.
    pub fn new(url: &str, op_timeout: Duration) -> crate::Result<Self> {
        Self::with_prefix(url, "aigc:", op_timeout)
    }

    /// Create with a custom key prefix
    pub fn with_prefix(url: &str, prefix: &str, op_timeout: Duration) -> crate::Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            conn: Mutex::new(None),
            prefix: prefix.to_string(),
            op_timeout,
        })
    }

    fn make_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    async fn get_connection(&self) -> crate::Result<redis::aio::MultiplexedConnection> {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            // Multiplexed connections are cheap handles onto one socket
            return Ok(conn.clone());
        }

        let conn = tokio::time::timeout(
            self.op_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| Error::Cache("redis connect timed out".to_string()))??;

        *slot = Some(conn.clone());
        Ok(conn)
    }

    async fn bounded<T, F>(&self, op: &str, fut: F) -> crate::Result<T>
    where
        F: std::future::Future<Output = redis::RedisResult<T>>,
    {
        let result = match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::Cache(format!("redis {} timed out", op))),
        };
        if result.is_err() {
            self.conn.lock().await.take();
        }
        result
    }
}

#[async_trait]
impl CacheTier for RedisTier {
    fn name(&self) -> &str {
        "redis"
    }

    async fn get(&self, key: &str) -> crate::Result<Option<TierEntry>> {
        let mut conn = self.get_connection().await?;
        let redis_key = self.make_key(key);

        let (value, pttl): (Option<String>, i64) = self
            .bounded(
                "get",
                redis::pipe()
                    .get(&redis_key)
                    .pttl(&redis_key)
                    .query_async(&mut conn),
            )
            .await?;

        // PTTL: -1 = no expiry, -2 = missing
        Ok(value.map(|value| TierEntry {
            value,
            expires_at_ms: (pttl > 0).then(|| now_ms() + pttl),
        }))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> crate::Result<()> {
        let mut conn = self.get_connection().await?;
        let redis_key = self.make_key(key);
        let ttl_ms = ttl.as_millis().clamp(1, u64::MAX as u128) as u64;

        self.bounded(
            "set",
            conn.pset_ex::<_, _, ()>(&redis_key, value, ttl_ms),
        )
        .await
    }

    async fn delete(&self, key: &str) -> crate::Result<()> {
        let mut conn = self.get_connection().await?;
        let redis_key = self.make_key(key);

        self.bounded("del", conn.del::<_, ()>(&redis_key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_key_applies_prefix() {
        let tier = RedisTier::new("redis://127.0.0.1:6379", Duration::from_millis(100)).unwrap();
        assert_eq!(tier.make_key("ai_answer_abc"), "aigc:ai_answer_abc");
    }

    #[tokio::test]
    async fn test_unreachable_server_errors_instead_of_hanging() {
        // Port 1 is never a Redis server; connect fails fast or times out.
        let tier = RedisTier::new("redis://127.0.0.1:1", Duration::from_millis(200)).unwrap();
        let started = std::time::Instant::now();

        assert!(tier.get("k").await.is_err());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    // Integration test - requires a running Redis
    #[tokio::test]
    #[ignore = "requires Redis on localhost:6379"]
    async fn test_redis_roundtrip() {
        let tier = RedisTier::with_prefix(
            "redis://127.0.0.1:6379",
            "aigc-test:",
            Duration::from_secs(1),
        )
        .unwrap();

        tier.set("k", "v", Duration::from_secs(5)).await.unwrap();
        let entry = tier.get("k").await.unwrap().unwrap();
        assert_eq!(entry.value, "v");
        assert!(entry.expires_at_ms.is_some());

        tier.delete("k").await.unwrap();
        assert!(tier.get("k").await.unwrap().is_none());
    }
}
