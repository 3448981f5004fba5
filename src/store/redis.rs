//! Redis-backed counter store.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisResult, Script};
use tracing::{debug, info};

use super::{CounterStore, StoreError};

/// Increments the key and sets its expiry only when the increment created it,
/// so later hits in the window never push the reset further out.
const INCREMENT_SCRIPT: &str = r#"
local current = redis.call('INCR', KEYS[1])
if current == 1 then
    redis.call('EXPIRE', KEYS[1], tonumber(ARGV[1]))
end
return current
"#;

/// Keys fetched per `SCAN` round trip when clearing a namespace.
const SCAN_BATCH: usize = 100;

/// Counter store shared between processes through Redis.
pub struct RedisStore {
    conn: ConnectionManager,
    script: Script,
    command_timeout: Duration,
}

impl RedisStore {
    /// Connect to `url`, giving up after `connect_timeout`.
    pub async fn connect(
        url: &str,
        connect_timeout: Duration,
        command_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let conn = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(connect_timeout))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        info!(url = %url, "Connected to Redis counter store");

        Ok(Self {
            conn,
            script: Script::new(INCREMENT_SCRIPT),
            command_timeout,
        })
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        tokio::time::timeout(self.command_timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(self.command_timeout))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment_and_get(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        // EXPIRE takes whole seconds; a sub-second window still needs a TTL.
        let ttl_secs = window.as_secs().max(1);

        let mut invocation = self.script.key(key);
        invocation.arg(ttl_secs);
        let count: u64 = self.bounded(invocation.invoke_async(&mut conn)).await?;
        Ok(count)
    }

    async fn clear_namespace(&self, prefix: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", prefix);
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let mut scan = redis::cmd("SCAN");
            scan.arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH);
            let (next, keys): (u64, Vec<String>) = self.bounded(scan.query_async(&mut conn)).await?;

            if !keys.is_empty() {
                let mut del = redis::cmd("DEL");
                del.arg(&keys);
                let deleted: u64 = self.bounded(del.query_async(&mut conn)).await?;
                removed += deleted;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(prefix = %prefix, removed = removed, "Cleared Redis counters");
        Ok(removed)
    }

    fn kind(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn get_test_store() -> Option<RedisStore> {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        RedisStore::connect(&url, Duration::from_secs(1), Duration::from_secs(1))
            .await
            .ok()
    }

    #[tokio::test]
    async fn test_redis_increment_and_expiry() {
        let store = match get_test_store().await {
            Some(s) => s,
            None => return,
        };
        let prefix = "ratelimit:fieldgate-test-incr:";
        store.clear_namespace(prefix).await.unwrap();
        let key = format!("{}expensiveField", prefix);

        assert_eq!(store.increment_and_get(&key, Duration::from_secs(1)).await.unwrap(), 1);
        assert_eq!(store.increment_and_get(&key, Duration::from_secs(1)).await.unwrap(), 2);

        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(store.increment_and_get(&key, Duration::from_secs(1)).await.unwrap(), 1);
        store.clear_namespace(prefix).await.unwrap();
    }

    #[tokio::test]
    async fn test_redis_increments_do_not_extend_expiry() {
        let store = match get_test_store().await {
            Some(s) => s,
            None => return,
        };
        let prefix = "ratelimit:fieldgate-test-ttl:";
        store.clear_namespace(prefix).await.unwrap();
        let key = format!("{}expensiveField", prefix);
        let window = Duration::from_secs(2);

        assert_eq!(store.increment_and_get(&key, window).await.unwrap(), 1);
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(store.increment_and_get(&key, window).await.unwrap(), 2);

        // 2.4s after the first hit: the window opened by it is over, even
        // though the second hit was only 1.2s ago.
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(store.increment_and_get(&key, window).await.unwrap(), 1);
        store.clear_namespace(prefix).await.unwrap();
    }

    #[tokio::test]
    async fn test_redis_clear_namespace() {
        let store = match get_test_store().await {
            Some(s) => s,
            None => return,
        };
        let prefix = "ratelimit:fieldgate-test-clear:";
        store.clear_namespace(prefix).await.unwrap();

        for resource in ["a", "b", "c"] {
            let key = format!("{}{}", prefix, resource);
            store.increment_and_get(&key, Duration::from_secs(30)).await.unwrap();
        }

        assert_eq!(store.clear_namespace(prefix).await.unwrap(), 3);
        assert_eq!(store.clear_namespace(prefix).await.unwrap(), 0);
    }
}
