//! Counter store abstraction and implementations.
//!
//! The limiter never coordinates counters itself. Every attempt is recorded
//! through a [`CounterStore`], whose increment must be atomic per key.

mod memory;
#[cfg(feature = "redis")]
mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::StoreConfig;
use crate::error::{FieldgateError, Result};

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

/// Errors reported by a counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or rejected the command
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    /// The store did not answer in time
    #[error("counter store timed out after {0:?}")]
    Timeout(Duration),
}

/// An atomic increment-with-expiry key/value service.
///
/// Implementations must guarantee that concurrent increments of the same key
/// are never lost, and that the expiry is set by the first increment of a key
/// only. Later increments inside the window leave the expiry untouched.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key` and return the new count, creating it with a TTL of
    /// `window` when it does not exist.
    async fn increment_and_get(
        &self,
        key: &str,
        window: Duration,
    ) -> std::result::Result<u64, StoreError>;

    /// Remove every key starting with `prefix`, returning how many were removed.
    ///
    /// Meant for test teardown and operators. The limiter never calls it.
    async fn clear_namespace(&self, prefix: &str) -> std::result::Result<u64, StoreError>;

    /// Short name used in logs.
    fn kind(&self) -> &'static str;
}

/// Create the store described by `config`.
pub async fn build_store(config: &StoreConfig) -> Result<Arc<dyn CounterStore>> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "redis")]
        StoreConfig::Redis {
            url,
            connect_timeout_ms,
            command_timeout_ms,
        } => {
            let store = RedisStore::connect(
                url,
                Duration::from_millis(*connect_timeout_ms),
                Duration::from_millis(*command_timeout_ms),
            )
            .await
            .map_err(|e| FieldgateError::Config(format!("Failed to connect to {}: {}", url, e)))?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        StoreConfig::Redis { url, .. } => Err(FieldgateError::Config(format!(
            "store {} requires the `redis` feature",
            url
        ))),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A store whose backend can never be reached.
    pub struct UnreachableStore;

    #[async_trait]
    impl CounterStore for UnreachableStore {
        async fn increment_and_get(
            &self,
            _key: &str,
            _window: Duration,
        ) -> std::result::Result<u64, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn clear_namespace(&self, _prefix: &str) -> std::result::Result<u64, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        fn kind(&self) -> &'static str {
            "unreachable"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_memory_store() {
        let store = build_store(&StoreConfig::Memory).await.unwrap();
        assert_eq!(store.kind(), "memory");
        assert_eq!(
            store.increment_and_get("ratelimit:a:b-c", Duration::from_secs(1)).await.unwrap(),
            1
        );
    }

    #[cfg(not(feature = "redis"))]
    #[tokio::test]
    async fn test_build_redis_store_without_feature() {
        let config = StoreConfig::Redis {
            url: "redis://localhost:6379".to_string(),
            connect_timeout_ms: 100,
            command_timeout_ms: 100,
        };
        let result = build_store(&config).await;
        assert!(matches!(result, Err(FieldgateError::Config(_))));
    }
}
