//! Fixed-window limiting on top of a counter store.

use std::time::Duration;

use tracing::trace;

use super::key::CounterKey;
use crate::store::{CounterStore, StoreError};

/// A fixed-window limit: at most `threshold` attempts per `window`.
///
/// All attempts inside one store TTL share a single bucket. A burst that
/// straddles the end of a window can therefore see up to `2 * threshold`
/// attempts admitted in a span shorter than `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWindow {
    threshold: u64,
    window: Duration,
}

/// Result of recording one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDecision {
    /// Whether the attempt is within the limit
    pub allowed: bool,
    /// The count returned by the store, including this attempt
    pub count: u64,
    /// The limit the count was compared against
    pub threshold: u64,
}

impl WindowDecision {
    /// Attempts left in the current window.
    pub fn remaining(&self) -> u64 {
        self.threshold.saturating_sub(self.count)
    }
}

impl FixedWindow {
    /// Create a new fixed-window limit.
    pub fn new(threshold: u64, window: Duration) -> Self {
        Self { threshold, window }
    }

    /// Get the threshold for this limit.
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Get the window length for this limit.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record an attempt against `key` and decide whether it is allowed.
    ///
    /// The threshold is inclusive: the attempt that brings the count to
    /// exactly `threshold` is still allowed. Store failures are returned as
    /// they are, so the caller chooses between failing open and closed.
    pub async fn check_and_record(
        &self,
        store: &dyn CounterStore,
        key: &CounterKey,
    ) -> Result<WindowDecision, StoreError> {
        let count = store
            .increment_and_get(&key.to_store_key(), self.window)
            .await?;

        trace!(
            key = %key,
            count = count,
            threshold = self.threshold,
            store = store.kind(),
            "Recorded attempt"
        );

        Ok(WindowDecision {
            allowed: count <= self.threshold,
            count,
            threshold: self.threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::UnreachableStore;
    use crate::store::MemoryStore;

    fn test_key() -> CounterKey {
        CounterKey::new("graphql-query", "expensiveField", "99.99.99.99", "ip")
    }

    #[tokio::test(start_paused = true)]
    async fn test_allows_up_to_threshold_inclusive() {
        let store = MemoryStore::new();
        let limit = FixedWindow::new(3, Duration::from_secs(10));
        let key = test_key();
        assert_eq!(limit.threshold(), 3);
        assert_eq!(limit.window(), Duration::from_secs(10));

        for expected in 1..=3 {
            let decision = limit.check_and_record(&store, &key).await.unwrap();
            assert!(decision.allowed, "attempt {} should be allowed", expected);
            assert_eq!(decision.count, expected);
        }

        let decision = limit.check_and_record(&store, &key).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.count, 4);
        assert_eq!(decision.remaining(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_attempts_are_still_counted() {
        let store = MemoryStore::new();
        let limit = FixedWindow::new(1, Duration::from_secs(10));
        let key = test_key();

        for _ in 0..3 {
            limit.check_and_record(&store, &key).await.unwrap();
        }

        assert_eq!(store.count(&key.to_store_key()), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_reset_allows_again() {
        let store = MemoryStore::new();
        let limit = FixedWindow::new(2, Duration::from_secs(10));
        let key = test_key();

        for _ in 0..3 {
            limit.check_and_record(&store, &key).await.unwrap();
        }
        tokio::time::advance(Duration::from_secs(10)).await;

        let decision = limit.check_and_record(&store, &key).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.count, 1);
        assert_eq!(decision.remaining(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_boundary_burst_admits_twice_the_threshold() {
        let store = MemoryStore::new();
        let limit = FixedWindow::new(2, Duration::from_secs(10));
        let key = test_key();

        limit.check_and_record(&store, &key).await.unwrap();
        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(limit.check_and_record(&store, &key).await.unwrap().allowed);

        // One second later a new window has opened.
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limit.check_and_record(&store, &key).await.unwrap().allowed);
        assert!(limit.check_and_record(&store, &key).await.unwrap().allowed);
        assert!(!limit.check_and_record(&store, &key).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_store_failure_is_propagated() {
        let limit = FixedWindow::new(5, Duration::from_secs(10));
        let result = limit.check_and_record(&UnreachableStore, &test_key()).await;
        tokio_test::assert_err!(result);
    }
}
