//! Sliding window counter.
//!
//! Blends the previous window's count into the current one, weighted by how
//! much of the previous window still overlaps the trailing horizon.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, trace};

use super::strategy::{window_start, Decision, Strategy, StrategyKind, StrategyParams};
use crate::clock::Clock;
use crate::error::Result;
use crate::store::{CounterRecord, StoredValue, Store};

#[derive(Debug)]
pub struct SlidingWindow {
    store: Arc<dyn Store>,
    limit: u64,
    window_ms: u64,
    clock: Arc<dyn Clock>,
}

impl SlidingWindow {
    pub fn new(params: StrategyParams) -> Self {
        Self {
            store: params.store,
            limit: params.limit,
            window_ms: params.window_ms,
            clock: params.clock,
        }
    }

    fn key(identity: &str, window_start: u64) -> String {
        format!("{}:{}", identity, window_start)
    }

    async fn count_at(&self, key: &str) -> Result<u64> {
        Ok(self
            .store
            .get(key)
            .await?
            .and_then(StoredValue::into_counter)
            .map(|record| record.count)
            .unwrap_or(0))
    }

    /// Portion of `previous_count` still inside the horizon at `elapsed` ms into the window.
    fn effective_previous(&self, previous_count: u64, elapsed: u64) -> u64 {
        let ratio = 1.0 - elapsed as f64 / self.window_ms as f64;
        (previous_count as f64 * ratio).floor().max(0.0) as u64
    }
}

#[async_trait]
impl Strategy for SlidingWindow {
    async fn consume(&self, identity: &str, weight: u64) -> Result<Decision> {
        let now = self.clock.now_millis();
        let current_window = window_start(now, self.window_ms);
        let reset_time = current_window + self.window_ms;
        let current_key = Self::key(identity, current_window);

        let current_count = self.count_at(&current_key).await?;
        let previous_count = match current_window.checked_sub(self.window_ms) {
            Some(previous_window) => self.count_at(&Self::key(identity, previous_window)).await?,
            None => 0,
        };

        let effective_previous = self.effective_previous(previous_count, now - current_window);
        let effective_total = current_count
            .saturating_add(weight)
            .saturating_add(effective_previous);

        if effective_total > self.limit {
            debug!(
                identity = %identity,
                current = current_count,
                previous = effective_previous,
                weight,
                limit = self.limit,
                "Sliding window limit exceeded"
            );
            return Ok(Decision::rejected(
                self.limit.saturating_sub(effective_total),
                reset_time,
            ));
        }

        // Kept for two windows so it can still be read as the previous window.
        let updated = CounterRecord {
            count: current_count + weight,
            reset_time,
        };
        self.store
            .set(&current_key, updated.into(), 2 * self.window_ms)
            .await?;

        trace!(
            identity = %identity,
            count = updated.count,
            previous = effective_previous,
            "Sliding window consumed"
        );
        Ok(Decision::admitted(
            weight,
            self.limit.saturating_sub(effective_total),
            reset_time,
        ))
    }

    async fn reset_key(&self, identity: &str) -> Result<()> {
        let current_window = window_start(self.clock.now_millis(), self.window_ms);
        self.store.del(&Self::key(identity, current_window)).await?;
        if let Some(previous_window) = current_window.checked_sub(self.window_ms) {
            self.store.del(&Self::key(identity, previous_window)).await?;
        }
        Ok(())
    }

    async fn reset_all(&self) -> Result<()> {
        self.store.reset().await
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::SlidingWindow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    fn sliding(limit: u64, window_ms: u64, clock: &ManualClock) -> (SlidingWindow, Arc<MemoryStore>) {
        let clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let store = Arc::new(MemoryStore::new("sw:", clock.clone()));
        let strategy = SlidingWindow::new(StrategyParams {
            store: store.clone(),
            limit,
            window_ms,
            clock,
        });
        (strategy, store)
    }

    #[tokio::test]
    async fn test_previous_window_blocks_boundary_burst() {
        let clock = ManualClock::new(5_999);
        let (strategy, _store) = sliding(10, 1000, &clock);

        for _ in 0..10 {
            assert!(!strategy.consume("client", 1).await.unwrap().limited);
        }

        // Start of the next window: the whole previous count still applies.
        clock.set(6_000);
        let decision = strategy.consume("client", 1).await.unwrap();
        assert!(decision.limited);
        assert_eq!(decision.consumed, 0);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.reset_time, 7_000);

        // Midpoint: half of it has slid out.
        clock.set(6_500);
        let mut admitted = 0;
        while !strategy.consume("client", 1).await.unwrap().limited {
            admitted += 1;
        }
        assert_eq!(admitted, 5);
    }

    #[tokio::test]
    async fn test_remaining_accounts_for_previous_window() {
        let clock = ManualClock::new(0);
        let (strategy, _store) = sliding(10, 1000, &clock);

        strategy.consume("client", 4).await.unwrap();

        clock.set(1_250);
        // 4 * 0.75 = 3 carried over
        let decision = strategy.consume("client", 2).await.unwrap();
        assert!(!decision.limited);
        assert_eq!(decision.remaining, 5);
    }

    #[tokio::test]
    async fn test_previous_record_is_never_written() {
        let clock = ManualClock::new(0);
        let (strategy, store) = sliding(10, 1000, &clock);

        strategy.consume("client", 3).await.unwrap();
        clock.set(1_100);
        strategy.consume("client", 2).await.unwrap();

        let previous = store
            .get("client:0")
            .await
            .unwrap()
            .and_then(StoredValue::into_counter)
            .unwrap();
        assert_eq!(previous.count, 3);

        let current = store
            .get("client:1000")
            .await
            .unwrap()
            .and_then(StoredValue::into_counter)
            .unwrap();
        assert_eq!(current.count, 2);
    }

    #[tokio::test]
    async fn test_old_windows_stop_counting() {
        let clock = ManualClock::new(0);
        let (strategy, _store) = sliding(5, 1000, &clock);

        strategy.consume("client", 5).await.unwrap();
        clock.set(2_000);

        let decision = strategy.consume("client", 5).await.unwrap();
        assert!(!decision.limited);
        assert_eq!(decision.remaining, 0);
    }

    #[tokio::test]
    async fn test_reset_key_clears_both_windows() {
        let clock = ManualClock::new(500);
        let (strategy, _store) = sliding(2, 1000, &clock);

        strategy.consume("client", 2).await.unwrap();
        clock.set(1_000);
        assert!(strategy.consume("client", 1).await.unwrap().limited);

        strategy.reset_key("client").await.unwrap();
        assert!(!strategy.consume("client", 1).await.unwrap().limited);
    }
}
