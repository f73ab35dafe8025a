//! Fixed window counter.
//!
//! Time is cut into epoch-aligned windows and every request in a window
//! shares one [`CounterRecord`]. A caller can spend a full quota at the end
//! of one window and another right after the boundary; the sliding window
//! strategy exists for callers that cannot accept that burst.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, trace};

use super::strategy::{window_start, Decision, Strategy, StrategyKind, StrategyParams};
use crate::clock::Clock;
use crate::error::Result;
use crate::store::{CounterRecord, StoredValue, Store};

#[derive(Debug)]
pub struct FixedWindow {
    store: Arc<dyn Store>,
    limit: u64,
    window_ms: u64,
    clock: Arc<dyn Clock>,
}

impl FixedWindow {
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
}

#[async_trait]
impl Strategy for FixedWindow {
    async fn consume(&self, identity: &str, weight: u64) -> Result<Decision> {
        let now = self.clock.now_millis();
        let start = window_start(now, self.window_ms);
        let reset_time = start + self.window_ms;
        let key = Self::key(identity, start);

        let record = self
            .store
            .get(&key)
            .await?
            .and_then(StoredValue::into_counter)
            .unwrap_or_else(|| CounterRecord::new(reset_time));

        let new_count = record.count.saturating_add(weight);
        if new_count > self.limit {
            debug!(
                identity = %identity,
                count = record.count,
                weight,
                limit = self.limit,
                "Fixed window limit exceeded"
            );
            return Ok(Decision::rejected(
                self.limit.saturating_sub(record.count),
                reset_time,
            ));
        }

        let updated = CounterRecord {
            count: new_count,
            reset_time,
        };
        self.store.set(&key, updated.into(), self.window_ms).await?;

        trace!(identity = %identity, count = new_count, window = start, "Fixed window consumed");
        Ok(Decision::admitted(
            weight,
            self.limit.saturating_sub(new_count),
            reset_time,
        ))
    }

    async fn reset_key(&self, identity: &str) -> Result<()> {
        let start = window_start(self.clock.now_millis(), self.window_ms);
        self.store.del(&Self::key(identity, start)).await
    }

    async fn reset_all(&self) -> Result<()> {
        self.store.reset().await
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::FixedWindow
    }
}
