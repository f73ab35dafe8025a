//! Token bucket with continuous refill.
//!
//! Capacity equals the limit and the bucket refills at `limit / window_ms`
//! tokens per millisecond. Refill happens on every access, rejected or not.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, trace};

use super::strategy::{Decision, Strategy, StrategyKind, StrategyParams};
use crate::clock::Clock;
use crate::error::Result;
use crate::store::{StoredValue, Store, TokenBucket};

#[derive(Debug)]
pub struct TokenBucketStrategy {
    store: Arc<dyn Store>,
    limit: u64,
    window_ms: u64,
    clock: Arc<dyn Clock>,
}

impl TokenBucketStrategy {
    pub fn new(params: StrategyParams) -> Self {
        Self {
            store: params.store,
            limit: params.limit,
            window_ms: params.window_ms,
            clock: params.clock,
        }
    }

    fn key(identity: &str) -> String {
        format!("{}:token", identity)
    }

    fn capacity(&self) -> f64 {
        self.limit as f64
    }

    fn refilled(&self, tokens: f64, elapsed_ms: u64) -> f64 {
        // Multiply before dividing so whole-token refills stay exact.
        let added = elapsed_ms as f64 * self.limit as f64 / self.window_ms as f64;
        (tokens + added).min(self.capacity())
    }

    /// Milliseconds until `deficit` tokens have refilled.
    fn millis_for(&self, deficit: f64) -> u64 {
        (deficit * self.window_ms as f64 / self.limit as f64).ceil().max(0.0) as u64
    }
}

#[async_trait]
impl Strategy for TokenBucketStrategy {
    async fn consume(&self, identity: &str, weight: u64) -> Result<Decision> {
        let now = self.clock.now_millis();
        let key = Self::key(identity);
        let ttl = 2 * self.window_ms;

        let mut bucket = self
            .store
            .get(&key)
            .await?
            .and_then(StoredValue::into_bucket)
            .unwrap_or(TokenBucket {
                tokens: self.capacity(),
                last_refill: now,
                reset_time: now,
            });

        bucket.tokens = self.refilled(bucket.tokens, now.saturating_sub(bucket.last_refill));
        bucket.last_refill = now;

        let requested = weight as f64;
        if bucket.tokens < requested {
            // The refill itself is still recorded.
            self.store.set(&key, bucket.into(), ttl).await?;

            let reset_time = now + self.millis_for(requested - bucket.tokens);
            debug!(
                identity = %identity,
                tokens = bucket.tokens,
                weight,
                retry_at = reset_time,
                "Token bucket exhausted"
            );
            return Ok(Decision::rejected(bucket.tokens.floor() as u64, reset_time));
        }

        bucket.tokens -= requested;
        if bucket.tokens <= 0.0 {
            bucket.tokens = 0.0;
            bucket.reset_time = now + self.window_ms;
        } else if bucket.reset_time <= now {
            bucket.reset_time = now + self.millis_for(self.capacity() - bucket.tokens);
        }
        self.store.set(&key, bucket.into(), ttl).await?;

        trace!(identity = %identity, tokens = bucket.tokens, "Token bucket consumed");
        Ok(Decision::admitted(
            weight,
            bucket.tokens.floor() as u64,
            bucket.reset_time,
        ))
    }

    async fn reset_key(&self, identity: &str) -> Result<()> {
        self.store.del(&Self::key(identity)).await
    }

    async fn reset_all(&self) -> Result<()> {
        self.store.reset().await
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::TokenBucket
    }
}
