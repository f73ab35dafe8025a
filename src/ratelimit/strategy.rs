//! Counting strategy trait and the name registry that builds them.

use async_trait::async_trait;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;

use super::fixed_window::FixedWindow;
use super::sliding_window::SlidingWindow;
use super::token_bucket::TokenBucketStrategy;
use crate::clock::Clock;
use crate::error::{GatewardenError, Result};
use crate::store::Store;

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    /// The request was rejected
    pub limited: bool,
    /// Quota left after this decision
    pub remaining: u64,
    /// Epoch milliseconds when quota next replenishes
    pub reset_time: u64,
    /// Weight charged; zero on rejection
    pub consumed: u64,
}

impl Decision {
    pub fn admitted(weight: u64, remaining: u64, reset_time: u64) -> Self {
        Self {
            limited: false,
            remaining,
            reset_time,
            consumed: weight,
        }
    }

    pub fn rejected(remaining: u64, reset_time: u64) -> Self {
        Self {
            limited: true,
            remaining,
            reset_time,
            consumed: 0,
        }
    }
}

/// An interchangeable counting algorithm.
///
/// Implementations own their key naming scheme inside the store and never
/// share keys with another strategy.
#[async_trait]
pub trait Strategy: Send + Sync + std::fmt::Debug {
    /// Charge `weight` against `identity`'s quota, or reject without charging.
    async fn consume(&self, identity: &str, weight: u64) -> Result<Decision>;

    /// Forget everything stored for `identity`.
    async fn reset_key(&self, identity: &str) -> Result<()>;

    /// Forget every identity.
    async fn reset_all(&self) -> Result<()>;

    fn kind(&self) -> StrategyKind;
}

/// Registered strategy names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    FixedWindow,
    SlidingWindow,
    TokenBucket,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::FixedWindow => "fixed",
            StrategyKind::SlidingWindow => "sliding",
            StrategyKind::TokenBucket => "token",
        }
    }
}

impl FromStr for StrategyKind {
    type Err = GatewardenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "fixed" | "fixed-window" => Ok(StrategyKind::FixedWindow),
            "sliding" | "sliding-window" => Ok(StrategyKind::SlidingWindow),
            "token" | "token-bucket" => Ok(StrategyKind::TokenBucket),
            other => Err(GatewardenError::Config(format!("unknown strategy '{}'", other))),
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a strategy needs to run.
#[derive(Debug, Clone)]
pub struct StrategyParams {
    pub store: Arc<dyn Store>,
    pub limit: u64,
    pub window_ms: u64,
    pub clock: Arc<dyn Clock>,
}

/// Build the strategy registered under `kind`.
pub fn build_strategy(kind: StrategyKind, params: StrategyParams) -> Arc<dyn Strategy> {
    match kind {
        StrategyKind::FixedWindow => Arc::new(FixedWindow::new(params)),
        StrategyKind::SlidingWindow => Arc::new(SlidingWindow::new(params)),
        StrategyKind::TokenBucket => Arc::new(TokenBucketStrategy::new(params)),
    }
}

/// Start of the epoch-aligned window containing `now`.
pub(crate) fn window_start(now: u64, window_ms: u64) -> u64 {
    now - now % window_ms
}
