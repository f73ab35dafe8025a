//! State stores the counting strategies persist into.
//!
//! Two implementations share one contract: an in-process map with its own
//! expiry sweeper, and a networked store that delegates to an external
//! key-value service through a [`KvClient`].

mod memory;
mod networked;
#[cfg(feature = "redis")]
mod redis_client;
#[cfg(test)]
pub(crate) mod testing;
mod value;

use async_trait::async_trait;
use std::str::FromStr;

use crate::error::{GatewardenError, Result};

pub use memory::MemoryStore;
pub use networked::{KvClient, NetworkedStore};
#[cfg(feature = "redis")]
pub use redis_client::RedisClient;
pub use value::{CounterRecord, StoredValue, TokenBucket};

/// Key-value storage with per-entry expiry.
///
/// Keys passed in are unprefixed; each store applies its own namespace.
#[async_trait]
pub trait Store: Send + Sync + std::fmt::Debug {
    /// Fetch a live value. Expired entries are reported as absent.
    async fn get(&self, key: &str) -> Result<Option<StoredValue>>;

    /// Store `value`, replacing both the value and the expiry of any previous entry.
    async fn set(&self, key: &str, value: StoredValue, ttl_ms: u64) -> Result<()>;

    /// Remove a key. Removing a missing key is not an error.
    async fn del(&self, key: &str) -> Result<()>;

    /// Remove every key under this store's namespace.
    async fn reset(&self) -> Result<()>;

    /// Release background resources. Safe to call more than once.
    fn shutdown(&self);
}

/// Available store implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Memory,
    Networked,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Networked => "networked",
        }
    }
}

impl FromStr for BackendKind {
    type Err = GatewardenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "local" => Ok(BackendKind::Memory),
            "networked" | "redis" => Ok(BackendKind::Networked),
            other => Err(GatewardenError::Config(format!("unknown backend '{}'", other))),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
