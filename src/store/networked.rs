//! Store backed by an external key-value service.
//!
//! Values travel as JSON text. Expiry is delegated to the service, so this
//! store never checks timestamps itself.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{Store, StoredValue};
use crate::error::{GatewardenError, Result};

/// Minimal string key-value client the networked store needs.
///
/// Implementations must surface I/O failures as errors; they are passed
/// straight back to the caller of the decision.
#[async_trait]
pub trait KvClient: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set `key` to `value`, expiring after `ttl_ms` milliseconds.
    async fn set_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<()>;

    /// Delete keys, ignoring the ones that do not exist.
    async fn del(&self, keys: &[String]) -> Result<()>;

    /// Every key starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Store that delegates to a shared [`KvClient`].
#[derive(Clone)]
pub struct NetworkedStore {
    client: Arc<dyn KvClient>,
    prefix: String,
}

impl std::fmt::Debug for NetworkedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkedStore")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl NetworkedStore {
    /// Create a store over `client`. Fails when no client is supplied.
    pub fn new(client: Option<Arc<dyn KvClient>>, prefix: impl Into<String>) -> Result<Self> {
        let client = client.ok_or_else(|| {
            GatewardenError::Config("networked backend requires a client handle".to_string())
        })?;

        Ok(Self {
            client,
            prefix: prefix.into(),
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl Store for NetworkedStore {
    async fn get(&self, key: &str) -> Result<Option<StoredValue>> {
        let full = self.full_key(key);
        let Some(raw) = self.client.get(&full).await? else {
            return Ok(None);
        };

        match StoredValue::decode(&raw) {
            Some(value) => Ok(Some(value)),
            None => {
                warn!(key = %full, "Discarding undecodable stored value");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: StoredValue, ttl_ms: u64) -> Result<()> {
        self.client
            .set_px(&self.full_key(key), &value.encode(), ttl_ms)
            .await
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.client.del(&[self.full_key(key)]).await
    }

    async fn reset(&self) -> Result<()> {
        let keys = self.client.keys_with_prefix(&self.prefix).await?;
        if keys.is_empty() {
            return Ok(());
        }

        debug!(prefix = %self.prefix, count = keys.len(), "Deleting networked keys");
        self.client.del(&keys).await
    }

    fn shutdown(&self) {}
}
