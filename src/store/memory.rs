//! In-process store backed by a concurrent map.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::{Store, StoredValue};
use crate::clock::Clock;
use crate::error::Result;

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
struct Entry {
    value: StoredValue,
    /// Epoch milliseconds after which the entry is logically gone
    expires_at: u64,
}

/// Local store keeping values in a [`DashMap`].
///
/// Every `get` checks the entry's own expiry, so the sweeper only bounds
/// memory and never affects what callers observe. Strategies run a plain
/// read-modify-write against this store; two concurrent decisions for the
/// same identity can both be admitted from the same snapshot.
pub struct MemoryStore {
    entries: Arc<DashMap<String, Entry>>,
    prefix: String,
    clock: Arc<dyn Clock>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("prefix", &self.prefix)
            .field("entries", &self.entries.len())
            .field("sweeping", &self.sweeper.lock().is_some())
            .finish()
    }
}

impl MemoryStore {
    /// Create a store without a background sweeper.
    pub fn new(prefix: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            prefix: prefix.into(),
            clock,
            sweeper: Mutex::new(None),
        }
    }

    /// Create a store that purges expired entries every `interval`.
    ///
    /// The sweeper is a task on the current tokio runtime. Outside a runtime
    /// no sweeper is started and expiry stays lazy. Intervals below one
    /// millisecond are raised to one.
    pub fn with_sweeper(prefix: impl Into<String>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        let store = Self::new(prefix, clock);
        let interval = interval.max(MIN_SWEEP_INTERVAL);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let entries = Arc::downgrade(&store.entries);
                let clock = store.clock.clone();
                let task = handle.spawn(sweep_loop(entries, clock, interval));
                *store.sweeper.lock() = Some(task);
                debug!(interval_ms = interval.as_millis() as u64, "Started local store sweeper");
            }
            Err(_) => {
                debug!("No tokio runtime; local store sweeper disabled");
            }
        }

        store
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Physically remove expired entries. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        purge(&self.entries, self.clock.now_millis())
    }

    /// Number of entries physically held, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the background sweeper is still scheduled.
    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }
}

fn purge(entries: &DashMap<String, Entry>, now: u64) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| entry.expires_at > now);
    before.saturating_sub(entries.len())
}

async fn sweep_loop(entries: Weak<DashMap<String, Entry>>, clock: Arc<dyn Clock>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(entries) = entries.upgrade() else {
            break;
        };
        let removed = purge(&entries, clock.now_millis());
        if removed > 0 {
            trace!(removed, remaining = entries.len(), "Swept expired entries");
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<StoredValue>> {
        let full = self.full_key(key);
        let now = self.clock.now_millis();

        // The map guard must be released before removing the stale entry.
        match self.entries.get(&full) {
            Some(entry) if entry.expires_at > now => return Ok(Some(entry.value.clone())),
            Some(_) => {}
            None => return Ok(None),
        }

        self.entries.remove_if(&full, |_, entry| entry.expires_at <= now);
        Ok(None)
    }

    async fn set(&self, key: &str, value: StoredValue, ttl_ms: u64) -> Result<()> {
        let expires_at = self.clock.now_millis().saturating_add(ttl_ms);
        self.entries.insert(self.full_key(key), Entry { value, expires_at });
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.remove(&self.full_key(key));
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        let prefix = &self.prefix;
        self.entries.retain(|key, _| !key.starts_with(prefix.as_str()));
        debug!(prefix = %self.prefix, "Cleared local store");
        Ok(())
    }

    fn shutdown(&self) {
        if let Some(task) = self.sweeper.lock().take() {
            task.abort();
            debug!(prefix = %self.prefix, "Stopped local store sweeper");
        }
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        if let Some(task) = self.sweeper.get_mut().take() {
            task.abort();
        }
    }
}
