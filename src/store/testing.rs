//! In-memory key-value service double for networked store tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use super::KvClient;
use crate::clock::{Clock, ManualClock};
use crate::error::{GatewardenError, Result};

/// Key-value service double with server-side expiry on a manual clock.
#[derive(Debug, Default)]
pub(crate) struct FakeKv {
    entries: Mutex<HashMap<String, (String, u64)>>,
    clock: ManualClock,
    fail: AtomicBool,
}

impl FakeKv {
    pub(crate) fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            ..Self::default()
        }
    }

    pub(crate) fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn put_raw(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .insert(key.to_string(), (value.to_string(), u64::MAX));
    }

    pub(crate) fn raw(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).map(|(v, _)| v.clone())
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewardenError::Store("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KvClient for FakeKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        let now = self.clock.now_millis();
        Ok(self
            .entries
            .lock()
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(v, _)| v.clone()))
    }

    async fn set_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<()> {
        self.check()?;
        let expires_at = self.clock.now_millis() + ttl_ms;
        self.entries
            .lock()
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<()> {
        self.check()?;
        let mut entries = self.entries.lock();
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.check()?;
        Ok(self
            .entries
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

