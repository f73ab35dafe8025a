//! Values persisted by the counting strategies.

use serde::{Deserialize, Serialize};

/// Weight consumed inside one aligned window.
///
/// Keyed by `identity:windowStart`; a new window gets a new record and the
/// old one is left to expire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRecord {
    pub count: u64,
    /// End of the window, epoch milliseconds
    pub reset_time: u64,
}

impl CounterRecord {
    pub fn new(reset_time: u64) -> Self {
        Self { count: 0, reset_time }
    }
}

/// Continuous token bucket for one identity, keyed by `identity:token`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenBucket {
    pub tokens: f64,
    /// Epoch milliseconds of the last refill
    pub last_refill: u64,
    pub reset_time: u64,
}

/// Anything a strategy writes to a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoredValue {
    Counter(CounterRecord),
    Bucket(TokenBucket),
}

impl StoredValue {
    /// The counter record, if this is one.
    pub fn into_counter(self) -> Option<CounterRecord> {
        match self {
            StoredValue::Counter(record) => Some(record),
            StoredValue::Bucket(_) => None,
        }
    }

    /// The token bucket, if this is one.
    pub fn into_bucket(self) -> Option<TokenBucket> {
        match self {
            StoredValue::Bucket(bucket) => Some(bucket),
            StoredValue::Counter(_) => None,
        }
    }

    /// Text encoding used by the networked store.
    pub fn encode(&self) -> String {
        // Both variants are plain numbers; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse the networked store's text encoding.
    pub fn decode(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}

impl From<CounterRecord> for StoredValue {
    fn from(record: CounterRecord) -> Self {
        StoredValue::Counter(record)
    }
}

impl From<TokenBucket> for StoredValue {
    fn from(bucket: TokenBucket) -> Self {
        StoredValue::Bucket(bucket)
    }
}
