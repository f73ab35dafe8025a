//! Header metadata and rejection payloads derived from a [`Decision`].

use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::identity::RequestInfo;
use super::strategy::Decision;

pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

/// Builds the rejection body, replacing the default payload.
///
/// Receives the same decision the limiter acted on, so `reset_time` matches
/// the stored state.
pub type OnLimitFn = Arc<dyn Fn(&Decision, &RequestInfo) -> Value + Send + Sync>;

/// Header-style view of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitHeaders {
    pub limit: u64,
    pub remaining: u64,
    /// Unix seconds, rounded up
    pub reset: u64,
}

impl RateLimitHeaders {
    pub fn new(limit: u64, decision: &Decision) -> Self {
        Self {
            limit,
            remaining: decision.remaining,
            reset: decision.reset_time.div_ceil(1000),
        }
    }

    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            (HEADER_LIMIT, self.limit.to_string()),
            (HEADER_REMAINING, self.remaining.to_string()),
            (HEADER_RESET, self.reset.to_string()),
        ]
    }
}

/// Whole seconds until `reset_time`, rounded up and never negative.
pub fn retry_after_secs(reset_time: u64, now: u64) -> u64 {
    reset_time.saturating_sub(now).div_ceil(1000)
}

/// Payload used when no override is configured.
pub fn default_rejection_body(limit: u64, decision: &Decision, retry_after: u64) -> Value {
    json!({
        "error": "Too Many Requests",
        "message": format!("Rate limit exceeded, retry in {} seconds", retry_after),
        "retryAfter": retry_after,
        "limit": limit,
        "remaining": decision.remaining,
        "reset": decision.reset_time.div_ceil(1000),
    })
}

/// What a framework adapter should do with a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Admit {
        decision: Decision,
        headers: Option<RateLimitHeaders>,
    },
    Reject {
        decision: Decision,
        headers: Option<RateLimitHeaders>,
        retry_after: u64,
        body: Value,
    },
}

impl Verdict {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Verdict::Admit { .. })
    }

    pub fn decision(&self) -> &Decision {
        match self {
            Verdict::Admit { decision, .. } | Verdict::Reject { decision, .. } => decision,
        }
    }

    /// Headers to attach to the response, `Retry-After` included on rejection.
    pub fn header_pairs(&self) -> Vec<(&'static str, String)> {
        match self {
            Verdict::Admit { headers, .. } => headers.map(|h| h.to_pairs()).unwrap_or_default(),
            Verdict::Reject {
                headers,
                retry_after,
                ..
            } => {
                let mut pairs = headers.map(|h| h.to_pairs()).unwrap_or_default();
                pairs.push((HEADER_RETRY_AFTER, retry_after.to_string()));
                pairs
            }
        }
    }
}
