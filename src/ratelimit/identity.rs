//! Caller identity resolution.
//!
//! Framework adapters describe each request as a [`RequestInfo`]; the
//! resolver turns it into the string quotas are tracked under.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;

/// Identity used when a request carries nothing usable.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Custom identity resolution, replacing the default entirely.
pub type IdentifierFn = Arc<dyn Fn(&RequestInfo) -> String + Send + Sync>;

/// Where the default resolver looks first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentitySource {
    /// Client network address
    #[default]
    Address,
    /// `Authorization: Bearer` token, falling back to the address
    Bearer,
}

/// The parts of a request the engine looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    /// Socket peer address
    pub remote_addr: Option<IpAddr>,
    /// Request headers as received
    pub headers: Vec<(String, String)>,
    /// Request path, used for weight rules
    pub path: String,
}

impl RequestInfo {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_remote_addr(mut self, addr: IpAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First value of header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Default resolution: bearer token (if selected), forwarded address (if
/// proxies are trusted), socket address, then [`UNKNOWN_IDENTITY`].
pub fn resolve_identity(request: &RequestInfo, source: IdentitySource, trust_proxy: bool) -> String {
    if source == IdentitySource::Bearer {
        if let Some(token) = bearer_token(request) {
            return token.to_string();
        }
    }

    if trust_proxy {
        if let Some(addr) = forwarded_address(request) {
            return addr.to_string();
        }
    }

    request
        .remote_addr
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string())
}

fn bearer_token(request: &RequestInfo) -> Option<&str> {
    let value = request.header("authorization")?.trim();
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

fn forwarded_address(request: &RequestInfo) -> Option<&str> {
    if let Some(first) = request
        .header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return Some(first);
    }

    request
        .header("x-real-ip")
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
