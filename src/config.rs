//! Configuration management for Gatewarden.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{GatewardenError, Result};
use crate::ratelimit::{IdentitySource, PathWeightRule, StrategyKind};
use crate::store::BackendKind;

/// Upper bound on how often the local store sweeps expired entries.
pub const MAX_SWEEP_INTERVAL_MS: u64 = 60_000;

/// Main configuration for a rate limiter instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewardenConfig {
    /// Maximum weight admitted per window
    #[serde(default = "default_limit")]
    pub limit: u64,

    /// Window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Counting strategy name: fixed, sliding or token
    #[serde(default = "default_strategy")]
    pub strategy: String,

    /// State store name: memory or networked
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Namespace prepended to every stored key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Ordered path weight rules; empty disables weighting
    #[serde(default)]
    pub weight_by_path: Vec<PathWeightRule>,

    /// Trust forwarding headers when resolving the caller's address
    #[serde(default)]
    pub trust_proxy: bool,

    /// Where the default identity resolver looks first
    #[serde(default)]
    pub identity_source: IdentitySource,

    /// Local store sweep interval; defaults to the window, capped at one minute
    #[serde(default)]
    pub sweep_interval_ms: Option<u64>,

    /// Attach header-style metadata to verdicts
    #[serde(default = "default_headers")]
    pub headers: bool,
}

impl Default for GatewardenConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            window_ms: default_window_ms(),
            strategy: default_strategy(),
            backend: default_backend(),
            key_prefix: default_key_prefix(),
            weight_by_path: Vec::new(),
            trust_proxy: false,
            identity_source: IdentitySource::default(),
            sweep_interval_ms: None,
            headers: default_headers(),
        }
    }
}

fn default_limit() -> u64 {
    100
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_strategy() -> String {
    "fixed".to_string()
}

fn default_backend() -> String {
    "memory".to_string()
}

fn default_key_prefix() -> String {
    "ratelimit:".to_string()
}

fn default_headers() -> bool {
    true
}

impl GatewardenConfig {
    /// Convenience constructor for the two numbers most callers care about.
    pub fn new(limit: u64, window_ms: u64) -> Self {
        Self {
            limit,
            window_ms,
            ..Self::default()
        }
    }

    /// Builder-style strategy selection.
    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = strategy.into();
        self
    }

    /// Builder-style backend selection.
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = backend.into();
        self
    }

    /// Builder-style weight rule, appended after existing rules.
    pub fn with_weight(mut self, pattern: impl Into<String>, weight: u64) -> Self {
        self.weight_by_path.push(PathWeightRule {
            pattern: pattern.into(),
            weight,
        });
        self
    }

    /// Load configuration from a file, with `GATEWARDEN_*` environment overrides.
    ///
    /// The format is picked from the file extension (yaml, toml, json).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit configuration");

        // Surface unreadable files as I/O errors rather than parse failures.
        std::fs::File::open(path)?;

        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("GATEWARDEN").try_parsing(true))
            .build()
            .map_err(|e| GatewardenError::Config(format!("Failed to load {}: {}", path.display(), e)))?;

        settings
            .try_deserialize()
            .map_err(|e| GatewardenError::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GatewardenError::Config(format!("Failed to parse rate limit config: {}", e)))
    }

    /// Resolve the configured strategy name.
    pub fn strategy_kind(&self) -> Result<StrategyKind> {
        self.strategy.parse()
    }

    /// Resolve the configured backend name.
    pub fn backend_kind(&self) -> Result<BackendKind> {
        self.backend.parse()
    }

    /// Effective sweep cadence for the local store.
    pub fn sweep_interval_ms(&self) -> u64 {
        self.sweep_interval_ms
            .unwrap_or(self.window_ms)
            .clamp(1, MAX_SWEEP_INTERVAL_MS)
    }

    /// Check every field that can be checked without a client handle.
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(GatewardenError::Config("limit must be positive".to_string()));
        }
        if self.window_ms == 0 {
            return Err(GatewardenError::Config("window_ms must be positive".to_string()));
        }
        if let Some(rule) = self.weight_by_path.iter().find(|r| r.weight == 0) {
            return Err(GatewardenError::Config(format!(
                "weight for pattern '{}' must be positive",
                rule.pattern
            )));
        }
        self.strategy_kind()?;
        self.backend_kind()?;
        Ok(())
    }
}
