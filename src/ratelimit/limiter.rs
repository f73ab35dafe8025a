//! The rate limiter that wires configuration into a store and a strategy.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

use super::identity::{resolve_identity, IdentifierFn, RequestInfo};
use super::response::{default_rejection_body, retry_after_secs, OnLimitFn, RateLimitHeaders, Verdict};
use super::strategy::{build_strategy, Decision, Strategy, StrategyKind, StrategyParams};
use super::weight::{PathWeights, DEFAULT_WEIGHT};
use crate::clock::{Clock, SystemClock};
use crate::config::GatewardenConfig;
use crate::error::Result;
use crate::store::{BackendKind, KvClient, MemoryStore, NetworkedStore, Store};

/// Custom path weighting, replacing the configured rules entirely.
pub type WeightFn = Arc<dyn Fn(&str) -> u64 + Send + Sync>;

/// Injections that cannot live in a serialized configuration.
#[derive(Clone, Default)]
pub struct LimiterOptions {
    /// Required for the networked backend
    pub client: Option<Arc<dyn KvClient>>,
    pub identifier: Option<IdentifierFn>,
    pub weight: Option<WeightFn>,
    pub on_limit: Option<OnLimitFn>,
    /// Defaults to [`SystemClock`]
    pub clock: Option<Arc<dyn Clock>>,
}

impl std::fmt::Debug for LimiterOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimiterOptions")
            .field("client", &self.client.is_some())
            .field("identifier", &self.identifier.is_some())
            .field("weight", &self.weight.is_some())
            .field("on_limit", &self.on_limit.is_some())
            .field("clock", &self.clock)
            .finish()
    }
}

impl LimiterOptions {
    pub fn with_client(mut self, client: Arc<dyn KvClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_identifier(mut self, identifier: IdentifierFn) -> Self {
        self.identifier = Some(identifier);
        self
    }

    pub fn with_weight(mut self, weight: WeightFn) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_on_limit(mut self, on_limit: OnLimitFn) -> Self {
        self.on_limit = Some(on_limit);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }
}

/// Admission engine for one configured quota.
///
/// This struct is thread-safe and can be shared across request handlers.
/// Decisions take no lock of their own; consistency under contention is
/// whatever the store provides.
pub struct RateLimiter {
    config: GatewardenConfig,
    backend_kind: BackendKind,
    store: Arc<dyn Store>,
    strategy: Arc<dyn Strategy>,
    weights: PathWeights,
    weight_override: Option<WeightFn>,
    identifier: Option<IdentifierFn>,
    on_limit: Option<OnLimitFn>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("limit", &self.config.limit)
            .field("window_ms", &self.config.window_ms)
            .field("strategy", &self.strategy.kind())
            .field("backend", &self.backend_kind)
            .field("store", &self.store)
            .finish()
    }
}

impl RateLimiter {
    /// Create a rate limiter from configuration alone.
    pub fn new(config: GatewardenConfig) -> Result<Self> {
        Self::with_options(config, LimiterOptions::default())
    }

    /// Create a rate limiter, failing on any configuration error.
    ///
    /// A local store's sweeper is started on the current tokio runtime, if any.
    pub fn with_options(config: GatewardenConfig, options: LimiterOptions) -> Result<Self> {
        config.validate()?;
        let strategy_kind = config.strategy_kind()?;
        let backend_kind = config.backend_kind()?;
        let clock = options
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);

        let store: Arc<dyn Store> = match backend_kind {
            BackendKind::Memory => Arc::new(MemoryStore::with_sweeper(
                config.key_prefix.clone(),
                clock.clone(),
                Duration::from_millis(config.sweep_interval_ms()),
            )),
            BackendKind::Networked => Arc::new(NetworkedStore::new(
                options.client,
                config.key_prefix.clone(),
            )?),
        };

        let strategy = build_strategy(
            strategy_kind,
            StrategyParams {
                store: store.clone(),
                limit: config.limit,
                window_ms: config.window_ms,
                clock: clock.clone(),
            },
        );

        info!(
            strategy = %strategy_kind,
            backend = %backend_kind,
            limit = config.limit,
            window_ms = config.window_ms,
            weight_rules = config.weight_by_path.len(),
            "Rate limiter initialized"
        );

        Ok(Self {
            weights: PathWeights::new(&config.weight_by_path),
            config,
            backend_kind,
            store,
            strategy,
            weight_override: options.weight,
            identifier: options.identifier,
            on_limit: options.on_limit,
            clock,
        })
    }

    pub fn limit(&self) -> u64 {
        self.config.limit
    }

    pub fn window_ms(&self) -> u64 {
        self.config.window_ms
    }

    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend_kind
    }

    pub fn config(&self) -> &GatewardenConfig {
        &self.config
    }

    /// Weight charged for a request to `path`.
    pub fn weight_for(&self, path: &str) -> u64 {
        if let Some(weight) = &self.weight_override {
            return weight(path);
        }
        if !self.weights.is_enabled() {
            return DEFAULT_WEIGHT;
        }
        self.weights.resolve(path)
    }

    /// Identity a request is tracked under.
    pub fn identity_for(&self, request: &RequestInfo) -> String {
        match &self.identifier {
            Some(identifier) => identifier(request),
            None => resolve_identity(request, self.config.identity_source, self.config.trust_proxy),
        }
    }

    /// Decide whether `identity` may make a request to `path`.
    ///
    /// Store failures are returned as-is; the caller picks fail-open or fail-closed.
    pub async fn decide(&self, identity: &str, path: &str) -> Result<Decision> {
        let weight = self.weight_for(path);
        trace!(identity = %identity, path = %path, weight, "Deciding");
        self.decide_weighted(identity, weight).await
    }

    /// Decide with an explicit weight, bypassing path rules.
    pub async fn decide_weighted(&self, identity: &str, weight: u64) -> Result<Decision> {
        let decision = self.strategy.consume(identity, weight).await?;
        if decision.limited {
            debug!(
                identity = %identity,
                weight,
                reset_time = decision.reset_time,
                strategy = %self.strategy.kind(),
                "Request rate limited"
            );
        }
        Ok(decision)
    }

    /// Resolve identity and weight for `request` and turn the decision into a verdict.
    pub async fn check(&self, request: &RequestInfo) -> Result<Verdict> {
        let identity = self.identity_for(request);
        let decision = self.decide(&identity, &request.path).await?;
        let headers = self
            .config
            .headers
            .then(|| RateLimitHeaders::new(self.config.limit, &decision));

        if !decision.limited {
            return Ok(Verdict::Admit { decision, headers });
        }

        let retry_after = retry_after_secs(decision.reset_time, self.clock.now_millis());
        let body = match &self.on_limit {
            Some(on_limit) => on_limit(&decision, request),
            None => default_rejection_body(self.config.limit, &decision, retry_after),
        };

        Ok(Verdict::Reject {
            decision,
            headers,
            retry_after,
            body,
        })
    }

    /// Forget `identity`'s usage so its next request starts a fresh quota.
    pub async fn reset_key(&self, identity: &str) -> Result<()> {
        debug!(identity = %identity, "Resetting rate limit key");
        self.strategy.reset_key(identity).await
    }

    /// Forget every identity's usage.
    pub async fn reset_all(&self) -> Result<()> {
        info!(prefix = %self.config.key_prefix, "Resetting all rate limit state");
        self.strategy.reset_all().await
    }

    /// Stop background work owned by the store. Safe to call more than once.
    pub fn shutdown(&self) {
        self.store.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::GatewardenError;
    use crate::store::testing::FakeKv;
    use futures::future::join_all;
    use serde_json::json;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio_test::assert_ok;

    fn limiter(config: GatewardenConfig, clock: &ManualClock) -> RateLimiter {
        let options = LimiterOptions::default().with_clock(Arc::new(clock.clone()));
        RateLimiter::with_options(config, options).unwrap()
    }

    fn request(path: &str) -> RequestInfo {
        RequestInfo::new(path).with_remote_addr(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)))
    }

    #[test]
    fn test_unknown_strategy_fails_construction() {
        let result = RateLimiter::new(GatewardenConfig::default().with_strategy("gcra"));
        assert!(matches!(result, Err(GatewardenError::Config(_))));
    }

    #[test]
    fn test_networked_without_client_fails_construction() {
        let result = RateLimiter::new(GatewardenConfig::default().with_backend("networked"));
        assert!(matches!(result, Err(GatewardenError::Config(_))));
    }

    #[tokio::test]
    async fn test_creation_reports_configuration() {
        let limiter = RateLimiter::new(GatewardenConfig::new(10, 1000).with_strategy("token")).unwrap();
        assert_eq!(limiter.limit(), 10);
        assert_eq!(limiter.window_ms(), 1000);
        assert_eq!(limiter.strategy_kind(), StrategyKind::TokenBucket);
        assert_eq!(limiter.backend_kind(), BackendKind::Memory);
        limiter.shutdown();
        limiter.shutdown();
    }

    #[tokio::test]
    async fn test_consumed_matches_outcome_for_every_strategy() {
        for strategy in ["fixed", "sliding", "token"] {
            let clock = ManualClock::new(100_000);
            let limiter = limiter(GatewardenConfig::new(3, 1000).with_strategy(strategy), &clock);

            for _ in 0..6 {
                let decision = limiter.decide_weighted("client", 2).await.unwrap();
                if decision.limited {
                    assert_eq!(decision.consumed, 0, "{} rejected with consumption", strategy);
                } else {
                    assert_eq!(decision.consumed, 2, "{} admitted wrong weight", strategy);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_reset_key_always_readmits() {
        for strategy in ["fixed", "sliding", "token"] {
            let clock = ManualClock::new(100_500);
            let limiter = limiter(GatewardenConfig::new(2, 1000).with_strategy(strategy), &clock);

            limiter.decide("client", "/").await.unwrap();
            limiter.decide("client", "/").await.unwrap();
            assert!(limiter.decide("client", "/").await.unwrap().limited);

            assert_ok!(limiter.reset_key("client").await);
            assert!(!limiter.decide("client", "/").await.unwrap().limited, "{}", strategy);
        }
    }

    #[tokio::test]
    async fn test_reset_all() {
        let clock = ManualClock::new(0);
        let limiter = limiter(GatewardenConfig::new(1, 1000), &clock);

        limiter.decide("a", "/").await.unwrap();
        limiter.decide("b", "/").await.unwrap();
        limiter.reset_all().await.unwrap();

        assert!(!limiter.decide("a", "/").await.unwrap().limited);
        assert!(!limiter.decide("b", "/").await.unwrap().limited);
    }

    #[tokio::test]
    async fn test_path_weights_are_charged() {
        let clock = ManualClock::new(0);
        let config = GatewardenConfig::new(10, 1000)
            .with_weight("/api/a", 5)
            .with_weight("/api/*", 2);
        let limiter = limiter(config, &clock);

        assert_eq!(limiter.weight_for("/api/a"), 5);
        assert_eq!(limiter.weight_for("/api/b"), 2);
        assert_eq!(limiter.weight_for("/other"), 1);

        let decision = limiter.decide("client", "/api/a").await.unwrap();
        assert_eq!(decision.consumed, 5);
        assert_eq!(decision.remaining, 5);

        let decision = limiter.decide("client", "/api/b").await.unwrap();
        assert_eq!(decision.remaining, 3);

        let decision = limiter.decide("client", "/api/a").await.unwrap();
        assert!(decision.limited);
    }

    #[tokio::test]
    async fn test_weight_override() {
        let clock = ManualClock::new(0);
        let options = LimiterOptions::default()
            .with_clock(Arc::new(clock.clone()))
            .with_weight(Arc::new(|path: &str| path.len() as u64));
        let limiter = RateLimiter::with_options(GatewardenConfig::new(10, 1000).with_weight("/abc", 9), options).unwrap();

        assert_eq!(limiter.weight_for("/abc"), 4);
    }

    #[tokio::test]
    async fn test_check_builds_headers_and_default_body() {
        let clock = ManualClock::new(10_250);
        let limiter = limiter(GatewardenConfig::new(1, 1000), &clock);

        let verdict = limiter.check(&request("/")).await.unwrap();
        assert!(verdict.is_admitted());
        assert_eq!(
            verdict.header_pairs(),
            vec![
                ("X-RateLimit-Limit", "1".to_string()),
                ("X-RateLimit-Remaining", "0".to_string()),
                ("X-RateLimit-Reset", "11".to_string()),
            ]
        );

        match limiter.check(&request("/")).await.unwrap() {
            Verdict::Reject {
                decision,
                retry_after,
                body,
                ..
            } => {
                assert_eq!(decision.reset_time, 11_000);
                assert_eq!(retry_after, 1);
                assert_eq!(body["retryAfter"], 1);
                assert_eq!(body["error"], "Too Many Requests");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_on_limit_override_sees_same_reset_time() {
        let clock = ManualClock::new(0);
        let options = LimiterOptions::default()
            .with_clock(Arc::new(clock.clone()))
            .with_on_limit(Arc::new(|decision: &Decision, request: &RequestInfo| {
                json!({ "path": request.path, "resetAt": decision.reset_time })
            }));
        let mut config = GatewardenConfig::new(1, 1000);
        config.headers = false;
        let limiter = RateLimiter::with_options(config, options).unwrap();

        limiter.check(&request("/x")).await.unwrap();
        let verdict = limiter.check(&request("/x")).await.unwrap();

        assert_eq!(verdict.decision().reset_time, 1000);
        match verdict {
            Verdict::Reject { body, headers, .. } => {
                assert!(headers.is_none());
                assert_eq!(body, json!({ "path": "/x", "resetAt": 1000 }));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_identifier_override() {
        let clock = ManualClock::new(0);
        let options = LimiterOptions::default()
            .with_clock(Arc::new(clock.clone()))
            .with_identifier(Arc::new(|request: &RequestInfo| {
                request.header("x-api-key").unwrap_or("anonymous").to_string()
            }));
        let limiter = RateLimiter::with_options(GatewardenConfig::new(1, 1000), options).unwrap();

        let first = request("/").with_header("X-Api-Key", "k1");
        let second = request("/").with_header("X-Api-Key", "k2");
        assert_eq!(limiter.identity_for(&first), "k1");

        assert!(limiter.check(&first).await.unwrap().is_admitted());
        assert!(limiter.check(&second).await.unwrap().is_admitted());
        assert!(!limiter.check(&first).await.unwrap().is_admitted());
    }

    #[tokio::test]
    async fn test_trust_proxy_changes_identity() {
        let clock = ManualClock::new(0);
        let mut config = GatewardenConfig::new(1, 1000);
        config.trust_proxy = true;
        let limiter = limiter(config, &clock);

        let via_proxy = request("/").with_header("X-Forwarded-For", "198.51.100.20");
        assert_eq!(limiter.identity_for(&via_proxy), "198.51.100.20");
    }

    #[tokio::test]
    async fn test_networked_backend() {
        let clock = ManualClock::new(5_000);
        let kv = Arc::new(FakeKv::new(clock.clone()));
        let client: Arc<dyn KvClient> = kv.clone();
        let options = LimiterOptions::default()
            .with_clock(Arc::new(clock.clone()))
            .with_client(client);
        let config = GatewardenConfig::new(2, 1000)
            .with_strategy("sliding")
            .with_backend("networked");
        let limiter = RateLimiter::with_options(config, options).unwrap();

        assert!(!limiter.decide("client", "/").await.unwrap().limited);
        assert!(kv.raw("ratelimit:client:5000").is_some());
        assert!(!limiter.decide("client", "/").await.unwrap().limited);
        assert!(limiter.decide("client", "/").await.unwrap().limited);

        limiter.reset_all().await.unwrap();
        assert!(kv.raw("ratelimit:client:5000").is_none());
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_to_caller() {
        let clock = ManualClock::new(0);
        let kv = Arc::new(FakeKv::new(clock.clone()));
        let client: Arc<dyn KvClient> = kv.clone();
        let options = LimiterOptions::default()
            .with_clock(Arc::new(clock.clone()))
            .with_client(client);
        let limiter = RateLimiter::with_options(GatewardenConfig::default().with_backend("redis"), options).unwrap();

        kv.set_failing(true);
        let err = limiter.decide("client", "/").await.unwrap_err();
        assert!(err.is_store_error());
    }

    #[tokio::test]
    async fn test_concurrent_decisions_share_quota() {
        let clock = ManualClock::new(0);
        let limiter = limiter(GatewardenConfig::new(10, 1000), &clock);

        let decisions = join_all((0..30).map(|_| limiter.decide("client", "/"))).await;
        let admitted = decisions
            .into_iter()
            .map(|d| d.unwrap())
            .filter(|d| !d.limited)
            .count();
        assert_eq!(admitted, 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_contention_never_under_admits() {
        let limiter = Arc::new(RateLimiter::new(GatewardenConfig::new(50, 60_000)).unwrap());

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    let mut admitted = 0u64;
                    for _ in 0..20 {
                        if !limiter.decide("shared", "/").await.unwrap().limited {
                            admitted += 1;
                        }
                    }
                    admitted
                })
            })
            .collect();

        let admitted: u64 = join_all(tasks).await.into_iter().map(|r| r.unwrap()).sum();
        // Racing read-modify-writes can over-admit, never under-admit.
        assert!(admitted >= 50);
        limiter.shutdown();
    }
}
