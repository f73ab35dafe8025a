//! Rate limiting logic: counting strategies, request resolvers and the limiter.

mod fixed_window;
mod identity;
mod limiter;
mod response;
mod sliding_window;
mod strategy;
mod token_bucket;
mod weight;

pub use fixed_window::FixedWindow;
pub use identity::{resolve_identity, IdentifierFn, IdentitySource, RequestInfo, UNKNOWN_IDENTITY};
pub use limiter::{LimiterOptions, RateLimiter, WeightFn};
pub use response::{
    default_rejection_body, retry_after_secs, OnLimitFn, RateLimitHeaders, Verdict, HEADER_LIMIT,
    HEADER_REMAINING, HEADER_RESET, HEADER_RETRY_AFTER,
};
pub use sliding_window::SlidingWindow;
pub use strategy::{build_strategy, Decision, Strategy, StrategyKind, StrategyParams};
pub use token_bucket::TokenBucketStrategy;
pub use weight::{PathWeightRule, PathWeights, DEFAULT_WEIGHT};
