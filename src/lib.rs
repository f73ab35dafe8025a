//! Gatewarden - request admission engine
//!
//! This crate decides, per request, whether a caller identity may consume
//! more of a shared quota. It tracks weighted usage with a fixed window,
//! sliding window or token bucket strategy over a local or networked store,
//! and leaves HTTP framework glue to the embedding application.

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod ratelimit;
pub mod store;

pub use crate::config::GatewardenConfig;
pub use error::{GatewardenError, Result};
pub use ratelimit::{Decision, LimiterOptions, RateLimiter, RequestInfo, Verdict};
