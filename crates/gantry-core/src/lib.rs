//! Gantry Core Resilience Primitives
//!
//! This crate provides the coordination primitives composed by the Gantry
//! gateway's request pipeline:
//!
//! - [`ratelimit`] - sharded token-bucket / sliding-window rate limiting
//! - [`cache`] - bounded response cache with TTL and LRU eviction
//! - [`coalesce`] - singleflight deduplication of identical requests
//! - [`breaker`] - circuit breaker with EMA health scoring
//!
//! Each primitive is a concurrent shared-state component; the crate also
//! defines the shared [`error::GatewayError`] taxonomy and the buffered
//! [`response::ProxyResponse`] representation that flows between them.

pub mod breaker;
pub mod cache;
pub mod coalesce;
pub mod error;
pub mod health;
pub mod ratelimit;
pub mod response;

pub use breaker::{BreakerState, BreakerStats, CircuitBreaker};
pub use cache::{cache_key, CacheStats, ResponseCache};
pub use coalesce::Coalescer;
pub use error::{GatewayError, Result};
pub use health::HealthTracker;
pub use ratelimit::{Decision, RateLimiter};
pub use response::ProxyResponse;
