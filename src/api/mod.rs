// src/api/mod.rs
//! Upstream API access for the football data services:
//! - Response caching with TTL and bounded size
//! - Priority queueing with spacing and concurrency limits
//! - Bounded retry with requeue and rate-limit cooldown
//! - HTTP client for API-Football style upstreams

pub mod cache;
mod dispatcher;
pub mod governor;
pub mod queue;
pub mod stats;
pub mod upstream;

pub use cache::{cache_key, params, CacheMetrics, RequestParams, ResponseCache};
pub use governor::{Governor, Invalidation, RequestOptions};
pub use queue::{Execute, Priority};
pub use stats::GovernorStats;
pub use upstream::{interpret_response, response_payload, ApiFootballClient, Upstream};
