//! Rate limiting primitives for the Cordial client.
//!
//! The request router and the gateway share these building blocks:
//! - [`Route`] and [`BucketKey`] identify which limit a request counts against
//! - [`RateLimitBucket`] tracks one server-reported window
//! - [`GlobalRateLimiter`] gates every bucket at once
//! - [`IdentifyLimiter`] paces cold gateway session starts
//! - [`Backoff`] computes capped exponential retry delays
//!
//! All time-dependent state uses the Tokio clock, so tests can pause and
//! advance time deterministically.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod backoff;
mod bucket;
mod config;
mod global;
mod headers;
mod identify;
mod route;

pub use backoff::Backoff;
pub use bucket::{Admission, RateLimitBucket};
pub use config::{CordialConfig, GatewayConfig, RestConfig};
pub use global::{GlobalPermit, GlobalRateLimiter};
pub use headers::RateLimitHeaders;
pub use identify::IdentifyLimiter;
pub use route::{BucketKey, Route};
