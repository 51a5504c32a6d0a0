//! Cordial - rate-limit-aware API client core
//!
//! Cordial keeps a bot inside a chat platform's rate limits and connected to
//! its real-time gateway:
//!
//! - **Request router**: per-bucket FIFO lanes, a global limiter, 429
//!   handling and bounded retries for transient failures
//! - **Gateway sessions**: heartbeats, zombie detection, resume after drops
//!   and cold restarts when the server discards a session
//! - **Sharding**: a session group runs many shards under one shared
//!   identify budget
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use cordial::{CordialClient, Payload, init_tracing, routes};
//!
//! #[tokio::main]
//! async fn main() -> cordial::CordialResult<()> {
//!     init_tracing()?;
//!     let client = CordialClient::from_env()?;
//!
//!     let route = routes::MESSAGE_CREATE.bind(&["123456789"])?;
//!     client
//!         .router()
//!         .submit(route, Payload::json(serde_json::json!({"content": "hello"})))
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - `cordial_error` - Error types
//! - `cordial_rate_limit` - Buckets, limiters, backoff and configuration
//! - `cordial_rest` - Request router and HTTP transport
//! - `cordial_gateway` - Gateway sessions and session groups
//!
//! This crate re-exports everything for convenience.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod telemetry;

pub use client::{CordialClient, TOKEN_VAR};
pub use telemetry::{
    DEFAULT_FILTER, TelemetryConfig, init_json_tracing, init_tracing, init_tracing_with_config,
};

pub use cordial_error::*;
pub use cordial_gateway::*;
pub use cordial_rate_limit::*;
pub use cordial_rest::*;
