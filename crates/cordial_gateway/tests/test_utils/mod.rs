//! Test utilities for gateway session tests.
//!
//! This module provides an in-memory gateway whose links are driven by the
//! test, plus a canned `/gateway/bot` HTTP transport.

pub mod mock_gateway;

#[allow(unused_imports)]
pub use mock_gateway::{GatewayBotTransport, MockGatewayTransport, MockServer, Sent};
