//! Test utilities for router tests.
//!
//! This module provides a scriptable transport and response helpers.

pub mod mock_transport;

#[allow(unused_imports)]
pub use mock_transport::{Call, MockTransport, bucket_response, ok_response, response};
