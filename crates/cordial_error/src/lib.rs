//! Error types for the Cordial client.
//!
//! # Error Hierarchy
//!
//! All errors follow the `ErrorKind` + wrapper struct pattern:
//! - `*ErrorKind` enum defines specific error conditions
//! - `*Error` struct wraps the kind with source location tracking
//! - All errors use `#[track_caller]` for automatic location capture
//!
//! Request failures distinguish "may succeed on retry" from "will not
//! succeed unmodified" through [`RetryableError`].
//!
//! # Examples
//!
//! ```
//! use cordial_error::{CordialResult, HttpError};
//!
//! fn fetch_data() -> CordialResult<String> {
//!     Err(HttpError::new("Connection refused"))?
//! }
//!
//! match fetch_data() {
//!     Ok(data) => println!("Got: {}", data),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod builder;
mod config;
mod error;
mod gateway;
mod http;
mod rest;
mod retry;

pub use builder::{BuilderError, BuilderErrorKind};
pub use config::ConfigError;
pub use error::{CordialError, CordialErrorKind, CordialResult};
pub use gateway::{GatewayError, GatewayErrorKind, GatewayResult, is_fatal_close_code};
pub use http::HttpError;
pub use rest::{RestError, RestErrorKind, RestResult};
pub use retry::RetryableError;
