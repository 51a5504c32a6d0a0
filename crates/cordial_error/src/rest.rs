//! Errors surfaced by the rate-limited request router.

use crate::RetryableError;

/// Terminal outcomes of a routed request that did not succeed.
///
/// Rate-limit deferrals (HTTP 429) never show up here: the router absorbs
/// them by waiting and re-dispatching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub enum RestErrorKind {
    /// Client error other than 429. Will not succeed unmodified.
    #[display("HTTP {} error: {}", status, body)]
    Permanent {
        /// HTTP status code
        status: u16,
        /// Raw error payload returned by the server
        body: String,
    },
    /// Server error or transport failure that outlived the retry budget.
    #[display("Transient failure after {} attempts: {}", attempts, message)]
    Transient {
        /// Last HTTP status seen, if the server answered at all
        status: Option<u16>,
        /// Number of dispatch attempts made
        attempts: u32,
        /// Description of the last failure
        message: String,
    },
    /// Cancelled by the caller before it was dispatched
    #[display("Request cancelled before dispatch")]
    Cancelled,
    /// The router stopped before the request was dispatched
    #[display("Router is shut down")]
    Shutdown,
    /// The bucket queue reached its configured capacity
    #[display("Request queue for bucket {} is full ({} pending)", bucket, capacity)]
    QueueFull {
        /// Bucket key of the saturated lane
        bucket: String,
        /// Configured capacity
        capacity: usize,
    },
    /// Route template and parameters did not line up
    #[display("Invalid route: {}", _0)]
    InvalidRoute(String),
    /// Response body could not be decoded into the requested type
    #[display("Failed to decode response body: {}", _0)]
    Decode(String),
}

impl RestErrorKind {
    /// Whether the same request may succeed if submitted again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RestErrorKind::Transient { .. } | RestErrorKind::QueueFull { .. }
        )
    }

    /// HTTP status associated with the failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            RestErrorKind::Permanent { status, .. } => Some(*status),
            RestErrorKind::Transient { status, .. } => *status,
            _ => None,
        }
    }
}

/// Request router error with source location tracking.
///
/// # Examples
///
/// ```
/// use cordial_error::{RestError, RestErrorKind, RetryableError};
///
/// let err = RestError::new(RestErrorKind::Permanent {
///     status: 403,
///     body: r#"{"message": "Missing Access", "code": 50001}"#.to_string(),
/// });
/// assert!(!err.is_retryable());
/// assert_eq!(err.kind.status(), Some(403));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("REST Error: {} at line {} in {}", kind, line, file)]
pub struct RestError {
    /// The kind of error that occurred
    pub kind: RestErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl RestError {
    /// Create a new RestError with automatic location tracking.
    #[track_caller]
    pub fn new(kind: RestErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }
}

impl RetryableError for RestError {
    fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Result type for router operations.
pub type RestResult<T> = std::result::Result<T, RestError>;
