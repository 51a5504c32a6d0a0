//! Errors raised by gateway sessions.

use crate::RetryableError;

/// Gateway failure conditions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum GatewayErrorKind {
    /// Could not open the websocket link
    #[display("WebSocket connection failed: {}", _0)]
    Connection(String),
    /// Server closed the link with a close frame
    #[display("Gateway closed with code {}: {}", code, reason)]
    Closed {
        /// Websocket close code
        code: u16,
        /// Close reason supplied by the server
        reason: String,
    },
    /// Hello or handshake acknowledgment never arrived
    #[display("Gateway handshake failed: {}", _0)]
    Handshake(String),
    /// Frame could not be decoded or encoded
    #[display("Invalid gateway payload: {}", _0)]
    InvalidPayload(String),
    /// Two consecutive heartbeats went unacknowledged
    #[display("Heartbeat acknowledgment timed out")]
    HeartbeatTimeout,
    /// Shard index out of range for the configured shard count
    #[display("Invalid shard {} of {}", index, count)]
    InvalidShard {
        /// Shard index
        index: u32,
        /// Shard count
        count: u32,
    },
    /// No running session for the requested shard
    #[display("No session for shard {}", _0)]
    UnknownShard(u32),
    /// Session or group has been shut down
    #[display("Gateway session is shut down")]
    Shutdown,
}

impl GatewayErrorKind {
    /// Whether reconnecting can recover from this condition.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayErrorKind::Connection(_)
            | GatewayErrorKind::Handshake(_)
            | GatewayErrorKind::HeartbeatTimeout => true,
            GatewayErrorKind::Closed { code, .. } => !is_fatal_close_code(*code),
            _ => false,
        }
    }
}

/// Close codes after which reconnecting is pointless.
///
/// 4004 authentication failed, 4010 invalid shard, 4011 sharding required,
/// 4012 invalid API version, 4013 invalid intents, 4014 disallowed intents.
pub fn is_fatal_close_code(code: u16) -> bool {
    matches!(code, 4004 | 4010 | 4011 | 4012 | 4013 | 4014)
}

/// Gateway error with source location tracking.
///
/// # Examples
///
/// ```
/// use cordial_error::{GatewayError, GatewayErrorKind, RetryableError};
///
/// let err = GatewayError::new(GatewayErrorKind::Closed {
///     code: 4004,
///     reason: "Authentication failed.".to_string(),
/// });
/// assert!(!err.is_retryable());
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Gateway Error: {} at line {} in {}", kind, line, file)]
pub struct GatewayError {
    /// The kind of error that occurred
    pub kind: GatewayErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl GatewayError {
    /// Create a new GatewayError with automatic location tracking.
    #[track_caller]
    pub fn new(kind: GatewayErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }
}

impl RetryableError for GatewayError {
    fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;
