//! HTTP transport error types.

/// Transport-level HTTP failure (connection reset, timeout, TLS) with source location.
///
/// This never carries an HTTP status: a response that arrived, whatever its
/// status, is not a transport failure.
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("HTTP Error: {} at line {} in {}", message, line, file)]
pub struct HttpError {
    /// The underlying error message
    pub message: String,
    /// Line number where the error occurred
    pub line: u32,
    /// File where the error occurred
    pub file: &'static str,
}

impl HttpError {
    /// Create a new HttpError with the given message at the current location.
    ///
    /// # Examples
    ///
    /// ```
    /// use cordial_error::HttpError;
    ///
    /// let err = HttpError::new("Connection reset by peer");
    /// assert!(err.message.contains("Connection reset"));
    /// ```
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        let location = std::panic::Location::caller();
        Self {
            message: message.into(),
            line: location.line(),
            file: location.file(),
        }
    }
}
