//! Retry classification shared by REST and gateway errors.

/// Errors that can say whether trying again may help.
///
/// # Examples
///
/// ```
/// use cordial_error::{RestError, RestErrorKind, RetryableError};
///
/// let err = RestError::new(RestErrorKind::Transient {
///     status: Some(502),
///     attempts: 4,
///     message: "Bad Gateway".to_string(),
/// });
/// assert!(err.is_retryable());
/// ```
pub trait RetryableError {
    /// Returns true when the operation may succeed on a later attempt.
    ///
    /// Server errors, dropped connections and timeouts are retryable.
    /// Client errors such as 400, 403 or 404 are not.
    fn is_retryable(&self) -> bool;
}
