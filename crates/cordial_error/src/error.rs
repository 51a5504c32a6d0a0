//! Top-level error wrapper types.

use crate::{BuilderError, ConfigError, GatewayError, HttpError, RestError};

/// Every error the Cordial crates can produce.
///
/// # Examples
///
/// ```
/// use cordial_error::{CordialError, HttpError};
///
/// let http_err = HttpError::new("Connection failed");
/// let err: CordialError = http_err.into();
/// assert!(format!("{}", err).contains("HTTP Error"));
/// ```
#[derive(Debug, derive_more::From, derive_more::Display, derive_more::Error)]
pub enum CordialErrorKind {
    /// HTTP transport error
    #[from(HttpError)]
    Http(HttpError),
    /// Configuration error
    #[from(ConfigError)]
    Config(ConfigError),
    /// Builder error
    #[from(BuilderError)]
    Builder(BuilderError),
    /// Request router error
    #[from(RestError)]
    Rest(RestError),
    /// Gateway session error
    #[from(GatewayError)]
    Gateway(GatewayError),
}

/// Cordial error with kind discrimination.
///
/// # Examples
///
/// ```
/// use cordial_error::{CordialResult, ConfigError};
///
/// fn might_fail() -> CordialResult<()> {
///     Err(ConfigError::new("Missing field"))?
/// }
///
/// assert!(might_fail().is_err());
/// ```
#[derive(Debug, derive_more::Display, derive_more::Error)]
#[display("Cordial Error: {}", _0)]
pub struct CordialError(Box<CordialErrorKind>);

impl CordialError {
    /// Create a new error from a kind.
    pub fn new(kind: CordialErrorKind) -> Self {
        Self(Box::new(kind))
    }

    /// Get the error kind.
    pub fn kind(&self) -> &CordialErrorKind {
        &self.0
    }
}

impl<T> From<T> for CordialError
where
    T: Into<CordialErrorKind>,
{
    fn from(err: T) -> Self {
        Self::new(err.into())
    }
}

/// Result type for Cordial operations.
pub type CordialResult<T> = std::result::Result<T, CordialError>;
