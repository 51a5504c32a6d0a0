//! Rate-limit signals carried by API responses.
//!
//! The server reports bucket state on every response through headers:
//! - `X-RateLimit-Limit`: requests allowed per window
//! - `X-RateLimit-Remaining`: requests left in the current window
//! - `X-RateLimit-Reset-After`: seconds (fractional) until the window resets
//! - `X-RateLimit-Bucket`: opaque bucket hash shared across routes
//! - `X-RateLimit-Global`: present on a 429 caused by the global limit
//! - `X-RateLimit-Scope`: `user`, `global` or `shared`
//!
//! A 429 body additionally carries `retry_after` (seconds) and `global`.

use reqwest::header::HeaderMap;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, trace};

/// Body of a 429 response.
#[derive(Debug, Deserialize)]
struct RateLimitedBody {
    retry_after: f64,
    #[serde(default)]
    global: bool,
}

/// Parsed rate-limit data from a single response.
///
/// Every field is optional: absence means "no information", never "reset".
///
/// # Example
///
/// ```
/// use cordial_rate_limit::RateLimitHeaders;
/// use reqwest::header::{HeaderMap, HeaderValue};
/// use std::time::Duration;
///
/// let mut headers = HeaderMap::new();
/// headers.insert("x-ratelimit-limit", HeaderValue::from_static("5"));
/// headers.insert("x-ratelimit-remaining", HeaderValue::from_static("4"));
/// headers.insert("x-ratelimit-reset-after", HeaderValue::from_static("1.5"));
///
/// let parsed = RateLimitHeaders::from_headers(&headers);
/// assert_eq!(parsed.limit, Some(5));
/// assert_eq!(parsed.remaining, Some(4));
/// assert_eq!(parsed.reset_after, Some(Duration::from_millis(1500)));
/// assert!(!parsed.global);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
    /// Requests allowed per window
    pub limit: Option<u32>,
    /// Requests left in the current window
    pub remaining: Option<u32>,
    /// Time until the window resets, relative to when the response was observed
    pub reset_after: Option<Duration>,
    /// Server-assigned bucket hash
    pub bucket: Option<String>,
    /// The limit that was hit is the API-wide one
    pub global: bool,
    /// Authoritative delay from a 429
    pub retry_after: Option<Duration>,
}

impl RateLimitHeaders {
    /// Parse rate-limit headers.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let global = parse_header::<String>(headers, "x-ratelimit-global")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
            || parse_header::<String>(headers, "x-ratelimit-scope")
                .map(|v| v.eq_ignore_ascii_case("global"))
                .unwrap_or(false);

        let parsed = Self {
            limit: parse_header(headers, "x-ratelimit-limit"),
            remaining: parse_header(headers, "x-ratelimit-remaining"),
            reset_after: parse_seconds(headers, "x-ratelimit-reset-after"),
            bucket: parse_header(headers, "x-ratelimit-bucket"),
            global,
            retry_after: parse_seconds(headers, "retry-after"),
        };
        trace!(?parsed, "Parsed rate limit headers");
        parsed
    }

    /// Merge the JSON body of a 429 response.
    ///
    /// The body's `retry_after` wins over the `Retry-After` header because it
    /// carries sub-second precision.
    pub fn with_rate_limited_body(mut self, body: &[u8]) -> Self {
        match serde_json::from_slice::<RateLimitedBody>(body) {
            Ok(parsed) => {
                if let Ok(retry_after) = Duration::try_from_secs_f64(parsed.retry_after) {
                    self.retry_after = Some(retry_after);
                }
                self.global |= parsed.global;
            }
            Err(e) => debug!(error = %e, "429 body did not carry retry_after"),
        }
        self
    }

    /// Whether the response said anything about the bucket window.
    pub fn has_bucket_data(&self) -> bool {
        self.limit.is_some() || self.remaining.is_some() || self.reset_after.is_some()
    }
}

/// Helper to parse a typed value from a header.
fn parse_header<T: FromStr>(headers: &HeaderMap, key: &str) -> Option<T> {
    headers.get(key)?.to_str().ok()?.trim().parse().ok()
}

/// Helper to parse a fractional seconds header into a duration.
fn parse_seconds(headers: &HeaderMap, key: &str) -> Option<Duration> {
    let secs: f64 = parse_header(headers, key)?;
    Duration::try_from_secs_f64(secs).ok()
}
