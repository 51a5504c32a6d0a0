//! The HTTP seam between the router and the network.

use async_trait::async_trait;
use bytes::Bytes;
use cordial_error::{HttpError, RestError, RestErrorKind, RestResult};
use cordial_rate_limit::{RateLimitHeaders, RestConfig, Route};
use derive_getters::Getters;
use reqwest::header::{AUTHORIZATION, HeaderMap};
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, trace};

/// Request body and per-request options.
#[derive(Debug, Clone, Default, Getters)]
pub struct Payload {
    /// JSON body, if any
    body: Option<serde_json::Value>,
    /// Reason recorded in the guild audit log
    audit_reason: Option<String>,
}

impl Payload {
    /// A request without a body.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A request with a JSON body.
    pub fn json(body: serde_json::Value) -> Self {
        Self {
            body: Some(body),
            audit_reason: None,
        }
    }

    /// Attach an audit log reason.
    pub fn with_audit_reason(mut self, reason: impl Into<String>) -> Self {
        self.audit_reason = Some(reason.into());
        self
    }
}

/// A response as seen by the router.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: u16,
    headers: HeaderMap,
    body: Bytes,
}

impl HttpResponse {
    /// Create a response.
    pub fn new(status: u16, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// HTTP status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Raw response body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// True for 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Rate-limit data carried by the headers.
    pub fn rate_limit(&self) -> RateLimitHeaders {
        RateLimitHeaders::from_headers(&self.headers)
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> RestResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            RestError::new(RestErrorKind::Decode(format!(
                "Failed to decode {} byte response: {}",
                self.body.len(),
                e
            )))
        })
    }

    /// Body as lossy UTF-8, for error reporting.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends a single request and returns whatever the server said.
///
/// Implementations never interpret status codes; rate limits, retries and
/// error mapping belong to the router. A transport error means no response
/// was received.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Perform one HTTP exchange.
    async fn execute(&self, route: &Route, payload: &Payload) -> Result<HttpResponse, HttpError>;
}

#[async_trait]
impl<T: HttpTransport + ?Sized> HttpTransport for std::sync::Arc<T> {
    async fn execute(&self, route: &Route, payload: &Payload) -> Result<HttpResponse, HttpError> {
        (**self).execute(route, payload).await
    }
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    base_url: String,
    authorization: String,
}

impl ReqwestTransport {
    /// Create a transport authenticated with a bot token.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(token: &str, config: &RestConfig) -> Result<Self, HttpError> {
        let client = Client::builder()
            .user_agent(config.user_agent().as_str())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| HttpError::new(format!("Failed to build HTTP client: {}", e)))?;

        debug!(base_url = %config.base_url(), "Creating HTTP transport");
        Ok(Self {
            client,
            base_url: config.base_url().trim_end_matches('/').to_string(),
            authorization: format!("Bot {}", token),
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    #[instrument(skip(self, payload), fields(method = %route.method(), path = %route.path()))]
    async fn execute(&self, route: &Route, payload: &Payload) -> Result<HttpResponse, HttpError> {
        let url = format!("{}{}", self.base_url, route.path());

        let mut request = self
            .client
            .request(route.method().clone(), &url)
            .header(AUTHORIZATION, &self.authorization);

        if let Some(reason) = payload.audit_reason() {
            request = request.header("X-Audit-Log-Reason", reason);
        }
        if let Some(body) = payload.body() {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| HttpError::new(format!("Request to {} failed: {}", route.path(), e)))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| HttpError::new(format!("Failed to read response body: {}", e)))?;

        trace!(status, bytes = body.len(), "Received response");
        Ok(HttpResponse::new(status, headers, body))
    }
}
